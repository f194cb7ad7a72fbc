//! Scriptable in-memory connection manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use channel_pool::ConnectionManager;
use parking_lot::Mutex;
use thiserror::Error;

/// Mock manager errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MockError {
    /// A scripted connection failure.
    #[error("connection refused (scripted)")]
    ConnectRefused,
}

/// A fake connection handed out by [`MockManager`].
#[derive(Debug, PartialEq, Eq)]
pub struct MockConnection {
    id: u64,
    alive: bool,
}

impl MockConnection {
    /// Unique, increasing id assigned at creation (first connection is `1`).
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the connection passes health checks.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Break the connection so its next health check fails.
    pub fn kill(&mut self) {
        self.alive = false;
    }
}

#[derive(Default)]
struct MockState {
    next_id: AtomicU64,
    created: AtomicUsize,
    discarded: AtomicUsize,
    health_checks: AtomicUsize,
    failing_connects: AtomicUsize,
    failing_checks: AtomicUsize,
    connect_delay: Mutex<Option<Duration>>,
    check_delay: Mutex<Option<Duration>>,
}

/// In-memory [`ConnectionManager`] with counters and fault injection.
///
/// Clones share state, so a test can keep a clone while the pool owns the
/// other.
#[derive(Clone, Default)]
pub struct MockManager {
    state: Arc<MockState>,
}

impl MockManager {
    /// Create a manager whose connections are always healthy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Suspend for `delay` inside every `connect()`.
    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock() = Some(delay);
        self
    }

    /// Suspend for `delay` inside every health check.
    #[must_use]
    pub fn with_check_delay(self, delay: Duration) -> Self {
        *self.state.check_delay.lock() = Some(delay);
        self
    }

    /// Make the next `count` calls to `connect()` fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` health checks report the connection as dead.
    pub fn fail_next_checks(&self, count: usize) {
        self.state.failing_checks.store(count, Ordering::SeqCst);
    }

    /// Connections successfully created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.state.created.load(Ordering::SeqCst)
    }

    /// Connections the pool threw away.
    #[must_use]
    pub fn discarded(&self) -> usize {
        self.state.discarded.load(Ordering::SeqCst)
    }

    /// Health checks performed.
    #[must_use]
    pub fn health_checks(&self) -> usize {
        self.state.health_checks.load(Ordering::SeqCst)
    }

    /// Connections created and not yet discarded.
    #[must_use]
    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.discarded())
    }
}

impl std::fmt::Debug for MockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockManager")
            .field("created", &self.created())
            .field("discarded", &self.discarded())
            .field("health_checks", &self.health_checks())
            .finish()
    }
}

#[async_trait::async_trait]
impl ConnectionManager for MockManager {
    type Connection = MockConnection;
    type Error = MockError;

    async fn connect(&self) -> Result<MockConnection, MockError> {
        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if take_one(&self.state.failing_connects) {
            tracing::debug!("mock connect failing as scripted");
            return Err(MockError::ConnectRefused);
        }

        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection { id, alive: true })
    }

    async fn is_valid(&self, conn: &mut MockConnection) -> bool {
        self.state.health_checks.fetch_add(1, Ordering::SeqCst);
        let delay = *self.state.check_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if take_one(&self.state.failing_checks) {
            return false;
        }
        conn.alive
    }

    fn discard(&self, conn: MockConnection) {
        tracing::trace!(id = conn.id, "mock connection discarded");
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
    }
}

/// Decrement `counter` if positive; `true` if it was.
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
