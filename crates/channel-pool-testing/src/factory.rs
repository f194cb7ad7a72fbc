//! Pool factory producing mock-backed pools.

use channel_pool::{Pool, PoolConfig, PoolError, PoolFactory};
use parking_lot::Mutex;

use crate::mock::MockManager;

/// Per-channel configuration for [`MockFactory`].
#[derive(Debug, Clone, Default)]
pub struct MockChannelConfig {
    /// Configuration of the pool built for the channel.
    pub pool: PoolConfig,
    /// Number of leading `connect()` calls that fail.
    pub failing_connects: usize,
}

impl MockChannelConfig {
    /// A channel with the given capacity and no initial fill.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: PoolConfig::new().capacity(capacity),
            failing_connects: 0,
        }
    }

    /// Pre-fill the pool with `count` connections.
    #[must_use]
    pub fn initial_fill(mut self, count: usize) -> Self {
        self.pool = self.pool.initial_fill(count);
        self
    }

    /// Make the first `count` connections fail to open.
    #[must_use]
    pub fn failing_connects(mut self, count: usize) -> Self {
        self.failing_connects = count;
        self
    }
}

/// [`PoolFactory`] that gives every channel its own [`MockManager`].
///
/// Records the channels it built, in order, so tests can inspect the
/// managers behind each pool.
#[derive(Debug, Default)]
pub struct MockFactory {
    built: Mutex<Vec<(String, MockManager)>>,
}

impl MockFactory {
    /// Create a factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names passed to `create_pool`, in call order.
    #[must_use]
    pub fn built(&self) -> Vec<String> {
        self.built.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// The manager behind the most recent pool built for `name`.
    #[must_use]
    pub fn manager(&self, name: &str) -> Option<MockManager> {
        self.built
            .lock()
            .iter()
            .rev()
            .find(|(built, _)| built == name)
            .map(|(_, manager)| manager.clone())
    }
}

#[async_trait::async_trait]
impl PoolFactory for MockFactory {
    type Config = MockChannelConfig;
    type Manager = MockManager;

    async fn create_pool(
        &self,
        name: &str,
        config: MockChannelConfig,
    ) -> Result<Pool<MockManager>, PoolError> {
        let manager = MockManager::new();
        manager.fail_next_connects(config.failing_connects);
        self.built.lock().push((name.to_owned(), manager.clone()));

        tracing::debug!(channel = name, capacity = config.pool.capacity, "building mock pool");
        Pool::new(manager, config.pool).await
    }
}
