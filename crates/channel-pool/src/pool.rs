//! Connection pool implementation.
//!
//! A [`Pool`] stores idle connections in a [`BoundedQueue`] sized to the
//! pool capacity. Callers take connections out with [`Pool::get`] and hand
//! them back with [`Pool::put`]; ownership moves with the value.
//!
//! ## Capacity accounting
//!
//! Every connection the pool is responsible for occupies one *live* slot,
//! whether it is queued, checked out by a caller, or in flight (being
//! created, health-checked, or on its way back into the queue). The live
//! count never exceeds `capacity`. Creations reserve their slot before
//! suspending in [`ConnectionManager::connect`], so two tasks racing through
//! the grow-on-demand path cannot both create past capacity, and a
//! connection moving between the queue and a caller keeps its slot the whole
//! time. A connection the pool never handed out (a foreign handle) has no
//! slot, so [`Pool::put`] waits for one to be released before queueing it.
//!
//! A connection in flight when its `get` or `put` future is dropped goes
//! through [`ConnectionManager::discard`] like any other thrown-away handle.
//!
//! ## Self-healing
//!
//! A connection that fails the health check is discarded and replaced, on
//! checkout and on checkin alike. Returning `None` to [`Pool::put`] reports a
//! dead connection and also triggers a replacement, so the pool does not
//! shrink because callers lost connections.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::error::{PoolError, QueueErrorKind};
use crate::manager::ConnectionManager;
use crate::queue::{BoundedQueue, Wait, park};

/// A bounded pool of connections created by a [`ConnectionManager`].
///
/// Cloning a `Pool` is cheap and yields another handle to the same pool.
pub struct Pool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

struct PoolInner<M: ConnectionManager> {
    manager: M,
    config: PoolConfig,
    queue: BoundedQueue<M::Connection>,
    slots: Mutex<Slots>,
    released: Notify,
}

#[derive(Debug, Default)]
struct Slots {
    live: usize,
    in_use: usize,
    /// `put` calls suspended until a slot is released.
    waiting: usize,
}

impl<M: ConnectionManager> Pool<M> {
    /// Create a pool and perform the configured initial fill.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Configuration`] for an invalid config, or the
    /// first connection creation error hit during the initial fill.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let pool = Self {
            inner: Arc::new(PoolInner {
                queue: BoundedQueue::new(config.capacity),
                slots: Mutex::new(Slots::default()),
                released: Notify::new(),
                manager,
                config,
            }),
        };

        if let Some(count) = pool.inner.config.initial_fill {
            pool.fill(Some(count)).await?;
        }

        tracing::info!(
            capacity = pool.capacity(),
            queued = pool.length(),
            "connection pool created"
        );
        Ok(pool)
    }

    /// Start building a pool.
    #[must_use]
    pub fn builder() -> PoolBuilder<M> {
        PoolBuilder::new()
    }

    /// Maximum number of connections the pool holds.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.config.capacity
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the connection manager.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Number of idle connections currently queued.
    #[must_use]
    pub fn length(&self) -> usize {
        self.inner.queue.len()
    }

    /// Whether no idle connections are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    /// Whether the queue holds `capacity` idle connections.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.inner.queue.is_full()
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Number of connections currently checked out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.slots.lock().in_use
    }

    /// Get the current pool statistics.
    ///
    /// Intended for observability; the values may be stale by the time the
    /// caller looks at them.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let queue = self.inner.queue.stats();
        let slots = self.inner.slots.lock();
        PoolStats {
            consumers: queue.consumers,
            producers: queue.producers + slots.waiting,
            queued: queue.queued,
            in_use: slots.in_use,
            capacity: self.capacity(),
        }
    }

    /// Whether two handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Create connections until `target` are queued.
    ///
    /// `None` fills to capacity and a target above capacity is treated as
    /// capacity. Filling also stops when the connections already checked out
    /// leave no free slot.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] on a closed pool, or the first creation
    /// error. Connections created before the error stay queued.
    pub async fn fill(&self, target: Option<usize>) -> Result<(), PoolError> {
        let inner = &*self.inner;
        if inner.queue.is_closed() {
            return Err(PoolError::Closed);
        }

        let capacity = inner.config.capacity;
        let target = target.map_or(capacity, |target| target.min(capacity));

        let mut created = 0usize;
        while inner.queue.len() < target {
            let Some(slot) = inner.reserve(false) else {
                break;
            };
            let conn = inner.create().await?;
            inner.enqueue(conn, slot)?;
            created += 1;
        }

        tracing::debug!(created, queued = inner.queue.len(), "pool filled");
        Ok(())
    }

    /// Get a connection, waiting up to the configured `acquire_timeout`.
    pub async fn get(&self) -> Result<M::Connection, PoolError> {
        let wait = Wait::from_option(self.inner.config.acquire_timeout);
        self.get_with(&wait).await
    }

    /// Get a connection, waiting at most `timeout`.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<M::Connection, PoolError> {
        self.get_with(&Wait::timeout(timeout)).await
    }

    /// Get a connection without waiting for one to be returned.
    ///
    /// An empty pool below capacity still creates a connection.
    pub async fn try_get(&self) -> Result<M::Connection, PoolError> {
        self.get_with(&Wait::immediate()).await
    }

    /// Get a connection, giving up when `token` is cancelled.
    pub async fn get_cancellable(
        &self,
        token: CancellationToken,
    ) -> Result<M::Connection, PoolError> {
        let wait = Wait::from_option(self.inner.config.acquire_timeout).cancel_on(token);
        self.get_with(&wait).await
    }

    /// Get a connection under an explicit [`Wait`] policy.
    ///
    /// If the queue is empty and the pool has a free slot, a new connection
    /// is created and handed out directly. Otherwise the dequeued connection
    /// is health-checked (unless `test_on_checkout` is off); an unhealthy one
    /// is discarded and a fresh connection is returned instead.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Timeout`] if nothing was dequeued in time
    /// - [`PoolError::Closed`] if the pool is or becomes closed
    /// - [`PoolError::Canceled`] if the wait's token fired
    /// - [`PoolError::Connection`] if a creation failed
    pub async fn get_with(&self, wait: &Wait) -> Result<M::Connection, PoolError> {
        let inner = &*self.inner;
        if inner.queue.is_closed() {
            return Err(PoolError::Closed);
        }

        tracing::trace!("acquiring connection from pool");

        if let Some(slot) = inner.reserve(true) {
            tracing::debug!(
                capacity = inner.config.capacity,
                "pool empty, creating connection on demand"
            );
            let conn = inner.create().await?;
            slot.hand_out();
            return Ok(conn);
        }

        let conn = inner
            .queue
            .pop(wait)
            .await
            .map_err(|err| PoolError::from_queue(err.kind(), wait.duration()))?;
        let slot = Slot::checkout(inner);
        let conn = InFlight::new(inner, conn);

        let conn = if inner.config.test_on_checkout {
            conn.check().await
        } else {
            Some(conn)
        };
        let conn = match conn.and_then(InFlight::into_inner) {
            Some(conn) => conn,
            None => inner.create().await?,
        };

        slot.hand_out();
        Ok(conn)
    }

    /// Return a connection, waiting up to the configured `release_timeout`.
    ///
    /// Pass `None` when the connection was lost; a replacement is created.
    pub async fn put(&self, conn: Option<M::Connection>) -> Result<(), PoolError> {
        let wait = Wait::from_option(self.inner.config.release_timeout);
        self.put_with(conn, &wait).await
    }

    /// Return a connection, waiting at most `timeout` for room in the pool.
    pub async fn put_timeout(
        &self,
        conn: Option<M::Connection>,
        timeout: Duration,
    ) -> Result<(), PoolError> {
        self.put_with(conn, &Wait::timeout(timeout)).await
    }

    /// Return a connection under an explicit [`Wait`] policy.
    ///
    /// A healthy connection is queued as is. `None`, or a connection failing
    /// the health check, is discarded and replaced by a newly created one so
    /// the pool keeps its size. No replacement is made when the pool has no
    /// free slot.
    ///
    /// A connection returned while nothing is checked out was never handed
    /// out by this pool. It is queued only once a slot is free, waiting under
    /// `wait` for one to be released.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Closed`] if the pool is closed; the connection is discarded
    /// - [`PoolError::Timeout`] / [`PoolError::Canceled`] if a foreign
    ///   connection found no free slot in time; it is discarded
    /// - [`PoolError::Connection`] if the replacement could not be created
    pub async fn put_with(
        &self,
        conn: Option<M::Connection>,
        wait: &Wait,
    ) -> Result<(), PoolError> {
        let inner = &*self.inner;
        let slot = Slot::returning(inner);
        let conn = conn.map(|conn| InFlight::new(inner, conn));
        if inner.queue.is_closed() {
            return Err(PoolError::Closed);
        }

        let conn = match conn {
            Some(conn) if inner.config.test_on_checkin => conn.check().await,
            other => other,
        };

        let Some(conn) = conn else {
            let Some(slot) = slot.or_reserve() else {
                tracing::debug!("pool at capacity, no replacement needed");
                return Ok(());
            };
            tracing::debug!("replacing lost connection");
            let conn = inner.create().await?;
            return inner.enqueue(conn, slot);
        };

        let slot = if slot.is_held() {
            slot
        } else {
            tracing::trace!("foreign connection waiting for a free slot");
            inner
                .reserve_released(wait)
                .await
                .map_err(|kind| PoolError::from_queue(kind, wait.duration()))?
        };

        tracing::trace!("returning connection to pool");
        match conn.into_inner() {
            Some(conn) => inner.enqueue(conn, slot),
            None => Ok(()),
        }
    }

    /// Close the pool, discarding every idle connection.
    ///
    /// Returns `true` on the first call and `false` if the pool was already
    /// closed. Tasks waiting in `get`/`put` wake up with
    /// [`PoolError::Closed`], as does every later call. Connections still
    /// checked out are discarded when they are returned.
    pub fn close(&self) -> bool {
        let inner = &*self.inner;
        match inner.queue.close() {
            Some(drained) => {
                let discarded = drained.len();
                for conn in drained {
                    inner.manager.discard(conn);
                }
                let mut slots = inner.slots.lock();
                slots.live = slots.live.saturating_sub(discarded);
                drop(slots);
                inner.released.notify_waiters();
                tracing::info!(discarded, "connection pool closed");
                true
            }
            None => false,
        }
    }
}

impl<M: ConnectionManager> PoolInner<M> {
    /// Reserve a slot for a connection about to be created.
    fn reserve(&self, only_when_empty: bool) -> Option<Slot<'_, M>> {
        let mut slots = self.slots.lock();
        if only_when_empty && !self.queue.is_empty() {
            return None;
        }
        if slots.live >= self.config.capacity {
            return None;
        }
        slots.live += 1;
        drop(slots);

        Some(Slot {
            inner: self,
            held: true,
        })
    }

    async fn create(&self) -> Result<M::Connection, PoolError> {
        match self.manager.connect().await {
            Ok(conn) => {
                tracing::debug!("connection created");
                Ok(conn)
            }
            Err(err) => {
                tracing::warn!(error = %err, "connection creation failed");
                Err(PoolError::Connection(Box::new(err)))
            }
        }
    }

    /// Reserve a slot, waiting under `wait` until one is released.
    async fn reserve_released(&self, wait: &Wait) -> Result<Slot<'_, M>, QueueErrorKind> {
        let deadline = wait.deadline();
        let mut waiting = None;

        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if self.queue.is_closed() {
                return Err(QueueErrorKind::Closed);
            }
            if let Some(slot) = self.reserve(false) {
                return Ok(slot);
            }
            if wait.is_immediate() {
                return Err(QueueErrorKind::Timeout);
            }
            if waiting.is_none() {
                waiting = Some(SlotWaiter::register(&self.slots));
            }

            if let Err(kind) = park(released, deadline, wait.token()).await {
                drop(waiting);
                // pass on a release this task may have consumed
                if self.slots.lock().live < self.config.capacity {
                    self.released.notify_one();
                }
                return Err(kind);
            }
        }
    }

    /// Queue a connection under its held slot.
    ///
    /// Held slots are never queued, so the queue has room unless it is closed.
    fn enqueue(&self, conn: M::Connection, slot: Slot<'_, M>) -> Result<(), PoolError> {
        match self.queue.try_push(conn) {
            Ok(()) => {
                slot.enqueued();
                Ok(())
            }
            Err(err) => {
                let kind = err.kind();
                self.manager.discard(err.into_item());
                Err(PoolError::from_queue(kind, None))
            }
        }
    }
}

/// A connection owned by a running `get` or `put`.
///
/// Dropping it discards the connection, so a future dropped mid health check
/// still hands the connection to [`ConnectionManager::discard`].
struct InFlight<'a, M: ConnectionManager> {
    inner: &'a PoolInner<M>,
    conn: Option<M::Connection>,
}

impl<'a, M: ConnectionManager> InFlight<'a, M> {
    fn new(inner: &'a PoolInner<M>, conn: M::Connection) -> Self {
        Self {
            inner,
            conn: Some(conn),
        }
    }

    /// Run the health check, discarding the connection if it fails.
    async fn check(mut self) -> Option<Self> {
        let healthy = match self.conn.as_mut() {
            Some(conn) => self.inner.manager.is_valid(conn).await,
            None => false,
        };
        if !healthy {
            tracing::warn!("discarding unhealthy connection");
        }
        healthy.then_some(self)
    }

    fn into_inner(mut self) -> Option<M::Connection> {
        self.conn.take()
    }
}

impl<M: ConnectionManager> Drop for InFlight<'_, M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.inner.manager.discard(conn);
        }
    }
}

/// Counts a `put` suspended until a slot is released.
struct SlotWaiter<'a> {
    slots: &'a Mutex<Slots>,
}

impl<'a> SlotWaiter<'a> {
    fn register(slots: &'a Mutex<Slots>) -> Self {
        slots.lock().waiting += 1;
        Self { slots }
    }
}

impl Drop for SlotWaiter<'_> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        slots.waiting = slots.waiting.saturating_sub(1);
    }
}

/// The live slot of one connection while no one else accounts for it.
///
/// Dropping a held slot releases it, so a failed or cancelled operation gives
/// its capacity back.
struct Slot<'a, M: ConnectionManager> {
    inner: &'a PoolInner<M>,
    held: bool,
}

impl<'a, M: ConnectionManager> Slot<'a, M> {
    /// Take over the slot of a connection just taken off the queue.
    fn checkout(inner: &'a PoolInner<M>) -> Self {
        Self { inner, held: true }
    }

    /// Take over the slot of a connection coming back from a caller.
    ///
    /// Holds nothing if no connection is checked out (a foreign handle).
    fn returning(inner: &'a PoolInner<M>) -> Self {
        let mut slots = inner.slots.lock();
        let held = slots.in_use > 0;
        if held {
            slots.in_use -= 1;
        }
        Self { inner, held }
    }

    /// This slot if it is held, otherwise a fresh reservation.
    fn or_reserve(self) -> Option<Self> {
        if self.held {
            Some(self)
        } else {
            self.inner.reserve(false)
        }
    }

    fn is_held(&self) -> bool {
        self.held
    }

    /// The connection is now counted by the queue.
    fn enqueued(mut self) {
        self.held = false;
    }

    /// The connection now belongs to a caller.
    fn hand_out(mut self) {
        self.held = false;
        self.inner.slots.lock().in_use += 1;
    }
}

impl<M: ConnectionManager> Drop for Slot<'_, M> {
    fn drop(&mut self) {
        if std::mem::take(&mut self.held) {
            let mut slots = self.inner.slots.lock();
            slots.live = slots.live.saturating_sub(1);
            drop(slots);
            self.inner.released.notify_one();
        }
    }
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ConnectionManager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Statistics about the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Callers suspended in `get` because the queue is empty.
    pub consumers: usize,
    /// Callers suspended in `put` until the pool has room.
    pub producers: usize,
    /// Idle connections queued; same as [`Pool::length`].
    pub queued: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Maximum allowed connections.
    pub capacity: usize,
}

/// Builder for [`Pool`].
///
/// The manager type is fixed by [`build`](Self::build).
pub struct PoolBuilder<M> {
    config: PoolConfig,
    _manager: PhantomData<fn() -> M>,
}

impl<M: ConnectionManager> PoolBuilder<M> {
    /// Create a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            _manager: PhantomData,
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the pool capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Pre-create `count` connections.
    #[must_use]
    pub fn initial_fill(mut self, count: usize) -> Self {
        self.config.initial_fill = Some(count);
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = Some(timeout);
        self
    }

    /// Set the release timeout.
    #[must_use]
    pub fn release_timeout(mut self, timeout: Duration) -> Self {
        self.config.release_timeout = Some(timeout);
        self
    }

    /// Enable or disable health checks on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.config.test_on_checkout = enabled;
        self
    }

    /// Enable or disable health checks on checkin.
    #[must_use]
    pub fn test_on_checkin(mut self, enabled: bool) -> Self {
        self.config.test_on_checkin = enabled;
        self
    }

    /// Build the pool around `manager`.
    pub async fn build(self, manager: M) -> Result<Pool<M>, PoolError> {
        Pool::new(manager, self.config).await
    }
}

impl<M: ConnectionManager> Default for PoolBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for PoolBuilder<M> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            _manager: PhantomData,
        }
    }
}

impl<M> std::fmt::Debug for PoolBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("config", &self.config)
            .finish()
    }
}
