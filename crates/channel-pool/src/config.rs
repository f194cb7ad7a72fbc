//! Pool and registry configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default pool capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// Configuration for a connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of connections the pool holds at once, queued and
    /// checked out together.
    pub capacity: usize,

    /// Number of connections to create while the pool is constructed.
    ///
    /// `None` starts the pool empty; connections are then created on demand.
    pub initial_fill: Option<usize>,

    /// How long [`Pool::get`](crate::Pool::get) waits for a connection.
    ///
    /// `None` waits indefinitely.
    pub acquire_timeout: Option<Duration>,

    /// How long [`Pool::put`](crate::Pool::put) waits for a free slot when
    /// handed a connection the pool never gave out.
    ///
    /// `None` waits indefinitely.
    pub release_timeout: Option<Duration>,

    /// Whether to health-check connections on checkout.
    pub test_on_checkout: bool,

    /// Whether to health-check connections on checkin.
    pub test_on_checkin: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            initial_fill: None,
            acquire_timeout: None,
            release_timeout: None,
            test_on_checkout: true,
            test_on_checkin: true,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pool capacity.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Pre-create `count` connections when the pool is built.
    #[must_use]
    pub fn initial_fill(mut self, count: usize) -> Self {
        self.initial_fill = Some(count);
        self
    }

    /// Set the acquisition timeout used by `get()`.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set the release timeout used by `put()`.
    #[must_use]
    pub fn release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout = Some(timeout);
        self
    }

    /// Enable or disable health checks on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Enable or disable health checks on checkin.
    #[must_use]
    pub fn test_on_checkin(mut self, enabled: bool) -> Self {
        self.test_on_checkin = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.capacity == 0 {
            return Err(PoolError::Configuration(
                "capacity must be greater than 0".into(),
            ));
        }
        if let Some(fill) = self.initial_fill.filter(|&fill| fill > self.capacity) {
            return Err(PoolError::Configuration(format!(
                "initial_fill ({fill}) cannot be greater than capacity ({})",
                self.capacity
            )));
        }
        Ok(())
    }
}

/// Channels to build a [`PoolRegistry`](crate::PoolRegistry) from.
///
/// `C` is whatever the [`PoolFactory`](crate::PoolFactory) needs to build a
/// single pool (for example a connection string plus a [`PoolConfig`]).
#[derive(Debug, Clone)]
pub struct RegistryConfig<C> {
    /// Channel used when a lookup omits the name.
    pub default_channel: String,

    /// Channel names and their per-pool configuration, in build order.
    pub channels: Vec<(String, C)>,
}

impl<C> RegistryConfig<C> {
    /// Create an empty registry configuration.
    #[must_use]
    pub fn new(default_channel: impl Into<String>) -> Self {
        Self {
            default_channel: default_channel.into(),
            channels: Vec::new(),
        }
    }

    /// Add a channel.
    #[must_use]
    pub fn channel(mut self, name: impl Into<String>, config: C) -> Self {
        self.channels.push((name.into(), config));
        self
    }
}
