//! # channel-pool
//!
//! Bounded pools of expensive resources (database, cache and socket
//! connections) for async tasks sharing a runtime.
//!
//! A [`Pool`] keeps idle connections in a bounded FIFO queue. Callers take a
//! connection with `get()` and hand it back with `put()`; the pool creates
//! connections on demand up to its capacity, replaces connections that fail
//! their health check, and can be closed for graceful shutdown. What a
//! connection *is* stays with the [`ConnectionManager`] you supply.
//!
//! A [`PoolRegistry`] holds several named pools ("channels") and a default
//! channel, built once at startup by a [`PoolFactory`].
//!
//! ## Features
//!
//! - Grow-on-demand up to a fixed capacity, optional initial fill
//! - Health checks on checkout and checkin with self-healing replacement
//! - Timeouts, immediate (non-blocking) acquisition and cancellation tokens
//! - Backpressure on `put()` of a foreign connection while the pool is full
//! - Waiter statistics (`consumers`, `producers`, `queued`)
//! - Case-insensitive named channels with a switchable default
//!
//! ## Example
//!
//! ```rust,ignore
//! use channel_pool::{Pool, PoolConfig};
//!
//! let config = PoolConfig::new()
//!     .capacity(16)
//!     .initial_fill(4)
//!     .acquire_timeout(Duration::from_secs(3));
//!
//! let pool = Pool::new(RedisManager::new(url), config).await?;
//! let conn = pool.get().await?;
//! // Use connection...
//! pool.put(Some(conn)).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod registry;

pub use config::{PoolConfig, RegistryConfig};
pub use error::{PoolError, QueueErrorKind, RegistryError};
pub use manager::{ConnectionManager, PoolFactory};
pub use pool::{Pool, PoolBuilder, PoolStats};
pub use queue::{BoundedQueue, QueueStats, Wait};
pub use registry::PoolRegistry;
pub use tokio_util::sync::CancellationToken;
