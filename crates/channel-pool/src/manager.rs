//! Collaborator hooks.
//!
//! The pool never knows what it stores. A [`ConnectionManager`] creates
//! connections and judges whether one is still usable; a [`PoolFactory`]
//! turns per-channel configuration into a ready [`Pool`] for the registry.

use crate::error::PoolError;
use crate::pool::Pool;

/// Creates and health-checks the connections stored in a [`Pool`].
///
/// Uses `#[async_trait]` so managers can be boxed or shared behind trait
/// objects.
#[async_trait::async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// The pooled resource handle.
    type Connection: Send + 'static;

    /// Error returned when a connection cannot be created.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create a new connection.
    ///
    /// May suspend (network I/O). Errors are surfaced to the caller of the
    /// pool operation that triggered the creation.
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Check whether `conn` can be handed out again.
    ///
    /// Should be cheap. `false` makes the pool discard the connection and
    /// create a replacement.
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    /// Dispose of a connection the pool is throwing away.
    ///
    /// Also called for a connection held by a `get` or `put` future that is
    /// dropped before finishing. The default drops it.
    fn discard(&self, conn: Self::Connection) {
        drop(conn);
    }
}

/// Builds one pool per configured channel.
#[async_trait::async_trait]
pub trait PoolFactory: Send + Sync {
    /// Per-channel configuration.
    type Config: Send + 'static;

    /// Manager type shared by every pool this factory builds.
    type Manager: ConnectionManager;

    /// Build the pool registered under `name`.
    async fn create_pool(
        &self,
        name: &str,
        config: Self::Config,
    ) -> Result<Pool<Self::Manager>, PoolError>;
}
