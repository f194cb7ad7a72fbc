//! Test fixture utilities.

use channel_pool::{Pool, PoolError};

use crate::mock::MockManager;

/// Install a `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a mock-backed pool of `capacity`, pre-filled with `fill`
/// connections.
///
/// Returns the pool and a manager handle sharing its counters.
pub async fn mock_pool(
    capacity: usize,
    fill: Option<usize>,
) -> Result<(Pool<MockManager>, MockManager), PoolError> {
    let manager = MockManager::new();
    let mut builder = Pool::builder().capacity(capacity);
    if let Some(fill) = fill {
        builder = builder.initial_fill(fill);
    }
    let pool = builder.build(manager.clone()).await?;
    Ok((pool, manager))
}
