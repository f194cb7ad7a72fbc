//! Connection pool integration tests.
//!
//! These drive the pool through the mock manager from `channel-pool-testing`
//! and need no external services:
//!
//! ```bash
//! cargo test -p channel-pool --test integration
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use channel_pool::{CancellationToken, ConnectionManager, Pool, PoolError, QueueErrorKind, Wait};
use channel_pool_testing::{MockManager, fixtures};

// =============================================================================
// Basic Pool Tests
// =============================================================================

#[tokio::test]
async fn test_fill_to_target() {
    fixtures::init_tracing();
    let (pool, manager) = fixtures::mock_pool(2, None).await.unwrap();
    assert_eq!(pool.length(), 0);

    pool.fill(Some(2)).await.unwrap();

    assert_eq!(pool.length(), 2);
    assert!(pool.is_full());
    assert_eq!(manager.created(), 2);
}

#[tokio::test]
async fn test_fill_clamps_to_capacity() {
    let (pool, manager) = fixtures::mock_pool(3, None).await.unwrap();

    pool.fill(Some(10)).await.unwrap();
    assert_eq!(pool.length(), 3);

    // nothing left to create
    pool.fill(None).await.unwrap();
    assert_eq!(manager.created(), 3);
}

#[tokio::test]
async fn test_fill_leaves_room_for_checked_out() {
    let (pool, manager) = fixtures::mock_pool(3, None).await.unwrap();
    let _conn = pool.get().await.unwrap();

    pool.fill(None).await.unwrap();

    assert_eq!(pool.length(), 2);
    assert_eq!(pool.in_use(), 1);
    assert_eq!(manager.created(), 3);
}

#[tokio::test]
async fn test_get_grows_empty_pool() {
    let (pool, manager) = fixtures::mock_pool(2, None).await.unwrap();
    assert!(pool.is_empty());

    let conn = pool.get().await.unwrap();

    assert_eq!(conn.id(), 1);
    assert_eq!(pool.length(), 0);
    assert_eq!(pool.in_use(), 1);
    assert_eq!(manager.created(), 1);
}

#[tokio::test]
async fn test_get_then_put_keeps_length() {
    let (pool, manager) = fixtures::mock_pool(2, Some(2)).await.unwrap();

    let conn = pool.get().await.unwrap();
    assert_eq!(pool.length(), 1);
    pool.put(Some(conn)).await.unwrap();

    assert_eq!(pool.length(), 2);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(manager.created(), 2);
}

#[tokio::test]
async fn test_connections_are_fifo() {
    let (pool, _manager) = fixtures::mock_pool(3, Some(3)).await.unwrap();

    let first = pool.get().await.unwrap();
    let second = pool.get().await.unwrap();
    assert_eq!((first.id(), second.id()), (1, 2));

    pool.put(Some(first)).await.unwrap();
    assert_eq!(pool.get().await.unwrap().id(), 3);
    assert_eq!(pool.get().await.unwrap().id(), 1);
}

#[tokio::test]
async fn test_try_get_does_not_wait() {
    let (pool, _manager) = fixtures::mock_pool(1, None).await.unwrap();

    // an empty pool below capacity still creates
    let conn = pool.try_get().await.unwrap();

    let err = pool.try_get().await.unwrap_err();
    assert!(matches!(err, PoolError::Timeout(d) if d == Duration::ZERO));
    assert_eq!(pool.in_use(), 1);

    pool.put(Some(conn)).await.unwrap();
    assert!(pool.try_get().await.is_ok());
}

// =============================================================================
// Self-Healing Tests
// =============================================================================

#[tokio::test]
async fn test_put_none_creates_replacement() {
    let (pool, manager) = fixtures::mock_pool(3, Some(1)).await.unwrap();

    pool.put(None).await.unwrap();

    assert_eq!(pool.length(), 2);
    assert_eq!(manager.created(), 2);
}

#[tokio::test]
async fn test_lost_connection_is_replaced() {
    let (pool, manager) = fixtures::mock_pool(2, Some(2)).await.unwrap();

    let conn = pool.get().await.unwrap();
    manager.discard(conn);
    pool.put(None).await.unwrap();

    assert_eq!(pool.length(), 2);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(manager.live(), 2);
}

#[tokio::test]
async fn test_unhealthy_checkin_is_replaced() {
    let (pool, manager) = fixtures::mock_pool(2, None).await.unwrap();

    let mut conn = pool.get().await.unwrap();
    conn.kill();
    pool.put(Some(conn)).await.unwrap();

    assert_eq!(pool.length(), 1);
    assert_eq!(manager.discarded(), 1);
    assert_eq!(pool.get().await.unwrap().id(), 2);
}

#[tokio::test]
async fn test_unhealthy_checkout_is_replaced() {
    let (pool, manager) = fixtures::mock_pool(2, Some(1)).await.unwrap();
    manager.fail_next_checks(1);

    let conn = pool.get().await.unwrap();

    assert_eq!(conn.id(), 2);
    assert!(conn.is_alive());
    assert_eq!(manager.discarded(), 1);
    assert_eq!(pool.in_use(), 1);
}

#[tokio::test]
async fn test_health_checks_can_be_disabled() {
    let manager = MockManager::new();
    let pool = Pool::builder()
        .capacity(2)
        .initial_fill(2)
        .test_on_checkout(false)
        .test_on_checkin(false)
        .build(manager.clone())
        .await
        .unwrap();

    let mut conn = pool.get().await.unwrap();
    conn.kill();
    pool.put(Some(conn)).await.unwrap();

    assert_eq!(manager.health_checks(), 0);
    assert_eq!(manager.discarded(), 0);
    assert_eq!(pool.length(), 2);
}

// =============================================================================
// Error Propagation Tests
// =============================================================================

#[tokio::test]
async fn test_creation_error_propagates_from_get() {
    let (pool, manager) = fixtures::mock_pool(1, None).await.unwrap();
    manager.fail_next_connects(1);

    let err = pool.get().await.unwrap_err();
    assert!(matches!(err, PoolError::Connection(_)));
    assert_eq!(err.code(), 0);

    // the reserved slot was given back
    assert!(pool.get().await.is_ok());
}

#[tokio::test]
async fn test_creation_error_propagates_from_fill() {
    let (pool, manager) = fixtures::mock_pool(3, Some(1)).await.unwrap();
    manager.fail_next_connects(1);

    assert!(matches!(
        pool.fill(Some(3)).await,
        Err(PoolError::Connection(_))
    ));
    assert_eq!(pool.length(), 1);

    pool.fill(Some(3)).await.unwrap();
    assert_eq!(pool.length(), 3);
}

#[tokio::test]
async fn test_creation_error_propagates_from_put() {
    let (pool, manager) = fixtures::mock_pool(2, Some(1)).await.unwrap();
    manager.fail_next_connects(1);

    let err = pool.put(None).await.unwrap_err();
    assert!(matches!(err, PoolError::Connection(_)));

    pool.put(None).await.unwrap();
    assert_eq!(pool.length(), 2);
}

#[tokio::test]
async fn test_initial_fill_error_fails_construction() {
    let manager = MockManager::new();
    manager.fail_next_connects(1);

    let result = Pool::builder()
        .capacity(2)
        .initial_fill(2)
        .build(manager)
        .await;
    assert!(matches!(result, Err(PoolError::Connection(_))));
}

#[tokio::test]
async fn test_initial_fill_above_capacity_rejected() {
    let result = Pool::builder()
        .capacity(2)
        .initial_fill(3)
        .build(MockManager::new())
        .await;
    assert!(matches!(result, Err(PoolError::Configuration(_))));
}

// =============================================================================
// Timeout and Cancellation Tests
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_get_timeout_on_exhausted_pool() {
    let (pool, _manager) = fixtures::mock_pool(1, None).await.unwrap();
    let _held = pool.get().await.unwrap();

    let err = pool
        .get_timeout(Duration::from_millis(250))
        .await
        .unwrap_err();

    assert!(matches!(err, PoolError::Timeout(d) if d == Duration::from_millis(250)));
    assert!(err.is_transient());
    assert_eq!(err.code(), QueueErrorKind::Timeout.code());
    assert_eq!(pool.in_use(), 1);
    assert_eq!(pool.stats().consumers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_configured_acquire_timeout() {
    let pool = Pool::builder()
        .capacity(1)
        .acquire_timeout(Duration::from_secs(2))
        .build(MockManager::new())
        .await
        .unwrap();
    let _held = pool.get().await.unwrap();

    let start = tokio::time::Instant::now();
    let err = pool.get().await.unwrap_err();

    assert!(matches!(err, PoolError::Timeout(_)));
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_waiting_get_receives_returned_connection() {
    let (pool, _manager) = fixtures::mock_pool(1, None).await.unwrap();
    let conn = pool.get().await.unwrap();
    let id = conn.id();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get_timeout(Duration::from_secs(5)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().consumers, 1);

    pool.put(Some(conn)).await.unwrap();

    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id(), id);
    assert_eq!(pool.in_use(), 1);
    assert_eq!(pool.stats().consumers, 0);
}

#[tokio::test(start_paused = true)]
async fn test_get_cancellation() {
    let (pool, _manager) = fixtures::mock_pool(1, None).await.unwrap();
    let _held = pool.get().await.unwrap();

    let token = CancellationToken::new();
    let waiter = tokio::spawn({
        let pool = pool.clone();
        let token = token.clone();
        async move { pool.get_cancellable(token).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().consumers, 1);

    token.cancel();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Canceled));
    assert_eq!(err.code(), QueueErrorKind::Canceled.code());
    assert_eq!(pool.stats().consumers, 0);
    assert_eq!(pool.in_use(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_foreign_put_waits_for_room() {
    let (pool, manager) = fixtures::mock_pool(1, Some(1)).await.unwrap();
    let extra = manager.connect().await.unwrap();

    let putter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.put_timeout(Some(extra), Duration::from_secs(1)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().producers, 1);

    let err = putter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Timeout(_)));
    assert_eq!(pool.stats().producers, 0);
    assert_eq!(pool.length(), 1);
    assert_eq!(manager.discarded(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_foreign_put_cancellation() {
    let (pool, manager) = fixtures::mock_pool(1, Some(1)).await.unwrap();
    let extra = manager.connect().await.unwrap();

    let token = CancellationToken::new();
    let putter = tokio::spawn({
        let pool = pool.clone();
        let wait = Wait::forever().cancel_on(token.clone());
        async move { pool.put_with(Some(extra), &wait).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().producers, 1);

    token.cancel();

    let err = putter.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::Canceled));
    assert_eq!(err.code(), QueueErrorKind::Canceled.code());
    assert_eq!(pool.stats().producers, 0);
    assert_eq!(pool.length(), 1);
    assert_eq!(manager.discarded(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_foreign_put_during_connect_keeps_created_connection() {
    let manager = MockManager::new().with_connect_delay(Duration::from_millis(100));
    let pool = Pool::builder()
        .capacity(1)
        .build(manager.clone())
        .await
        .unwrap();
    let foreign = MockManager::new().connect().await.unwrap();

    let getter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // the creation in flight owns the only slot
    let err = pool
        .put_timeout(Some(foreign), Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Timeout(_)));

    let conn = getter.await.unwrap().unwrap();
    assert_eq!(conn.id(), 1);
    assert_eq!(pool.length(), 0);
    assert_eq!(pool.in_use(), 1);
    assert_eq!(manager.created(), 1);
    assert_eq!(manager.discarded(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_foreign_put_during_fill_takes_free_slot() {
    let manager = MockManager::new().with_connect_delay(Duration::from_millis(100));
    let pool = Pool::builder()
        .capacity(2)
        .build(manager.clone())
        .await
        .unwrap();
    let foreign = MockManager::new().connect().await.unwrap();

    let filler = tokio::spawn({
        let pool = pool.clone();
        async move { pool.fill(None).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.put(Some(foreign)).await.unwrap();
    assert_eq!(pool.length(), 1);

    filler.await.unwrap().unwrap();
    assert!(pool.is_full());
    assert_eq!(manager.created(), 1);
    assert_eq!(manager.discarded(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_get_discards_connection_under_check() {
    let manager = MockManager::new().with_check_delay(Duration::from_millis(100));
    let pool = Pool::builder()
        .capacity(1)
        .initial_fill(1)
        .build(manager.clone())
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_millis(10), pool.get()).await;
    assert!(result.is_err());
    assert_eq!(manager.health_checks(), 1);
    assert_eq!(manager.discarded(), 1);
    assert_eq!(pool.length(), 0);
    assert_eq!(pool.in_use(), 0);

    // the slot came back with the discard
    let conn = pool.try_get().await.unwrap();
    assert_eq!(conn.id(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_put_discards_connection_under_check() {
    let manager = MockManager::new().with_check_delay(Duration::from_millis(100));
    let pool = Pool::builder()
        .capacity(1)
        .test_on_checkout(false)
        .build(manager.clone())
        .await
        .unwrap();
    let conn = pool.get().await.unwrap();

    let result = tokio::time::timeout(Duration::from_millis(10), pool.put(Some(conn))).await;
    assert!(result.is_err());
    assert_eq!(manager.discarded(), 1);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.length(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_connect_holds_capacity() {
    let manager = MockManager::new().with_connect_delay(Duration::from_millis(100));
    let pool = Pool::builder()
        .capacity(1)
        .build(manager.clone())
        .await
        .unwrap();

    let first = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // the in-flight creation already owns the only slot
    let err = pool
        .get_timeout(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Timeout(_)));

    assert!(first.await.unwrap().is_ok());
    assert_eq!(manager.created(), 1);
}

// =============================================================================
// Close Tests
// =============================================================================

#[tokio::test]
async fn test_get_after_close() {
    let (pool, _manager) = fixtures::mock_pool(2, Some(1)).await.unwrap();

    assert!(pool.close());
    assert!(pool.is_closed());

    let err = pool.get().await.unwrap_err();
    assert!(matches!(err, PoolError::Closed));
    assert_eq!(err.code(), QueueErrorKind::Closed.code());
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_close_discards_connections() {
    let (pool, manager) = fixtures::mock_pool(3, Some(3)).await.unwrap();
    let conn = pool.get().await.unwrap();

    assert!(pool.close());
    assert!(!pool.close());
    assert_eq!(manager.discarded(), 2);
    assert_eq!(pool.length(), 0);

    // a connection returned after close is discarded, not leaked
    assert!(matches!(pool.put(Some(conn)).await, Err(PoolError::Closed)));
    assert!(matches!(pool.put(None).await, Err(PoolError::Closed)));
    assert!(matches!(pool.fill(None).await, Err(PoolError::Closed)));
    assert_eq!(manager.live(), 0);
    assert_eq!(manager.created(), 3);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_wakes_waiters() {
    let (pool, _manager) = fixtures::mock_pool(1, None).await.unwrap();
    let _held = pool.get().await.unwrap();

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.get().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.close();

    assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
}

#[tokio::test(start_paused = true)]
async fn test_close_wakes_foreign_put() {
    let (pool, manager) = fixtures::mock_pool(1, Some(1)).await.unwrap();
    let extra = manager.connect().await.unwrap();

    let putter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.put(Some(extra)).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(pool.stats().producers, 1);

    pool.close();

    assert!(matches!(putter.await.unwrap(), Err(PoolError::Closed)));
    assert_eq!(manager.discarded(), 2);
    assert_eq!(pool.stats().producers, 0);
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_checkout_respects_capacity() {
    const CAPACITY: usize = 3;
    let (pool, manager) = fixtures::mock_pool(CAPACITY, None).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                for _ in 0..25 {
                    let conn = pool.get_timeout(Duration::from_secs(5)).await.unwrap();
                    assert!(pool.in_use() <= CAPACITY);
                    tokio::task::yield_now().await;
                    pool.put(Some(conn)).await.unwrap();
                }
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    assert!(manager.created() <= CAPACITY);
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.length(), manager.created());
}

#[tokio::test]
async fn test_stats_snapshot() {
    let (pool, _manager) = fixtures::mock_pool(4, Some(3)).await.unwrap();
    let _conn = pool.get().await.unwrap();

    let stats = pool.stats();
    assert_eq!(stats.queued, 2);
    assert_eq!(stats.in_use, 1);
    assert_eq!(stats.capacity, 4);
    assert_eq!(stats.consumers, 0);
    assert_eq!(stats.producers, 0);
}
