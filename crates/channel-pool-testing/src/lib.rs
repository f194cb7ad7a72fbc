//! # channel-pool-testing
//!
//! Test infrastructure for channel-pool development.
//!
//! This crate provides an in-memory connection manager and pool factory so
//! pool behaviour can be exercised without a real database or socket.
//!
//! ## Features
//!
//! - [`MockManager`]: sequential connection ids, scripted connect and health
//!   check failures, optional connect and health-check delays, creation/discard counters
//! - [`MockFactory`]: builds one mock-backed pool per registry channel
//! - Fixture helpers for tracing and pre-filled pools
//!
//! ## Example
//!
//! ```rust,ignore
//! use channel_pool_testing::{MockManager, fixtures};
//!
//! #[tokio::test]
//! async fn test_with_mock_manager() {
//!     let (pool, manager) = fixtures::mock_pool(2, Some(1)).await.unwrap();
//!
//!     manager.fail_next_checks(1);
//!     let conn = pool.get().await.unwrap();
//!
//!     // the queued connection failed its check and was replaced
//!     assert_eq!(conn.id(), 2);
//!     assert_eq!(manager.discarded(), 1);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod factory;
pub mod fixtures;
pub mod mock;

pub use factory::{MockChannelConfig, MockFactory};
pub use mock::{MockConnection, MockError, MockManager};
