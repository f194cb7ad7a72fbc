//! Connection pool and channel registry example.
//!
//! Builds a registry with two channels backed by a simulated backend, runs
//! concurrent checkouts against the default channel, loses a connection to
//! show self-healing, and shuts everything down.
//!
//! # Running
//!
//! ```bash
//! RUST_LOG=channel_pool=debug cargo run --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use channel_pool::{
    ConnectionManager, Pool, PoolConfig, PoolError, PoolFactory, PoolRegistry, RegistryConfig,
};
use tokio::time::Instant;

/// A pretend session to some backend.
#[derive(Debug)]
struct Session {
    id: u32,
    host: String,
    queries: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("backend {0} unreachable")]
struct Unreachable(String);

/// Opens sessions to one host after a short handshake delay.
struct Backend {
    host: String,
    next_id: AtomicU32,
}

#[async_trait::async_trait]
impl ConnectionManager for Backend {
    type Connection = Session;
    type Error = Unreachable;

    async fn connect(&self) -> Result<Session, Unreachable> {
        if self.host.is_empty() {
            return Err(Unreachable(self.host.clone()));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            host: self.host.clone(),
            queries: 0,
        })
    }

    async fn is_valid(&self, session: &mut Session) -> bool {
        // sessions are recycled after a fixed number of queries
        session.queries < 8
    }
}

/// Per-channel settings: where to connect and how to pool.
struct ChannelSettings {
    host: &'static str,
    pool: PoolConfig,
}

struct BackendFactory;

#[async_trait::async_trait]
impl PoolFactory for BackendFactory {
    type Config = ChannelSettings;
    type Manager = Backend;

    async fn create_pool(
        &self,
        _name: &str,
        settings: ChannelSettings,
    ) -> Result<Pool<Backend>, PoolError> {
        let backend = Backend {
            host: settings.host.to_owned(),
            next_id: AtomicU32::new(0),
        };
        Pool::new(backend, settings.pool).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Connection Pool Example ===\n");

    let config = RegistryConfig::new("primary")
        .channel(
            "primary",
            ChannelSettings {
                host: "db-primary:5432",
                pool: PoolConfig::new()
                    .capacity(4)
                    .initial_fill(2)
                    .acquire_timeout(Duration::from_secs(2)),
            },
        )
        .channel(
            "Replica",
            ChannelSettings {
                host: "db-replica:5432",
                pool: PoolConfig::new().capacity(2),
            },
        );

    let registry = Arc::new(PoolRegistry::build(&BackendFactory, config).await?);
    println!("Channels: {:?}", registry.channel_names());
    print_stats("primary", &registry.default_channel()?);

    // Example 1: Basic checkout and return
    println!("\n1. Basic usage:");
    {
        let mut session = registry.get().await?;
        session.queries += 1;
        println!("  Using session {} on {}", session.id, session.host);
        registry.put(Some(session)).await?;
    }

    // Example 2: Concurrent usage, more tasks than connections
    println!("\n2. Concurrent usage (10 tasks, capacity 4):");
    let start = Instant::now();
    let mut handles = vec![];
    for _ in 0..10 {
        let pool = registry.default_channel()?;
        handles.push(tokio::spawn(async move {
            let mut session = pool.get().await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            session.queries += 1;
            pool.put(Some(session)).await?;
            Ok::<_, PoolError>(())
        }));
    }
    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {} tasks in {:?}", completed, start.elapsed());
    print_stats("primary", &registry.default_channel()?);

    // Example 3: Self-healing after a lost connection
    println!("\n3. Self-healing:");
    let replica = registry.get_channel(Some("replica"))?;
    let session = replica.get().await?;
    println!("  Checked out session {}, dropping it", session.id);
    drop(session);
    replica.put(None).await?;
    print_stats("replica", &replica);

    // Example 4: Unknown channel
    println!("\n4. Lookup errors:");
    match registry.get_channel(Some("archive")) {
        Ok(_) => println!("  unexpected channel"),
        Err(e) => println!("  {e}"),
    }

    // Graceful shutdown
    println!("\n5. Shutdown:");
    let closed = registry.close_all();
    println!("  Closed {closed} pools");
    match registry.get().await {
        Ok(_) => println!("  unexpected connection"),
        Err(e) => println!("  get after close: {e}"),
    }

    Ok(())
}

fn print_stats(name: &str, pool: &Pool<Backend>) {
    let stats = pool.stats();
    println!(
        "  [{name}] queued {}/{} in use {} waiting {}",
        stats.queued, stats.capacity, stats.in_use, stats.consumers
    );
}
