//! Connection pool setup.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use vitrina_core::defaults::{self, env_or};
use vitrina_core::{Error, Result};

/// Pool sizing and timeouts.
///
/// Backfill runs hold one connection per concurrently processed item, so
/// `max_connections` should be at least the backfill concurrency.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(defaults::DB_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    /// Read `VITRINA_DB_MAX_CONNECTIONS` and `VITRINA_DB_ACQUIRE_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            max_connections: env_or(defaults::ENV_DB_MAX_CONNECTIONS, base.max_connections)
                .max(1),
            acquire_timeout: Duration::from_secs(env_or(
                defaults::ENV_DB_ACQUIRE_TIMEOUT_SECS,
                defaults::DB_ACQUIRE_TIMEOUT_SECS,
            )),
            ..base
        }
    }

    /// Raise the connection limit to at least `n`.
    pub fn with_min_capacity(mut self, n: u32) -> Self {
        self.max_connections = self.max_connections.max(n);
        self
    }
}

/// Open a pool against `database_url`.
pub async fn connect_pool(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    let start = Instant::now();
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        duration_ms = start.elapsed().as_millis() as u64,
        "Catalog database connected"
    );
    Ok(pool)
}
