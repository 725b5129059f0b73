//! # vitrina-db
//!
//! PostgreSQL persistence layer for vitrina.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for catalog items and their samples
//! - An in-memory catalog with identical semantics for tests and tooling
//!
//! ## Example
//!
//! ```rust,ignore
//! use vitrina_db::{Database, ItemRepository, CreateItemRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/vitrina").await?;
//!     db.migrate().await?;
//!
//!     let id = db.items.insert(CreateItemRequest {
//!         branch_id: uuid::Uuid::nil(),
//!         name: "Isfahan 2x3".to_string(),
//!         category: "rugs".to_string(),
//!         collection: None,
//!         photo: None,
//!     }).await?;
//!
//!     println!("Created item: {}", id);
//!     Ok(())
//! }
//! ```
pub mod items;
pub mod memory;
pub mod pool;
pub mod samples;

// Always compiled so integration tests in other crates can use the builders
pub mod test_fixtures;

// Re-export core types
pub use vitrina_core::*;

pub use items::PgItemRepository;
pub use memory::MemoryCatalog;
pub use pool::{connect_pool, PoolConfig};
pub use samples::PgSampleRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Catalog item repository.
    pub items: PgItemRepository,
    /// Item sample repository.
    pub samples: PgSampleRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            items: PgItemRepository::new(pool.clone()),
            samples: PgSampleRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect using the pool settings from the environment.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::from_env()).await
    }

    /// Connect with explicit pool settings.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = connect_pool(url, &config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        tracing::info!(subsystem = "db", op = "migrate", "Migrations applied");
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
