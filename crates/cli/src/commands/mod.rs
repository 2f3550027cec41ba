//! CLI subcommand implementations.

pub mod migrate;
pub mod seed;

use cafe_storefront::config::{CafeConfig, ConfigError, PoolConfig};
use cafe_storefront::db::{PgConnectionPool, RepositoryError, create_pool};

/// Errors shared by the database-backed commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Connect a single-connection pool from `CAFE_DATABASE_URL`.
async fn connect() -> Result<PgConnectionPool, CommandError> {
    let config = CafeConfig::from_env()?;
    let pool_config = PoolConfig {
        size: 1,
        acquire_timeout: None,
    };

    tracing::info!("Connecting to cafe database...");
    Ok(create_pool(&config.database_url, &pool_config).await?)
}
