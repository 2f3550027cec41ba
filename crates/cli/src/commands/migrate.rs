//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! cafe-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CAFE_DATABASE_URL` - `PostgreSQL` connection string (or `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Migrations are embedded from `crates/storefront/migrations/`:
//! ```text
//! migrations/
//! └── 20261019000001_create_cafe_schema.sql
//! ```

use super::CommandError;

/// Run the storefront migrations.
///
/// # Errors
///
/// Returns an error if configuration is missing, the database is
/// unreachable, or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let pool = super::connect().await?;

    let result = {
        let mut lease = pool.acquire().await?;
        tracing::info!("Running storefront migrations...");
        sqlx::migrate!("../storefront/migrations")
            .run(lease.connection()?)
            .await
    };

    pool.close().await;
    result?;

    tracing::info!("Storefront migrations complete!");
    Ok(())
}
