//! HTTP route handlers for storefront.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness check
//! GET  /health/ready           - Readiness (leases a connection and pings the database)
//! GET  /health/pool            - Connection pool status (JSON)
//! ```

use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};

use crate::config::PoolConfig;
use crate::db::{Connect, ConnectionPool, ManagedConnection, PoolStatus, RepositoryError};
use crate::error::Result;
use crate::state::AppState;

/// Longest readiness waits for a free connection before reporting unavailable.
const READINESS_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Create the health routes router.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/pool", get(pool_status))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the database is not reachable or the
/// pool stays exhausted for the readiness timeout.
async fn readiness(State(state): State<AppState>) -> Result<StatusCode> {
    let timeout = readiness_timeout(&state.config().pool);
    check_database(state.pool(), timeout).await?;
    Ok(StatusCode::OK)
}

/// Pool bookkeeping snapshot.
async fn pool_status(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.pool().status())
}

/// The configured acquire timeout, capped so the readiness check answers quickly.
fn readiness_timeout(pool: &PoolConfig) -> Duration {
    pool.acquire_timeout
        .map_or(READINESS_ACQUIRE_TIMEOUT, |limit| limit.min(READINESS_ACQUIRE_TIMEOUT))
}

/// Lease a connection within `timeout` and ping the database on it.
///
/// # Errors
///
/// - `RepositoryError::AcquireTimeout` if the pool stays exhausted.
/// - `RepositoryError::ConnectionUnavailable` if the pool is closed or the
///   ping fails.
/// - `RepositoryError::LeaseInvalidated` if the pool closes mid-check.
pub async fn check_database<F: Connect>(
    pool: &ConnectionPool<F>,
    timeout: Duration,
) -> std::result::Result<(), RepositoryError> {
    let mut lease = pool.acquire_timeout(timeout).await?;
    let connection_id = lease.id();
    lease.connection()?.validate().await.map_err(|e| {
        tracing::warn!(%connection_id, error = %e, "readiness: database ping failed");
        RepositoryError::ConnectionUnavailable {
            reason: "database ping failed",
            source: Some(e),
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::PoolOptions;
    use crate::error::AppError;
    use crate::db::memory::MemoryDatabase;

    #[tokio::test]
    async fn test_check_database_ok() {
        let pool = PoolOptions::new().capacity(1).connect(MemoryDatabase::new()).await.unwrap();
        assert!(check_database(&pool, READINESS_ACQUIRE_TIMEOUT).await.is_ok());
        assert!(pool.status().leased.is_empty());
    }

    #[tokio::test]
    async fn test_check_database_ping_failure_is_unavailable() {
        let db = MemoryDatabase::new();
        let pool = PoolOptions::new().capacity(1).connect(db.clone()).await.unwrap();
        db.refuse_connections(true);

        let err = check_database(&pool, READINESS_ACQUIRE_TIMEOUT).await.unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::ConnectionUnavailable { source: Some(_), .. }
        ));
        assert_eq!(AppError::from(err).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_check_database_closed_pool() {
        let pool = PoolOptions::new().capacity(1).connect(MemoryDatabase::new()).await.unwrap();
        pool.close().await;

        let err = check_database(&pool, READINESS_ACQUIRE_TIMEOUT).await.unwrap_err();
        assert_eq!(AppError::from(err).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_check_database_exhausted_pool_times_out() {
        let pool = PoolOptions::new().capacity(1).connect(MemoryDatabase::new()).await.unwrap();
        let _held = pool.acquire().await.unwrap();

        let err = check_database(&pool, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::AcquireTimeout(_)));
        let response = axum::response::IntoResponse::into_response(AppError::from(err));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_readiness_timeout_is_capped() {
        let unbounded = PoolConfig::default();
        assert_eq!(readiness_timeout(&unbounded), READINESS_ACQUIRE_TIMEOUT);

        let short = PoolConfig {
            acquire_timeout: Some(Duration::from_millis(500)),
            ..PoolConfig::default()
        };
        assert_eq!(readiness_timeout(&short), Duration::from_millis(500));

        let long = PoolConfig {
            acquire_timeout: Some(Duration::from_secs(30)),
            ..PoolConfig::default()
        };
        assert_eq!(readiness_timeout(&long), READINESS_ACQUIRE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_pool_status_json_shape() {
        let pool = PoolOptions::new().capacity(2).connect(MemoryDatabase::new()).await.unwrap();
        let _lease = pool.acquire().await.unwrap();

        let json = serde_json::to_value(pool.status()).unwrap();
        assert_eq!(json["capacity"], 2);
        assert_eq!(json["idle"].as_array().unwrap().len(), 1);
        assert_eq!(json["leased"].as_array().unwrap().len(), 1);
        assert_eq!(json["waiting"], 0);
        assert_eq!(json["closed"], false);
    }
}
