//! Scoped transactions over a pooled connection.
//!
//! [`in_transaction`] is the only way the repositories write more than one
//! row. It guarantees that exactly one of commit or rollback is attempted and
//! that the connection is back in the pool before the result is returned,
//! whether the body succeeds, fails, or panics.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;

use super::lease::Lease;
use super::pool::{Connect, ConnectionPool};
use super::{RepositoryError, WriteFailure};

/// Run `body` as one atomic unit on a freshly leased connection.
///
/// `unit` names the operation in logs. The body receives the raw connection
/// and must report zero-row writes as failures (see
/// [`WriteFailure::expect_rows`]); any `Err` rolls the unit back.
///
/// Values the body needs must be moved into it:
///
/// ```rust,ignore
/// let user_id = account.id;
/// in_transaction(pool, "update balance", move |conn| {
///     Box::pin(async move {
///         let rows = conn
///             .update_balance(user_id, new_balance)
///             .await
///             .map_err(WriteFailure::in_statement("update user balance"))?;
///         WriteFailure::expect_rows("update user balance", rows)
///     })
/// })
/// .await?;
/// ```
///
/// # Errors
///
/// - Any acquire error from the pool.
/// - `RepositoryError::AtomicWrite` if the body, `BEGIN`, or `COMMIT` failed and
///   the rollback succeeded.
/// - `RepositoryError::RollbackFailed` if the rollback failed too.
///
/// # Panics
///
/// A panic in `body` is resumed after the rollback attempt and release.
#[tracing::instrument(level = "debug", skip_all, fields(unit = unit))]
pub async fn in_transaction<F, T, B>(
    pool: &ConnectionPool<F>,
    unit: &'static str,
    body: B,
) -> Result<T, RepositoryError>
where
    F: Connect,
    T: Send,
    B: for<'c> FnOnce(&'c mut F::Connection) -> BoxFuture<'c, Result<T, WriteFailure>> + Send,
{
    let mut lease = pool.acquire().await?;

    if let Err(e) = lease.begin().await {
        return Err(match e {
            RepositoryError::Database(source) => {
                tracing::warn!(unit, error = %source, "could not begin transaction");
                RepositoryError::AtomicWrite(WriteFailure::Begin(source))
            }
            other => other,
        });
    }

    let outcome = {
        let conn = lease.connection()?;
        AssertUnwindSafe(body(conn)).catch_unwind().await
    };

    let result = match outcome {
        Ok(Ok(value)) => match lease.commit().await {
            Ok(()) => {
                tracing::debug!(unit, connection_id = %lease.id(), "transaction committed");
                Ok(value)
            }
            Err(RepositoryError::Database(source)) => {
                Err(roll_back(&mut lease, unit, WriteFailure::Commit(source)).await)
            }
            Err(other) => Err(other),
        },
        Ok(Err(failure)) => Err(roll_back(&mut lease, unit, failure).await),
        Err(panic) => {
            tracing::error!(unit, "transaction body panicked, rolling back");
            if let Err(e) = lease.rollback().await {
                tracing::error!(unit, error = %e, "rollback after panic failed");
            }
            lease.recycle().await;
            std::panic::resume_unwind(panic)
        }
    };

    // After a failed rollback the connection is reset or replaced before returning.
    lease.recycle().await;
    result
}

/// Roll back after `failure` and classify the outcome.
async fn roll_back<F: Connect>(
    lease: &mut Lease<F>,
    unit: &'static str,
    failure: WriteFailure,
) -> RepositoryError {
    tracing::warn!(unit, connection_id = %lease.id(), error = %failure, "rolling back transaction");

    match lease.rollback().await {
        Ok(()) => RepositoryError::AtomicWrite(failure),
        Err(RepositoryError::Database(source)) => {
            tracing::error!(
                unit,
                connection_id = %lease.id(),
                error = %failure,
                rollback_error = %source,
                "rollback failed, storage may be inconsistent"
            );
            RepositoryError::RollbackFailed { failure, source }
        }
        Err(other) => {
            tracing::error!(
                unit,
                error = %failure,
                rollback_error = %other,
                "rollback impossible, lease no longer usable"
            );
            RepositoryError::RollbackFailed {
                failure,
                source: sqlx::Error::PoolClosed,
            }
        }
    }
}
