//! Database access for the cafe storefront `PostgreSQL`.
//!
//! # Database: `cafe`
//!
//! ## Tables
//!
//! - `cafe.user` - Customer accounts (balance and loyalty points)
//! - `cafe.dish` - Menu
//! - `cafe.order` - Orders, never deleted, only status-transitioned
//! - `cafe.order_has_dish` - Order lines with the dish price at order time
//!
//! # Connections
//!
//! All access goes through [`ConnectionPool`], a fixed-size pool built once by
//! the composition root and handed to repositories by reference. Multi-table
//! writes run inside [`transaction::in_transaction`], which commits or rolls
//! back as a unit and always returns the connection.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/storefront/migrations/` and run via:
//! ```bash
//! cargo run -p cafe-cli -- migrate
//! ```

pub mod lease;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod orders;
pub mod pool;
pub mod postgres;
pub mod statements;
pub mod transaction;
pub mod users;

use std::time::Duration;

use thiserror::Error;

pub use lease::Lease;
pub use orders::OrderRepository;
pub use pool::{Connect, ConnectionId, ConnectionPool, ManagedConnection, PoolOptions, PoolStatus};
pub use postgres::{PgConnectionPool, PgConnector, create_pool};
pub use statements::{AccountStatements, OrderFilter, OrderStatements};
pub use users::UserRepository;

/// Errors that can occur during repository operations.
///
/// Every storage failure surfaces as one of these, carrying the original
/// `sqlx::Error` where there is one.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The pool could not open its connections at startup.
    #[error("connection pool initialization failed: {0}")]
    PoolInitialization(#[source] sqlx::Error),

    /// The pool cannot produce a usable connection at all.
    #[error("no connection available: {reason}")]
    ConnectionUnavailable {
        reason: &'static str,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// A bounded acquire gave up waiting.
    #[error("timed out after {0:?} waiting for a pooled connection")]
    AcquireTimeout(Duration),

    /// A leased connection was used after the pool shut down.
    #[error("leased connection used after the pool was closed")]
    LeaseInvalidated,

    /// A statement inside a transactional unit failed; the unit was rolled back.
    #[error("atomic write failed: {0}")]
    AtomicWrite(#[source] WriteFailure),

    /// The rollback after a failed unit also failed.
    #[error("rollback failed after {failure}; storage may be inconsistent")]
    RollbackFailed {
        failure: WriteFailure,
        #[source]
        source: sqlx::Error,
    },

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate login).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Caller supplied arguments that can never succeed.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl RepositoryError {
    /// Whether storage may have been left in an inconsistent state.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::RollbackFailed { .. })
    }

    /// Whether the failure is pool pressure rather than a storage fault.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionUnavailable { .. } | Self::AcquireTimeout(_) | Self::LeaseInvalidated
        )
    }

    /// Classify an error from a read statement.
    ///
    /// Row decoding failures mean the stored data does not match the domain
    /// types, which is corruption rather than an access failure.
    pub(crate) fn from_read(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Decode(inner) => Self::DataCorruption(inner.to_string()),
            sqlx::Error::ColumnDecode { index, source } => {
                Self::DataCorruption(format!("column {index}: {source}"))
            }
            other => Self::Database(other),
        }
    }

    /// Map a unique violation to `Conflict`, everything else to `Database`.
    pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(format!("{what} already exists"));
        }
        Self::Database(err)
    }
}

/// Why a transactional unit could not commit.
#[derive(Debug, Error)]
pub enum WriteFailure {
    /// `BEGIN` itself failed.
    #[error("could not begin transaction: {0}")]
    Begin(#[source] sqlx::Error),

    /// A write matched no rows (the target row vanished or never existed).
    #[error("{statement} affected no rows")]
    NoRowsAffected { statement: &'static str },

    /// A statement raised a storage error.
    #[error("{statement} failed: {source}")]
    Statement {
        statement: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// `COMMIT` failed.
    #[error("commit failed: {0}")]
    Commit(#[source] sqlx::Error),
}

impl WriteFailure {
    /// Adapter for `map_err` on a statement result.
    pub fn in_statement(statement: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Statement { statement, source }
    }

    /// Treat zero affected rows as a failure.
    ///
    /// # Errors
    ///
    /// Returns `WriteFailure::NoRowsAffected` when `rows_affected` is zero.
    pub fn expect_rows(statement: &'static str, rows_affected: u64) -> Result<(), Self> {
        if rows_affected == 0 {
            return Err(Self::NoRowsAffected { statement });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_expect_rows() {
        assert!(WriteFailure::expect_rows("update user", 1).is_ok());
        assert!(WriteFailure::expect_rows("update user", 3).is_ok());

        let err = WriteFailure::expect_rows("update user", 0).unwrap_err();
        assert!(matches!(
            err,
            WriteFailure::NoRowsAffected {
                statement: "update user"
            }
        ));
        assert_eq!(err.to_string(), "update user affected no rows");
    }

    #[test]
    fn test_statement_failure_keeps_cause() {
        let failure = WriteFailure::in_statement("insert order")(sqlx::Error::RowNotFound);
        assert!(failure.to_string().starts_with("insert order failed"));
        assert!(failure.source().is_some());
    }

    #[test]
    fn test_rollback_failure_is_critical() {
        let err = RepositoryError::RollbackFailed {
            failure: WriteFailure::NoRowsAffected {
                statement: "update order status",
            },
            source: sqlx::Error::PoolClosed,
        };
        assert!(err.is_critical());
        assert!(err.to_string().contains("update order status affected no rows"));
        assert!(err.source().is_some());

        let err = RepositoryError::AtomicWrite(WriteFailure::NoRowsAffected {
            statement: "update order status",
        });
        assert!(!err.is_critical());
    }

    #[test]
    fn test_atomic_write_chains_to_storage_error() {
        let err = RepositoryError::AtomicWrite(WriteFailure::Statement {
            statement: "insert order line",
            source: sqlx::Error::RowNotFound,
        });

        let failure = err.source().unwrap();
        assert_eq!(failure.to_string(), format!("insert order line failed: {}", sqlx::Error::RowNotFound));
        let cause = failure.source().unwrap();
        assert_eq!(cause.to_string(), sqlx::Error::RowNotFound.to_string());
    }

    #[test]
    fn test_unavailable_classification() {
        assert!(RepositoryError::AcquireTimeout(Duration::from_millis(5)).is_unavailable());
        assert!(RepositoryError::LeaseInvalidated.is_unavailable());
        assert!(
            RepositoryError::ConnectionUnavailable {
                reason: "pool is closed",
                source: None,
            }
            .is_unavailable()
        );
        assert!(!RepositoryError::NotFound.is_unavailable());
    }

    #[test]
    fn test_decode_errors_are_corruption() {
        let err = RepositoryError::from_read(sqlx::Error::Decode("unknown order status".into()));
        assert!(matches!(err, RepositoryError::DataCorruption(ref msg) if msg.contains("unknown")));

        let err = RepositoryError::from_read(sqlx::Error::RowNotFound);
        assert!(matches!(err, RepositoryError::Database(_)));
    }
}
