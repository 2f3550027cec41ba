//! Leased connection handle.

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinHandle;

use super::RepositoryError;
use super::pool::{Connect, ConnectionId, ManagedConnection, Shared};

/// Exclusive use of one pooled connection.
///
/// The connection goes back to the pool when the lease is released or
/// dropped, whichever happens first. A lease dropped with a transaction still
/// open is rolled back on a background task right away, and its slot stays
/// taken until that finishes.
pub struct Lease<F: Connect> {
    shared: Arc<Shared<F>>,
    id: ConnectionId,
    conn: Option<F::Connection>,
    in_transaction: bool,
    /// Released only after the connection is queued (or its reset is done).
    permit: Option<OwnedSemaphorePermit>,
}

impl<F: Connect> Lease<F> {
    pub(crate) const fn new(
        shared: Arc<Shared<F>>,
        id: ConnectionId,
        conn: F::Connection,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            shared,
            id,
            conn: Some(conn),
            in_transaction: false,
            permit: Some(permit),
        }
    }

    /// Pool identity of the underlying connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the lease can still be used (the pool has not been closed).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.conn.is_some() && !self.shared.is_closed()
    }

    /// Whether `begin` has been called without a matching commit or rollback.
    #[must_use]
    pub const fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// The raw connection, for running statements.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::LeaseInvalidated` once the pool is closed.
    pub fn connection(&mut self) -> Result<&mut F::Connection, RepositoryError> {
        if self.shared.is_closed() {
            return Err(RepositoryError::LeaseInvalidated);
        }
        self.conn.as_mut().ok_or(RepositoryError::LeaseInvalidated)
    }

    /// Start a transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if `BEGIN` fails, or
    /// `RepositoryError::LeaseInvalidated` after pool shutdown.
    pub async fn begin(&mut self) -> Result<(), RepositoryError> {
        self.connection()?.begin_transaction().await?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if `COMMIT` fails. The lease is
    /// still considered inside the transaction so it can be rolled back.
    pub async fn commit(&mut self) -> Result<(), RepositoryError> {
        self.connection()?.commit_transaction().await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Roll back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if `ROLLBACK` fails. The connection
    /// is then returned dirty and reset (or replaced) by the pool.
    pub async fn rollback(&mut self) -> Result<(), RepositoryError> {
        self.connection()?.rollback_transaction().await?;
        self.in_transaction = false;
        Ok(())
    }

    /// Return the connection to the pool.
    pub fn release(self) {
        drop(self);
    }

    /// Return the connection to the pool, waiting for the rollback of a
    /// transaction that is still open.
    pub async fn recycle(mut self) {
        if let Some(reset) = self.return_to_pool() {
            let _ = reset.await;
        }
    }

    fn return_to_pool(&mut self) -> Option<JoinHandle<()>> {
        let conn = self.conn.take()?;
        let permit = self.permit.take();

        if !self.in_transaction {
            self.shared.check_in(self.id, conn, false);
            drop(permit);
            return None;
        }

        tracing::warn!(
            connection_id = %self.id,
            "lease returned inside an open transaction"
        );
        Arc::clone(&self.shared).reset_returned(self.id, conn, permit)
    }
}

impl<F: Connect> Drop for Lease<F> {
    fn drop(&mut self) {
        // A detached reset keeps running after the handle is dropped.
        let _ = self.return_to_pool();
    }
}

impl<F: Connect> std::fmt::Debug for Lease<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("in_transaction", &self.in_transaction)
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDatabase;
    use crate::db::pool::PoolOptions;

    #[tokio::test]
    async fn test_commit_clears_transaction_flag() {
        let pool = PoolOptions::new().capacity(1).connect(MemoryDatabase::new()).await.unwrap();
        let mut lease = pool.acquire().await.unwrap();

        assert!(!lease.in_transaction());
        lease.begin().await.unwrap();
        assert!(lease.in_transaction());
        lease.commit().await.unwrap();
        assert!(!lease.in_transaction());
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_connection_dirty() {
        let db = MemoryDatabase::new();
        let pool = PoolOptions::new().capacity(1).connect(db.clone()).await.unwrap();
        let mut lease = pool.acquire().await.unwrap();

        lease.begin().await.unwrap();
        db.fail_rollbacks(true);
        assert!(matches!(lease.rollback().await, Err(RepositoryError::Database(_))));
        assert!(lease.in_transaction());
    }

    #[tokio::test]
    async fn test_release_returns_connection_once() {
        let pool = PoolOptions::new().capacity(2).connect(MemoryDatabase::new()).await.unwrap();
        let lease = pool.acquire().await.unwrap();
        let id = lease.id();

        lease.release();

        let status = pool.status();
        assert_eq!(status.idle.iter().filter(|idle| **idle == id).count(), 1);
        assert!(status.leased.is_empty());
    }

    #[tokio::test]
    async fn test_begin_after_close_is_invalidated() {
        let pool = PoolOptions::new().capacity(1).connect(MemoryDatabase::new()).await.unwrap();
        let mut lease = pool.acquire().await.unwrap();
        pool.close().await;

        assert!(matches!(lease.begin().await, Err(RepositoryError::LeaseInvalidated)));
    }
}
