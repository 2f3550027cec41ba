//! Fixed-size connection pool.
//!
//! The pool opens `capacity` connections up front and hands them out one at a
//! time as [`Lease`]s. When every connection is leased, [`ConnectionPool::acquire`]
//! suspends the caller on a fair semaphore until a lease is returned, so
//! waiters are served in arrival order.
//!
//! ```text
//! acquire()
//!   → permit available?     no → wait in FIFO queue (optionally bounded)
//!   → pop head of idle queue, record id as leased
//!   → Lease
//! drop(Lease) / Lease::release()
//!   → transaction open?     yes → ROLLBACK on a spawned task holding the permit,
//!                                 replace the connection if that fails
//!   → remove id from leased, push connection to idle tail, release permit
//! ```
//!
//! Outside a tokio runtime the rollback cannot be spawned; the connection is
//! queued dirty instead and reset when it is next checked out.
//!
//! Bookkeeping (`idle` and `leased`) lives behind one mutex, and each
//! connection id is in exactly one of the two while the pool is open.

use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use super::RepositoryError;
use super::lease::Lease;

/// A raw connection the pool can manage.
///
/// Implemented for `sqlx::PgConnection` in production and for the in-memory
/// engine in tests.
pub trait ManagedConnection: Send + 'static {
    /// Start a transaction (auto-commit off until commit or rollback).
    fn begin_transaction(&mut self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Make the open transaction durable.
    fn commit_transaction(&mut self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Discard the open transaction.
    fn rollback_transaction(&mut self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Round-trip to the server to check the connection is alive.
    fn validate(&mut self) -> impl Future<Output = Result<(), sqlx::Error>> + Send;

    /// Close the connection gracefully.
    fn terminate(self) -> impl Future<Output = Result<(), sqlx::Error>> + Send
    where
        Self: Sized;
}

/// Opens new connections to the backing store.
pub trait Connect: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: ManagedConnection;

    /// Open one connection.
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, sqlx::Error>> + Send;
}

/// Identity of a pooled connection, stable for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// The raw sequence number.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Pool construction options.
///
/// # Example
///
/// ```rust,ignore
/// let pool = PoolOptions::new()
///     .capacity(10)
///     .acquire_timeout(Duration::from_secs(5))
///     .connect(PgConnector::from_url(&database_url)?)
///     .await?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    capacity: usize,
    acquire_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolOptions {
    /// Ten connections, unbounded acquire wait.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            capacity: 10,
            acquire_timeout: None,
        }
    }

    /// Number of connections opened at startup and never exceeded.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Default bound applied by [`ConnectionPool::acquire`].
    ///
    /// `None` waits until a connection is returned, however long that takes.
    #[must_use]
    pub const fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Eagerly open every connection and build the pool.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::PoolInitialization` if the capacity is zero or
    /// any connection cannot be opened. Connections opened before the failure
    /// are closed.
    pub async fn connect<F: Connect>(self, connector: F) -> Result<ConnectionPool<F>, RepositoryError> {
        if self.capacity == 0 {
            return Err(RepositoryError::PoolInitialization(sqlx::Error::Configuration(
                "pool capacity must be at least 1".into(),
            )));
        }

        let mut opened = Vec::with_capacity(self.capacity);
        for _ in 0..self.capacity {
            match connector.connect().await {
                Ok(conn) => opened.push(conn),
                Err(e) => {
                    tracing::error!(
                        opened = opened.len(),
                        capacity = self.capacity,
                        error = %e,
                        "failed to open pooled connection"
                    );
                    for conn in opened {
                        let _ = conn.terminate().await;
                    }
                    return Err(RepositoryError::PoolInitialization(e));
                }
            }
        }

        let next_id = AtomicU64::new(1);
        let idle = opened
            .into_iter()
            .map(|conn| Idle {
                id: ConnectionId(next_id.fetch_add(1, Ordering::Relaxed)),
                conn,
                dirty: false,
            })
            .collect();

        tracing::info!(
            capacity = self.capacity,
            acquire_timeout = ?self.acquire_timeout,
            "connection pool ready"
        );

        Ok(ConnectionPool {
            shared: Arc::new(Shared {
                connector,
                options: self,
                permits: Arc::new(Semaphore::new(self.capacity)),
                state: Mutex::new(PoolState {
                    idle,
                    leased: BTreeSet::new(),
                }),
                closed: AtomicBool::new(false),
                waiting: AtomicUsize::new(0),
                next_id,
            }),
        })
    }
}

/// An idle connection waiting in the queue.
struct Idle<C> {
    id: ConnectionId,
    conn: C,
    /// Returned while a transaction was still open.
    dirty: bool,
}

struct PoolState<C> {
    idle: VecDeque<Idle<C>>,
    leased: BTreeSet<ConnectionId>,
}

/// State shared by the pool handle and every outstanding lease.
pub(crate) struct Shared<F: Connect> {
    connector: F,
    options: PoolOptions,
    /// One permit per connection; a lease holds a permit until it is dropped.
    permits: Arc<Semaphore>,
    state: Mutex<PoolState<F::Connection>>,
    closed: AtomicBool,
    waiting: AtomicUsize,
    next_id: AtomicU64,
}

impl<F: Connect> Shared<F> {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take a connection back from a lease.
    ///
    /// After shutdown the connection is dropped instead of queued.
    pub(crate) fn check_in(&self, id: ConnectionId, conn: F::Connection, dirty: bool) {
        let mut state = self.state.lock();
        state.leased.remove(&id);

        if self.is_closed() {
            drop(state);
            tracing::debug!(connection_id = %id, "closing connection returned after pool close");
            terminate_detached(id, conn);
            return;
        }

        state.idle.push_back(Idle { id, conn, dirty });
        tracing::trace!(
            connection_id = %id,
            dirty,
            idle = state.idle.len(),
            leased = state.leased.len(),
            "connection returned to pool"
        );
    }

    fn check_out(&self) -> Option<Idle<F::Connection>> {
        let mut state = self.state.lock();
        let idle = state.idle.pop_front()?;
        state.leased.insert(idle.id);
        Some(idle)
    }

    fn forget(&self, id: ConnectionId) {
        self.state.lock().leased.remove(&id);
    }

    /// Roll back a connection that came back mid-transaction, then queue it.
    ///
    /// The rollback runs on a spawned task that owns `permit`, so the slot is
    /// not handed out again until the transaction is gone.
    pub(crate) fn reset_returned(
        self: Arc<Self>,
        id: ConnectionId,
        conn: F::Connection,
        permit: Option<OwnedSemaphorePermit>,
    ) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.check_in(id, conn, true);
            drop(permit);
            return None;
        };

        Some(runtime.spawn(async move {
            self.recycle(id, conn).await;
            drop(permit);
        }))
    }

    async fn recycle(&self, id: ConnectionId, mut conn: F::Connection) {
        match conn.rollback_transaction().await {
            Ok(()) => {
                tracing::debug!(connection_id = %id, "rolled back abandoned transaction");
                self.check_in(id, conn, false);
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %id,
                    error = %e,
                    "could not reset returned connection, replacing it"
                );
                self.forget(id);
                let _ = conn.terminate().await;
                // On failure the slot stays empty and the next acquire refills it.
                if let Ok((fresh_id, fresh)) = self.open_replacement().await {
                    self.check_in(fresh_id, fresh, false);
                }
            }
        }
    }

    /// Open a connection to fill a slot whose connection was discarded.
    async fn open_replacement(&self) -> Result<(ConnectionId, F::Connection), RepositoryError> {
        if self.is_closed() {
            return Err(pool_closed());
        }

        let conn = self.connector.connect().await.map_err(|e| {
            tracing::error!(error = %e, "failed to open replacement connection");
            RepositoryError::ConnectionUnavailable {
                reason: "could not open a replacement connection",
                source: Some(e),
            }
        })?;

        if self.is_closed() {
            let _ = conn.terminate().await;
            return Err(pool_closed());
        }

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.state.lock().leased.insert(id);
        tracing::info!(connection_id = %id, "opened replacement connection");
        Ok((id, conn))
    }
}

/// Decrements the waiter count when the wait ends, including by cancellation.
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the pool bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Configured maximum.
    pub capacity: usize,
    /// Idle connections in queue order (next to be handed out first).
    pub idle: Vec<ConnectionId>,
    /// Connections currently leased.
    pub leased: Vec<ConnectionId>,
    /// Acquirers suspended waiting for a connection.
    pub waiting: usize,
    /// Whether the pool has been shut down.
    pub closed: bool,
}

impl PoolStatus {
    /// Whether no connection is both idle and leased and the total is within capacity.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let disjoint = self.idle.iter().all(|id| !self.leased.contains(id));
        disjoint && self.idle.len() + self.leased.len() <= self.capacity
    }
}

/// A fixed-size pool of database connections.
///
/// Cheap to clone; all clones share the same connections. Build one per
/// process in the composition root and pass it to the repositories.
pub struct ConnectionPool<F: Connect> {
    shared: Arc<Shared<F>>,
}

impl<F: Connect> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Connect> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("options", &self.shared.options)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<F: Connect> ConnectionPool<F> {
    /// Configured maximum number of connections.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.options.capacity
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Lease a connection, waiting as long as the pool's configured
    /// acquire timeout allows (forever by default).
    ///
    /// # Errors
    ///
    /// - `RepositoryError::ConnectionUnavailable` if the pool is closed or a
    ///   discarded connection cannot be replaced.
    /// - `RepositoryError::AcquireTimeout` if a configured timeout elapses.
    pub async fn acquire(&self) -> Result<Lease<F>, RepositoryError> {
        match self.shared.options.acquire_timeout {
            Some(limit) => self.acquire_timeout(limit).await,
            None => self.acquire_unbounded().await,
        }
    }

    /// Lease a connection, giving up after `limit`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::AcquireTimeout` if no connection is returned
    /// within `limit`, otherwise as [`acquire`](Self::acquire).
    pub async fn acquire_timeout(&self, limit: Duration) -> Result<Lease<F>, RepositoryError> {
        tokio::time::timeout(limit, self.acquire_unbounded())
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?limit, "timed out waiting for a pooled connection");
                RepositoryError::AcquireTimeout(limit)
            })?
    }

    async fn acquire_unbounded(&self) -> Result<Lease<F>, RepositoryError> {
        if self.is_closed() {
            return Err(pool_closed());
        }

        let permit = match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(pool_closed()),
            Err(TryAcquireError::NoPermits) => self.wait_for_permit().await?,
        };

        let (id, conn) = match self.shared.check_out() {
            Some(idle) if idle.dirty => self.reset(idle).await?,
            Some(idle) => (idle.id, idle.conn),
            // A slot whose connection was discarded earlier.
            None => self.shared.open_replacement().await?,
        };

        tracing::trace!(connection_id = %id, "connection leased");
        Ok(Lease::new(Arc::clone(&self.shared), id, conn, permit))
    }

    async fn wait_for_permit(&self) -> Result<OwnedSemaphorePermit, RepositoryError> {
        let _waiting = WaitGuard::enter(&self.shared.waiting);
        tracing::debug!(
            capacity = self.capacity(),
            waiting = self.shared.waiting.load(Ordering::Relaxed),
            "pool exhausted, waiting for a connection"
        );
        Arc::clone(&self.shared.permits)
            .acquire_owned()
            .await
            .map_err(|_| pool_closed())
    }

    /// Roll back a connection that was queued dirty.
    async fn reset(
        &self,
        idle: Idle<F::Connection>,
    ) -> Result<(ConnectionId, F::Connection), RepositoryError> {
        let Idle { id, mut conn, .. } = idle;
        match conn.rollback_transaction().await {
            Ok(()) => {
                tracing::debug!(connection_id = %id, "rolled back abandoned transaction");
                Ok((id, conn))
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %id,
                    error = %e,
                    "could not reset abandoned connection, replacing it"
                );
                self.shared.forget(id);
                let _ = conn.terminate().await;
                self.shared.open_replacement().await
            }
        }
    }

    /// Snapshot of idle and leased connections.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            capacity: self.capacity(),
            idle: state.idle.iter().map(|idle| idle.id).collect(),
            leased: state.leased.iter().copied().collect(),
            waiting: self.shared.waiting.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }

    /// Shut the pool down.
    ///
    /// Waiting and future acquirers fail with `ConnectionUnavailable`, idle
    /// connections are closed, and outstanding leases are invalidated: every
    /// further use fails with `LeaseInvalidated` and their connections are
    /// dropped when the lease is.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.permits.close();

        let (idle, outstanding) = {
            let mut state = self.shared.state.lock();
            let idle: Vec<_> = state.idle.drain(..).collect();
            (idle, state.leased.len())
        };

        tracing::info!(idle = idle.len(), outstanding, "closing connection pool");

        for Idle { id, conn, .. } in idle {
            if let Err(e) = conn.terminate().await {
                tracing::warn!(connection_id = %id, error = %e, "error closing pooled connection");
            }
        }
    }
}

/// Close a connection without blocking the caller; dropped outright when no
/// runtime is available.
fn terminate_detached<C: ManagedConnection>(id: ConnectionId, conn: C) {
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(async move {
            if let Err(e) = conn.terminate().await {
                tracing::debug!(connection_id = %id, error = %e, "error closing returned connection");
            }
        });
    }
}

const fn pool_closed() -> RepositoryError {
    RepositoryError::ConnectionUnavailable {
        reason: "pool is closed",
        source: None,
    }
}
