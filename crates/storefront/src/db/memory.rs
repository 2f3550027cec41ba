//! In-memory storage engine for tests.
//!
//! Implements the pool and statement traits over plain collections so the
//! pool and the order writer can be exercised without `PostgreSQL`.
//!
//! - Transactions work on a private copy of the tables and publish it on
//!   commit, so uncommitted writes are invisible to other connections.
//! - One transaction (or auto-commit write) runs at a time, standing in for
//!   row locks.
//! - Faults can be injected: refused connections, a failing order-line
//!   insert, failing commits and failing rollbacks.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use sqlx::error::ErrorKind;

use cafe_core::{OrderId, OrderStatus, UserId};

use super::pool::{Connect, ManagedConnection};
use super::statements::{AccountStatements, OrderFilter, OrderStatements};
use crate::models::{CartLine, Order, OrderDraft, OrderLine, UserAccount};

/// Counters for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connections_opened: usize,
    pub connections_closed: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: BTreeMap<UserId, UserAccount>,
    orders: Vec<Order>,
    lines: Vec<OrderLine>,
    last_user_id: i32,
    last_order_id: i32,
}

impl Tables {
    fn order_mut(&mut self, order_id: OrderId) -> Option<&mut Order> {
        self.orders.iter_mut().find(|order| order.id == order_id)
    }
}

#[derive(Debug, Default)]
struct Faults {
    refuse_connections: bool,
    /// Successful order-line inserts left before the next one fails.
    fail_line_insert_after: Option<usize>,
    fail_commits: bool,
    fail_rollbacks: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Tables,
    faults: Faults,
    stats: MemoryStats,
}

/// Shared in-memory database; also the connector for its connections.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user directly into committed state.
    pub fn insert_account(&self, login: &str, balance: Decimal, loyalty_points: Decimal) -> UserAccount {
        let mut state = self.state.lock();
        state.tables.last_user_id += 1;
        let account = UserAccount {
            id: UserId::new(state.tables.last_user_id),
            login: login.to_owned(),
            balance,
            loyalty_points,
        };
        state.tables.users.insert(account.id, account.clone());
        account
    }

    /// Committed state of one user.
    #[must_use]
    pub fn account(&self, user_id: UserId) -> Option<UserAccount> {
        self.state.lock().tables.users.get(&user_id).cloned()
    }

    /// Committed orders in insertion order.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.state.lock().tables.orders.clone()
    }

    /// Committed order lines in insertion order.
    #[must_use]
    pub fn order_lines(&self) -> Vec<OrderLine> {
        self.state.lock().tables.lines.clone()
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats
    }

    /// Make new connections (and validation pings) fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().faults.refuse_connections = refuse;
    }

    /// Let `successes` more order-line inserts through, then fail the next one.
    pub fn fail_order_line_insert_after(&self, successes: usize) {
        self.state.lock().faults.fail_line_insert_after = Some(successes);
    }

    /// Make `COMMIT` fail, leaving the transaction open.
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().faults.fail_commits = fail;
    }

    /// Make `ROLLBACK` report failure. The transaction is still discarded.
    pub fn fail_rollbacks(&self, fail: bool) {
        self.state.lock().faults.fail_rollbacks = fail;
    }

    fn refusing(&self) -> bool {
        self.state.lock().faults.refuse_connections
    }
}

impl Connect for MemoryDatabase {
    type Connection = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection, sqlx::Error> {
        if self.refusing() {
            return Err(connection_refused());
        }
        self.state.lock().stats.connections_opened += 1;
        Ok(MemoryConnection {
            db: self.clone(),
            tx: None,
        })
    }
}

struct OpenTransaction {
    tables: Tables,
    _writer: tokio::sync::OwnedMutexGuard<()>,
}

/// One connection to a [`MemoryDatabase`].
pub struct MemoryConnection {
    db: MemoryDatabase,
    tx: Option<OpenTransaction>,
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("in_transaction", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl MemoryConnection {
    /// Run a read against the transaction's view, or committed state outside one.
    fn read<R>(&self, op: impl FnOnce(&Tables) -> R) -> R {
        match &self.tx {
            Some(tx) => op(&tx.tables),
            None => op(&self.db.state.lock().tables),
        }
    }

    /// Run a write inside the open transaction, or as its own auto-commit unit.
    async fn write<R>(
        &mut self,
        op: impl FnOnce(&mut Tables, &mut Faults) -> Result<R, sqlx::Error> + Send,
    ) -> Result<R, sqlx::Error> {
        if let Some(tx) = self.tx.as_mut() {
            let mut state = self.db.state.lock();
            return op(&mut tx.tables, &mut state.faults);
        }

        let _writer = self.db.writer.lock().await;
        let mut state = self.db.state.lock();
        let MemoryState { tables, faults, .. } = &mut *state;
        op(tables, faults)
    }
}

impl ManagedConnection for MemoryConnection {
    async fn begin_transaction(&mut self) -> Result<(), sqlx::Error> {
        if self.tx.is_some() {
            return Err(sqlx::Error::Protocol("transaction already in progress".into()));
        }
        let writer = Arc::clone(&self.db.writer).lock_owned().await;
        let tables = self.db.state.lock().tables.clone();
        self.tx = Some(OpenTransaction {
            tables,
            _writer: writer,
        });
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), sqlx::Error> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        let mut state = self.db.state.lock();
        if state.faults.fail_commits {
            drop(state);
            self.tx = Some(tx);
            return Err(sqlx::Error::Protocol("injected commit failure".into()));
        }
        state.tables = tx.tables;
        state.stats.commits += 1;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<(), sqlx::Error> {
        let had_transaction = self.tx.take().is_some();
        let mut state = self.db.state.lock();
        if state.faults.fail_rollbacks {
            return Err(sqlx::Error::Protocol("injected rollback failure".into()));
        }
        if had_transaction {
            state.stats.rollbacks += 1;
        }
        Ok(())
    }

    async fn validate(&mut self) -> Result<(), sqlx::Error> {
        if self.db.refusing() {
            return Err(connection_refused());
        }
        Ok(())
    }

    async fn terminate(self) -> Result<(), sqlx::Error> {
        self.db.state.lock().stats.connections_closed += 1;
        Ok(())
    }
}

impl AccountStatements for MemoryConnection {
    async fn update_balance_and_points(
        &mut self,
        user_id: UserId,
        balance: Decimal,
        loyalty_points: Decimal,
    ) -> Result<u64, sqlx::Error> {
        self.write(|tables, _| {
            Ok(tables.users.get_mut(&user_id).map_or(0, |user| {
                user.balance = balance;
                user.loyalty_points = loyalty_points;
                1
            }))
        })
        .await
    }

    async fn update_loyalty_points(
        &mut self,
        user_id: UserId,
        loyalty_points: Decimal,
    ) -> Result<u64, sqlx::Error> {
        self.write(|tables, _| {
            Ok(tables.users.get_mut(&user_id).map_or(0, |user| {
                user.loyalty_points = loyalty_points;
                1
            }))
        })
        .await
    }

    async fn update_balance(&mut self, user_id: UserId, balance: Decimal) -> Result<u64, sqlx::Error> {
        self.write(|tables, _| {
            Ok(tables.users.get_mut(&user_id).map_or(0, |user| {
                user.balance = balance;
                1
            }))
        })
        .await
    }

    async fn select_account(&mut self, user_id: UserId) -> Result<Option<UserAccount>, sqlx::Error> {
        Ok(self.read(|tables| tables.users.get(&user_id).cloned()))
    }

    async fn insert_account(
        &mut self,
        login: &str,
        balance: Decimal,
        loyalty_points: Decimal,
    ) -> Result<UserAccount, sqlx::Error> {
        self.write(|tables, _| {
            if tables.users.values().any(|user| user.login == login) {
                return Err(database_error(ErrorKind::UniqueViolation, "duplicate login"));
            }
            tables.last_user_id += 1;
            let account = UserAccount {
                id: UserId::new(tables.last_user_id),
                login: login.to_owned(),
                balance,
                loyalty_points,
            };
            tables.users.insert(account.id, account.clone());
            Ok(account)
        })
        .await
    }
}

impl OrderStatements for MemoryConnection {
    async fn insert_order(&mut self, draft: &OrderDraft) -> Result<Option<OrderId>, sqlx::Error> {
        self.write(|tables, _| {
            if !tables.users.contains_key(&draft.user_id) {
                return Err(database_error(
                    ErrorKind::ForeignKeyViolation,
                    "order references a missing user",
                ));
            }
            tables.last_order_id += 1;
            let id = OrderId::new(tables.last_order_id);
            tables.orders.push(Order {
                id,
                user_id: draft.user_id,
                payment_type: draft.payment_type,
                pick_up_time: draft.pick_up_time,
                price: draft.price,
                paid: draft.paid,
                status: OrderStatus::Active,
                created_at: Utc::now(),
                rating: None,
                review: None,
            });
            Ok(Some(id))
        })
        .await
    }

    async fn insert_order_line(&mut self, order_id: OrderId, line: &CartLine) -> Result<u64, sqlx::Error> {
        self.write(|tables, faults| {
            match faults.fail_line_insert_after {
                Some(0) => {
                    faults.fail_line_insert_after = None;
                    return Err(database_error(ErrorKind::Other, "injected order line failure"));
                }
                Some(remaining) => faults.fail_line_insert_after = Some(remaining - 1),
                None => {}
            }
            if !tables.orders.iter().any(|order| order.id == order_id) {
                return Err(database_error(
                    ErrorKind::ForeignKeyViolation,
                    "order line references a missing order",
                ));
            }
            if tables
                .lines
                .iter()
                .any(|existing| existing.order_id == order_id && existing.dish_id == line.dish_id)
            {
                return Err(database_error(ErrorKind::UniqueViolation, "duplicate order line"));
            }
            tables.lines.push(OrderLine {
                order_id,
                dish_id: line.dish_id,
                price: line.price,
                quantity: line.quantity,
            });
            Ok(1)
        })
        .await
    }

    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<u64, sqlx::Error> {
        self.write(|tables, _| {
            Ok(tables.order_mut(order_id).map_or(0, |order| {
                order.status = status;
                1
            }))
        })
        .await
    }

    async fn update_order_review(
        &mut self,
        order_id: OrderId,
        rating: Option<i32>,
        review: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let review = review.map(str::to_owned);
        self.write(|tables, _| {
            Ok(tables.order_mut(order_id).map_or(0, |order| {
                order.rating = rating;
                order.review = review;
                1
            }))
        })
        .await
    }

    async fn update_order_payment(
        &mut self,
        order_id: OrderId,
        paid: bool,
        status: OrderStatus,
    ) -> Result<u64, sqlx::Error> {
        self.write(|tables, _| {
            Ok(tables.order_mut(order_id).map_or(0, |order| {
                order.paid = paid;
                order.status = status;
                1
            }))
        })
        .await
    }

    async fn select_order(&mut self, order_id: OrderId) -> Result<Option<Order>, sqlx::Error> {
        Ok(self.read(|tables| tables.orders.iter().find(|order| order.id == order_id).cloned()))
    }

    async fn select_orders(&mut self, filter: OrderFilter) -> Result<Vec<Order>, sqlx::Error> {
        Ok(self.read(|tables| {
            tables
                .orders
                .iter()
                .rev()
                .filter(|order| filter.matches(order))
                .cloned()
                .collect()
        }))
    }

    async fn select_order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>, sqlx::Error> {
        Ok(self.read(|tables| {
            let mut lines: Vec<_> = tables
                .lines
                .iter()
                .filter(|line| line.order_id == order_id)
                .cloned()
                .collect();
            lines.sort_by_key(|line| line.dish_id);
            lines
        }))
    }
}

fn connection_refused() -> sqlx::Error {
    sqlx::Error::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "memory database is refusing connections",
    ))
}

fn database_error(kind: ErrorKind, message: &str) -> sqlx::Error {
    sqlx::Error::Database(Box::new(MemoryDatabaseError {
        kind,
        message: message.to_owned(),
    }))
}

/// Constraint and statement errors raised by the memory engine.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct MemoryDatabaseError {
    kind: ErrorKind,
    message: String,
}

impl sqlx::error::DatabaseError for MemoryDatabaseError {
    fn message(&self) -> &str {
        &self.message
    }

    fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
        self
    }

    fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self
    }

    fn kind(&self) -> ErrorKind {
        match self.kind {
            ErrorKind::UniqueViolation => ErrorKind::UniqueViolation,
            ErrorKind::ForeignKeyViolation => ErrorKind::ForeignKeyViolation,
            ErrorKind::NotNullViolation => ErrorKind::NotNullViolation,
            ErrorKind::CheckViolation => ErrorKind::CheckViolation,
            _ => ErrorKind::Other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_writes_are_private() {
        let db = MemoryDatabase::new();
        let user = db.insert_account("ana", Decimal::from(100), Decimal::from(5));

        let mut writer = db.connect().await.unwrap();
        let mut reader = db.connect().await.unwrap();

        writer.begin_transaction().await.unwrap();
        writer.update_balance(user.id, Decimal::from(1)).await.unwrap();

        let seen = reader.select_account(user.id).await.unwrap().unwrap();
        assert_eq!(seen.balance, Decimal::from(100));
        let own = writer.select_account(user.id).await.unwrap().unwrap();
        assert_eq!(own.balance, Decimal::from(1));

        writer.commit_transaction().await.unwrap();
        let seen = reader.select_account(user.id).await.unwrap().unwrap();
        assert_eq!(seen.balance, Decimal::from(1));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let db = MemoryDatabase::new();
        let user = db.insert_account("ana", Decimal::from(100), Decimal::from(5));
        let mut conn = db.connect().await.unwrap();

        conn.begin_transaction().await.unwrap();
        conn.update_loyalty_points(user.id, Decimal::from(50)).await.unwrap();
        conn.rollback_transaction().await.unwrap();

        assert_eq!(db.account(user.id).unwrap().loyalty_points, Decimal::from(5));
        assert_eq!(db.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_order_requires_existing_user() {
        let db = MemoryDatabase::new();
        let mut conn = db.connect().await.unwrap();
        let draft = OrderDraft::new(
            UserId::new(42),
            cafe_core::PaymentType::Cash,
            Utc::now(),
            Decimal::ONE,
        );

        let err = conn.insert_order(&draft).await.unwrap_err();
        assert!(matches!(err, sqlx::Error::Database(ref e) if e.is_foreign_key_violation()));
    }

    #[tokio::test]
    async fn test_duplicate_login_is_unique_violation() {
        let db = MemoryDatabase::new();
        let mut conn = db.connect().await.unwrap();
        conn.insert_account("ana", Decimal::ZERO, Decimal::ZERO).await.unwrap();

        let err = conn.insert_account("ana", Decimal::ZERO, Decimal::ZERO).await.unwrap_err();
        assert!(matches!(err, sqlx::Error::Database(ref e) if e.is_unique_violation()));
    }

    #[tokio::test]
    async fn test_line_insert_fault_is_one_shot() {
        let db = MemoryDatabase::new();
        let user = db.insert_account("ana", Decimal::ZERO, Decimal::ZERO);
        let mut conn = db.connect().await.unwrap();
        let draft = OrderDraft::new(user.id, cafe_core::PaymentType::Cash, Utc::now(), Decimal::ONE);
        let order_id = conn.insert_order(&draft).await.unwrap().unwrap();
        let line = |dish| CartLine {
            dish_id: cafe_core::DishId::new(dish),
            price: Decimal::ONE,
            quantity: 1,
        };

        db.fail_order_line_insert_after(1);
        assert_eq!(conn.insert_order_line(order_id, &line(1)).await.unwrap(), 1);
        assert!(conn.insert_order_line(order_id, &line(2)).await.is_err());
        assert_eq!(conn.insert_order_line(order_id, &line(3)).await.unwrap(), 1);
    }
}
