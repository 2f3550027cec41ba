//! `PostgreSQL` backend for the pool and statement traits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection as _, FromRow, PgConnection};

use cafe_core::{OrderId, OrderStatus, UserId};

use super::RepositoryError;
use super::pool::{Connect, ConnectionPool, ManagedConnection};
use super::statements::{AccountStatements, OrderFilter, OrderStatements};
use crate::config::PoolConfig;
use crate::models::{CartLine, Order, OrderDraft, OrderLine, UserAccount};

/// Pool of `PostgreSQL` connections used by the running service.
pub type PgConnectionPool = ConnectionPool<PgConnector>;

/// Create the `PostgreSQL` connection pool, opening every connection up front.
///
/// # Errors
///
/// Returns `RepositoryError::PoolInitialization` if the URL is malformed or
/// any connection fails.
pub async fn create_pool(
    database_url: &SecretString,
    config: &PoolConfig,
) -> Result<PgConnectionPool, RepositoryError> {
    let connector = PgConnector::from_url(database_url)?;
    config.options().connect(connector).await
}

/// Opens connections from parsed connect options.
#[derive(Debug, Clone)]
pub struct PgConnector {
    options: PgConnectOptions,
}

impl PgConnector {
    /// Parse a `postgres://` URL.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::PoolInitialization` if the URL does not parse.
    pub fn from_url(database_url: &SecretString) -> Result<Self, RepositoryError> {
        let options = database_url
            .expose_secret()
            .parse::<PgConnectOptions>()
            .map_err(RepositoryError::PoolInitialization)?;
        Ok(Self { options })
    }
}

impl Connect for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, sqlx::Error> {
        PgConnection::connect_with(&self.options).await
    }
}

impl ManagedConnection for PgConnection {
    async fn begin_transaction(&mut self) -> Result<(), sqlx::Error> {
        sqlx::Executor::execute(&mut *self, sqlx::raw_sql("BEGIN")).await?;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), sqlx::Error> {
        sqlx::Executor::execute(&mut *self, sqlx::raw_sql("COMMIT")).await?;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<(), sqlx::Error> {
        sqlx::Executor::execute(&mut *self, sqlx::raw_sql("ROLLBACK")).await?;
        Ok(())
    }

    async fn validate(&mut self) -> Result<(), sqlx::Error> {
        sqlx::Connection::ping(self).await
    }

    async fn terminate(self) -> Result<(), sqlx::Error> {
        sqlx::Connection::close(self).await
    }
}

// =============================================================================
// Users
// =============================================================================

#[derive(FromRow)]
struct AccountRow {
    user_id: UserId,
    login: String,
    balance: Decimal,
    loyalty_points: Decimal,
}

impl From<AccountRow> for UserAccount {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.user_id,
            login: row.login,
            balance: row.balance,
            loyalty_points: row.loyalty_points,
        }
    }
}

impl AccountStatements for PgConnection {
    async fn update_balance_and_points(
        &mut self,
        user_id: UserId,
        balance: Decimal,
        loyalty_points: Decimal,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE cafe."user" SET balance = $1, loyalty_points = $2 WHERE user_id = $3"#,
        )
        .bind(balance)
        .bind(loyalty_points)
        .bind(user_id)
        .execute(&mut *self)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_loyalty_points(
        &mut self,
        user_id: UserId,
        loyalty_points: Decimal,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(r#"UPDATE cafe."user" SET loyalty_points = $1 WHERE user_id = $2"#)
            .bind(loyalty_points)
            .bind(user_id)
            .execute(&mut *self)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_balance(&mut self, user_id: UserId, balance: Decimal) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(r#"UPDATE cafe."user" SET balance = $1 WHERE user_id = $2"#)
            .bind(balance)
            .bind(user_id)
            .execute(&mut *self)
            .await?;
        Ok(result.rows_affected())
    }

    async fn select_account(&mut self, user_id: UserId) -> Result<Option<UserAccount>, sqlx::Error> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"SELECT user_id, login, balance, loyalty_points FROM cafe."user" WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self)
        .await?;
        Ok(row.map(UserAccount::from))
    }

    async fn insert_account(
        &mut self,
        login: &str,
        balance: Decimal,
        loyalty_points: Decimal,
    ) -> Result<UserAccount, sqlx::Error> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO cafe."user" (login, balance, loyalty_points)
            VALUES ($1, $2, $3)
            RETURNING user_id, login, balance, loyalty_points
            "#,
        )
        .bind(login)
        .bind(balance)
        .bind(loyalty_points)
        .fetch_one(&mut *self)
        .await?;
        Ok(row.into())
    }
}

// =============================================================================
// Orders
// =============================================================================

/// `SELECT` over the order table with a trailing clause.
macro_rules! select_orders {
    ($tail:literal) => {
        concat!(
            "SELECT order_id, user_id, payment_type, pick_up_time, order_price, ",
            "is_paid, status, create_date, rating, review ",
            r#"FROM cafe."order" "#,
            $tail
        )
    };
}

#[derive(FromRow)]
struct OrderRow {
    order_id: OrderId,
    user_id: UserId,
    payment_type: String,
    pick_up_time: DateTime<Utc>,
    order_price: Decimal,
    is_paid: bool,
    status: String,
    create_date: DateTime<Utc>,
    rating: Option<i32>,
    review: Option<String>,
}

impl TryFrom<OrderRow> for Order {
    type Error = sqlx::Error;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let payment_type = row
            .payment_type
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let status = row
            .status
            .parse()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

        Ok(Self {
            id: row.order_id,
            user_id: row.user_id,
            payment_type,
            pick_up_time: row.pick_up_time,
            price: row.order_price,
            paid: row.is_paid,
            status,
            created_at: row.create_date,
            rating: row.rating,
            review: row.review,
        })
    }
}

#[derive(FromRow)]
struct OrderLineRow {
    order_id: OrderId,
    dish_id: cafe_core::DishId,
    dish_price: Decimal,
    dish_quantity: i32,
}

impl OrderStatements for PgConnection {
    async fn insert_order(&mut self, draft: &OrderDraft) -> Result<Option<OrderId>, sqlx::Error> {
        sqlx::query_scalar::<_, OrderId>(
            r#"
            INSERT INTO cafe."order" (user_id, payment_type, pick_up_time, order_price, is_paid)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING order_id
            "#,
        )
        .bind(draft.user_id)
        .bind(draft.payment_type.as_str())
        .bind(draft.pick_up_time)
        .bind(draft.price)
        .bind(draft.paid)
        .fetch_optional(&mut *self)
        .await
    }

    async fn insert_order_line(&mut self, order_id: OrderId, line: &CartLine) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r"
            INSERT INTO cafe.order_has_dish (order_id, dish_id, dish_price, dish_quantity)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(order_id)
        .bind(line.dish_id)
        .bind(line.price)
        .bind(line.quantity)
        .execute(&mut *self)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_order_status(&mut self, order_id: OrderId, status: OrderStatus) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(r#"UPDATE cafe."order" SET status = $1 WHERE order_id = $2"#)
            .bind(status.as_str())
            .bind(order_id)
            .execute(&mut *self)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_order_review(
        &mut self,
        order_id: OrderId,
        rating: Option<i32>,
        review: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query(r#"UPDATE cafe."order" SET rating = $1, review = $2 WHERE order_id = $3"#)
                .bind(rating)
                .bind(review)
                .bind(order_id)
                .execute(&mut *self)
                .await?;
        Ok(result.rows_affected())
    }

    async fn update_order_payment(
        &mut self,
        order_id: OrderId,
        paid: bool,
        status: OrderStatus,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query(r#"UPDATE cafe."order" SET is_paid = $1, status = $2 WHERE order_id = $3"#)
                .bind(paid)
                .bind(status.as_str())
                .bind(order_id)
                .execute(&mut *self)
                .await?;
        Ok(result.rows_affected())
    }

    async fn select_order(&mut self, order_id: OrderId) -> Result<Option<Order>, sqlx::Error> {
        sqlx::query_as::<_, OrderRow>(select_orders!("WHERE order_id = $1"))
            .bind(order_id)
            .fetch_optional(&mut *self)
            .await?
            .map(Order::try_from)
            .transpose()
    }

    async fn select_orders(&mut self, filter: OrderFilter) -> Result<Vec<Order>, sqlx::Error> {
        let query = match filter {
            OrderFilter::All => sqlx::query_as::<_, OrderRow>(select_orders!("ORDER BY order_id DESC")),
            OrderFilter::ByUser(user_id) => {
                sqlx::query_as(select_orders!("WHERE user_id = $1 ORDER BY order_id DESC")).bind(user_id)
            }
            OrderFilter::ByUserAndStatus(user_id, status) => sqlx::query_as(select_orders!(
                "WHERE user_id = $1 AND status = $2 ORDER BY order_id DESC"
            ))
            .bind(user_id)
            .bind(status.as_str()),
            OrderFilter::WithReview => {
                sqlx::query_as(select_orders!("WHERE review IS NOT NULL ORDER BY order_id DESC"))
            }
        };

        query
            .fetch_all(&mut *self)
            .await?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }

    async fn select_order_lines(&mut self, order_id: OrderId) -> Result<Vec<OrderLine>, sqlx::Error> {
        let rows = sqlx::query_as::<_, OrderLineRow>(
            r"
            SELECT order_id, dish_id, dish_price, dish_quantity
            FROM cafe.order_has_dish
            WHERE order_id = $1
            ORDER BY dish_id
            ",
        )
        .bind(order_id)
        .fetch_all(&mut *self)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| OrderLine {
                order_id: row.order_id,
                dish_id: row.dish_id,
                price: row.dish_price,
                quantity: row.dish_quantity,
            })
            .collect())
    }
}
