//! Order repository.
//!
//! Placement and cancellation touch the user and order tables together and
//! run through [`in_transaction`]. Everything else is a single statement on
//! one leased connection.

use rust_decimal::Decimal;
use tracing::instrument;

use cafe_core::{OrderId, OrderStatus, UserId};

use super::pool::{Connect, ConnectionPool};
use super::statements::{AccountStatements, OrderFilter, OrderStatements};
use super::transaction::in_transaction;
use super::{RepositoryError, WriteFailure};
use crate::models::{Cart, Order, OrderDraft, OrderHistory, OrderLine};

const UPDATE_USER_BALANCE: &str = "update user balance and loyalty points";
const UPDATE_USER_POINTS: &str = "update user loyalty points";
const INSERT_ORDER: &str = "insert order";
const INSERT_ORDER_LINE: &str = "insert order line";
const UPDATE_ORDER_STATUS: &str = "update order status";

/// Lowest and highest rating a customer can give.
pub const RATING_RANGE: std::ops::RangeInclusive<i32> = 1..=5;

/// Repository for order database operations.
pub struct OrderRepository<'a, F: Connect> {
    pool: &'a ConnectionPool<F>,
}

impl<'a, F> OrderRepository<'a, F>
where
    F: Connect,
    F::Connection: AccountStatements + OrderStatements,
{
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a ConnectionPool<F>) -> Self {
        Self { pool }
    }

    /// Place an order: charge the user, store the order and its lines, all or nothing.
    ///
    /// On success the storage-assigned id is written to `draft.id` and returned.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::InvalidInput` if the draft already has an id or the
    ///   cart is empty (checked before any connection is taken).
    /// - `RepositoryError::AtomicWrite` if any statement failed or matched no
    ///   rows; nothing was stored.
    /// - `RepositoryError::RollbackFailed` if the rollback failed as well.
    /// - Pool errors from acquiring the connection.
    #[instrument(
        skip(self, draft, cart),
        fields(user_id = %draft.user_id, payment_type = %draft.payment_type, lines = cart.len())
    )]
    pub async fn place_order(
        &self,
        new_balance: Decimal,
        new_loyalty_points: Decimal,
        draft: &mut OrderDraft,
        cart: &Cart,
    ) -> Result<OrderId, RepositoryError> {
        if let Some(id) = draft.id {
            return Err(RepositoryError::InvalidInput(format!(
                "order draft already stored as {id}"
            )));
        }
        if cart.is_empty() {
            return Err(RepositoryError::InvalidInput("cart is empty".to_owned()));
        }

        let order = draft.clone();
        let lines = cart.lines().to_vec();

        let order_id = in_transaction(self.pool, "place order", move |conn| {
            Box::pin(async move {
                let rows = conn
                    .update_balance_and_points(order.user_id, new_balance, new_loyalty_points)
                    .await
                    .map_err(WriteFailure::in_statement(UPDATE_USER_BALANCE))?;
                WriteFailure::expect_rows(UPDATE_USER_BALANCE, rows)?;

                let order_id = conn
                    .insert_order(&order)
                    .await
                    .map_err(WriteFailure::in_statement(INSERT_ORDER))?
                    .ok_or(WriteFailure::NoRowsAffected {
                        statement: INSERT_ORDER,
                    })?;

                for line in &lines {
                    let rows = conn
                        .insert_order_line(order_id, line)
                        .await
                        .map_err(WriteFailure::in_statement(INSERT_ORDER_LINE))?;
                    WriteFailure::expect_rows(INSERT_ORDER_LINE, rows)?;
                }

                Ok::<_, WriteFailure>(order_id)
            })
        })
        .await?;

        draft.id = Some(order_id);
        tracing::info!(order_id = %order_id, "order placed");
        Ok(order_id)
    }

    /// Move an order to `new_status` and set the user's loyalty points, all or nothing.
    ///
    /// # Errors
    ///
    /// - `RepositoryError::AtomicWrite` if either row is missing or a statement
    ///   failed; nothing was changed.
    /// - `RepositoryError::RollbackFailed` if the rollback failed as well.
    /// - Pool errors from acquiring the connection.
    #[instrument(skip(self, order), fields(order_id = %order.id, user_id = %order.user_id))]
    pub async fn cancel_order(
        &self,
        new_loyalty_points: Decimal,
        order: &Order,
        new_status: OrderStatus,
    ) -> Result<(), RepositoryError> {
        let order_id = order.id;
        let user_id = order.user_id;

        in_transaction(self.pool, "cancel order", move |conn| {
            Box::pin(async move {
                let rows = conn
                    .update_loyalty_points(user_id, new_loyalty_points)
                    .await
                    .map_err(WriteFailure::in_statement(UPDATE_USER_POINTS))?;
                WriteFailure::expect_rows(UPDATE_USER_POINTS, rows)?;

                let rows = conn
                    .update_order_status(order_id, new_status)
                    .await
                    .map_err(WriteFailure::in_statement(UPDATE_ORDER_STATUS))?;
                WriteFailure::expect_rows(UPDATE_ORDER_STATUS, rows)
            })
        })
        .await?;

        tracing::info!(status = %new_status, "order status changed");
        Ok(())
    }

    /// Get an order by its ID.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if a stored enum value is unknown.
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, order_id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let mut lease = self.pool.acquire().await?;
        lease
            .connection()?
            .select_order(order_id)
            .await
            .map_err(RepositoryError::from_read)
    }

    /// All orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_all(&self) -> Result<Vec<Order>, RepositoryError> {
        self.find(OrderFilter::All).await
    }

    /// A user's orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        self.find(OrderFilter::ByUser(user_id)).await
    }

    /// A user's active orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_active_by_user(&self, user_id: UserId) -> Result<Vec<Order>, RepositoryError> {
        self.find(OrderFilter::ByUserAndStatus(user_id, OrderStatus::Active))
            .await
    }

    /// A user's cancelled orders, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_cancelled_by_user(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Order>, RepositoryError> {
        self.find(OrderFilter::ByUserAndStatus(user_id, OrderStatus::Cancelled))
            .await
    }

    /// Orders that carry a review, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_with_review(&self) -> Result<Vec<Order>, RepositoryError> {
        self.find(OrderFilter::WithReview).await
    }

    /// A user's orders grouped by status for the customer page.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn history(&self, user_id: UserId) -> Result<OrderHistory, RepositoryError> {
        let orders = self.find_by_user(user_id).await?;
        Ok(OrderHistory::from_orders(orders))
    }

    /// The dishes on one order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[instrument(skip(self))]
    pub async fn find_lines(&self, order_id: OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        let mut lease = self.pool.acquire().await?;
        lease
            .connection()?
            .select_order_lines(order_id)
            .await
            .map_err(RepositoryError::from_read)
    }

    #[instrument(skip(self))]
    async fn find(&self, filter: OrderFilter) -> Result<Vec<Order>, RepositoryError> {
        let mut lease = self.pool.acquire().await?;
        let orders = lease
            .connection()?
            .select_orders(filter)
            .await
            .map_err(RepositoryError::from_read)?;
        tracing::debug!(count = orders.len(), "orders loaded");
        Ok(orders)
    }

    /// Attach (or clear) a rating and review.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::InvalidInput` if the rating is outside 1 to 5.
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    /// Returns `RepositoryError::Database` if the update fails.
    #[instrument(skip(self, review))]
    pub async fn update_review(
        &self,
        order_id: OrderId,
        rating: Option<i32>,
        review: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if let Some(rating) = rating
            && !RATING_RANGE.contains(&rating)
        {
            return Err(RepositoryError::InvalidInput(format!(
                "rating must be between {} and {}, got {rating}",
                RATING_RANGE.start(),
                RATING_RANGE.end()
            )));
        }

        let mut lease = self.pool.acquire().await?;
        let rows = lease
            .connection()?
            .update_order_review(order_id, rating, review)
            .await?;
        expect_single_row(rows)
    }

    /// Record payment and the resulting status at pickup.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist.
    /// Returns `RepositoryError::Database` if the update fails.
    #[instrument(skip(self))]
    pub async fn update_payment(
        &self,
        order_id: OrderId,
        paid: bool,
        status: OrderStatus,
    ) -> Result<(), RepositoryError> {
        let mut lease = self.pool.acquire().await?;
        let rows = lease
            .connection()?
            .update_order_payment(order_id, paid, status)
            .await?;
        expect_single_row(rows)
    }
}

/// Zero rows from a single-row update means the target does not exist.
pub(crate) fn expect_single_row(rows_affected: u64) -> Result<(), RepositoryError> {
    if rows_affected == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{Duration, Utc};

    use cafe_core::{DishId, PaymentType};

    use super::*;
    use crate::db::memory::MemoryDatabase;
    use crate::db::pool::PoolOptions;
    use crate::models::Dish;

    async fn setup() -> (MemoryDatabase, ConnectionPool<MemoryDatabase>, UserId) {
        let db = MemoryDatabase::new();
        let user = db.insert_account("ana", Decimal::from(100), Decimal::from(5));
        let pool = PoolOptions::new().capacity(2).connect(db.clone()).await.unwrap();
        (db, pool, user.id)
    }

    fn cart(dishes: &[(i32, i64, u16)]) -> Cart {
        let mut cart = Cart::new();
        for &(id, price, quantity) in dishes {
            let dish = Dish {
                id: DishId::new(id),
                name: format!("dish {id}"),
                price: Decimal::from(price),
            };
            cart.add(&dish, quantity);
        }
        cart
    }

    fn draft(user_id: UserId) -> OrderDraft {
        OrderDraft::new(
            user_id,
            PaymentType::Account,
            Utc::now() + Duration::hours(1),
            Decimal::from(30),
        )
    }

    #[tokio::test]
    async fn test_place_order_sets_id_and_charges_user() {
        let (db, pool, user_id) = setup().await;
        let repo = OrderRepository::new(&pool);
        let mut order = draft(user_id);

        let id = repo
            .place_order(Decimal::from(70), Decimal::from(8), &mut order, &cart(&[(1, 15, 2)]))
            .await
            .unwrap();

        assert_eq!(order.id, Some(id));
        let account = db.account(user_id).unwrap();
        assert_eq!(account.balance, Decimal::from(70));
        assert_eq!(account.loyalty_points, Decimal::from(8));
        assert_eq!(repo.find_lines(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected_without_a_connection() {
        let (db, pool, user_id) = setup().await;
        let repo = OrderRepository::new(&pool);

        let result = repo
            .place_order(Decimal::ZERO, Decimal::ZERO, &mut draft(user_id), &Cart::new())
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidInput(_))));
        assert_eq!(db.stats().commits + db.stats().rollbacks, 0);
    }

    #[tokio::test]
    async fn test_stored_draft_is_rejected() {
        let (_db, pool, user_id) = setup().await;
        let repo = OrderRepository::new(&pool);
        let mut order = draft(user_id);
        order.id = Some(OrderId::new(9));

        let result = repo
            .place_order(Decimal::ZERO, Decimal::ZERO, &mut order, &cart(&[(1, 15, 1)]))
            .await;
        assert!(matches!(result, Err(RepositoryError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_unknown_user_rolls_back() {
        let (db, pool, _user_id) = setup().await;
        let repo = OrderRepository::new(&pool);
        let mut order = draft(UserId::new(404));

        let result = repo
            .place_order(Decimal::ZERO, Decimal::ZERO, &mut order, &cart(&[(1, 15, 1)]))
            .await;

        assert!(matches!(
            result,
            Err(RepositoryError::AtomicWrite(WriteFailure::NoRowsAffected {
                statement: UPDATE_USER_BALANCE
            }))
        ));
        assert!(order.id.is_none());
        assert!(db.orders().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_missing_order_keeps_points() {
        let (db, pool, user_id) = setup().await;
        let repo = OrderRepository::new(&pool);
        let mut order = draft(user_id);
        let id = repo
            .place_order(Decimal::from(70), Decimal::from(8), &mut order, &cart(&[(1, 15, 2)]))
            .await
            .unwrap();

        let mut stale = repo.find_by_id(id).await.unwrap().unwrap();
        stale.id = OrderId::new(id.as_i32() + 100);

        let result = repo.cancel_order(Decimal::from(50), &stale, OrderStatus::Cancelled).await;

        assert!(matches!(
            result,
            Err(RepositoryError::AtomicWrite(WriteFailure::NoRowsAffected {
                statement: UPDATE_ORDER_STATUS
            }))
        ));
        assert_eq!(db.account(user_id).unwrap().loyalty_points, Decimal::from(8));
    }

    #[tokio::test]
    async fn test_update_review_validates_rating() {
        let (_db, pool, _user_id) = setup().await;
        let repo = OrderRepository::new(&pool);

        let result = repo.update_review(OrderId::new(1), Some(6), Some("great")).await;
        assert!(matches!(result, Err(RepositoryError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_single_row_updates_report_not_found() {
        let (_db, pool, _user_id) = setup().await;
        let repo = OrderRepository::new(&pool);

        assert!(matches!(
            repo.update_review(OrderId::new(1), Some(5), None).await,
            Err(RepositoryError::NotFound)
        ));
        assert!(matches!(
            repo.update_payment(OrderId::new(1), true, OrderStatus::Finished).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_review_and_payment_round_trip() {
        let (_db, pool, user_id) = setup().await;
        let repo = OrderRepository::new(&pool);
        let mut order = draft(user_id);
        let id = repo
            .place_order(Decimal::from(70), Decimal::from(8), &mut order, &cart(&[(1, 15, 2)]))
            .await
            .unwrap();

        repo.update_payment(id, true, OrderStatus::Finished).await.unwrap();
        repo.update_review(id, Some(4), Some("good coffee")).await.unwrap();

        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Finished);
        assert!(stored.paid);
        assert_eq!(stored.rating, Some(4));
        assert_eq!(stored.review.as_deref(), Some("good coffee"));
        assert_eq!(repo.find_with_review().await.unwrap().len(), 1);

        let history = repo.history(user_id).await.unwrap();
        assert_eq!(history.finished.len(), 1);
        assert!(history.active.is_empty());
    }
}
