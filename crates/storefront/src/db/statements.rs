//! Statement surface of a leased connection.
//!
//! Each method is one parameterized statement. Writes report the number of
//! rows affected and leave the zero-row decision to the caller, so the same
//! statement can be a hard failure inside a transaction and a `NotFound` in
//! a single-row update.

use std::future::Future;

use rust_decimal::Decimal;

use cafe_core::{OrderId, OrderStatus, UserId};

use crate::models::{CartLine, Order, OrderDraft, OrderLine, UserAccount};

/// Which orders a list query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
    All,
    ByUser(UserId),
    ByUserAndStatus(UserId, OrderStatus),
    /// Orders carrying review text.
    WithReview,
}

impl OrderFilter {
    /// Whether `order` passes the filter.
    #[must_use]
    pub fn matches(&self, order: &Order) -> bool {
        match *self {
            Self::All => true,
            Self::ByUser(user_id) => order.user_id == user_id,
            Self::ByUserAndStatus(user_id, status) => {
                order.user_id == user_id && order.status == status
            }
            Self::WithReview => order.review.is_some(),
        }
    }
}

/// Statements against the user table.
pub trait AccountStatements: Send {
    /// `UPDATE user SET balance, loyalty_points`.
    fn update_balance_and_points(
        &mut self,
        user_id: UserId,
        balance: Decimal,
        loyalty_points: Decimal,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// `UPDATE user SET loyalty_points`.
    fn update_loyalty_points(
        &mut self,
        user_id: UserId,
        loyalty_points: Decimal,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// `UPDATE user SET balance`.
    fn update_balance(
        &mut self,
        user_id: UserId,
        balance: Decimal,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn select_account(
        &mut self,
        user_id: UserId,
    ) -> impl Future<Output = Result<Option<UserAccount>, sqlx::Error>> + Send;

    /// Insert a user and return the stored row.
    fn insert_account(
        &mut self,
        login: &str,
        balance: Decimal,
        loyalty_points: Decimal,
    ) -> impl Future<Output = Result<UserAccount, sqlx::Error>> + Send;
}

/// Statements against the order and order-line tables.
pub trait OrderStatements: Send {
    /// Insert the order row and return its storage-assigned identity.
    fn insert_order(
        &mut self,
        draft: &OrderDraft,
    ) -> impl Future<Output = Result<Option<OrderId>, sqlx::Error>> + Send;

    fn insert_order_line(
        &mut self,
        order_id: OrderId,
        line: &CartLine,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn update_order_status(
        &mut self,
        order_id: OrderId,
        status: OrderStatus,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    /// Set rating and review; `None` clears the column.
    fn update_order_review(
        &mut self,
        order_id: OrderId,
        rating: Option<i32>,
        review: Option<&str>,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn update_order_payment(
        &mut self,
        order_id: OrderId,
        paid: bool,
        status: OrderStatus,
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;

    fn select_order(
        &mut self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Order>, sqlx::Error>> + Send;

    /// Orders matching `filter`, most recently created first.
    fn select_orders(
        &mut self,
        filter: OrderFilter,
    ) -> impl Future<Output = Result<Vec<Order>, sqlx::Error>> + Send;

    /// Lines of one order, ordered by dish.
    fn select_order_lines(
        &mut self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Vec<OrderLine>, sqlx::Error>> + Send;
}
