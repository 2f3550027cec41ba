//! Order domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use cafe_core::{DishId, OrderId, OrderStatus, PaymentType, UserId};

/// A stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    /// Customer who placed the order.
    pub user_id: UserId,
    pub payment_type: PaymentType,
    /// When the customer will collect the order.
    pub pick_up_time: DateTime<Utc>,
    /// Total at placement time.
    pub price: Decimal,
    pub paid: bool,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Customer rating, 1 to 5, once reviewed.
    pub rating: Option<i32>,
    pub review: Option<String>,
}

impl Order {
    /// Whether the pickup time has arrived and the order is still active.
    #[must_use]
    pub fn is_ready_for_pickup(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Active && self.pick_up_time <= now
    }

    /// Whether the customer has left a review.
    #[must_use]
    pub const fn has_review(&self) -> bool {
        self.review.is_some()
    }
}

/// An order that has not been stored yet.
///
/// `id` stays `None` until placement commits, at which point the
/// storage-assigned identity is written back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub id: Option<OrderId>,
    pub user_id: UserId,
    pub payment_type: PaymentType,
    pub pick_up_time: DateTime<Utc>,
    pub price: Decimal,
    pub paid: bool,
}

impl OrderDraft {
    /// A new draft; account and loyalty-point orders are paid up front.
    #[must_use]
    pub const fn new(
        user_id: UserId,
        payment_type: PaymentType,
        pick_up_time: DateTime<Utc>,
        price: Decimal,
    ) -> Self {
        Self {
            id: None,
            user_id,
            payment_type,
            pick_up_time,
            price,
            paid: payment_type.is_prepaid(),
        }
    }
}

/// One dish on a stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub order_id: OrderId,
    pub dish_id: DishId,
    /// Dish price when the order was placed.
    pub price: Decimal,
    pub quantity: i32,
}

/// A customer's orders split by status, each list newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrderHistory {
    pub active: Vec<Order>,
    pub cancelled: Vec<Order>,
    pub finished: Vec<Order>,
}

impl OrderHistory {
    /// Partition orders by status, keeping their relative order.
    #[must_use]
    pub fn from_orders(orders: Vec<Order>) -> Self {
        let mut history = Self::default();
        for order in orders {
            match order.status {
                OrderStatus::Active => history.active.push(order),
                OrderStatus::Cancelled => history.cancelled.push(order),
                OrderStatus::Finished => history.finished.push(order),
            }
        }
        history
    }

    /// Total number of orders across all statuses.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.active.len() + self.cancelled.len() + self.finished.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn order(id: i32, status: OrderStatus, pick_up_time: DateTime<Utc>) -> Order {
        Order {
            id: OrderId::new(id),
            user_id: UserId::new(1),
            payment_type: PaymentType::Cash,
            pick_up_time,
            price: Decimal::from(10),
            paid: false,
            status,
            created_at: pick_up_time - Duration::hours(1),
            rating: None,
            review: None,
        }
    }

    #[test]
    fn test_draft_paid_flag_follows_payment_type() {
        let now = Utc::now();
        let draft = OrderDraft::new(UserId::new(1), PaymentType::Account, now, Decimal::ONE);
        assert!(draft.paid);
        assert!(draft.id.is_none());

        let draft = OrderDraft::new(UserId::new(1), PaymentType::Cash, now, Decimal::ONE);
        assert!(!draft.paid);
    }

    #[test]
    fn test_ready_for_pickup() {
        let now = Utc::now();
        assert!(order(1, OrderStatus::Active, now - Duration::minutes(5)).is_ready_for_pickup(now));
        assert!(!order(1, OrderStatus::Active, now + Duration::minutes(5)).is_ready_for_pickup(now));
        assert!(
            !order(1, OrderStatus::Cancelled, now - Duration::minutes(5)).is_ready_for_pickup(now)
        );
    }

    #[test]
    fn test_history_partitions_and_keeps_order() {
        let now = Utc::now();
        let history = OrderHistory::from_orders(vec![
            order(4, OrderStatus::Active, now),
            order(3, OrderStatus::Finished, now),
            order(2, OrderStatus::Active, now),
            order(1, OrderStatus::Cancelled, now),
        ]);

        let active: Vec<_> = history.active.iter().map(|o| o.id.as_i32()).collect();
        assert_eq!(active, vec![4, 2]);
        assert_eq!(history.cancelled.len(), 1);
        assert_eq!(history.finished.len(), 1);
        assert_eq!(history.len(), 4);
    }
}
