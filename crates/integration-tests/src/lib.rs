//! Integration tests for the cafe storefront.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cafe-integration-tests
//! ```
//!
//! The tests run the real pool, transaction and repository code against the
//! in-memory storage engine (`cafe-storefront` feature `test-support`), so no
//! database is needed.
//!
//! # Test Categories
//!
//! - `pool` - Exhaustion, waiter order, exclusivity, shutdown
//! - `order_placement` - Atomic placement, rollback paths, visibility
//! - `order_queries` - Cancellation, listing order, reviews

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use cafe_core::{DishId, PaymentType, UserId};
use cafe_storefront::db::memory::MemoryDatabase;
use cafe_storefront::db::{ConnectionPool, OrderRepository, PoolOptions, RepositoryError, UserRepository};
use cafe_storefront::models::{Cart, Dish, OrderDraft, UserAccount};

/// A memory database plus a pool connected to it.
pub struct TestContext {
    pub db: MemoryDatabase,
    pub pool: ConnectionPool<MemoryDatabase>,
}

impl TestContext {
    /// Open a pool of `capacity` connections over a fresh database.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::PoolInitialization` for a zero capacity.
    pub async fn new(capacity: usize) -> Result<Self, RepositoryError> {
        let db = MemoryDatabase::new();
        let pool = PoolOptions::new().capacity(capacity).connect(db.clone()).await?;
        Ok(Self { db, pool })
    }

    /// Insert a customer with whole-unit balance and points.
    #[must_use]
    pub fn customer(&self, login: &str, balance: i64, loyalty_points: i64) -> UserAccount {
        self.db
            .insert_account(login, Decimal::from(balance), Decimal::from(loyalty_points))
    }

    #[must_use]
    pub const fn orders(&self) -> OrderRepository<'_, MemoryDatabase> {
        OrderRepository::new(&self.pool)
    }

    #[must_use]
    pub const fn users(&self) -> UserRepository<'_, MemoryDatabase> {
        UserRepository::new(&self.pool)
    }

    /// Whether every connection is idle and none is leased.
    #[must_use]
    pub fn all_idle(&self) -> bool {
        let status = self.pool.status();
        status.leased.is_empty() && status.idle.len() == status.capacity
    }
}

#[must_use]
pub fn dish(id: i32, name: &str, price: i64) -> Dish {
    Dish {
        id: DishId::new(id),
        name: name.to_owned(),
        price: Decimal::from(price),
    }
}

/// Cart from `(dish, quantity)` pairs.
#[must_use]
pub fn cart(items: &[(&Dish, u16)]) -> Cart {
    let mut cart = Cart::new();
    for &(dish, quantity) in items {
        cart.add(dish, quantity);
    }
    cart
}

/// An account-paid draft for `cart`, picked up in an hour.
#[must_use]
pub fn draft(user_id: UserId, cart: &Cart) -> OrderDraft {
    OrderDraft::new(user_id, PaymentType::Account, pickup_in_an_hour(), cart.total())
}

#[must_use]
pub fn pickup_in_an_hour() -> DateTime<Utc> {
    Utc::now() + Duration::hours(1)
}
