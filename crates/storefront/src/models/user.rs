//! User account domain type.

use rust_decimal::Decimal;
use serde::Serialize;

use cafe_core::UserId;

/// The slice of a customer row the order writer reads and mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccount {
    /// Unique user ID.
    pub id: UserId,
    /// Login name, unique across users.
    pub login: String,
    /// Prepaid account balance.
    pub balance: Decimal,
    /// Accumulated loyalty points, redeemable as payment.
    pub loyalty_points: Decimal,
}

impl UserAccount {
    /// Whether the balance covers `amount`.
    #[must_use]
    pub fn can_afford(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_afford() {
        let account = UserAccount {
            id: UserId::new(1),
            login: "ana".to_owned(),
            balance: Decimal::from(30),
            loyalty_points: Decimal::ZERO,
        };
        assert!(account.can_afford(Decimal::from(30)));
        assert!(!account.can_afford(Decimal::new(3001, 2)));
    }
}
