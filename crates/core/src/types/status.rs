//! Status and payment enums for orders.
//!
//! Both are stored as upper-case text columns (`'ACTIVE'`, `'ACCOUNT'`),
//! so they round-trip through [`Display`](std::fmt::Display) and
//! [`FromStr`](std::str::FromStr) rather than a Postgres enum type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A stored status or payment value that does not match any variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The offending text.
    pub value: String,
}

/// Order lifecycle status.
///
/// Orders start `Active`; cancellation and pickup move them to one of the
/// two terminal states. Orders are never deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Active,
    Cancelled,
    Finished,
}

impl OrderStatus {
    /// Column representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
            Self::Finished => "FINISHED",
        }
    }

    /// Whether no further transition is expected.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Finished)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "CANCELLED" => Ok(Self::Cancelled),
            "FINISHED" => Ok(Self::Finished),
            _ => Err(UnknownVariant {
                kind: "order status",
                value: s.to_owned(),
            }),
        }
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    /// Debited from the account balance when the order is placed.
    Account,
    /// Paid at the counter on pickup.
    Cash,
    /// Redeemed from loyalty points when the order is placed.
    LoyaltyPoints,
}

impl PaymentType {
    /// Column representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "ACCOUNT",
            Self::Cash => "CASH",
            Self::LoyaltyPoints => "LOYALTY_POINTS",
        }
    }

    /// Whether the order is settled at placement time.
    #[must_use]
    pub const fn is_prepaid(&self) -> bool {
        !matches!(self, Self::Cash)
    }
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACCOUNT" => Ok(Self::Account),
            "CASH" => Ok(Self::Cash),
            "LOYALTY_POINTS" => Ok(Self::LoyaltyPoints),
            _ => Err(UnknownVariant {
                kind: "payment type",
                value: s.to_owned(),
            }),
        }
    }
}
