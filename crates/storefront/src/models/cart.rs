//! Dishes and the customer's cart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cafe_core::DishId;

/// A menu entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dish {
    pub id: DishId,
    pub name: String,
    /// Current menu price.
    pub price: Decimal,
}

/// One cart entry.
///
/// `price` is the dish price when the entry was created and is what gets
/// written to the order line, even if the menu price changes later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub dish_id: DishId,
    pub price: Decimal,
    pub quantity: i32,
}

impl CartLine {
    /// Price times quantity.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

/// Dishes selected for one order, in the order they were first added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub const fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Add `quantity` of `dish` at its current price.
    ///
    /// Adding a dish that is already in the cart increases its quantity and
    /// keeps the originally captured price. A zero quantity is ignored.
    pub fn add(&mut self, dish: &Dish, quantity: u16) {
        if quantity == 0 {
            return;
        }
        let quantity = i32::from(quantity);

        if let Some(line) = self.lines.iter_mut().find(|line| line.dish_id == dish.id) {
            line.quantity = line.quantity.saturating_add(quantity);
            return;
        }

        self.lines.push(CartLine {
            dish_id: dish.id,
            price: dish.price,
            quantity,
        });
    }

    /// Drop a dish from the cart. Returns whether it was present.
    pub fn remove(&mut self, dish_id: DishId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|line| line.dish_id != dish_id);
        self.lines.len() != before
    }

    #[must_use]
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of line subtotals.
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.lines.iter().map(CartLine::subtotal).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dish(id: i32, price: i64) -> Dish {
        Dish {
            id: DishId::new(id),
            name: format!("dish {id}"),
            price: Decimal::from(price),
        }
    }

    #[test]
    fn test_add_captures_price() {
        let mut menu_item = dish(1, 15);
        let mut cart = Cart::new();
        cart.add(&menu_item, 2);

        menu_item.price = Decimal::from(20);
        cart.add(&menu_item, 1);

        assert_eq!(cart.len(), 1);
        assert_eq!(cart.lines()[0].price, Decimal::from(15));
        assert_eq!(cart.lines()[0].quantity, 3);
    }

    #[test]
    fn test_zero_quantity_is_ignored() {
        let mut cart = Cart::new();
        cart.add(&dish(1, 15), 0);
        assert!(cart.is_empty());
    }

    #[test]
    fn test_total() {
        let mut cart = Cart::new();
        cart.add(&dish(1, 15), 2);
        cart.add(&dish(2, 4), 3);
        assert_eq!(cart.total(), Decimal::from(42));
    }

    #[test]
    fn test_remove() {
        let mut cart = Cart::new();
        cart.add(&dish(1, 15), 2);
        assert!(cart.remove(DishId::new(1)));
        assert!(!cart.remove(DishId::new(1)));
        assert!(cart.is_empty());
    }
}
