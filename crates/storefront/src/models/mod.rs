//! Domain models for the cafe storefront.
//!
//! These are validated domain types; database row types live next to the
//! queries that produce them.

pub mod cart;
pub mod order;
pub mod user;

pub use cart::{Cart, CartLine, Dish};
pub use order::{Order, OrderDraft, OrderHistory, OrderLine};
pub use user::UserAccount;
