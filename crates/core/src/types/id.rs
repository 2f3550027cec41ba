//! Row identities.
//!
//! Every table in the cafe schema is keyed by a `SERIAL` column. Each key gets
//! its own wrapper so a user id can never be bound where an order id belongs.

/// Declare an `i32` row-identity wrapper.
///
/// Doc comments written before the name are attached to the type. With the
/// `postgres` feature the wrapper binds and decodes as a plain `INTEGER`.
///
/// ```rust
/// # use cafe_core::define_id;
/// define_id!(
///     /// `cafe.table.table_id`
///     TableId
/// );
///
/// let table = TableId::new(4);
/// assert_eq!(table.as_i32(), 4);
/// assert_eq!(table.to_string(), "4");
/// ```
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[cfg_attr(feature = "postgres", derive(::sqlx::Type), sqlx(transparent))]
        #[serde(transparent)]
        pub struct $name(i32);

        impl $name {
            #[must_use]
            pub const fn new(id: i32) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn as_i32(&self) -> i32 {
                self.0
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                ::core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

define_id!(
    /// `cafe.user.user_id`
    UserId
);
define_id!(
    /// `cafe.order.order_id`, assigned by `INSERT .. RETURNING`.
    OrderId
);
define_id!(
    /// `cafe.dish.dish_id`
    DishId
);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_is_bare_number() {
        assert_eq!(UserId::new(7).to_string(), "7");
        assert_eq!(format!("{:>3}", OrderId::new(7)), "  7");
    }

    #[test]
    fn test_id_serializes_transparently() {
        let json = serde_json::to_string(&DishId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: DishId = serde_json::from_str("3").unwrap();
        assert_eq!(back, DishId::new(3));
    }

    #[test]
    fn test_ids_order_by_value() {
        let mut ids = vec![OrderId::new(3), OrderId::new(1), OrderId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![OrderId::new(1), OrderId::new(2), OrderId::new(3)]);
    }
}
