//! Cafe Core - Shared types library.
//!
//! This crate provides common types used across all cafe components:
//! - `storefront` - Order placement, pool and data access
//! - `cli` - Command-line tools for migrations and seeding
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP clients. Enable the `postgres` feature to bind the ID types
//! directly in sqlx queries.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs plus the order status and payment type enums

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
