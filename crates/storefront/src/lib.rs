//! Cafe storefront library.
//!
//! This crate provides the storefront's data-access core as a library:
//! a fixed-size connection pool, scoped transactions, and the order and user
//! repositories built on them. The binary wires it to an HTTP shell.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod state;
