//! # storage-adapters
//!
//! Implementations of the `domains` ports.
//!
//! - `memory`: arena-style `DashMap` store keyed by id. Always compiled; used
//!   by tests and single-node deployments.
//! - `postgres`: `sqlx` store, behind the `db-postgres` feature.

pub mod memory;
#[cfg(feature = "db-postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "db-postgres")]
pub use postgres::PgStore;
