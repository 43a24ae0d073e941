//! # domains
//!
//! Entities, error taxonomy, and port traits for the scoring, karma, and
//! statistics core. Nothing in here performs I/O; adapters implement the
//! ports and services orchestrate them.

pub mod aggregation;
pub mod errors;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use aggregation::*;
pub use errors::*;
pub use models::*;
pub use ports::*;
