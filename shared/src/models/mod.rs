//! Data models
//!
//! Shared between the edge services and realtime clients. All IDs are
//! UUIDs; money is `rust_decimal::Decimal`.

pub mod order;
pub mod principal;

// Re-exports
pub use order::*;
pub use principal::*;
