//! Shared types for the order-tracking platform
//!
//! Domain models, the order lifecycle rule table, and the wire message
//! types exchanged between the edge services and realtime clients. The
//! lifecycle rules live here so the server-side access layer and the
//! client-side feed filter enforce the exact same table.

pub mod lifecycle;
pub mod message;
pub mod models;

// Re-exports
pub use serde::{Deserialize, Serialize};

pub use lifecycle::{
    LifecycleError, apply_transition, channel_for, is_legal_transition, may_observe,
    may_transition,
};
pub use message::{ChangeNotification, EventKind, FramePayload, WireFrame};
pub use models::{Order, OrderItem, OrderStatus, Principal, Role};
