//! Order Feed - realtime order-tracking client
//!
//! Keeps one connected client (restaurant, driver, admin) subscribed to
//! its visibility-scoped order-change channels, classifies connection
//! health, recovers from disconnects with bounded backoff, and measures
//! end-to-end message latency against the service target.

pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod latency;
pub mod store;
pub mod transport;

pub use config::FeedConfig;
pub use connection::{ConnectionEvent, ConnectionHealth, ConnectionManager, ConnectionState};
pub use error::{FeedError, FeedFault, FeedResult, TransportError};
pub use feed::{FeedEvent, RealtimeOrderFeed};
pub use latency::{LatencyMeasurement, LatencyStats, LatencyTracker};
pub use store::{InMemoryOrderStore, OrderFilter, OrderStore};
pub use transport::{MemoryTransport, TcpTransport, Transport, TransportEvent};

// Re-export shared types for convenience
pub use shared::{ChangeNotification, EventKind, Order, OrderStatus, Principal, Role};
