//! Feed error types

use thiserror::Error;

/// Transport-level failure
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection problem (dial, handshake, channel error)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Underlying I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be parsed
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Transport is closed and will deliver no further events
    #[error("Transport closed")]
    Closed,
}

/// Feed error type
#[derive(Debug, Error)]
pub enum FeedError {
    /// Subscription cap reached; the operation was refused
    #[error("Subscription limit reached ({limit})")]
    SubscriptionLimit { limit: usize },

    /// Transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation on a feed that is not (or no longer) active
    #[error("Feed is not active")]
    NotActive,

    /// Backing-store hydration failure
    #[error("Store error: {0}")]
    Store(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

/// Fault report delivered on the event channel
///
/// Expected operating conditions (disconnects, cap hits, bad payloads)
/// are surfaced as events rather than thrown, so a long-lived caller
/// never loses unrelated work to one bad message. Clonable because it
/// fans out over a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFault {
    /// The (max+1)-th distinct subscribe attempt was refused
    SubscriptionLimit { channel: String, limit: usize },
    /// Transport-level failure; reconnection is underway
    TransportFailure { detail: String },
    /// A channel missed too many heartbeat pongs
    HeartbeatTimeout { channel: String, misses: u32 },
    /// Inbound payload failed the visibility predicate; dropped
    UnauthorizedPayload { channel: String, order_id: uuid::Uuid },
    /// Inbound payload claimed a transition outside the legal graph;
    /// dropped as a data-integrity anomaly
    IllegalTransition {
        order_id: uuid::Uuid,
        from: shared::OrderStatus,
        to: shared::OrderStatus,
    },
    /// All reconnect attempts exhausted; the connection is down until
    /// the caller reinitializes
    ReconnectExhausted { attempts: u32 },
}

impl std::fmt::Display for FeedFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedFault::SubscriptionLimit { channel, limit } => {
                write!(f, "subscription limit {limit} reached (channel {channel})")
            }
            FeedFault::TransportFailure { detail } => write!(f, "transport failure: {detail}"),
            FeedFault::HeartbeatTimeout { channel, misses } => {
                write!(f, "heartbeat timeout on {channel} ({misses} misses)")
            }
            FeedFault::UnauthorizedPayload { channel, order_id } => {
                write!(f, "unauthorized payload for order {order_id} on {channel}")
            }
            FeedFault::IllegalTransition { order_id, from, to } => {
                write!(f, "illegal transition {from} -> {to} for order {order_id}")
            }
            FeedFault::ReconnectExhausted { attempts } => {
                write!(f, "reconnect exhausted after {attempts} attempts")
            }
        }
    }
}
