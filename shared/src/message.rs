//! Wire message types
//!
//! Shared between the notification transport and realtime clients, for
//! both in-process (memory channel) and network (TCP) delivery. Frames
//! travel as length-prefixed JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Order;

/// Kind of row change carried by a notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Insert => write!(f, "insert"),
            EventKind::Update => write!(f, "update"),
            EventKind::Delete => write!(f, "delete"),
        }
    }
}

/// One row-change notification emitted by the backing store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeNotification {
    /// Correlation id for latency measurement
    pub message_id: Uuid,
    pub kind: EventKind,
    pub row: Order,
}

impl ChangeNotification {
    pub fn new(kind: EventKind, row: Order) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            kind,
            row,
        }
    }

    /// Same notification under a caller-chosen correlation id.
    pub fn with_message_id(mut self, message_id: Uuid) -> Self {
        self.message_id = message_id;
        self
    }
}

/// Payload of one transport frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FramePayload {
    /// Row change
    Change(ChangeNotification),
    /// Heartbeat probe
    Ping { nonce: Uuid },
    /// Heartbeat answer, echoing the probe nonce
    Pong { nonce: Uuid },
    /// Channel subscription control
    Open,
    Close,
}

/// One transport frame: a payload addressed to a channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireFrame {
    pub channel: String,
    pub payload: FramePayload,
}

impl WireFrame {
    pub fn new(channel: impl Into<String>, payload: FramePayload) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    pub fn change(channel: impl Into<String>, notification: ChangeNotification) -> Self {
        Self::new(channel, FramePayload::Change(notification))
    }

    pub fn ping(channel: impl Into<String>, nonce: Uuid) -> Self {
        Self::new(channel, FramePayload::Ping { nonce })
    }

    pub fn pong(channel: impl Into<String>, nonce: Uuid) -> Self {
        Self::new(channel, FramePayload::Pong { nonce })
    }

    /// Serialize for the length-prefixed codec
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse from codec bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;
    use uuid::Uuid;

    #[test]
    fn test_frame_codec_round_trip() {
        let order = Order::new(Uuid::new_v4(), vec![]);
        let frame = WireFrame::change(
            "orders:all",
            ChangeNotification::new(EventKind::Update, order),
        );

        let bytes = frame.to_bytes().unwrap();
        let back = WireFrame::from_bytes(&bytes).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn test_ping_pong_tagging() {
        let nonce = Uuid::new_v4();
        let bytes = WireFrame::ping("orders:all", nonce).to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["payload"]["type"], "PING");

        let back = WireFrame::from_bytes(&bytes).unwrap();
        assert_eq!(back.payload, FramePayload::Ping { nonce });
    }

    #[test]
    fn test_change_preserves_row_status() {
        let mut order = Order::new(Uuid::new_v4(), vec![]);
        order.status = OrderStatus::OutForDelivery;
        let frame = WireFrame::change(
            "orders:driver:abc",
            ChangeNotification::new(EventKind::Update, order),
        );
        let back = WireFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        match back.payload {
            FramePayload::Change(n) => assert_eq!(n.row.status, OrderStatus::OutForDelivery),
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
