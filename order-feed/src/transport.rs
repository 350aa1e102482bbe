//! Transport abstraction for change-notification delivery
//!
//! The feed core never talks to a socket directly; it drives a
//! [`Transport`] that can open/close named channels, send frames, and
//! yield inbound events. Two implementations ship here: a TCP transport
//! using the length-prefixed JSON codec, and a memory transport over
//! broadcast channels for in-process use and tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, broadcast};

use crate::error::TransportError;
use shared::message::{FramePayload, WireFrame};

/// Inbound transport event
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One frame arrived on a channel
    Frame {
        channel: String,
        payload: FramePayload,
    },
    /// The link dropped; the connection manager decides what happens next
    Dropped,
    /// The link came back after a successful `reconnect()`
    Restored,
}

/// Transport abstraction
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Announce interest in a channel.
    async fn open(&self, channel: &str) -> Result<(), TransportError>;

    /// Withdraw interest in a channel.
    async fn close(&self, channel: &str) -> Result<(), TransportError>;

    /// Send one frame on a channel.
    async fn send(&self, channel: &str, payload: &FramePayload) -> Result<(), TransportError>;

    /// Await the next inbound event.
    async fn next_event(&self) -> Result<TransportEvent, TransportError>;

    /// Re-establish the link after a drop. Channel re-opens are the
    /// caller's job (the manager replays its subscription set).
    async fn reconnect(&self) -> Result<(), TransportError>;
}

// ============================================================================
// TCP Transport
// ============================================================================

/// TCP transport with a length-prefixed (u32 LE) JSON frame codec
#[derive(Debug, Clone)]
pub struct TcpTransport {
    addr: String,
    reader: Arc<Mutex<Option<OwnedReadHalf>>>,
    writer: Arc<Mutex<Option<OwnedWriteHalf>>>,
    /// Set after a read/write error so `next_event` reports the drop once
    dropped: Arc<AtomicBool>,
}

impl TcpTransport {
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            addr: addr.to_string(),
            reader: Arc::new(Mutex::new(Some(reader))),
            writer: Arc::new(Mutex::new(Some(writer))),
            dropped: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn write_frame(&self, frame: &WireFrame) -> Result<(), TransportError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::Closed)?;

        let body = frame.to_bytes().map_err(|e| {
            TransportError::InvalidFrame(format!("Failed to encode frame: {}", e))
        })?;
        let mut data = Vec::with_capacity(4 + body.len());
        data.extend_from_slice(&(body.len() as u32).to_le_bytes());
        data.extend_from_slice(&body);

        if let Err(e) = writer.write_all(&data).await {
            self.dropped.store(true, Ordering::SeqCst);
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    async fn read_frame(&self) -> Result<WireFrame, TransportError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(TransportError::Closed)?;

        // Read payload length (4 bytes)
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.map_err(TransportError::Io)?;
        let len = u32::from_le_bytes(len_buf) as usize;

        // Read payload
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload).await.map_err(TransportError::Io)?;

        WireFrame::from_bytes(&payload)
            .map_err(|e| TransportError::InvalidFrame(format!("Failed to decode frame: {}", e)))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, channel: &str) -> Result<(), TransportError> {
        self.write_frame(&WireFrame::new(channel, FramePayload::Open))
            .await
    }

    async fn close(&self, channel: &str) -> Result<(), TransportError> {
        self.write_frame(&WireFrame::new(channel, FramePayload::Close))
            .await
    }

    async fn send(&self, channel: &str, payload: &FramePayload) -> Result<(), TransportError> {
        self.write_frame(&WireFrame::new(channel, payload.clone()))
            .await
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        if self.dropped.swap(false, Ordering::SeqCst) {
            return Ok(TransportEvent::Dropped);
        }
        match self.read_frame().await {
            Ok(frame) => Ok(TransportEvent::Frame {
                channel: frame.channel,
                payload: frame.payload,
            }),
            Err(TransportError::Io(e)) => {
                tracing::warn!("TCP read failed, link dropped: {}", e);
                Ok(TransportEvent::Dropped)
            }
            Err(e) => Err(e),
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (reader, writer) = stream.into_split();
        *self.reader.lock().await = Some(reader);
        *self.writer.lock().await = Some(writer);
        self.dropped.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// Memory Transport
// ============================================================================

/// In-process transport over broadcast channels
///
/// The "server" side holds the inbound sender and an outbound receiver;
/// tests use those to script scenarios: inject change frames, observe
/// heartbeat pings, drop the link, or make the next N reconnects fail.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inbound_tx: broadcast::Sender<TransportEvent>,
    inbound_rx: Arc<Mutex<broadcast::Receiver<TransportEvent>>>,
    outbound_tx: broadcast::Sender<WireFrame>,
    open_channels: Arc<std::sync::Mutex<HashSet<String>>>,
    /// Remaining `reconnect()` calls that will fail
    failing_reconnects: Arc<AtomicU32>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = broadcast::channel(256);
        let (outbound_tx, _) = broadcast::channel(256);
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            outbound_tx,
            open_channels: Arc::new(std::sync::Mutex::new(HashSet::new())),
            failing_reconnects: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Inject a frame as if the server pushed it.
    pub fn push_frame(&self, frame: WireFrame) {
        let _ = self.inbound_tx.send(TransportEvent::Frame {
            channel: frame.channel,
            payload: frame.payload,
        });
    }

    /// Simulate a transport-level drop.
    pub fn drop_link(&self) {
        let _ = self.inbound_tx.send(TransportEvent::Dropped);
    }

    /// Make the next `n` `reconnect()` calls fail.
    pub fn fail_next_reconnects(&self, n: u32) {
        self.failing_reconnects.store(n, Ordering::SeqCst);
    }

    /// Observe frames the client sends (heartbeat pings, opens, closes).
    pub fn outbound(&self) -> broadcast::Receiver<WireFrame> {
        self.outbound_tx.subscribe()
    }

    /// Channels currently open from the client's point of view.
    pub fn open_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> =
            self.open_channels.lock().unwrap().iter().cloned().collect();
        channels.sort();
        channels
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self, channel: &str) -> Result<(), TransportError> {
        self.open_channels.lock().unwrap().insert(channel.to_string());
        let _ = self
            .outbound_tx
            .send(WireFrame::new(channel, FramePayload::Open));
        Ok(())
    }

    async fn close(&self, channel: &str) -> Result<(), TransportError> {
        self.open_channels.lock().unwrap().remove(channel);
        let _ = self
            .outbound_tx
            .send(WireFrame::new(channel, FramePayload::Close));
        Ok(())
    }

    async fn send(&self, channel: &str, payload: &FramePayload) -> Result<(), TransportError> {
        // No receiver just means nobody is watching the server side.
        let _ = self.outbound_tx.send(WireFrame::new(channel, payload.clone()));
        Ok(())
    }

    async fn next_event(&self) -> Result<TransportEvent, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!("Memory transport lagged, {} events skipped", skipped);
                // Treat lag as a drop so the manager resyncs.
                Ok(TransportEvent::Dropped)
            }
            Err(broadcast::error::RecvError::Closed) => Err(TransportError::Closed),
        }
    }

    async fn reconnect(&self) -> Result<(), TransportError> {
        let remaining = self.failing_reconnects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_reconnects.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Connection(
                "Simulated reconnect failure".to_string(),
            ));
        }
        Ok(())
    }
}
