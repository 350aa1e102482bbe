//! Connection management
//!
//! Supervises one client's realtime subscriptions: enforces the
//! subscription cap locally, heartbeats every active channel, recovers
//! from transport drops with bounded exponential backoff, and
//! classifies connection health on demand.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::error::{FeedError, FeedFault};
use crate::latency::LatencyTracker;
use crate::transport::{Transport, TransportEvent};
use shared::message::{ChangeNotification, FramePayload};

/// Per-connection lifecycle state
///
/// `Disconnected -> Connecting -> Connected <-> Degraded`, back to
/// `Connecting` on any detected drop, and terminally `Disconnected`
/// once reconnection attempts are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Heartbeat misses above threshold while the transport is still
    /// nominally open
    Degraded,
}

/// Derived connection quality; computed on demand, never cached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// p99 under target, no recent reconnects
    Excellent,
    /// p99 under target, at most one recent reconnect
    Good,
    /// p99 over target, multiple recent reconnects, or degraded link
    Poor,
    /// No active transport
    Disconnected,
}

/// One live channel binding
#[derive(Debug, Clone)]
pub struct Subscription {
    pub channel: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Event fan-out from the connection manager
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A change notification arrived on a channel
    Change {
        channel: String,
        notification: ChangeNotification,
    },
    StateChanged(ConnectionState),
    Fault(FeedFault),
}

/// Connection Manager
///
/// Cheap to clone; all state lives behind `Arc`. Constructed over an
/// established transport, then supervised by two background tasks (read
/// loop and heartbeat) until [`ConnectionManager::shutdown`].
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: FeedConfig,
    transport: Arc<dyn Transport>,
    latency: Arc<LatencyTracker>,
    subscriptions: Arc<Mutex<HashMap<String, Subscription>>>,
    state: Arc<Mutex<ConnectionState>>,
    /// Unanswered ping nonce per channel, cleared by the matching pong
    pending_pings: Arc<Mutex<HashMap<String, Uuid>>>,
    /// Consecutive heartbeat misses per channel
    heartbeat_misses: Arc<Mutex<HashMap<String, u32>>>,
    /// Completion instants of successful reconnects (health input)
    reconnects: Arc<Mutex<Vec<Instant>>>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create the manager and spawn its supervision tasks.
    pub fn start(
        transport: Arc<dyn Transport>,
        latency: Arc<LatencyTracker>,
        config: FeedConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer_size);
        let manager = Self {
            config,
            transport,
            latency,
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            state: Arc::new(Mutex::new(ConnectionState::Connecting)),
            pending_pings: Arc::new(Mutex::new(HashMap::new())),
            heartbeat_misses: Arc::new(Mutex::new(HashMap::new())),
            reconnects: Arc::new(Mutex::new(Vec::new())),
            event_tx,
            cancel: CancellationToken::new(),
        };

        // The handed-in transport is an established link.
        manager.set_state(ConnectionState::Connected);

        let reader = manager.clone();
        tokio::spawn(async move { reader.read_loop().await });

        if !manager.config.heartbeat_interval.is_zero() {
            let beater = manager.clone();
            tokio::spawn(async move { beater.heartbeat_loop().await });
        }

        manager
    }

    /// Subscribe to a channel, enforcing the local cap.
    ///
    /// Idempotent: re-subscribing to a live channel returns the
    /// existing handle without growing the set. A cap hit refuses the
    /// operation, reports a fault, and leaves the set untouched.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, FeedError> {
        if self.cancel.is_cancelled() {
            return Err(FeedError::NotActive);
        }
        {
            let subs = self.subscriptions.lock().unwrap();
            if let Some(existing) = subs.get(channel) {
                return Ok(existing.clone());
            }
            if subs.len() >= self.config.max_subscriptions {
                drop(subs);
                let limit = self.config.max_subscriptions;
                tracing::warn!("Subscription limit {} reached, refusing {}", limit, channel);
                self.emit_fault(FeedFault::SubscriptionLimit {
                    channel: channel.to_string(),
                    limit,
                });
                return Err(FeedError::SubscriptionLimit { limit });
            }
        }

        self.transport.open(channel).await?;

        {
            let mut subs = self.subscriptions.lock().unwrap();
            // A concurrent subscribe may have won the race; keep its handle.
            if let Some(existing) = subs.get(channel) {
                return Ok(existing.clone());
            }
            if subs.len() < self.config.max_subscriptions {
                let subscription = Subscription {
                    channel: channel.to_string(),
                    created_at: Utc::now(),
                    last_activity: Utc::now(),
                };
                subs.insert(channel.to_string(), subscription.clone());
                tracing::debug!("Subscribed to {} ({} live)", channel, subs.len());
                return Ok(subscription);
            }
        }

        // A concurrent subscribe filled the last slot while we awaited
        // the transport; undo the open and refuse.
        let _ = self.transport.close(channel).await;
        let limit = self.config.max_subscriptions;
        self.emit_fault(FeedFault::SubscriptionLimit {
            channel: channel.to_string(),
            limit,
        });
        Err(FeedError::SubscriptionLimit { limit })
    }

    /// Unsubscribe from a channel; no-op when absent.
    pub async fn unsubscribe(&self, channel: &str) -> Result<(), FeedError> {
        let removed = self.subscriptions.lock().unwrap().remove(channel);
        if removed.is_none() {
            return Ok(());
        }
        self.pending_pings.lock().unwrap().remove(channel);
        self.heartbeat_misses.lock().unwrap().remove(channel);
        self.transport.close(channel).await?;
        tracing::debug!("Unsubscribed from {}", channel);
        Ok(())
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    /// Snapshot of live subscriptions.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().unwrap().values().cloned().collect()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Listen to change notifications, state changes, and faults.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.event_tx.subscribe()
    }

    /// Classify connection health from the current latency buffer and
    /// reconnect history. Recomputed on every call.
    pub fn health(&self) -> ConnectionHealth {
        match self.state() {
            // No active transport while down or mid-reconnect.
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return ConnectionHealth::Disconnected;
            }
            ConnectionState::Degraded => return ConnectionHealth::Poor,
            ConnectionState::Connected => {}
        }

        let recent_reconnects = {
            let mut reconnects = self.reconnects.lock().unwrap();
            let window = self.config.recent_reconnect_window;
            reconnects.retain(|at| at.elapsed() <= window);
            reconnects.len()
        };
        let under_target = self
            .latency
            .is_latency_acceptable(self.config.latency_threshold_ms);

        match (under_target, recent_reconnects) {
            (true, 0) => ConnectionHealth::Excellent,
            (true, 1) => ConnectionHealth::Good,
            _ => ConnectionHealth::Poor,
        }
    }

    /// Stop supervision, cancel timers, and close all channels.
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let channels: Vec<String> = {
            let mut subs = self.subscriptions.lock().unwrap();
            subs.drain().map(|(channel, _)| channel).collect()
        };
        for channel in channels {
            if let Err(e) = self.transport.close(&channel).await {
                tracing::debug!("Close of {} during shutdown failed: {}", channel, e);
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    // ------------------------------------------------------------------
    // Supervision tasks
    // ------------------------------------------------------------------

    async fn read_loop(&self) {
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.transport.next_event() => event,
            };

            match event {
                Ok(TransportEvent::Frame { channel, payload }) => {
                    self.handle_frame(&channel, payload).await;
                }
                Ok(TransportEvent::Dropped) => {
                    if !self.run_reconnect().await {
                        // Exhausted: terminal until reinitialized.
                        break;
                    }
                }
                Ok(TransportEvent::Restored) => {
                    tracing::debug!("Transport reports link restored");
                }
                Err(crate::error::TransportError::Closed) => {
                    tracing::info!("Transport closed, read loop ending");
                    self.set_state(ConnectionState::Disconnected);
                    break;
                }
                Err(e) => {
                    self.emit_fault(FeedFault::TransportFailure {
                        detail: e.to_string(),
                    });
                }
            }
        }
    }

    async fn handle_frame(&self, channel: &str, payload: FramePayload) {
        match payload {
            FramePayload::Change(notification) => {
                self.latency.track_receive(
                    notification.message_id,
                    channel,
                    &notification.kind.to_string(),
                );
                if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(channel) {
                    sub.last_activity = Utc::now();
                } else {
                    // Raced an unsubscribe; drop silently.
                    tracing::debug!("Change on unsubscribed channel {}, dropped", channel);
                    return;
                }
                let _ = self.event_tx.send(ConnectionEvent::Change {
                    channel: channel.to_string(),
                    notification,
                });
            }
            FramePayload::Pong { nonce } => {
                self.latency.track_receive(nonce, channel, "heartbeat");
                let answered = {
                    let mut pending = self.pending_pings.lock().unwrap();
                    // A stale or mismatched pong must not consume the
                    // pending entry, or the genuine answer can no
                    // longer clear the miss counter.
                    match pending.get(channel) {
                        Some(expected) if *expected == nonce => {
                            pending.remove(channel);
                            true
                        }
                        _ => false,
                    }
                };
                if answered {
                    self.heartbeat_misses.lock().unwrap().insert(channel.to_string(), 0);
                    self.recover_if_degraded();
                }
            }
            FramePayload::Ping { nonce } => {
                // Server-side probe; answer on the same channel.
                if let Err(e) = self
                    .transport
                    .send(channel, &FramePayload::Pong { nonce })
                    .await
                {
                    tracing::warn!("Failed to answer ping on {}: {}", channel, e);
                }
            }
            FramePayload::Open | FramePayload::Close => {
                // Control frames are client -> server only.
                tracing::debug!("Ignoring control frame on {}", channel);
            }
        }
    }

    async fn heartbeat_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would ping before anything subscribed.
        ticker.tick().await;
        // The window cannot outlive the ping cadence.
        let window = self
            .config
            .heartbeat_timeout
            .min(self.config.heartbeat_interval);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !matches!(
                self.state(),
                ConnectionState::Connected | ConnectionState::Degraded
            ) {
                continue;
            }

            let channels: Vec<String> = self
                .subscriptions
                .lock()
                .unwrap()
                .keys()
                .cloned()
                .collect();
            if channels.is_empty() {
                continue;
            }

            for channel in &channels {
                let nonce = Uuid::new_v4();
                self.latency.track_send(nonce);
                match self.transport.send(channel, &FramePayload::Ping { nonce }).await {
                    Ok(()) => {
                        self.pending_pings
                            .lock()
                            .unwrap()
                            .insert(channel.clone(), nonce);
                    }
                    Err(e) => {
                        self.emit_fault(FeedFault::TransportFailure {
                            detail: format!("Heartbeat send on {} failed: {}", channel, e),
                        });
                    }
                }
            }

            // Each pong has this long to come back before the round
            // counts as a miss.
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(window) => {}
            }

            for channel in channels {
                let unanswered = self.pending_pings.lock().unwrap().remove(&channel);
                if unanswered.is_some() {
                    let misses = {
                        let mut misses = self.heartbeat_misses.lock().unwrap();
                        let count = misses.entry(channel.clone()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    tracing::warn!("Heartbeat miss on {} ({} consecutive)", channel, misses);
                    if misses >= self.config.heartbeat_miss_threshold {
                        self.set_state(ConnectionState::Degraded);
                        self.emit_fault(FeedFault::HeartbeatTimeout {
                            channel: channel.clone(),
                            misses,
                        });
                    }
                }
            }
        }
    }

    /// Bounded-backoff reconnection. Returns `false` when attempts are
    /// exhausted and the connection is terminally down.
    async fn run_reconnect(&self) -> bool {
        self.set_state(ConnectionState::Connecting);
        self.emit_fault(FeedFault::TransportFailure {
            detail: "Transport dropped, reconnecting".to_string(),
        });
        self.pending_pings.lock().unwrap().clear();

        let max_attempts = self.config.max_reconnect_attempts;
        for attempt in 0..max_attempts {
            let delay = self.config.backoff_delay(attempt);
            tracing::info!(
                "Reconnect attempt {}/{} in {:?}",
                attempt + 1,
                max_attempts,
                delay
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.transport.reconnect().await {
                Ok(()) => {
                    if let Err(e) = self.replay_subscriptions().await {
                        tracing::warn!("Subscription replay failed: {}", e);
                        continue;
                    }
                    self.reconnects.lock().unwrap().push(Instant::now());
                    self.heartbeat_misses.lock().unwrap().clear();
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("Reconnected after {} attempt(s)", attempt + 1);
                    return true;
                }
                Err(e) => {
                    tracing::warn!("Reconnect attempt {} failed: {}", attempt + 1, e);
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.emit_fault(FeedFault::ReconnectExhausted {
            attempts: max_attempts,
        });
        tracing::error!(
            "Reconnect exhausted after {} attempts, connection is down",
            max_attempts
        );
        false
    }

    /// Re-open every channel of the subscription set, in place. This
    /// replays subscriptions only; missed messages need a store resync.
    async fn replay_subscriptions(&self) -> Result<(), FeedError> {
        let channels: Vec<String> = self
            .subscriptions
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        for channel in channels {
            self.transport.open(&channel).await?;
        }
        Ok(())
    }

    fn recover_if_degraded(&self) {
        let all_clear = self
            .heartbeat_misses
            .lock()
            .unwrap()
            .values()
            .all(|misses| *misses < self.config.heartbeat_miss_threshold);
        let mut state = self.state.lock().unwrap();
        if *state == ConnectionState::Degraded && all_clear {
            *state = ConnectionState::Connected;
            drop(state);
            let _ = self
                .event_tx
                .send(ConnectionEvent::StateChanged(ConnectionState::Connected));
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.lock().unwrap();
        if *state == next {
            return;
        }
        tracing::debug!("Connection state {:?} -> {:?}", *state, next);
        *state = next;
        drop(state);
        let _ = self.event_tx.send(ConnectionEvent::StateChanged(next));
    }

    fn emit_fault(&self, fault: FeedFault) {
        tracing::warn!("Connection fault: {}", fault);
        let _ = self.event_tx.send(ConnectionEvent::Fault(fault));
    }
}
