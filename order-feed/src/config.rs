//! Feed client configuration

use std::time::Duration;

/// Realtime feed configuration
///
/// Defaults target a deployment where clients reach the edge over the
/// public internet; [`FeedConfig::local`] tightens the timings for
/// same-network setups.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Hard cap on live subscriptions per client
    pub max_subscriptions: usize,
    /// Heartbeat ping interval (0 disables)
    pub heartbeat_interval: Duration,
    /// How long a pong may take before its round counts as a miss;
    /// clamped to the interval
    pub heartbeat_timeout: Duration,
    /// Unanswered-ping rounds tolerated before the connection degrades
    pub heartbeat_miss_threshold: u32,
    /// p99 service target in milliseconds
    pub latency_threshold_ms: f64,
    /// Ring-buffer capacity for latency measurements
    pub latency_buffer_size: usize,
    /// First reconnect delay; doubles per attempt
    pub reconnect_initial_delay: Duration,
    /// Exponential backoff ceiling
    pub reconnect_max_delay: Duration,
    /// Attempts before the connection settles into Disconnected
    pub max_reconnect_attempts: u32,
    /// How far back a reconnect still counts against health
    pub recent_reconnect_window: Duration,
    /// Broadcast buffer for connection/feed events
    pub event_buffer_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_subscriptions: 50,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(5),
            heartbeat_miss_threshold: 2,
            latency_threshold_ms: 200.0,
            latency_buffer_size: 1000,
            reconnect_initial_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            recent_reconnect_window: Duration::from_secs(60),
            event_buffer_size: 1024,
        }
    }
}

impl FeedConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Public-internet tuning; this is the default profile under an
    /// explicit name.
    pub fn internet() -> Self {
        Self::default()
    }

    /// Same-network tuning: fast heartbeat, fast reconnect.
    pub fn local() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(1),
            reconnect_initial_delay: Duration::from_millis(250),
            reconnect_max_delay: Duration::from_secs(5),
            latency_threshold_ms: 50.0,
            ..Self::default()
        }
    }

    pub fn with_max_subscriptions(mut self, max: usize) -> Self {
        self.max_subscriptions = max;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_latency_threshold_ms(mut self, threshold: f64) -> Self {
        self.latency_threshold_ms = threshold;
        self
    }

    pub fn with_latency_buffer_size(mut self, size: usize) -> Self {
        self.latency_buffer_size = size;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_delay = initial;
        self.reconnect_max_delay = max;
        self
    }

    /// Backoff delay before reconnect attempt `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .reconnect_initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.reconnect_max_delay)
    }
}
