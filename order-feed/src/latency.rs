//! Latency measurement
//!
//! Correlates sends with receives by message id and keeps the most
//! recent measurements in a bounded ring buffer. One tracker instance
//! is constructed per connection and shared by `Arc`; there is no
//! global tracker on purpose, so tests stay deterministic and feeds
//! never couple through hidden state.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use uuid::Uuid;

/// One correlated send/receive pair
///
/// `event_kind` is a free-form label ("INSERT", "UPDATE", "heartbeat")
/// rather than the wire enum, because heartbeat round trips are
/// measured too. Serializable for offline analysis of exported
/// buffers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyMeasurement {
    pub message_id: Uuid,
    pub channel: String,
    pub event_kind: String,
    pub elapsed_ms: f64,
}

/// Percentile statistics over the current buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

#[derive(Debug, Default)]
struct Inner {
    pending: HashMap<Uuid, Instant>,
    /// Insertion order of `pending`, for FIFO eviction. May carry ids
    /// already consumed by a matched receive; those are skipped lazily.
    pending_order: VecDeque<Uuid>,
    buffer: VecDeque<LatencyMeasurement>,
}

/// Bounded round-trip latency tracker
///
/// All methods are non-blocking and infallible; missing correlation
/// data degrades to a no-op rather than an error.
#[derive(Debug)]
pub struct LatencyTracker {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl LatencyTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            // A zero-capacity ring would silently discard everything.
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record the send instant for `message_id`.
    ///
    /// At most `capacity` sends stay pending; when full, the oldest
    /// unanswered send is forgotten and its late receive becomes a
    /// no-op. Sends that never see a receive cannot grow the tracker.
    pub fn track_send(&self, message_id: Uuid) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.pending_order.len() >= self.capacity.saturating_mul(2) {
            let pending = &inner.pending;
            inner.pending_order.retain(|id| pending.contains_key(id));
        }
        while inner.pending.len() >= self.capacity {
            match inner.pending_order.pop_front() {
                Some(stale) => {
                    inner.pending.remove(&stale);
                }
                None => break,
            }
        }
        if inner.pending.insert(message_id, Instant::now()).is_none() {
            inner.pending_order.push_back(message_id);
        }
    }

    /// Sends still awaiting a matching receive.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    /// Correlate a receive with its send and record the round trip.
    ///
    /// Unmatched ids are a no-op: the message predates this tracker or
    /// was already consumed. Each send entry is consumed exactly once.
    pub fn track_receive(&self, message_id: Uuid, channel: &str, event_kind: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(sent_at) = inner.pending.remove(&message_id) else {
            return;
        };
        let elapsed_ms = sent_at.elapsed().as_secs_f64() * 1000.0;

        if inner.buffer.len() == self.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(LatencyMeasurement {
            message_id,
            channel: channel.to_string(),
            event_kind: event_kind.to_string(),
            elapsed_ms,
        });
    }

    /// Statistics over the current buffer; zeroed when empty.
    pub fn stats(&self) -> LatencyStats {
        let inner = self.inner.lock().unwrap();
        let mut values: Vec<f64> = inner.buffer.iter().map(|m| m.elapsed_ms).collect();
        drop(inner);

        if values.is_empty() {
            return LatencyStats::default();
        }
        values.sort_by(|a, b| a.total_cmp(b));

        let count = values.len();
        let sum: f64 = values.iter().sum();
        LatencyStats {
            count,
            min_ms: values[0],
            max_ms: values[count - 1],
            mean_ms: sum / count as f64,
            p50_ms: percentile(&values, 50.0),
            p95_ms: percentile(&values, 95.0),
            p99_ms: percentile(&values, 99.0),
        }
    }

    /// Whether p99 is within `threshold_ms`.
    ///
    /// An empty buffer is acceptable (no evidence of violation);
    /// callers needing a minimum sample size must check `stats().count`.
    pub fn is_latency_acceptable(&self, threshold_ms: f64) -> bool {
        let stats = self.stats();
        stats.count == 0 || stats.p99_ms <= threshold_ms
    }

    /// Read-only snapshot of the buffer, oldest first.
    pub fn export_measurements(&self) -> Vec<LatencyMeasurement> {
        let inner = self.inner.lock().unwrap();
        inner.buffer.iter().cloned().collect()
    }
}

/// Percentile by sorted-order linear interpolation.
///
/// `values` must be sorted ascending and non-empty.
fn percentile(values: &[f64], p: f64) -> f64 {
    let rank = (p / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return values[lo];
    }
    let weight = rank - lo as f64;
    values[lo] * (1.0 - weight) + values[hi] * weight
}
