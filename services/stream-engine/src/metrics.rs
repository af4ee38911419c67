//! Connection metrics
//!
//! Lock-free counters updated from the connection task and readable from any
//! handle. `snapshot()` exports a plain serializable copy; `export()` gives
//! a name → value map for Prometheus-style exposition.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Core metrics for one venue connection.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    // Inbound frames
    pub frames_received: AtomicU64,
    pub frames_dispatched: AtomicU64,
    pub frames_ignored: AtomicU64,
    pub frames_dropped: AtomicU64,

    // Subscriptions
    pub requests_sent: AtomicU64,
    pub resolutions: AtomicU64,
    pub rejections: AtomicU64,

    // Integrity
    pub checksum_failures: AtomicU64,
    pub sequence_gaps: AtomicU64,

    // Connection lifecycle
    pub connects: AtomicU64,
    pub reconnects: AtomicU64,
    pub liveness_failures: AtomicU64,
}

/// Point-in-time copy of [`StreamMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_dispatched: u64,
    pub frames_ignored: u64,
    pub frames_dropped: u64,
    pub requests_sent: u64,
    pub resolutions: u64,
    pub rejections: u64,
    pub checksum_failures: u64,
    pub sequence_gaps: u64,
    pub connects: u64,
    pub reconnects: u64,
    pub liveness_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame_received(&self) {
        bump(&self.frames_received);
    }

    /// A frame reached a registered handler.
    pub fn record_frame_dispatched(&self) {
        bump(&self.frames_dispatched);
    }

    /// A frame had no handler for its channel.
    pub fn record_frame_ignored(&self) {
        bump(&self.frames_ignored);
    }

    /// A frame failed to decode or its handler failed.
    pub fn record_frame_dropped(&self) {
        bump(&self.frames_dropped);
    }

    pub fn record_request_sent(&self) {
        bump(&self.requests_sent);
    }

    pub fn record_resolutions(&self, waiters: usize) {
        self.resolutions.fetch_add(waiters as u64, Ordering::Relaxed);
    }

    pub fn record_rejections(&self, waiters: usize) {
        self.rejections.fetch_add(waiters as u64, Ordering::Relaxed);
    }

    pub fn record_checksum_failure(&self) {
        bump(&self.checksum_failures);
    }

    pub fn record_sequence_gap(&self) {
        bump(&self.sequence_gaps);
    }

    pub fn record_connect(&self) {
        bump(&self.connects);
    }

    pub fn record_reconnect(&self) {
        bump(&self.reconnects);
    }

    pub fn record_liveness_failure(&self) {
        bump(&self.liveness_failures);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            frames_received: load(&self.frames_received),
            frames_dispatched: load(&self.frames_dispatched),
            frames_ignored: load(&self.frames_ignored),
            frames_dropped: load(&self.frames_dropped),
            requests_sent: load(&self.requests_sent),
            resolutions: load(&self.resolutions),
            rejections: load(&self.rejections),
            checksum_failures: load(&self.checksum_failures),
            sequence_gaps: load(&self.sequence_gaps),
            connects: load(&self.connects),
            reconnects: load(&self.reconnects),
            liveness_failures: load(&self.liveness_failures),
        }
    }

    /// Export metrics as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let s = self.snapshot();
        let mut m = BTreeMap::new();
        m.insert("frames_received".to_string(), s.frames_received);
        m.insert("frames_dispatched".to_string(), s.frames_dispatched);
        m.insert("frames_ignored".to_string(), s.frames_ignored);
        m.insert("frames_dropped".to_string(), s.frames_dropped);
        m.insert("requests_sent".to_string(), s.requests_sent);
        m.insert("resolutions".to_string(), s.resolutions);
        m.insert("rejections".to_string(), s.rejections);
        m.insert("checksum_failures".to_string(), s.checksum_failures);
        m.insert("sequence_gaps".to_string(), s.sequence_gaps);
        m.insert("connects".to_string(), s.connects);
        m.insert("reconnects".to_string(), s.reconnects);
        m.insert("liveness_failures".to_string(), s.liveness_failures);
        m
    }
}
