//! Delivery statistics for device connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Live counters for one device connection
///
/// Updated from the connection's write pump and from inbound traffic without
/// any locking; read through [`Statistics::snapshot`].
#[derive(Debug)]
pub struct Statistics {
    bytes_sent: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_received: AtomicU64,
    dropped: AtomicU64,
    duplications: AtomicU64,
    connected_at: SystemTime,
    started: Instant,
}

impl Statistics {
    /// Create a new stats tracker starting now
    pub fn new() -> Self {
        Self {
            bytes_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            duplications: AtomicU64::new(0),
            connected_at: SystemTime::now(),
            started: Instant::now(),
        }
    }

    /// Record a frame written to the device
    pub fn add_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a frame read from the device
    pub fn add_received(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a message that never reached the device
    pub fn add_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Carry over duplicate-connection history from an evicted predecessor
    pub fn add_duplications(&self, count: u64) {
        self.duplications.fetch_add(count, Ordering::Relaxed);
    }

    pub fn duplications(&self) -> u64 {
        self.duplications.load(Ordering::Relaxed)
    }

    /// Time since the connection was registered
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        let connected_at_ms = self
            .connected_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            duplications: self.duplications(),
            connected_at_ms,
            uptime_secs: self.uptime().as_secs(),
        }
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable copy of [`Statistics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub messages_received: u64,
    pub dropped: u64,
    pub duplications: u64,
    /// Wall-clock connect time, milliseconds since the Unix epoch
    pub connected_at_ms: u64,
    pub uptime_secs: u64,
}
