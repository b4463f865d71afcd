//! Manager configuration

use std::time::Duration;

use serde::Deserialize;

pub use crate::registry::DuplicatePolicy;

/// Manager configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// What happens when an already connected device connects again
    pub duplicate_policy: DuplicatePolicy,

    /// Maximum concurrent devices (0 = unlimited)
    pub max_devices: usize,

    /// Outbound queue capacity per device
    pub device_queue_size: usize,

    /// How long a send waits for room in a device's queue
    pub send_timeout: Duration,

    /// Hand-off queue capacity between listing producer and consumer
    pub listing_queue_size: usize,

    /// Buffered events per listener before the oldest are dropped
    pub event_capacity: usize,

    /// Maximum deliveries in flight for a single route call
    pub route_concurrency: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::Replace,
            max_devices: 0, // Unlimited
            device_queue_size: 100,
            send_timeout: Duration::from_secs(10),
            listing_queue_size: 100,
            event_capacity: 1024,
            route_concurrency: 1024,
        }
    }
}

impl ManagerConfig {
    /// Set the duplicate connection policy
    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Turn away connections for devices that are already connected
    pub fn reject_duplicates(self) -> Self {
        self.duplicate_policy(DuplicatePolicy::Reject)
    }

    /// Set maximum devices
    pub fn max_devices(mut self, max: usize) -> Self {
        self.max_devices = max;
        self
    }

    /// Set per-device queue size
    pub fn device_queue_size(mut self, size: usize) -> Self {
        self.device_queue_size = size.max(1);
        self
    }

    /// Set send timeout
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set listing queue size
    pub fn listing_queue_size(mut self, size: usize) -> Self {
        self.listing_queue_size = size.max(1);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn route_concurrency(mut self, limit: usize) -> Self {
        self.route_concurrency = limit.max(1);
        self
    }
}
