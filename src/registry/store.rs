//! Device registry implementation
//!
//! The central map from device identity to live handle. Only the connector
//! mutates it; routing, lookup and listing only ever read.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::device::{ConnectionKey, Device, DeviceId};
use crate::error::RejectReason;

/// What to do when a device connects while already registered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Evict and close the existing connection, then install the new one
    #[default]
    Replace,
    /// Turn the new connection away
    Reject,
}

/// Registry of all connected devices
///
/// Thread-safe via `RwLock`. Lookups, routing resolution and enumeration
/// share the read side; connect and disconnect take the write side only for
/// the map mutation itself. The lock is fair, so a steady stream of readers
/// cannot starve a waiting writer and vice versa.
pub struct Registry {
    /// Map of device id to its live handle
    devices: RwLock<HashMap<DeviceId, Arc<Device>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the live handle for a device
    pub async fn get(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.read().await.get(id).cloned()
    }

    /// Number of registered devices
    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    /// Call `visitor` for every registered device
    ///
    /// Writers are held off for the whole visit, so every handle seen is
    /// registered at that moment and none is seen twice. The visitor returns
    /// `false` to stop early. Returns the number of devices visited.
    pub async fn visit_all<F>(&self, mut visitor: F) -> usize
    where
        F: FnMut(&Arc<Device>) -> bool,
    {
        let devices = self.devices.read().await;
        let mut visited = 0;

        for device in devices.values() {
            visited += 1;
            if !visitor(device) {
                break;
            }
        }

        visited
    }

    /// Copy out every registered handle
    ///
    /// The read side is held only while the handles are cloned, so callers
    /// can do slow work on the result without blocking connects.
    pub async fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Install a handle under its device id
    ///
    /// With [`DuplicatePolicy::Replace`] an existing handle is swapped out and
    /// returned so the caller can close it. `max_devices` of 0 means
    /// unlimited; replacing never counts against the limit.
    pub(crate) async fn insert(
        &self,
        device: Arc<Device>,
        policy: DuplicatePolicy,
        max_devices: usize,
    ) -> Result<Option<Arc<Device>>, RejectReason> {
        let mut devices = self.devices.write().await;
        let count = devices.len();

        match devices.entry(device.id().clone()) {
            Entry::Occupied(mut entry) => match policy {
                DuplicatePolicy::Reject => Err(RejectReason::Duplicate(entry.key().clone())),
                DuplicatePolicy::Replace => {
                    let previous = entry.insert(device);
                    Ok(Some(previous))
                }
            },
            Entry::Vacant(entry) => {
                if max_devices > 0 && count >= max_devices {
                    return Err(RejectReason::LimitReached(max_devices));
                }
                entry.insert(device);
                Ok(None)
            }
        }
    }

    /// Remove whatever handle is registered for `id`
    pub(crate) async fn remove(&self, id: &DeviceId) -> Option<Arc<Device>> {
        self.devices.write().await.remove(id)
    }

    /// Remove the handle for `id` only if it is the connection `key`
    ///
    /// Used when a connection ends on its own, so a stale connection never
    /// removes the newer connection that replaced it.
    pub(crate) async fn remove_connection(
        &self,
        id: &DeviceId,
        key: ConnectionKey,
    ) -> Option<Arc<Device>> {
        let mut devices = self.devices.write().await;

        match devices.get(id) {
            Some(device) if device.key() == key => devices.remove(id),
            _ => None,
        }
    }

    /// Remove every handle whose id matches `predicate`
    pub(crate) async fn remove_if<F>(&self, mut predicate: F) -> Vec<Arc<Device>>
    where
        F: FnMut(&DeviceId) -> bool,
    {
        let mut devices = self.devices.write().await;
        let mut removed = Vec::new();

        devices.retain(|id, device| {
            if predicate(id) {
                removed.push(Arc::clone(device));
                false
            } else {
                true
            }
        });

        removed
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
