//! Device connection lifecycle

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::http::HeaderMap;

use super::pump::WritePump;
use super::Manager;
use crate::device::metadata::{header_str, DEVICE_NAME_HEADER};
use crate::device::{ConnectionKey, Device, DeviceId, DisconnectReason, Event, Metadata};
use crate::error::{ConnectError, RejectReason};
use crate::registry::DuplicatePolicy;
use crate::transport::{ConnectRequest, DeviceSink, Upgrader};

/// Connects and disconnects devices
pub trait Connector: Send + Sync {
    /// Admit a device
    ///
    /// Validates the request, upgrades the transport and installs the new
    /// handle. Under [`DuplicatePolicy::Replace`] an existing connection for
    /// the same device is closed and evicted first.
    fn connect(
        &self,
        request: &ConnectRequest,
        response_headers: &HeaderMap,
    ) -> impl Future<Output = Result<Arc<Device>, ConnectError>> + Send;

    /// Disconnect a device; returns `false` if it was not connected
    fn disconnect(&self, id: &DeviceId) -> impl Future<Output = bool> + Send;

    /// Disconnect every device whose id matches `predicate`
    fn disconnect_if<F>(&self, predicate: F) -> impl Future<Output = usize> + Send
    where
        F: FnMut(&DeviceId) -> bool + Send;

    /// Disconnect every device
    fn disconnect_all(&self) -> impl Future<Output = usize> + Send;
}

impl<U: Upgrader> Connector for Manager<U> {
    async fn connect(
        &self,
        request: &ConnectRequest,
        response_headers: &HeaderMap,
    ) -> Result<Arc<Device>, ConnectError> {
        let name = header_str(&request.headers, DEVICE_NAME_HEADER)
            .ok_or(RejectReason::MissingDeviceName)?;
        let id = DeviceId::parse(name).map_err(RejectReason::from)?;

        // Turn duplicates away before paying for the upgrade; insert rechecks
        if self.config.duplicate_policy == DuplicatePolicy::Reject
            && self.registry.get(&id).await.is_some()
        {
            return Err(RejectReason::Duplicate(id).into());
        }

        let metadata = Metadata::from_headers(&request.headers);
        let mut sink = self.upgrader.upgrade(request, response_headers).await?;

        let key = ConnectionKey(self.next_key.fetch_add(1, Ordering::Relaxed));
        let (device, queue) = Device::new(
            id,
            key,
            metadata,
            self.config.device_queue_size,
            self.config.send_timeout,
        );
        let device = Arc::new(device);

        let inserted = self
            .registry
            .insert(
                Arc::clone(&device),
                self.config.duplicate_policy,
                self.config.max_devices,
            )
            .await;

        match inserted {
            Ok(Some(previous)) => {
                device
                    .statistics()
                    .add_duplications(previous.statistics().duplications() + 1);

                tracing::info!(
                    device = %previous.id(),
                    key = %previous.key(),
                    replaced_by = %key,
                    "Device replaced by new connection"
                );
                self.retire(previous, DisconnectReason::Replaced);
            }
            Ok(None) => {}
            Err(reason) => {
                tracing::warn!(device = %device.id(), reason = %reason, "Connection rejected");
                device.close();
                sink.close().await;
                return Err(reason.into());
            }
        }

        // A concurrent connect may already have evicted this handle
        let announced = {
            let _lifecycle = self.lifecycle.lock();
            if device.is_closed() {
                false
            } else {
                self.events.emit(Event::Connect {
                    device: Arc::clone(&device),
                });
                true
            }
        };

        // The pump also tears down a superseded connection
        WritePump::new(
            Arc::clone(&device),
            queue,
            sink,
            Arc::clone(&self.registry),
            self.events.clone(),
        )
        .spawn();

        if !announced {
            tracing::debug!(device = %device.id(), key = %key, "Connection superseded before it was announced");
            return Err(RejectReason::Superseded(device.id().clone()).into());
        }

        tracing::info!(
            device = %device.id(),
            key = %key,
            peer = ?request.peer_addr,
            trust = device.trust().0,
            "Device connected"
        );

        Ok(device)
    }

    async fn disconnect(&self, id: &DeviceId) -> bool {
        match self.registry.remove(id).await {
            Some(device) => {
                self.release(device);
                true
            }
            None => false,
        }
    }

    async fn disconnect_if<F>(&self, predicate: F) -> usize
    where
        F: FnMut(&DeviceId) -> bool + Send,
    {
        let removed = self.registry.remove_if(predicate).await;
        let count = removed.len();

        for device in removed {
            self.release(device);
        }

        count
    }

    async fn disconnect_all(&self) -> usize {
        self.disconnect_if(|_| true).await
    }
}

impl<U: Upgrader> Manager<U> {
    /// Close a handle already removed from the registry
    ///
    /// The write pump notices the close and tears the transport down.
    fn release(&self, device: Arc<Device>) {
        tracing::info!(device = %device.id(), key = %device.key(), "Device disconnected");
        self.retire(device, DisconnectReason::Requested);
    }

    /// Close a handle and announce its departure
    fn retire(&self, device: Arc<Device>, reason: DisconnectReason) {
        let _lifecycle = self.lifecycle.lock();
        device.close();
        self.events.emit(Event::Disconnect { device, reason });
    }
}
