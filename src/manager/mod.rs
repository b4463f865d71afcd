//! Device manager
//!
//! The [`Manager`] ties the pieces together: it owns the registry, admits and
//! evicts devices through the [`Connector`] interface, routes messages through
//! the [`Router`] interface and publishes lifecycle events.
//!
//! # Example
//!
//! ```ignore
//! use devgate::manager::{Manager, ManagerConfig};
//! use devgate::transport::MemoryUpgrader;
//!
//! let (upgrader, peers) = MemoryUpgrader::new();
//! let manager = Manager::new(ManagerConfig::default(), upgrader);
//! let device = manager.connect(&request, &HeaderMap::new()).await?;
//! ```

pub mod config;
pub mod connector;
mod pump;
pub mod router;

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use config::{DuplicatePolicy, ManagerConfig};
pub use connector::Connector;
pub use router::{Routed, Router, TargetSelection};

use crate::device::{Device, Event, EventBus, Request};
use crate::error::{DecodeError, DeliveryError, RouteError};
use crate::listing::ListingStreamer;
use crate::message::{Format, Message};
use crate::registry::Registry;
use crate::transport::Upgrader;

/// Device manager
pub struct Manager<U: Upgrader> {
    config: ManagerConfig,
    registry: Arc<Registry>,
    upgrader: U,
    events: EventBus,
    next_key: AtomicU64,
    shutdown: CancellationToken,
    /// Orders a handle's `Connect` event before its `Disconnect`
    lifecycle: Mutex<()>,
}

impl<U: Upgrader> Manager<U> {
    /// Create a manager with an empty registry
    pub fn new(config: ManagerConfig, upgrader: U) -> Self {
        Self::with_registry(config, upgrader, Arc::new(Registry::new()))
    }

    /// Create a manager over an existing registry
    pub fn with_registry(config: ManagerConfig, upgrader: U, registry: Arc<Registry>) -> Self {
        let events = EventBus::new(config.event_capacity);

        Self {
            config,
            registry,
            upgrader,
            events,
            next_key: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
            lifecycle: Mutex::new(()),
        }
    }

    /// Get a reference to the device registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn upgrader(&self) -> &U {
        &self.upgrader
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register a new event listener
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Token cancelled when the manager shuts down
    ///
    /// Request handlers derive child tokens from it so shutdown stops every
    /// in-progress route and listing.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Stop routing and disconnect every device
    pub async fn shutdown(&self) -> usize {
        self.shutdown.cancel();
        let count = self.disconnect_all().await;
        tracing::info!(devices = count, "Device manager shut down");
        count
    }

    /// Streamer for the device listing document
    pub fn listing(&self) -> ListingStreamer {
        ListingStreamer::new(Arc::clone(&self.registry), self.config.listing_queue_size)
    }

    /// Handle a frame received from a device
    ///
    /// Frames use the binary encoding. Frames that fail to decode are
    /// counted as dropped and otherwise ignored.
    pub fn on_message(&self, device: &Arc<Device>, frame: Bytes) -> Result<Arc<Message>, DecodeError> {
        let size = frame.len();

        let message = match Format::Binary.decode(&frame) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                device.statistics().add_dropped();
                tracing::debug!(device = %device.id(), error = %e, bytes = size, "Undecodable frame from device");
                return Err(e);
            }
        };

        device.statistics().add_received(size);
        tracing::trace!(
            device = %device.id(),
            msg_type = %message.message_type,
            destination = %message.destination,
            "Message received"
        );
        self.events.emit(Event::MessageReceived {
            device: Arc::clone(device),
            message: Arc::clone(&message),
        });

        Ok(message)
    }

    /// Route a message to an explicit selection
    ///
    /// Same delivery semantics as [`Router::route`], but the message's own
    /// destination is not consulted.
    pub async fn route_to<F>(
        &self,
        selection: &TargetSelection,
        message: Arc<Message>,
        raw: Option<Bytes>,
        cancel: &CancellationToken,
        on_result: F,
    ) -> Routed
    where
        F: FnMut(&Arc<Device>, Option<&DeliveryError>) + Send,
    {
        let contents = raw.unwrap_or_else(|| Format::Binary.encode(&message));
        let request = Request::new(message, contents);
        let targets = selection.resolve(&self.registry).await;

        tracing::debug!(selection = ?selection, matched = targets.len(), "Routing message");

        router::dispatch(
            targets,
            request,
            self.config.route_concurrency,
            cancel,
            on_result,
        )
        .await
    }
}

impl<U: Upgrader> Router for Manager<U> {
    async fn route<F>(
        &self,
        message: Arc<Message>,
        raw: Option<Bytes>,
        cancel: &CancellationToken,
        on_result: F,
    ) -> Result<Routed, RouteError>
    where
        F: FnMut(&Arc<Device>, Option<&DeliveryError>) + Send,
    {
        let selection = TargetSelection::from_message(&message)?;
        Ok(self.route_to(&selection, message, raw, cancel, on_result).await)
    }
}
