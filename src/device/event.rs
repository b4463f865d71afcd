//! Device lifecycle events
//!
//! Events are fanned out to every listener through a `tokio::sync::broadcast`
//! channel. Listeners that fall behind lose the oldest events; emitting never
//! blocks the connection or routing paths.

use std::sync::Arc;

use tokio::sync::broadcast;

use super::handle::{Device, Request};
use crate::error::DeliveryError;
use crate::message::Message;

/// Why a device left the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit disconnect by id or predicate
    Requested,
    /// A newer connection for the same device took its place
    Replaced,
    /// The transport failed while writing
    ConnectionLost(String),
}

/// Something that happened to a device
#[derive(Debug, Clone)]
pub enum Event {
    Connect {
        device: Arc<Device>,
    },
    Disconnect {
        device: Arc<Device>,
        reason: DisconnectReason,
    },
    MessageSent {
        device: Arc<Device>,
        request: Request,
    },
    MessageFailed {
        device: Arc<Device>,
        request: Request,
        error: DeliveryError,
    },
    MessageReceived {
        device: Arc<Device>,
        message: Arc<Message>,
    },
}

impl Event {
    /// The device this event concerns
    pub fn device(&self) -> &Arc<Device> {
        match self {
            Event::Connect { device }
            | Event::Disconnect { device, .. }
            | Event::MessageSent { device, .. }
            | Event::MessageFailed { device, .. }
            | Event::MessageReceived { device, .. } => device,
        }
    }
}

/// Broadcast hub for [`Event`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Register a new listener
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event
    ///
    /// Returns the number of listeners that received it, or 0 if there are none.
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}
