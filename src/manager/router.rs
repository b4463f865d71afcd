//! Message routing
//!
//! Routing turns a message's destination into a [`TargetSelection`],
//! resolves it against the registry and delivers the encoded message to every
//! match concurrently. Per-device outcomes are reported through a callback;
//! only an underivable selection fails the route as a whole.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::device::{Device, DeviceId, Request, Scheme};
use crate::error::{DeliveryError, RouteError};
use crate::message::Message;
use crate::registry::Registry;

/// Wildcard matching every device
const WILDCARD: &str = "*";

/// Which devices a message goes to
#[derive(Clone)]
pub enum TargetSelection {
    /// Exactly one device
    Unicast(DeviceId),
    /// A fixed set of devices
    Multicast(Vec<DeviceId>),
    /// Every device, optionally limited to one id scheme
    Broadcast(Option<Scheme>),
    /// Every device the predicate accepts
    Predicate(Arc<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl TargetSelection {
    /// Derive the selection for a message
    pub fn from_message(message: &Message) -> Result<Self, RouteError> {
        if !message.message_type.is_routable() {
            return Err(RouteError::NotRoutable(message.message_type));
        }
        Self::from_destination(&message.destination)
    }

    /// Parse a destination string
    ///
    /// `*` selects every device and `scheme:*` every device of that scheme.
    /// A comma separated list selects each listed device once.
    pub fn from_destination(destination: &str) -> Result<Self, RouteError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(RouteError::MissingDestination);
        }

        if destination == WILDCARD {
            return Ok(TargetSelection::Broadcast(None));
        }

        let invalid = |source| RouteError::InvalidDestination {
            destination: destination.to_string(),
            source,
        };

        let identity = destination
            .split_once('/')
            .map_or(destination, |(identity, _)| identity);
        if let Some((scheme, WILDCARD)) = identity.split_once(':') {
            let scheme = scheme.parse().map_err(invalid)?;
            return Ok(TargetSelection::Broadcast(Some(scheme)));
        }

        if destination.contains(',') {
            let mut ids: Vec<DeviceId> = Vec::new();
            for name in destination.split(',').filter(|name| !name.trim().is_empty()) {
                let id = DeviceId::parse(name).map_err(invalid)?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            if ids.is_empty() {
                return Err(RouteError::EmptyMulticast(destination.to_string()));
            }
            return Ok(TargetSelection::Multicast(ids));
        }

        DeviceId::parse(destination)
            .map(TargetSelection::Unicast)
            .map_err(invalid)
    }

    /// Select every device accepted by `predicate`
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Device) -> bool + Send + Sync + 'static,
    {
        TargetSelection::Predicate(Arc::new(predicate))
    }

    /// Resolve against the registry
    ///
    /// Broadcast and predicate selections are resolved in a single visit, so
    /// the result never contains a handle removed before the visit began.
    pub async fn resolve(&self, registry: &Registry) -> Vec<Arc<Device>> {
        match self {
            TargetSelection::Unicast(id) => registry.get(id).await.into_iter().collect(),
            TargetSelection::Multicast(ids) => {
                let mut devices = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(device) = registry.get(id).await {
                        devices.push(device);
                    }
                }
                devices
            }
            TargetSelection::Broadcast(scheme) => {
                let mut devices = Vec::new();
                registry
                    .visit_all(|device| {
                        if scheme.map_or(true, |s| device.id().scheme() == s) {
                            devices.push(Arc::clone(device));
                        }
                        true
                    })
                    .await;
                devices
            }
            TargetSelection::Predicate(predicate) => {
                let mut devices = Vec::new();
                registry
                    .visit_all(|device| {
                        if predicate(device) {
                            devices.push(Arc::clone(device));
                        }
                        true
                    })
                    .await;
                devices
            }
        }
    }
}

impl fmt::Debug for TargetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetSelection::Unicast(id) => f.debug_tuple("Unicast").field(id).finish(),
            TargetSelection::Multicast(ids) => f.debug_tuple("Multicast").field(ids).finish(),
            TargetSelection::Broadcast(scheme) => {
                f.debug_tuple("Broadcast").field(scheme).finish()
            }
            TargetSelection::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Outcome of a route call
#[derive(Debug, Default)]
pub struct Routed {
    /// Devices a delivery was attempted for
    pub devices: Vec<Arc<Device>>,
    /// Number of devices the selection matched
    pub matched: usize,
}

impl Routed {
    /// Number of devices the selection matched
    pub fn count(&self) -> usize {
        self.matched
    }

    /// Whether cancellation kept some matches from being attempted
    pub fn is_partial(&self) -> bool {
        self.devices.len() < self.matched
    }
}

/// Routes messages to connected devices
pub trait Router: Send + Sync {
    /// Route a message to the devices its destination selects
    ///
    /// `raw` is the already encoded frame to deliver; when `None` the message
    /// is encoded once and shared across every delivery. `on_result` is
    /// called exactly once per attempted device with `None` on success.
    fn route<F>(
        &self,
        message: Arc<Message>,
        raw: Option<Bytes>,
        cancel: &CancellationToken,
        on_result: F,
    ) -> impl Future<Output = Result<Routed, RouteError>> + Send
    where
        F: FnMut(&Arc<Device>, Option<&DeliveryError>) + Send;
}

/// Deliver `request` to every target concurrently
///
/// At most `concurrency` sends are in flight. Once `cancel` fires nothing new
/// is dispatched; sends already started run to completion and are reported.
pub(crate) async fn dispatch<F>(
    targets: Vec<Arc<Device>>,
    request: Request,
    concurrency: usize,
    cancel: &CancellationToken,
    mut on_result: F,
) -> Routed
where
    F: FnMut(&Arc<Device>, Option<&DeliveryError>),
{
    let matched = targets.len();
    let mut remaining = targets.into_iter();
    let mut attempted = Vec::with_capacity(matched);
    let mut in_flight = FuturesUnordered::new();

    loop {
        while in_flight.len() < concurrency.max(1) && !cancel.is_cancelled() {
            let Some(device) = remaining.next() else {
                break;
            };
            let request = request.clone();
            let target = Arc::clone(&device);
            in_flight.push(async move {
                let result = target.send(request).await;
                (target, result)
            });
            attempted.push(device);
        }

        let Some((device, result)) = in_flight.next().await else {
            break;
        };

        if let Err(e) = &result {
            tracing::debug!(device = %device.id(), key = %device.key(), error = %e, "Delivery failed");
        }
        on_result(&device, result.as_ref().err());
    }

    if attempted.len() < matched {
        tracing::debug!(
            matched,
            attempted = attempted.len(),
            "Routing cancelled before every device was attempted"
        );
    }

    Routed {
        devices: attempted,
        matched,
    }
}
