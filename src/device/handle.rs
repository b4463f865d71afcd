//! Live device connection handle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Serialize, Serializer};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::id::{ConnectionKey, DeviceId};
use super::metadata::{Compliance, Metadata, Trust};
use super::stats::{Statistics, StatsSnapshot};
use crate::error::DeliveryError;
use crate::message::Message;

/// One message queued for a device
///
/// Cheap to clone: the message is shared and the encoded contents are
/// reference counted, so a broadcast encodes once for every device.
#[derive(Debug, Clone)]
pub struct Request {
    pub message: Arc<Message>,
    /// Encoded frame written to the device as-is
    pub contents: Bytes,
}

impl Request {
    pub fn new(message: Arc<Message>, contents: Bytes) -> Self {
        Self { message, contents }
    }
}

/// Handle for one live device connection
///
/// Created by the connector, owned by the registry entry that holds it and
/// shared with the connection's write pump. Once closed a handle stays closed
/// and is never registered again.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    key: ConnectionKey,
    metadata: Metadata,
    stats: Statistics,
    pending: AtomicUsize,
    closed: AtomicBool,
    shutdown: CancellationToken,
    outbound: mpsc::Sender<Request>,
    send_timeout: Duration,
}

impl Device {
    /// Create a new handle
    ///
    /// Returns the handle and the receiving end of its outbound queue, which
    /// the connection's write pump drains.
    pub fn new(
        id: DeviceId,
        key: ConnectionKey,
        metadata: Metadata,
        queue_size: usize,
        send_timeout: Duration,
    ) -> (Self, mpsc::Receiver<Request>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));

        let device = Self {
            id,
            key,
            metadata,
            stats: Statistics::new(),
            pending: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            outbound: tx,
            send_timeout,
        };

        (device, rx)
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn trust(&self) -> Trust {
        self.metadata.trust
    }

    pub fn partner_ids(&self) -> &[String] {
        &self.metadata.partner_ids
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    /// Number of messages queued but not yet written
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the handle
    ///
    /// Safe to call concurrently with [`Device::send`]. Returns `true` only
    /// for the call that performed the transition.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shutdown.cancel();
        true
    }

    /// Resolves once the handle has been closed
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    /// Queue a message for delivery
    ///
    /// Waits at most the configured send timeout for room in the outbound
    /// queue. Success means the message was handed to the write pump; write
    /// outcomes are reported through events.
    pub async fn send(&self, request: Request) -> Result<(), DeliveryError> {
        if self.is_closed() {
            self.stats.add_dropped();
            return Err(DeliveryError::Closed);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DeliveryError::Closed),
            sent = tokio::time::timeout(self.send_timeout, self.outbound.send(request)) => match sent {
                Ok(Ok(())) => Ok(()),
                Ok(Err(_)) => Err(DeliveryError::Closed),
                Err(_) => Err(DeliveryError::Timeout(self.send_timeout)),
            },
        };

        if outcome.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            self.stats.add_dropped();
        }

        outcome
    }

    /// Mark one queued message as leaving the queue
    pub(crate) fn complete_pending(&self) {
        // Saturating: a racing close may already have drained the counter
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceView<'a> {
    id: &'a DeviceId,
    key: ConnectionKey,
    pending: usize,
    closed: bool,
    statistics: StatsSnapshot,
    trust: Trust,
    #[serde(skip_serializing_if = "is_empty")]
    partner_ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    sat_client_id: Option<&'a str>,
    compliance: Compliance,
    #[serde(skip_serializing_if = "Option::is_none")]
    convey: Option<&'a serde_json::Map<String, serde_json::Value>>,
}

fn is_empty(ids: &&[String]) -> bool {
    ids.is_empty()
}

impl Serialize for Device {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DeviceView {
            id: &self.id,
            key: self.key,
            pending: self.pending(),
            closed: self.is_closed(),
            statistics: self.stats.snapshot(),
            trust: self.metadata.trust,
            partner_ids: &self.metadata.partner_ids,
            sat_client_id: self.metadata.sat_client_id.as_deref(),
            compliance: self.metadata.convey.compliance(),
            convey: self.metadata.convey.attributes(),
        }
        .serialize(serializer)
    }
}
