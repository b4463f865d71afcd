//! Per-connection write pump
//!
//! Drains a device's outbound queue into its transport sink. One pump task
//! runs per connection; it is the only owner of the sink and therefore the
//! only place connection teardown I/O happens.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::{DisconnectReason, Device, Event, EventBus, Request};
use crate::error::DeliveryError;
use crate::registry::Registry;
use crate::transport::DeviceSink;

pub(crate) struct WritePump<S> {
    device: Arc<Device>,
    queue: mpsc::Receiver<Request>,
    sink: S,
    registry: Arc<Registry>,
    events: EventBus,
}

impl<S: DeviceSink> WritePump<S> {
    pub(crate) fn new(
        device: Arc<Device>,
        queue: mpsc::Receiver<Request>,
        sink: S,
        registry: Arc<Registry>,
        events: EventBus,
    ) -> Self {
        Self {
            device,
            queue,
            sink,
            registry,
            events,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let lost = loop {
            let request = tokio::select! {
                biased;
                _ = self.device.closed() => break None,
                // The held handle owns the sender, so the queue outlives the loop
                request = self.queue.recv() => match request {
                    Some(request) => request,
                    None => break None,
                },
            };

            self.device.complete_pending();
            let size = request.contents.len();

            let written = tokio::select! {
                biased;
                _ = self.device.closed() => {
                    self.fail(request, DeliveryError::Closed);
                    break None;
                }
                written = self.sink.write(request.contents.clone()) => written,
            };

            match written {
                Ok(()) => {
                    self.device.statistics().add_sent(size);
                    tracing::trace!(device = %self.device.id(), bytes = size, "Message written");
                    self.events.emit(Event::MessageSent {
                        device: Arc::clone(&self.device),
                        request,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        device = %self.device.id(),
                        key = %self.device.key(),
                        error = %e,
                        "Device write failed"
                    );
                    self.fail(request, DeliveryError::Closed);
                    break Some(DisconnectReason::ConnectionLost(e.to_string()));
                }
            }
        };

        // Anything still queued never reaches the device
        self.queue.close();
        while let Ok(request) = self.queue.try_recv() {
            self.device.complete_pending();
            self.fail(request, DeliveryError::Closed);
        }

        self.sink.close().await;

        if let Some(reason) = lost {
            self.device.close();
            let removed = self
                .registry
                .remove_connection(self.device.id(), self.device.key())
                .await;

            if removed.is_some() {
                tracing::info!(
                    device = %self.device.id(),
                    key = %self.device.key(),
                    reason = ?reason,
                    "Device disconnected"
                );
                self.events.emit(Event::Disconnect {
                    device: Arc::clone(&self.device),
                    reason,
                });
            }
        }

        tracing::debug!(device = %self.device.id(), key = %self.device.key(), "Write pump stopped");
    }

    fn fail(&self, request: Request, error: DeliveryError) {
        self.device.statistics().add_dropped();
        self.events.emit(Event::MessageFailed {
            device: Arc::clone(&self.device),
            request,
            error,
        });
    }
}
