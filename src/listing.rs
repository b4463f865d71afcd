//! Streaming device listing
//!
//! Writes `{"device":[ ... ]}` with one entry per connected device. A
//! producer feeds handles into a bounded queue while a consumer serializes
//! and writes them, flushing after every entry, so a large fleet is streamed
//! rather than buffered.
//!
//! ```text
//!   snapshot ──► producer ──► mpsc (bounded) ──► consumer ──► AsyncWrite
//!                   │                               │
//!                   └─ stops on cancel              └─ encode + flush per entry
//! ```

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::device::Device;
use crate::registry::Registry;

const DOCUMENT_START: &[u8] = br#"{"device":["#;
const DOCUMENT_END: &[u8] = b"]}";

/// Serializes one listing entry
pub trait EntryEncoder: Send + Sync {
    fn encode(&self, device: &Device) -> Result<Vec<u8>, serde_json::Error>;
}

/// Default entry encoding: the device's JSON view
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEntryEncoder;

impl EntryEncoder for JsonEntryEncoder {
    fn encode(&self, device: &Device) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(device)
    }
}

/// Streams the device listing document
pub struct ListingStreamer<E = JsonEntryEncoder> {
    registry: Arc<Registry>,
    queue_size: usize,
    encoder: E,
}

impl ListingStreamer<JsonEntryEncoder> {
    pub fn new(registry: Arc<Registry>, queue_size: usize) -> Self {
        Self::with_encoder(registry, queue_size, JsonEntryEncoder)
    }
}

impl<E: EntryEncoder> ListingStreamer<E> {
    pub fn with_encoder(registry: Arc<Registry>, queue_size: usize, encoder: E) -> Self {
        Self {
            registry,
            queue_size: queue_size.max(1),
            encoder,
        }
    }

    /// Write the listing document to `out`
    ///
    /// Returns the number of entries written. Cancellation ends enumeration
    /// early but the document is still closed. A write error aborts the
    /// stream and stops the producer.
    pub async fn stream<W>(&self, out: &mut W, cancel: &CancellationToken) -> io::Result<usize>
    where
        W: AsyncWrite + Unpin + Send,
    {
        out.write_all(DOCUMENT_START).await?;

        let (tx, rx) = mpsc::channel::<Arc<Device>>(self.queue_size);

        let producer = async move {
            let mut queued = 0usize;

            for device in self.registry.snapshot().await {
                if cancel.is_cancelled() {
                    tracing::debug!(queued, "Device listing cancelled");
                    break;
                }
                if device.is_closed() {
                    continue;
                }
                // Consumer gone: the output failed
                if tx.send(device).await.is_err() {
                    break;
                }
                queued += 1;
            }

            queued
        };

        let consumer = async {
            let mut rx = rx;
            let mut written = 0usize;

            while let Some(device) = rx.recv().await {
                if written > 0 {
                    out.write_all(b",").await?;
                }
                self.write_entry(out, &device).await?;
                out.flush().await?;
                written += 1;
            }

            Ok::<_, io::Error>(written)
        };

        let (_, written) = tokio::join!(producer, consumer);
        let written = written?;

        out.write_all(DOCUMENT_END).await?;
        out.flush().await?;

        Ok(written)
    }

    async fn write_entry<W>(&self, out: &mut W, device: &Device) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match self.encoder.encode(device) {
            Ok(entry) => out.write_all(&entry).await,
            Err(e) => {
                tracing::warn!(device = %device.id(), error = %e, "Unable to encode listing entry");
                let placeholder = serde_json::Value::String(format!(
                    "Unable to marshal device [{}] as JSON: {}",
                    device.id(),
                    e
                ));
                out.write_all(placeholder.to_string().as_bytes()).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    use serde::ser::Error as _;

    use super::*;
    use crate::device::{ConnectionKey, DeviceId, Metadata};
    use crate::registry::DuplicatePolicy;

    async fn registry(names: &[&str]) -> Arc<Registry> {
        let registry = Arc::new(Registry::new());
        for (key, name) in names.iter().enumerate() {
            let (device, _rx) = Device::new(
                DeviceId::parse(name).unwrap(),
                ConnectionKey(key as u64),
                Metadata::default(),
                1,
                Duration::from_secs(1),
            );
            registry
                .insert(Arc::new(device), DuplicatePolicy::Replace, 0)
                .await
                .unwrap();
        }
        registry
    }

    struct FailingEncoder;

    impl EntryEncoder for FailingEncoder {
        fn encode(&self, device: &Device) -> Result<Vec<u8>, serde_json::Error> {
            if device.id().as_str() == "serial:bad" {
                Err(serde_json::Error::custom("boom"))
            } else {
                serde_json::to_vec(device)
            }
        }
    }

    /// Cancels the listing once `after` entries have been encoded
    struct CancellingEncoder {
        cancel: CancellationToken,
        after: usize,
        encoded: AtomicUsize,
    }

    impl EntryEncoder for CancellingEncoder {
        fn encode(&self, device: &Device) -> Result<Vec<u8>, serde_json::Error> {
            if self.encoded.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.cancel.cancel();
            }
            serde_json::to_vec(device)
        }
    }

    /// Writer that fails once it has accepted `limit` bytes
    struct BrokenWriter {
        limit: usize,
        written: usize,
    }

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.written + buf.len() > self.limit {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone")));
            }
            self.written += buf.len();
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_stream_valid_document() {
        let registry = registry(&["serial:a", "serial:b", "mac:112233445566"]).await;
        let streamer = ListingStreamer::new(registry, 1);

        let mut out = Vec::new();
        let written = streamer
            .stream(&mut out, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(written, 3);

        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let entries = doc["device"].as_array().unwrap();
        assert_eq!(entries.len(), 3);

        let mut ids: Vec<_> = entries.iter().map(|e| e["id"].as_str().unwrap()).collect();
        ids.sort();
        assert_eq!(ids, vec!["mac:112233445566", "serial:a", "serial:b"]);
    }

    #[tokio::test]
    async fn test_stream_empty_registry() {
        let streamer = ListingStreamer::new(Arc::new(Registry::new()), 4);

        let mut out = Vec::new();
        let written = streamer
            .stream(&mut out, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert_eq!(out, br#"{"device":[]}"#);
    }

    #[tokio::test]
    async fn test_stream_skips_closed_handles() {
        let registry = registry(&["serial:a", "serial:b"]).await;
        let closed = registry
            .get(&DeviceId::parse("serial:a").unwrap())
            .await
            .unwrap();
        closed.close();

        let mut out = Vec::new();
        let written = ListingStreamer::new(registry, 4)
            .stream(&mut out, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 1);
        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["device"][0]["id"], "serial:b");
    }

    #[tokio::test]
    async fn test_stream_encoder_failure_inline() {
        let registry = registry(&["serial:bad"]).await;
        let streamer = ListingStreamer::with_encoder(registry, 4, FailingEncoder);

        let mut out = Vec::new();
        streamer
            .stream(&mut out, &CancellationToken::new())
            .await
            .unwrap();

        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            doc["device"][0],
            "Unable to marshal device [serial:bad] as JSON: boom"
        );
    }

    #[tokio::test]
    async fn test_stream_cancelled_still_closes_document() {
        let registry = registry(&["serial:a", "serial:b"]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut out = Vec::new();
        let written = ListingStreamer::new(registry, 4)
            .stream(&mut out, &cancel)
            .await
            .unwrap();

        assert_eq!(written, 0);
        assert_eq!(out, br#"{"device":[]}"#);
    }

    #[tokio::test]
    async fn test_stream_cancelled_midway_closes_document() {
        let names: Vec<String> = (0..40).map(|i| format!("serial:{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let registry = registry(&names).await;

        let cancel = CancellationToken::new();
        let encoder = CancellingEncoder {
            cancel: cancel.clone(),
            after: 3,
            encoded: AtomicUsize::new(0),
        };

        let mut out = Vec::new();
        let written = ListingStreamer::with_encoder(registry, 1, encoder)
            .stream(&mut out, &cancel)
            .await
            .unwrap();

        assert!(written >= 3);
        assert!(written < 40, "wrote {written} entries after cancel");

        let doc: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["device"].as_array().unwrap().len(), written);
    }

    #[tokio::test]
    async fn test_stream_write_error_stops_producer() {
        let names: Vec<String> = (0..50).map(|i| format!("serial:{i}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let registry = registry(&names).await;

        let mut out = BrokenWriter {
            limit: 64,
            written: 0,
        };
        let result = ListingStreamer::new(registry, 1)
            .stream(&mut out, &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
