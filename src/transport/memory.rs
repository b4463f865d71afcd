//! In-process transport
//!
//! Connects devices through channels instead of sockets. Every upgrade hands
//! the test or simulation a [`MemoryPeer`] standing in for the remote
//! device: it receives the frames the gateway writes and can make the
//! connection stall or fail on demand.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::HeaderMap;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use super::{ConnectRequest, DeviceSink, Upgrader};
use crate::device::metadata::{header_str, DEVICE_NAME_HEADER};

/// Shared switches between a sink and its peer
#[derive(Debug)]
struct LinkControl {
    fail_writes: AtomicBool,
    stalled: watch::Sender<bool>,
    closed: AtomicBool,
}

/// Upgrader producing in-memory connections
#[derive(Debug)]
pub struct MemoryUpgrader {
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
}

impl MemoryUpgrader {
    /// Create an upgrader and the receiver on which new peers arrive
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (tx, rx) = mpsc::unbounded_channel();

        let upgrader = Self {
            peers: tx,
            refuse: AtomicBool::new(false),
        };

        (upgrader, rx)
    }

    /// Make subsequent upgrades fail with a transport error
    pub fn refuse_upgrades(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Relaxed);
    }
}

impl Upgrader for MemoryUpgrader {
    type Sink = MemorySink;

    async fn upgrade(
        &self,
        request: &ConnectRequest,
        response_headers: &HeaderMap,
    ) -> io::Result<MemorySink> {
        if self.refuse.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "upgrade refused",
            ));
        }

        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (stalled, stall_rx) = watch::channel(false);
        let control = Arc::new(LinkControl {
            fail_writes: AtomicBool::new(false),
            stalled,
            closed: AtomicBool::new(false),
        });

        let peer = MemoryPeer {
            name: header_str(&request.headers, DEVICE_NAME_HEADER).map(String::from),
            response_headers: response_headers.clone(),
            frames: frames_rx,
            control: Arc::clone(&control),
        };

        // A dropped peer receiver only means nobody is watching new peers
        let _ = self.peers.send(peer);

        Ok(MemorySink {
            frames: frames_tx,
            stall: stall_rx,
            control,
        })
    }
}

/// Gateway side of an in-memory connection
#[derive(Debug)]
pub struct MemorySink {
    frames: mpsc::UnboundedSender<Bytes>,
    stall: watch::Receiver<bool>,
    control: Arc<LinkControl>,
}

impl DeviceSink for MemorySink {
    async fn write(&mut self, frame: Bytes) -> io::Result<()> {
        if self.stall.wait_for(|stalled| !*stalled).await.is_err() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"));
        }

        if self.control.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ));
        }

        self.frames
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))
    }

    async fn close(&mut self) {
        self.control.closed.store(true, Ordering::Relaxed);
    }
}

/// Device side of an in-memory connection
#[derive(Debug)]
pub struct MemoryPeer {
    /// Device name the connection was requested with
    pub name: Option<String>,
    /// Headers attached to the upgrade response
    pub response_headers: HeaderMap,
    frames: mpsc::UnboundedReceiver<Bytes>,
    control: Arc<LinkControl>,
}

impl MemoryPeer {
    /// Next frame written by the gateway, or `None` once the sink is gone
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.frames.recv().await
    }

    /// Next frame if one is already buffered
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.frames.try_recv().ok()
    }

    /// Make every following write fail as if the connection was reset
    pub fn fail_writes(&self) {
        self.control.fail_writes.store(true, Ordering::Relaxed);
    }

    /// Hold writes until [`MemoryPeer::resume`]
    pub fn stall(&self) {
        self.control.stalled.send_replace(true);
    }

    pub fn resume(&self) {
        self.control.stalled.send_replace(false);
    }

    /// Whether the gateway closed its side
    pub fn is_closed(&self) -> bool {
        self.control.closed.load(Ordering::Relaxed)
    }
}
