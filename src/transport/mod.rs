//! Transport seam
//!
//! The connector never deals with sockets directly. A transport supplies an
//! [`Upgrader`] that turns an accepted connection request into a
//! [`DeviceSink`], the write half the device's pump pushes frames into.
//! How the connection is physically established (WebSocket handshake, TLS,
//! ...) is entirely the upgrader's business.

use std::future::Future;
use std::io;
use std::net::SocketAddr;

use axum::http::HeaderMap;
use bytes::Bytes;

pub mod memory;

pub use memory::{MemoryPeer, MemorySink, MemoryUpgrader};

/// An inbound connection request from a device
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    /// Request headers; identity and metadata are read from these
    pub headers: HeaderMap,

    /// Remote peer address, if known
    pub peer_addr: Option<SocketAddr>,
}

impl ConnectRequest {
    pub fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            peer_addr: None,
        }
    }

    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }
}

/// Write half of an established device connection
pub trait DeviceSink: Send + 'static {
    /// Write one encoded frame to the device
    fn write(&mut self, frame: Bytes) -> impl Future<Output = io::Result<()>> + Send;

    /// Close the connection; called exactly once, after the last write
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Establishes device connections
pub trait Upgrader: Send + Sync + 'static {
    type Sink: DeviceSink;

    /// Complete the connection for an already validated request
    ///
    /// `response_headers` are attached to the upgrade response.
    fn upgrade(
        &self,
        request: &ConnectRequest,
        response_headers: &HeaderMap,
    ) -> impl Future<Output = io::Result<Self::Sink>> + Send;
}
