//! Simulated Fleet - HTTP gateway in front of in-memory devices
//!
//! Run with: cargo run --example simulated_fleet -- --devices 50
//!
//! This example demonstrates:
//! - Connecting devices through the `Connector` interface
//! - Serving the send / listing / stat HTTP surface
//! - Watching lifecycle events from the manager
//! - Graceful shutdown that disconnects every device
//!
//! # Try it
//!
//! ```text
//! curl -s localhost:6200/api/v2/devices
//! curl -s localhost:6200/api/v2/device/serial:sim-0007/stat
//! curl -si -XPOST localhost:6200/api/v2/device/send \
//!      -H 'content-type: application/json' \
//!      -d '{"msg_type":4,"source":"dns:cli","dest":"serial:*","payload":"aGVsbG8="}'
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue};
use clap::Parser;
use devgate::device::metadata::{DEVICE_NAME_HEADER, TRUST_HEADER};
use devgate::ingress::{self, http};
use devgate::message::BinaryEncoder;
use devgate::transport::{ConnectRequest, MemoryPeer, MemoryUpgrader};
use devgate::{Event, Format, Manager, ManagerConfig, Message, MessageType};
use tokio::sync::broadcast::error::RecvError;

/// Device gateway backed by simulated devices
#[derive(Parser, Debug)]
#[command(name = "simulated_fleet")]
#[command(about = "Device gateway backed by simulated in-memory devices")]
struct Args {
    /// HTTP bind address
    #[arg(short, long, default_value = "127.0.0.1:6200")]
    bind: SocketAddr,

    /// Number of simulated devices
    #[arg(short, long, default_value = "25")]
    devices: usize,

    /// Reject reconnects of already connected devices instead of replacing them
    #[arg(long)]
    reject_duplicates: bool,

    /// Per-device send timeout in milliseconds
    #[arg(long, default_value = "2000")]
    send_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("devgate=debug".parse()?)
                .add_directive("simulated_fleet=debug".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let mut config = ManagerConfig::default().send_timeout(Duration::from_millis(args.send_timeout_ms));
    if args.reject_duplicates {
        config = config.reject_duplicates();
    }

    let (upgrader, mut peers) = MemoryUpgrader::new();
    let manager = Arc::new(Manager::new(config, upgrader));

    spawn_event_logger(&manager);

    for i in 0..args.devices {
        let mut headers = HeaderMap::new();
        headers.insert(DEVICE_NAME_HEADER, HeaderValue::from_str(&format!("serial:sim-{i:04}"))?);
        headers.insert(TRUST_HEADER, HeaderValue::from_static("1000"));

        let device = ingress::connect_device(manager.as_ref(), &ConnectRequest::new(headers), &HeaderMap::new()).await?;
        let peer = peers.recv().await.ok_or("memory transport closed")?;
        spawn_device(Arc::clone(&manager), device, peer);
    }

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    println!("Gateway listening on http://{}", args.bind);
    println!("{} simulated devices connected", args.devices);
    println!();

    let app = http::router(Arc::clone(&manager));
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    let disconnected = manager.shutdown().await;
    println!("Disconnected {} devices", disconnected);

    Ok(())
}

/// Log every lifecycle event
fn spawn_event_logger(manager: &Manager<MemoryUpgrader>) {
    let mut events = manager.subscribe();

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(Event::Connect { device }) => {
                    tracing::debug!(device = %device.id(), "event: connect");
                }
                Ok(Event::Disconnect { device, reason }) => {
                    tracing::info!(device = %device.id(), reason = ?reason, "event: disconnect");
                }
                Ok(Event::MessageFailed { device, error, .. }) => {
                    tracing::warn!(device = %device.id(), error = %error, "event: message failed");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Drive one simulated device: answer every request it receives
fn spawn_device(manager: Arc<Manager<MemoryUpgrader>>, device: Arc<devgate::Device>, mut peer: MemoryPeer) {
    tokio::spawn(async move {
        while let Some(frame) = peer.recv().await {
            let request = match Format::Binary.decode(&frame) {
                Ok(message) => message,
                Err(e) => {
                    tracing::warn!(device = %device.id(), error = %e, "Simulated device got a bad frame");
                    continue;
                }
            };

            if request.message_type != MessageType::SimpleRequestResponse {
                continue;
            }

            let mut reply = Message::request(
                device.id().to_string(),
                request.source.clone(),
                request.transaction_uuid.clone().unwrap_or_default(),
            )
            .with_payload("text/plain", format!("pong from {}", device.id()));
            reply.status = Some(200);

            let mut encoder = BinaryEncoder::new();
            encoder.encode(&reply);
            let _ = manager.on_message(&device, encoder.finish());
        }
    });
}
