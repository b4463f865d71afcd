//! devgate: device registry and message router for fleet gateways
//!
//! Tracks a large population of persistent device connections, each keyed by
//! a stable device identity, and routes messages to one or many of them
//! concurrently. Per-device outcomes are collected without letting a failing
//! or slow device hold up the others.
//!
//! # Overview
//!
//! ```text
//!                        ┌──────────────────────────────┐
//!   connect request ───► │ Manager                      │
//!                        │   Connector ──► Registry ◄── Router ◄─── send request
//!                        │                   │          │
//!                        │             ListingStreamer  └─► Device::send ─► write pump ─► DeviceSink
//!                        └──────────────────────────────┘
//! ```
//!
//! - [`manager::Manager`] owns the [`registry::Registry`] and implements the
//!   [`manager::Connector`] and [`manager::Router`] interfaces
//! - [`failures::Failures`] aggregates the delivery outcomes of one request
//! - [`listing::ListingStreamer`] streams the device listing document
//! - [`ingress`] adapts all of the above to HTTP
//!
//! Transports plug in through [`transport::Upgrader`]; an in-memory transport
//! is included for tests and simulations.

pub mod device;
pub mod error;
pub mod failures;
pub mod ingress;
pub mod listing;
pub mod manager;
pub mod message;
pub mod registry;
pub mod transport;

pub use device::{ConnectionKey, Device, DeviceId, Event, Metadata, Scheme};
pub use error::{ConnectError, DecodeError, DeliveryError, RouteError};
pub use failures::{FailureReport, Failures};
pub use listing::ListingStreamer;
pub use manager::{Connector, DuplicatePolicy, Manager, ManagerConfig, Router, TargetSelection};
pub use message::{Format, Message, MessageType};
pub use registry::Registry;
