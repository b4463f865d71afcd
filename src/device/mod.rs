//! Device handles and everything attached to them
//!
//! A [`Device`] wraps one live connection: its identity, metadata captured at
//! connect time, delivery statistics, and the bounded outbound queue drained
//! by the connection's write pump.
//!
//! # Outbound path
//!
//! ```text
//!   Router ──► Device::send() ──► mpsc (bounded) ──► write pump ──► DeviceSink
//!                  │                                     │
//!                  └─ Timeout / Closed                   └─ MessageSent / MessageFailed
//! ```

pub mod event;
pub mod handle;
pub mod id;
pub mod metadata;
pub mod stats;

pub use event::{DisconnectReason, Event, EventBus};
pub use handle::{Device, Request};
pub use id::{ConnectionKey, DeviceId, Scheme};
pub use metadata::{Compliance, Convey, Metadata, Trust};
pub use stats::{Statistics, StatsSnapshot};
