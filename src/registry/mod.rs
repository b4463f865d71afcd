//! Device registry
//!
//! The registry owns the mapping from device identity to live connection
//! handle and enforces that at most one handle per identity is registered at
//! any instant.
//!
//! # Architecture
//!
//! ```text
//!                          Arc<Registry>
//!                     ┌─────────────────────────┐
//!                     │ devices: RwLock<HashMap │
//!                     │   <DeviceId,            │
//!                     │    Arc<Device>>>        │
//!                     └───────────┬─────────────┘
//!                                 │
//!         ┌───────────────────────┼───────────────────────┐
//!         │ write                 │ read                  │ read
//!         ▼                       ▼                       ▼
//!    [Connector]              [Router]               [Listing]
//!    insert/remove        get / visit_all            snapshot
//! ```
//!
//! Handles are reference counted, so readers walk away with an
//! `Arc<Device>` and release the lock before doing any I/O.

pub mod store;

pub use store::{DuplicatePolicy, Registry};
