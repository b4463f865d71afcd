//! Message model and encodings
//!
//! The gateway itself only looks at a message's type and destination; every
//! other field is carried through untouched. Two encodings are supported:
//! JSON for human-facing ingress and a compact tagged binary form, which is
//! also what devices receive on the wire.

pub mod binary;
pub mod codec;
pub mod types;

pub use binary::{BinaryDecoder, BinaryEncoder};
pub use codec::Format;
pub use types::{Message, MessageType};
