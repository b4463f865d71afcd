//! Error types
//!
//! Each concern gets its own error enum so callers can tell request-level
//! failures (decode, route resolution, connect) apart from per-device
//! delivery failures, which are only ever aggregated.

use std::time::Duration;

use crate::device::DeviceId;
use crate::message::MessageType;

/// Failure to parse a device identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("device id is empty")]
    Empty,

    #[error("device id `{0}` has no scheme")]
    MissingScheme(String),

    #[error("unknown device id scheme `{0}`")]
    UnknownScheme(String),

    #[error("invalid mac address `{0}`")]
    InvalidMac(String),

    #[error("device id value contains reserved character `{0}`")]
    ReservedCharacter(char),
}

/// Failure to decode an inbound message
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid message header")]
    InvalidHeader,

    #[error("unknown field tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("trailing bytes after message")]
    TrailingBytes,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported content type `{0}`")]
    UnsupportedFormat(String),
}

/// Why a connection attempt was turned away before a transport was upgraded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("missing device name header")]
    MissingDeviceName,

    #[error("invalid device name: {0}")]
    InvalidDeviceName(#[from] IdError),

    #[error("device {0} is already connected")]
    Duplicate(DeviceId),

    #[error("device limit of {0} reached")]
    LimitReached(usize),

    #[error("device {0} was replaced by a newer connection while connecting")]
    Superseded(DeviceId),
}

/// Failure to connect a device
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("connection rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// A message that cannot be mapped to any target selection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("message has no destination")]
    MissingDestination,

    #[error("destination list `{0}` names no devices")]
    EmptyMulticast(String),

    #[error("invalid destination `{destination}`: {source}")]
    InvalidDestination { destination: String, source: IdError },

    #[error("message type {0} cannot be routed to devices")]
    NotRoutable(MessageType),
}

/// Failure to deliver a message to one device
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("device connection is closed")]
    Closed,

    #[error("device did not accept the message within {0:?}")]
    Timeout(Duration),
}
