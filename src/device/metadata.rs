//! Per-device metadata captured at connect time
//!
//! The set of capabilities is fixed: trust level, partner identifiers, the
//! SAT client identity and the convey descriptor. All of it is derived from
//! the connection request headers.

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};

/// Header carrying the device name (`mac:112233445566`)
pub const DEVICE_NAME_HEADER: &str = "x-webpa-device-name";
/// Header carrying base64-encoded JSON convey data
pub const CONVEY_HEADER: &str = "x-webpa-convey";
/// Header carrying the numeric trust level
pub const TRUST_HEADER: &str = "x-webpa-device-trust";
/// Header carrying comma-separated partner identifiers
pub const PARTNER_IDS_HEADER: &str = "x-webpa-partner-id";
/// Header carrying the SAT client identity
pub const SAT_CLIENT_ID_HEADER: &str = "x-webpa-sat-client-id";

/// Trust level granted to a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Trust(pub u32);

impl Trust {
    pub const UNTRUSTED: Trust = Trust(0);
    pub const TRUSTED: Trust = Trust(1000);
}

/// Convey descriptor sent by the device
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Convey {
    /// No convey header was present
    #[default]
    Missing,
    /// The header was present but could not be decoded
    Invalid(String),
    /// Decoded convey attributes
    Full(Map<String, Value>),
}

/// Compliance of a device's convey header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Compliance {
    Full,
    Missing,
    Invalid,
}

impl Convey {
    /// Decode a base64 JSON object header value
    pub fn from_header(value: &str) -> Self {
        let raw = match STANDARD.decode(value.trim()) {
            Ok(raw) => raw,
            Err(e) => return Convey::Invalid(format!("invalid base64: {}", e)),
        };

        match serde_json::from_slice::<Value>(&raw) {
            Ok(Value::Object(map)) => Convey::Full(map),
            Ok(_) => Convey::Invalid("convey is not a JSON object".to_string()),
            Err(e) => Convey::Invalid(format!("invalid JSON: {}", e)),
        }
    }

    pub fn compliance(&self) -> Compliance {
        match self {
            Convey::Missing => Compliance::Missing,
            Convey::Invalid(_) => Compliance::Invalid,
            Convey::Full(_) => Compliance::Full,
        }
    }

    /// Decoded attributes, if any
    pub fn attributes(&self) -> Option<&Map<String, Value>> {
        match self {
            Convey::Full(map) => Some(map),
            _ => None,
        }
    }
}

/// Capabilities and identity details of a connected device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub trust: Trust,
    pub partner_ids: Vec<String>,
    pub sat_client_id: Option<String>,
    pub convey: Convey,
}

impl Metadata {
    /// Build metadata from connection request headers
    ///
    /// Malformed optional headers degrade to defaults rather than rejecting
    /// the connection; a bad convey header is recorded as [`Convey::Invalid`].
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| header_str(headers, name);

        let trust = header(TRUST_HEADER)
            .and_then(|v| v.parse().ok())
            .map(Trust)
            .unwrap_or_default();

        let partner_ids = header(PARTNER_IDS_HEADER)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let convey = header(CONVEY_HEADER)
            .map(Convey::from_header)
            .unwrap_or(Convey::Missing);

        Self {
            trust,
            partner_ids,
            sat_client_id: header(SAT_CLIENT_ID_HEADER).map(String::from),
            convey,
        }
    }
}

/// Non-empty, trimmed value of a header
pub(crate) fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
