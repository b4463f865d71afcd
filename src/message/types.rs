//! Routable message types

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Kind of message carried through the gateway
///
/// Numeric values are part of both wire encodings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Authorization,
    SimpleRequestResponse,
    #[default]
    SimpleEvent,
    Create,
    Retrieve,
    Update,
    Delete,
    ServiceRegistration,
    ServiceAlive,
}

impl MessageType {
    pub fn code(&self) -> u8 {
        match self {
            MessageType::Authorization => 2,
            MessageType::SimpleRequestResponse => 3,
            MessageType::SimpleEvent => 4,
            MessageType::Create => 5,
            MessageType::Retrieve => 6,
            MessageType::Update => 7,
            MessageType::Delete => 8,
            MessageType::ServiceRegistration => 9,
            MessageType::ServiceAlive => 10,
        }
    }

    /// Whether messages of this type may be delivered to devices
    ///
    /// Authorization and service bookkeeping messages only ever travel from
    /// a device towards the gateway.
    pub fn is_routable(&self) -> bool {
        !matches!(
            self,
            MessageType::Authorization
                | MessageType::ServiceRegistration
                | MessageType::ServiceAlive
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            2 => MessageType::Authorization,
            3 => MessageType::SimpleRequestResponse,
            4 => MessageType::SimpleEvent,
            5 => MessageType::Create,
            6 => MessageType::Retrieve,
            7 => MessageType::Update,
            8 => MessageType::Delete,
            9 => MessageType::ServiceRegistration,
            10 => MessageType::ServiceAlive,
            _ => return Err(DecodeError::UnknownMessageType(code)),
        })
    }
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Authorization => "Authorization",
            MessageType::SimpleRequestResponse => "SimpleRequestResponse",
            MessageType::SimpleEvent => "SimpleEvent",
            MessageType::Create => "Create",
            MessageType::Retrieve => "Retrieve",
            MessageType::Update => "Update",
            MessageType::Delete => "Delete",
            MessageType::ServiceRegistration => "ServiceRegistration",
            MessageType::ServiceAlive => "ServiceAlive",
        };
        f.write_str(name)
    }
}

/// A message routed between the gateway and devices
///
/// The payload is opaque to the gateway. In the JSON encoding it travels as
/// standard base64.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "msg_type")]
    pub message_type: MessageType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,

    /// Addressing field, e.g. `mac:112233445566/config` or `*`
    #[serde(rename = "dest", default, skip_serializing_if = "String::is_empty")]
    pub destination: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_uuid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partner_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, with = "payload_base64", skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl Message {
    /// Create an event message addressed to `destination`
    pub fn event(source: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::SimpleEvent,
            source: source.into(),
            destination: destination.into(),
            ..Default::default()
        }
    }

    /// Create a request-response message addressed to `destination`
    pub fn request(
        source: impl Into<String>,
        destination: impl Into<String>,
        transaction_uuid: impl Into<String>,
    ) -> Self {
        Self {
            message_type: MessageType::SimpleRequestResponse,
            source: source.into(),
            destination: destination.into(),
            transaction_uuid: Some(transaction_uuid.into()),
            ..Default::default()
        }
    }

    /// Set the payload and its content type
    pub fn with_payload(mut self, content_type: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.content_type = Some(content_type.into());
        self.payload = payload.into();
        self
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
