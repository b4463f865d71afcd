//! Message encodings accepted at the ingress boundary

use bytes::Bytes;

use super::binary::{BinaryDecoder, BinaryEncoder};
use super::types::Message;
use crate::error::DecodeError;

/// Wire encoding of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// JSON text encoding
    Json,
    /// Compact tagged binary encoding
    Binary,
}

impl Format {
    /// Pick the format named by a `Content-Type` value
    ///
    /// Parameters such as `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: &str) -> Result<Self, DecodeError> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/json" | "text/json" => Ok(Format::Json),
            "application/octet-stream" => Ok(Format::Binary),
            _ => Err(DecodeError::UnsupportedFormat(content_type.to_string())),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Binary => "application/octet-stream",
        }
    }

    /// Decode one message from a complete body
    pub fn decode(&self, body: &Bytes) -> Result<Message, DecodeError> {
        match self {
            Format::Json => Ok(serde_json::from_slice(body)?),
            Format::Binary => BinaryDecoder::new().decode(&mut body.clone()),
        }
    }

    /// Encode one message
    pub fn encode(&self, message: &Message) -> Bytes {
        match self {
            Format::Json => {
                // Message holds only strings, integers and maps with string keys
                Bytes::from(serde_json::to_vec(message).unwrap_or_default())
            }
            Format::Binary => {
                let mut encoder = BinaryEncoder::new();
                encoder.encode(message);
                encoder.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    #[test]
    fn test_from_content_type() {
        assert_eq!(
            Format::from_content_type("application/json").unwrap(),
            Format::Json
        );
        assert_eq!(
            Format::from_content_type("Application/JSON; charset=utf-8").unwrap(),
            Format::Json
        );
        assert_eq!(
            Format::from_content_type("application/octet-stream").unwrap(),
            Format::Binary
        );
        for other in ["text/plain", "application/msgpack", "application/wrp"] {
            assert!(matches!(
                Format::from_content_type(other),
                Err(DecodeError::UnsupportedFormat(_))
            ));
        }
    }

    #[test]
    fn test_json_decode() {
        let body = Bytes::from_static(br#"{"msg_type":3,"dest":"mac:112233445566","transaction_uuid":"t"}"#);
        let message = Format::Json.decode(&body).unwrap();

        assert_eq!(message.message_type, MessageType::SimpleRequestResponse);
        assert_eq!(message.destination, "mac:112233445566");
    }

    #[test]
    fn test_json_decode_malformed() {
        let body = Bytes::from_static(b"{not json");
        assert!(matches!(Format::Json.decode(&body), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_transcode_json_to_binary() {
        let body = Bytes::from_static(br#"{"msg_type":4,"source":"dns:gw","dest":"*","payload":"AAE="}"#);
        let message = Format::Json.decode(&body).unwrap();

        let binary = Format::Binary.encode(&message);
        let back = Format::Binary.decode(&binary).unwrap();
        assert_eq!(back.payload, vec![0x00, 0x01]);
        assert_eq!(back, message);
    }
}
