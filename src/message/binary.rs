//! Compact binary message encoding
//!
//! Messages are written as a two-byte header followed by tagged fields and a
//! terminating end tag. Fields that are empty are omitted entirely.
//!
//! ```text
//! 0xD7 0x01                 - magic, version
//! tag  value                - repeated
//! 0x00                      - end of message
//!
//! 0x01 - Message type (u8)
//! 0x02 - Source (string)
//! 0x03 - Destination (string)
//! 0x04 - Transaction UUID (string)
//! 0x05 - Content type (string)
//! 0x06 - Accept (string)
//! 0x07 - Status (i64)
//! 0x08 - Partner IDs (u16 count + strings)
//! 0x09 - Headers (u16 count + strings)
//! 0x0A - Metadata (u16 count + key/value string pairs)
//! 0x0B - Service name (string)
//! 0x0C - URL (string)
//! 0x0D - Payload (u32 length + bytes)
//! ```
//!
//! Strings carry a 16-bit length prefix. A string field longer than 65535
//! bytes sets the high bit of its tag and uses a 32-bit length instead. A
//! list or map with the high bit set uses 32-bit counts and 32-bit lengths
//! for every item.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::types::{Message, MessageType};
use crate::error::DecodeError;

const MAGIC: u8 = 0xD7;
const VERSION: u8 = 0x01;

const TAG_END: u8 = 0x00;
const TAG_TYPE: u8 = 0x01;
const TAG_SOURCE: u8 = 0x02;
const TAG_DESTINATION: u8 = 0x03;
const TAG_TRANSACTION: u8 = 0x04;
const TAG_CONTENT_TYPE: u8 = 0x05;
const TAG_ACCEPT: u8 = 0x06;
const TAG_STATUS: u8 = 0x07;
const TAG_PARTNER_IDS: u8 = 0x08;
const TAG_HEADERS: u8 = 0x09;
const TAG_METADATA: u8 = 0x0A;
const TAG_SERVICE_NAME: u8 = 0x0B;
const TAG_URL: u8 = 0x0C;
const TAG_PAYLOAD: u8 = 0x0D;

/// Set on a tag when its lengths and counts are 32-bit
const LONG_FLAG: u8 = 0x80;

/// Decoder for the compact binary encoding
#[derive(Debug, Default)]
pub struct BinaryDecoder {
    _private: (),
}

impl BinaryDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode exactly one message; trailing bytes are an error
    pub fn decode(&self, buf: &mut Bytes) -> Result<Message, DecodeError> {
        if buf.remaining() < 2 {
            return Err(DecodeError::UnexpectedEof);
        }
        if buf.get_u8() != MAGIC || buf.get_u8() != VERSION {
            return Err(DecodeError::InvalidHeader);
        }

        let mut message = Message::default();
        let mut has_type = false;

        loop {
            if buf.is_empty() {
                return Err(DecodeError::UnexpectedEof);
            }

            let raw_tag = buf.get_u8();
            let long = raw_tag & LONG_FLAG != 0;
            let tag = raw_tag & !LONG_FLAG;

            match tag {
                TAG_END if !long => break,
                TAG_TYPE if !long => {
                    if buf.is_empty() {
                        return Err(DecodeError::UnexpectedEof);
                    }
                    message.message_type = MessageType::try_from(buf.get_u8())?;
                    has_type = true;
                }
                TAG_SOURCE => message.source = self.read_string(buf, long)?,
                TAG_DESTINATION => message.destination = self.read_string(buf, long)?,
                TAG_TRANSACTION => message.transaction_uuid = Some(self.read_string(buf, long)?),
                TAG_CONTENT_TYPE => message.content_type = Some(self.read_string(buf, long)?),
                TAG_ACCEPT => message.accept = Some(self.read_string(buf, long)?),
                TAG_SERVICE_NAME => message.service_name = Some(self.read_string(buf, long)?),
                TAG_URL => message.url = Some(self.read_string(buf, long)?),
                TAG_STATUS if !long => {
                    if buf.remaining() < 8 {
                        return Err(DecodeError::UnexpectedEof);
                    }
                    message.status = Some(buf.get_i64());
                }
                TAG_PARTNER_IDS => message.partner_ids = self.read_string_list(buf, long)?,
                TAG_HEADERS => message.headers = self.read_string_list(buf, long)?,
                TAG_METADATA => message.metadata = self.read_string_map(buf, long)?,
                TAG_PAYLOAD if !long => {
                    if buf.remaining() < 4 {
                        return Err(DecodeError::UnexpectedEof);
                    }
                    let len = buf.get_u32() as usize;
                    if buf.remaining() < len {
                        return Err(DecodeError::UnexpectedEof);
                    }
                    message.payload = buf.copy_to_bytes(len).to_vec();
                }
                _ => return Err(DecodeError::UnknownTag(raw_tag)),
            }
        }

        if !has_type {
            return Err(DecodeError::MissingField("msg_type"));
        }
        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes);
        }

        Ok(message)
    }

    fn read_string(&self, buf: &mut Bytes, long: bool) -> Result<String, DecodeError> {
        let len = if long {
            if buf.remaining() < 4 {
                return Err(DecodeError::UnexpectedEof);
            }
            buf.get_u32() as usize
        } else {
            if buf.remaining() < 2 {
                return Err(DecodeError::UnexpectedEof);
            }
            buf.get_u16() as usize
        };

        if buf.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }

        let bytes = buf.copy_to_bytes(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn read_count(&self, buf: &mut Bytes, long: bool) -> Result<usize, DecodeError> {
        if long {
            if buf.remaining() < 4 {
                return Err(DecodeError::UnexpectedEof);
            }
            return Ok(buf.get_u32() as usize);
        }
        if buf.remaining() < 2 {
            return Err(DecodeError::UnexpectedEof);
        }
        Ok(buf.get_u16() as usize)
    }

    fn read_string_list(&self, buf: &mut Bytes, long: bool) -> Result<Vec<String>, DecodeError> {
        let count = self.read_count(buf, long)?;
        let mut items = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            items.push(self.read_string(buf, long)?);
        }
        Ok(items)
    }

    fn read_string_map(
        &self,
        buf: &mut Bytes,
        long: bool,
    ) -> Result<BTreeMap<String, String>, DecodeError> {
        let count = self.read_count(buf, long)?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = self.read_string(buf, long)?;
            let value = self.read_string(buf, long)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

/// Encoder for the compact binary encoding
pub struct BinaryEncoder {
    buf: BytesMut,
}

impl BinaryEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
        }
    }

    /// Get the encoded bytes and reset encoder
    pub fn finish(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    /// Encode one message
    pub fn encode(&mut self, message: &Message) {
        self.buf.put_u8(MAGIC);
        self.buf.put_u8(VERSION);

        self.buf.put_u8(TAG_TYPE);
        self.buf.put_u8(message.message_type.code());

        self.write_field(TAG_SOURCE, &message.source);
        self.write_field(TAG_DESTINATION, &message.destination);
        self.write_optional(TAG_TRANSACTION, &message.transaction_uuid);
        self.write_optional(TAG_CONTENT_TYPE, &message.content_type);
        self.write_optional(TAG_ACCEPT, &message.accept);

        if let Some(status) = message.status {
            self.buf.put_u8(TAG_STATUS);
            self.buf.put_i64(status);
        }

        self.write_list(TAG_PARTNER_IDS, &message.partner_ids);
        self.write_list(TAG_HEADERS, &message.headers);

        if !message.metadata.is_empty() {
            let long = message.metadata.len() > 0xFFFF
                || message
                    .metadata
                    .iter()
                    .any(|(key, value)| key.len() > 0xFFFF || value.len() > 0xFFFF);

            self.write_header(TAG_METADATA, message.metadata.len(), long);
            for (key, value) in &message.metadata {
                self.write_utf8(key, long);
                self.write_utf8(value, long);
            }
        }

        self.write_optional(TAG_SERVICE_NAME, &message.service_name);
        self.write_optional(TAG_URL, &message.url);

        if !message.payload.is_empty() {
            self.buf.put_u8(TAG_PAYLOAD);
            self.buf.put_u32(message.payload.len() as u32);
            self.buf.put_slice(&message.payload);
        }

        self.buf.put_u8(TAG_END);
    }

    fn write_optional(&mut self, tag: u8, value: &Option<String>) {
        if let Some(value) = value {
            self.write_field(tag, value);
        }
    }

    fn write_field(&mut self, tag: u8, value: &str) {
        if value.is_empty() {
            return;
        }

        let long = value.len() > 0xFFFF;
        self.buf.put_u8(if long { tag | LONG_FLAG } else { tag });
        self.write_utf8(value, long);
    }

    fn write_list(&mut self, tag: u8, items: &[String]) {
        if items.is_empty() {
            return;
        }

        let long = items.len() > 0xFFFF || items.iter().any(|item| item.len() > 0xFFFF);
        self.write_header(tag, items.len(), long);
        for item in items {
            self.write_utf8(item, long);
        }
    }

    /// Write a list or map tag followed by its item count
    fn write_header(&mut self, tag: u8, count: usize, long: bool) {
        if long {
            self.buf.put_u8(tag | LONG_FLAG);
            self.buf.put_u32(count as u32);
        } else {
            self.buf.put_u8(tag);
            self.buf.put_u16(count as u16);
        }
    }

    /// Write UTF-8 string with a 16 or 32-bit length prefix (no tag)
    fn write_utf8(&mut self, s: &str, long: bool) {
        if long {
            self.buf.put_u32(s.len() as u32);
        } else {
            self.buf.put_u16(s.len() as u16);
        }
        self.buf.put_slice(s.as_bytes());
    }
}

impl Default for BinaryEncoder {
    fn default() -> Self {
        Self::new()
    }
}
