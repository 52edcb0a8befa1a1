//! CoAP message model.
//!
//! A [`Message`] carries the header fields, a token, options ordered by
//! option number, and an opaque payload. Options are kept sorted on
//! insertion (stable for repeated numbers, so Uri-Path segments keep their
//! order), which makes the wire encoding canonical.
//!
//! # Example
//!
//! ```
//! use serialwire::codec::{Code, Message, MessageType};
//!
//! let msg = Message::request(Code::GET, "/sensors/temp").with_message_id(7);
//! assert_eq!(msg.msg_type, MessageType::Confirmable);
//! assert_eq!(msg.path(), "/sensors/temp");
//! ```

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, SerialwireError};

/// Maximum token length in bytes.
pub const MAX_TOKEN_LEN: usize = 8;

/// Well-known option numbers.
pub mod option {
    /// Uri-Path, one option per path segment.
    pub const URI_PATH: u16 = 11;
    /// Content-Format, a uint.
    pub const CONTENT_FORMAT: u16 = 12;
}

/// Well-known content formats.
pub mod content_format {
    /// `text/plain; charset=utf-8`
    pub const TEXT_PLAIN: u16 = 0;
    /// `application/json`
    pub const APPLICATION_JSON: u16 = 50;
}

/// Message type (2-bit field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Requires an acknowledgement.
    Confirmable,
    /// Fire and forget.
    NonConfirmable,
    /// Acknowledges a confirmable message, optionally carrying a response.
    Acknowledgement,
    /// Rejects a message.
    Reset,
}

impl MessageType {
    /// Wire value.
    pub fn to_bits(self) -> u8 {
        match self {
            MessageType::Confirmable => 0,
            MessageType::NonConfirmable => 1,
            MessageType::Acknowledgement => 2,
            MessageType::Reset => 3,
        }
    }

    /// From the 2-bit wire value.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => MessageType::Confirmable,
            1 => MessageType::NonConfirmable,
            2 => MessageType::Acknowledgement,
            _ => MessageType::Reset,
        }
    }
}

/// Method or response code, `class.detail` packed as `ccc ddddd`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Code(pub u8);

impl Code {
    pub const EMPTY: Code = Code::new(0, 0);

    pub const GET: Code = Code::new(0, 1);
    pub const POST: Code = Code::new(0, 2);
    pub const PUT: Code = Code::new(0, 3);
    pub const DELETE: Code = Code::new(0, 4);

    pub const CREATED: Code = Code::new(2, 1);
    pub const DELETED: Code = Code::new(2, 2);
    pub const VALID: Code = Code::new(2, 3);
    pub const CHANGED: Code = Code::new(2, 4);
    pub const CONTENT: Code = Code::new(2, 5);

    pub const BAD_REQUEST: Code = Code::new(4, 0);
    pub const NOT_FOUND: Code = Code::new(4, 4);
    pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);

    pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);

    /// Pack a class and detail.
    pub const fn new(class: u8, detail: u8) -> Self {
        Code((class << 5) | (detail & 0x1F))
    }

    /// Code class (0 request, 2 success, 4 client error, 5 server error).
    pub fn class(self) -> u8 {
        self.0 >> 5
    }

    /// Code detail.
    pub fn detail(self) -> u8 {
        self.0 & 0x1F
    }

    /// Returns true for the empty code 0.00.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true for method codes (0.01–0.31).
    pub fn is_request(self) -> bool {
        self.class() == 0 && !self.is_empty()
    }

    /// Returns true for response codes (2.xx–5.xx).
    pub fn is_response(self) -> bool {
        (2..=5).contains(&self.class())
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.class(), self.detail())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({})", self)
    }
}

/// One option instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoapOption {
    /// Option number.
    pub number: u16,
    /// Raw option value.
    pub value: Bytes,
}

/// An application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type.
    pub msg_type: MessageType,
    /// Method or response code.
    pub code: Code,
    /// Message ID, used for deduplication and ACK matching.
    pub message_id: u16,
    /// Token (0–8 bytes), used for request/response matching.
    pub token: Bytes,
    options: Vec<CoapOption>,
    /// Payload, empty if absent.
    pub payload: Bytes,
}

impl Message {
    /// Create a message with no token, options or payload.
    pub fn new(msg_type: MessageType, code: Code, message_id: u16) -> Self {
        Self {
            msg_type,
            code,
            message_id,
            token: Bytes::new(),
            options: Vec::new(),
            payload: Bytes::new(),
        }
    }

    /// Confirmable request for `path`.
    pub fn request(code: Code, path: &str) -> Self {
        let mut msg = Self::new(MessageType::Confirmable, code, 0);
        msg.set_path(path);
        msg
    }

    /// Set the message ID.
    pub fn with_message_id(mut self, message_id: u16) -> Self {
        self.message_id = message_id;
        self
    }

    /// Set the message type.
    pub fn with_type(mut self, msg_type: MessageType) -> Self {
        self.msg_type = msg_type;
        self
    }

    /// Set the token.
    pub fn with_token(mut self, token: impl Into<Bytes>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Returns true for confirmable messages.
    pub fn is_confirmable(&self) -> bool {
        self.msg_type == MessageType::Confirmable
    }

    /// All options, ordered by number.
    pub fn options(&self) -> &[CoapOption] {
        &self.options
    }

    /// Values of every instance of an option, in order.
    pub fn option_values(&self, number: u16) -> impl Iterator<Item = &Bytes> {
        self.options
            .iter()
            .filter(move |o| o.number == number)
            .map(|o| &o.value)
    }

    /// Value of the first instance of an option.
    pub fn option(&self, number: u16) -> Option<&Bytes> {
        self.option_values(number).next()
    }

    /// Add an option, keeping options ordered by number.
    pub fn add_option(&mut self, number: u16, value: impl Into<Bytes>) {
        let at = self.options.partition_point(|o| o.number <= number);
        self.options.insert(
            at,
            CoapOption {
                number,
                value: value.into(),
            },
        );
    }

    /// Remove every instance of an option.
    pub fn remove_option(&mut self, number: u16) {
        self.options.retain(|o| o.number != number);
    }

    /// Request path, always starting with `/`.
    pub fn path(&self) -> String {
        let segments: Vec<String> = self
            .option_values(option::URI_PATH)
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect();
        format!("/{}", segments.join("/"))
    }

    /// Replace the Uri-Path options with the segments of `path`.
    pub fn set_path(&mut self, path: &str) {
        self.remove_option(option::URI_PATH);
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            self.add_option(option::URI_PATH, Bytes::copy_from_slice(segment.as_bytes()));
        }
    }

    /// Content-Format option, if present.
    pub fn content_format(&self) -> Option<u16> {
        self.option(option::CONTENT_FORMAT)
            .filter(|v| v.len() <= 2)
            .map(|v| v.iter().fold(0u16, |acc, &b| (acc << 8) | b as u16))
    }

    /// Set the Content-Format option.
    pub fn set_content_format(&mut self, format: u16) {
        self.remove_option(option::CONTENT_FORMAT);
        let bytes = format.to_be_bytes();
        // uint options drop leading zero bytes
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        self.add_option(option::CONTENT_FORMAT, Bytes::copy_from_slice(&bytes[start..]));
    }

    /// Deserialize a JSON payload.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Serialize `value` as the JSON payload and set the content format.
    pub fn set_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.payload = Bytes::from(serde_json::to_vec(value)?);
        self.set_content_format(content_format::APPLICATION_JSON);
        Ok(())
    }

    /// Check the fields that cannot be represented on the wire.
    pub fn validate(&self) -> Result<()> {
        if self.token.len() > MAX_TOKEN_LEN {
            return Err(SerialwireError::MalformedMessage(format!(
                "token length {} exceeds {}",
                self.token.len(),
                MAX_TOKEN_LEN
            )));
        }
        if self.code.is_empty()
            && (!self.token.is_empty() || !self.options.is_empty() || !self.payload.is_empty())
        {
            return Err(SerialwireError::MalformedMessage(
                "empty message must not carry token, options or payload".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_code_display() {
        assert_eq!(Code::CONTENT.to_string(), "2.05");
        assert_eq!(Code::GET.to_string(), "0.01");
        assert_eq!(Code::NOT_FOUND.to_string(), "4.04");
        assert_eq!(Code::CONTENT.0, 0x45);
    }

    #[test]
    fn test_code_classes() {
        assert!(Code::GET.is_request());
        assert!(!Code::GET.is_response());
        assert!(Code::CONTENT.is_response());
        assert!(Code::EMPTY.is_empty());
        assert!(!Code::EMPTY.is_request());
    }

    #[test]
    fn test_message_type_bits() {
        for t in [
            MessageType::Confirmable,
            MessageType::NonConfirmable,
            MessageType::Acknowledgement,
            MessageType::Reset,
        ] {
            assert_eq!(MessageType::from_bits(t.to_bits()), t);
        }
    }

    #[test]
    fn test_path_roundtrip() {
        let msg = Message::request(Code::GET, "/a/b/c");
        assert_eq!(msg.path(), "/a/b/c");
        assert_eq!(msg.option_values(option::URI_PATH).count(), 3);
    }

    #[test]
    fn test_path_normalizes_slashes() {
        let msg = Message::request(Code::GET, "a//b/");
        assert_eq!(msg.path(), "/a/b");

        let root = Message::request(Code::GET, "/");
        assert_eq!(root.path(), "/");
        assert!(root.options().is_empty());
    }

    #[test]
    fn test_options_kept_sorted() {
        let mut msg = Message::new(MessageType::Confirmable, Code::POST, 1);
        msg.set_content_format(content_format::APPLICATION_JSON);
        msg.set_path("/x/y");

        let numbers: Vec<u16> = msg.options().iter().map(|o| o.number).collect();
        assert_eq!(numbers, vec![11, 11, 12]);
        assert_eq!(msg.path(), "/x/y");
    }

    #[test]
    fn test_content_format() {
        let mut msg = Message::new(MessageType::Confirmable, Code::GET, 1);
        assert_eq!(msg.content_format(), None);

        msg.set_content_format(content_format::TEXT_PLAIN);
        assert_eq!(msg.content_format(), Some(0));
        assert!(msg.option(option::CONTENT_FORMAT).unwrap().is_empty());

        msg.set_content_format(content_format::APPLICATION_JSON);
        assert_eq!(msg.content_format(), Some(50));
    }

    #[test]
    fn test_json_payload() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Reading {
            celsius: f32,
        }

        let mut msg = Message::new(MessageType::Acknowledgement, Code::CONTENT, 1);
        msg.set_json(&Reading { celsius: 21.5 }).unwrap();

        assert_eq!(msg.content_format(), Some(content_format::APPLICATION_JSON));
        assert_eq!(msg.json::<Reading>().unwrap(), Reading { celsius: 21.5 });
    }

    #[test]
    fn test_validate_token_length() {
        let msg = Message::request(Code::GET, "/a").with_token(vec![0u8; 9]);
        assert!(matches!(
            msg.validate(),
            Err(SerialwireError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_validate_empty_message() {
        assert!(Message::new(MessageType::Confirmable, Code::EMPTY, 1)
            .validate()
            .is_ok());

        let bad = Message::new(MessageType::Confirmable, Code::EMPTY, 1).with_payload("x");
        assert!(bad.validate().is_err());
    }
}
