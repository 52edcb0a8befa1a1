//! Codec module - application messages and their wire encoding.
//!
//! - [`Message`] - CoAP-style message model (header, token, options, payload)
//! - [`CoapCodec`] - RFC 7252 binary encoding
//!
//! # Design
//!
//! The codec is a marker struct with static methods rather than a trait
//! object. Messages travel inside session records, so the codec never sees
//! framing or encryption.
//!
//! # Example
//!
//! ```
//! use serialwire::codec::{CoapCodec, Code, Message};
//!
//! let req = Message::request(Code::GET, "/a").with_message_id(1234);
//! let bytes = CoapCodec::encode(&req).unwrap();
//! assert_eq!(&bytes[..], &[0x40, 0x01, 0x04, 0xD2, 0xB1, 0x61]);
//!
//! let decoded = CoapCodec::decode(&bytes).unwrap();
//! assert_eq!(decoded.path(), "/a");
//! ```

mod coap;
mod message;

pub use coap::{CoapCodec, COAP_VERSION, HEADER_SIZE, PAYLOAD_MARKER};
pub use message::{
    content_format, option, CoapOption, Code, Message, MessageType, MAX_TOKEN_LEN,
};
