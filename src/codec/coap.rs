//! CoAP wire codec (RFC 7252 message format).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver| T |  TKL  |      Code     |          Message ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Token (if any, TKL bytes) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Options (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1 1 1 1 1 1 1 1|    Payload (if any) ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Option delta and length use 4-bit nibbles; 13 and 14 announce one and
//! two extension bytes, 15 is reserved.

use bytes::{BufMut, Bytes, BytesMut};

use super::message::{Code, Message, MessageType, MAX_TOKEN_LEN};
use crate::error::{Result, SerialwireError};

/// Protocol version carried in every message.
pub const COAP_VERSION: u8 = 1;

/// Fixed header size.
pub const HEADER_SIZE: usize = 4;

/// Marker between options and payload.
pub const PAYLOAD_MARKER: u8 = 0xFF;

/// Largest value representable by a nibble plus two extension bytes.
const MAX_EXTENDED: usize = 269 + 0xFFFF;

/// Stateless CoAP message codec.
pub struct CoapCodec;

impl CoapCodec {
    /// Encode a message to bytes.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` for a token longer than 8 bytes, an empty
    /// message with content, or an option value too long to encode.
    pub fn encode(msg: &Message) -> Result<Bytes> {
        msg.validate()?;

        let mut buf = BytesMut::with_capacity(
            HEADER_SIZE + msg.token.len() + msg.options().len() * 4 + 1 + msg.payload.len(),
        );

        buf.put_u8((COAP_VERSION << 6) | (msg.msg_type.to_bits() << 4) | msg.token.len() as u8);
        buf.put_u8(msg.code.0);
        buf.put_u16(msg.message_id);
        buf.put_slice(&msg.token);

        let mut previous = 0u16;
        for opt in msg.options() {
            let delta = (opt.number - previous) as usize;
            let len = opt.value.len();
            if len > MAX_EXTENDED {
                return Err(SerialwireError::MalformedMessage(format!(
                    "option {} value of {} bytes is too long",
                    opt.number, len
                )));
            }

            let (delta_nibble, delta_ext) = split_extended(delta);
            let (len_nibble, len_ext) = split_extended(len);

            buf.put_u8((delta_nibble << 4) | len_nibble);
            buf.put_slice(&delta_ext);
            buf.put_slice(&len_ext);
            buf.put_slice(&opt.value);
            previous = opt.number;
        }

        if !msg.payload.is_empty() {
            buf.put_u8(PAYLOAD_MARKER);
            buf.put_slice(&msg.payload);
        }

        Ok(buf.freeze())
    }

    /// Decode a message from bytes.
    ///
    /// # Errors
    ///
    /// Returns `MalformedMessage` for anything that is not a well-formed
    /// CoAP message.
    pub fn decode(data: &[u8]) -> Result<Message> {
        if data.len() < HEADER_SIZE {
            return Err(malformed(format!(
                "message of {} bytes is shorter than the header",
                data.len()
            )));
        }

        let version = data[0] >> 6;
        if version != COAP_VERSION {
            return Err(malformed(format!("unsupported version {}", version)));
        }

        let msg_type = MessageType::from_bits(data[0] >> 4);
        let token_len = (data[0] & 0x0F) as usize;
        if token_len > MAX_TOKEN_LEN {
            return Err(malformed(format!("token length {} exceeds 8", token_len)));
        }

        let code = Code(data[1]);
        let message_id = u16::from_be_bytes([data[2], data[3]]);

        let mut pos = HEADER_SIZE;
        let token = take(data, &mut pos, token_len, "token")?;

        let mut msg = Message::new(msg_type, code, message_id).with_token(token);
        let mut number = 0u32;

        while pos < data.len() {
            let byte = data[pos];
            pos += 1;

            if byte == PAYLOAD_MARKER {
                if pos == data.len() {
                    return Err(malformed("payload marker followed by empty payload"));
                }
                msg.payload = Bytes::copy_from_slice(&data[pos..]);
                break;
            }

            let delta = read_extended(data, &mut pos, byte >> 4, "option delta")?;
            let len = read_extended(data, &mut pos, byte & 0x0F, "option length")?;

            number += delta as u32;
            let opt_number = u16::try_from(number)
                .map_err(|_| malformed(format!("option number {} out of range", number)))?;

            let value = take(data, &mut pos, len, "option value")?;
            msg.add_option(opt_number, value);
        }

        if code.is_empty()
            && (!msg.token.is_empty() || !msg.options().is_empty() || !msg.payload.is_empty())
        {
            return Err(malformed("empty message with content"));
        }

        Ok(msg)
    }
}

fn malformed(reason: impl Into<String>) -> SerialwireError {
    SerialwireError::MalformedMessage(reason.into())
}

/// Nibble plus extension bytes for a delta or length.
fn split_extended(value: usize) -> (u8, Vec<u8>) {
    if value < 13 {
        (value as u8, Vec::new())
    } else if value < 269 {
        (13, vec![(value - 13) as u8])
    } else {
        (14, ((value - 269) as u16).to_be_bytes().to_vec())
    }
}

fn read_extended(data: &[u8], pos: &mut usize, nibble: u8, what: &str) -> Result<usize> {
    match nibble {
        0..=12 => Ok(nibble as usize),
        13 => {
            let ext = take(data, pos, 1, what)?;
            Ok(13 + ext[0] as usize)
        }
        14 => {
            let ext = take(data, pos, 2, what)?;
            Ok(269 + u16::from_be_bytes([ext[0], ext[1]]) as usize)
        }
        _ => Err(malformed(format!("reserved nibble 15 in {}", what))),
    }
}

fn take(data: &[u8], pos: &mut usize, len: usize, what: &str) -> Result<Bytes> {
    let end = *pos + len;
    if end > data.len() {
        return Err(malformed(format!(
            "truncated {}: need {} bytes, have {}",
            what,
            len,
            data.len() - *pos
        )));
    }
    let bytes = Bytes::copy_from_slice(&data[*pos..end]);
    *pos = end;
    Ok(bytes)
}
