//! Property tests for framing and message encoding.

use bytes::Bytes;
use proptest::collection::vec;
use proptest::prelude::*;
use serialwire::codec::{CoapCodec, Code, Message, MessageType};
use serialwire::protocol::{build_frame, FrameBuffer};

fn message_type() -> impl Strategy<Value = MessageType> {
    prop_oneof![
        Just(MessageType::Confirmable),
        Just(MessageType::NonConfirmable),
        Just(MessageType::Acknowledgement),
        Just(MessageType::Reset),
    ]
}

fn code() -> impl Strategy<Value = Code> {
    prop_oneof![
        Just(Code::GET),
        Just(Code::POST),
        Just(Code::PUT),
        Just(Code::DELETE),
        Just(Code::CONTENT),
        Just(Code::CHANGED),
        Just(Code::NOT_FOUND),
    ]
}

fn message() -> impl Strategy<Value = Message> {
    (
        message_type(),
        code(),
        any::<u16>(),
        vec(any::<u8>(), 0..=8),
        vec("[a-z0-9_-]{1,300}", 0..4),
        proptest::option::of(any::<u16>()),
        vec(any::<u8>(), 0..256),
    )
        .prop_map(|(msg_type, code, id, token, segments, format, payload)| {
            let mut msg = Message::new(msg_type, code, id)
                .with_token(token)
                .with_payload(payload);
            msg.set_path(&segments.join("/"));
            if let Some(format) = format {
                msg.set_content_format(format);
            }
            msg
        })
}

proptest! {
    /// Splitting the same byte stream at arbitrary points yields the same
    /// frames.
    #[test]
    fn ragged_splits_yield_identical_frames(
        payloads in vec(vec(any::<u8>(), 0..300), 1..8),
        cuts in vec(any::<prop::sample::Index>(), 0..20),
    ) {
        let mut stream = Vec::new();
        for payload in &payloads {
            stream.extend(build_frame(payload));
        }

        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
        points.push(0);
        points.push(stream.len());
        points.sort_unstable();
        points.dedup();

        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        for window in points.windows(2) {
            frames.extend(buffer.push(&stream[window[0]..window[1]]).unwrap());
        }

        prop_assert!(buffer.is_empty());
        let decoded: Vec<Bytes> = frames.into_iter().map(|f| f.into_payload()).collect();
        let expected: Vec<Bytes> = payloads.into_iter().map(Bytes::from).collect();
        prop_assert_eq!(decoded, expected);
    }

    /// Messages survive an encode/decode cycle unchanged.
    #[test]
    fn message_survives_encoding(msg in message()) {
        let encoded = CoapCodec::encode(&msg).unwrap();
        prop_assert_eq!(CoapCodec::decode(&encoded).unwrap(), msg);
    }

    /// Arbitrary input never panics the decoder.
    #[test]
    fn decode_handles_arbitrary_bytes(data in vec(any::<u8>(), 0..64)) {
        let _ = CoapCodec::decode(&data);
    }

    /// Truncating a message with a payload never decodes to the original.
    #[test]
    fn truncated_message_never_matches(msg in message(), cut in any::<prop::sample::Index>()) {
        let encoded = CoapCodec::encode(&msg).unwrap();
        let at = cut.index(encoded.len());
        if let Ok(decoded) = CoapCodec::decode(&encoded[..at]) {
            prop_assert_ne!(decoded, msg);
        }
    }
}
