//! Integration tests for serialwire.
//!
//! These tests run full client/server links over in-memory pipes.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{collect_frames, hello_server, tagged, ChunkedStream, TaggedEngine, PSK};
use serialwire::codec::{CoapCodec, Code, Message, MessageType};
use serialwire::error::SerialwireError;
use serialwire::session::PeerIdentity;
use serialwire::{
    AdapterConfig, Client, LinkConfig, NullHandshake, PskHandshake, SecureSession, Server,
    SessionConfig, SessionState, StreamPacketAdapter,
};
use tokio::io::{duplex, AsyncReadExt};
use tokio_util::sync::CancellationToken;

/// Test the `/a` GET round trip over a PSK-secured session.
#[tokio::test]
async fn test_get_hello_world_over_psk() {
    let (a, b) = duplex(4096);
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let server = tokio::spawn(async move {
        hello_server()
            .run(b, PskHandshake::server("server", PSK), &token)
            .await
    });

    let mut client = Client::builder()
        .first_message_id(1234)
        .connect(a, PskHandshake::client("client", PSK), &cancel)
        .await
        .unwrap();
    assert_eq!(
        client.session().peer_identity(),
        Some(&PeerIdentity::new("server"))
    );

    let response = client.get("/a", &cancel).await.unwrap();
    assert_eq!(response.msg_type, MessageType::Acknowledgement);
    assert_eq!(response.message_id, 1234);
    assert_eq!(response.code, Code::CONTENT);
    assert_eq!(&response.payload[..], b"Hello World");

    // Close notification ends the server loop cleanly.
    client.close().await;
    assert_eq!(client.state(), SessionState::Closed);
    server.await.unwrap().unwrap();
}

/// Test the same exchange when every read and write moves a single byte.
#[tokio::test]
async fn test_get_hello_world_one_byte_at_a_time() {
    let (a, b) = duplex(4096);
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let _server = tokio::spawn(async move {
        hello_server()
            .run(
                ChunkedStream::new(b, 1),
                PskHandshake::server("server", PSK),
                &token,
            )
            .await
    });

    let mut client = Client::builder()
        .first_message_id(1234)
        .connect(
            ChunkedStream::new(a, 1),
            PskHandshake::client("client", PSK),
            &cancel,
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let response = client.get("/a", &cancel).await.unwrap();
        assert_eq!(response.code, Code::CONTENT);
        assert_eq!(&response.payload[..], b"Hello World");
    }
}

/// Test the exact bytes of an unsecured request on the wire.
#[tokio::test]
async fn test_plaintext_request_wire_bytes() {
    let (a, mut b) = duplex(4096);
    let cancel = CancellationToken::new();

    let mut client = Client::builder()
        .first_message_id(1234)
        .connect(a, NullHandshake::new(), &cancel)
        .await
        .unwrap();

    let request = tokio::spawn(async move { client.get("/a", &CancellationToken::new()).await });

    // Length prefix, then CON GET with MID 1234, a generated 4-byte token
    // and Uri-Path "a".
    let mut wire = [0u8; 14];
    b.read_exact(&mut wire).await.unwrap();
    assert_eq!(&wire[..4], &[0, 0, 0, 10]);
    assert_eq!(&wire[4..8], &[0x44, 0x01, 0x04, 0xD2]);
    assert_eq!(&wire[12..], &[0xB1, 0x61]);

    request.abort();
}

/// Test that a mismatched PSK fails on both ends.
#[tokio::test]
async fn test_wrong_psk_fails_handshake() {
    let (a, b) = duplex(4096);
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let server = tokio::spawn(async move {
        hello_server()
            .run(b, PskHandshake::server("server", b"other key"), &token)
            .await
    });

    let result = Client::builder()
        .connect(a, PskHandshake::client("client", PSK), &cancel)
        .await;
    assert!(matches!(result, Err(SerialwireError::Handshake(_))));

    let server_result = server.await.unwrap();
    assert!(server_result.is_err());
}

/// Test that a record failing authentication is dropped and the session
/// keeps working.
#[tokio::test]
async fn test_record_auth_failure_is_recoverable() {
    let (a, b) = duplex(4096);
    let cancel = CancellationToken::new();

    let mut receiver = SecureSession::new(
        StreamPacketAdapter::new(a, AdapterConfig::default()),
        TaggedEngine,
        SessionConfig::default(),
    );
    let mut sender = SecureSession::new(
        StreamPacketAdapter::new(b, AdapterConfig::default()),
        NullHandshake::new(),
        SessionConfig::default(),
    );
    receiver.handshake(&cancel).await.unwrap();
    sender.handshake(&cancel).await.unwrap();

    sender.send(b"forged").await.unwrap();
    sender.send(&tagged(b"next")).await.unwrap();

    let err = receiver.recv(&cancel).await.unwrap_err();
    assert!(matches!(err, SerialwireError::RecordAuthFailure(_)));
    assert_eq!(receiver.state(), SessionState::Established);

    assert_eq!(
        receiver.recv(&cancel).await.unwrap(),
        Bytes::from_static(b"next")
    );
}

/// Test that a record failing authentication can be configured as fatal.
#[tokio::test]
async fn test_record_auth_failure_fatal_when_configured() {
    let (a, b) = duplex(4096);
    let cancel = CancellationToken::new();

    let mut receiver = SecureSession::new(
        StreamPacketAdapter::new(a, AdapterConfig::default()),
        TaggedEngine,
        SessionConfig {
            fatal_record_auth_failures: true,
            ..SessionConfig::default()
        },
    );
    let mut sender = SecureSession::new(
        StreamPacketAdapter::new(b, AdapterConfig::default()),
        NullHandshake::new(),
        SessionConfig::default(),
    );
    receiver.handshake(&cancel).await.unwrap();
    sender.handshake(&cancel).await.unwrap();

    sender.send(b"forged").await.unwrap();
    assert!(matches!(
        receiver.recv(&cancel).await,
        Err(SerialwireError::RecordAuthFailure(_))
    ));
    assert_eq!(receiver.state(), SessionState::Failed);
    assert!(matches!(
        receiver.recv(&cancel).await,
        Err(SerialwireError::TransportClosed)
    ));
}

/// Test that the server keeps serving after a forged record.
#[tokio::test]
async fn test_server_survives_forged_record() {
    let (a, b) = duplex(4096);
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    let _server = tokio::spawn(async move { hello_server().run(b, TaggedEngine, &token).await });

    let mut peer = SecureSession::new(
        StreamPacketAdapter::new(a, AdapterConfig::default()),
        NullHandshake::new(),
        SessionConfig::default(),
    );
    peer.handshake(&cancel).await.unwrap();

    let request = Message::request(Code::GET, "/a").with_message_id(42);
    peer.send(b"forged").await.unwrap();
    peer.send(&tagged(&CoapCodec::encode(&request).unwrap()))
        .await
        .unwrap();

    let record = peer.recv(&cancel).await.unwrap();
    assert_eq!(record[0], common::TAG);
    let reply = CoapCodec::decode(&record[1..]).unwrap();
    assert_eq!(reply.message_id, 42);
    assert_eq!(&reply.payload[..], b"Hello World");
}

/// Test concurrent record senders over a chunked stream: every record
/// arrives whole.
#[tokio::test]
async fn test_concurrent_senders_do_not_interleave() {
    let (a, b) = duplex(256);
    let cancel = CancellationToken::new();

    let mut left = SecureSession::new(
        StreamPacketAdapter::new(ChunkedStream::new(a, 3), AdapterConfig::default()),
        PskHandshake::client("left", PSK),
        SessionConfig::default(),
    );
    let mut right = SecureSession::new(
        StreamPacketAdapter::new(ChunkedStream::new(b, 5), AdapterConfig::default()),
        PskHandshake::server("right", PSK),
        SessionConfig::default(),
    );

    let token = cancel.clone();
    let right_task = tokio::spawn(async move {
        right.handshake(&token).await.unwrap();
        let mut received = Vec::new();
        for _ in 0..20 {
            received.push(right.recv(&token).await.unwrap());
        }
        received
    });
    left.handshake(&cancel).await.unwrap();

    let mut senders = Vec::new();
    for i in 0..20u8 {
        let sender = left.sender();
        senders.push(tokio::spawn(async move {
            sender.send(Bytes::from(vec![i; 100])).await
        }));
    }
    for task in senders {
        task.await.unwrap().unwrap();
    }

    let mut received = right_task.await.unwrap();
    received.sort();
    for (i, record) in received.iter().enumerate() {
        assert_eq!(record.as_ref(), vec![i as u8; 100].as_slice());
    }
}

/// Test that a link configuration loaded from JSON drives both ends.
#[tokio::test]
async fn test_link_config_from_json() {
    let config = LinkConfig::from_json(
        r#"{
            "adapter": { "max_frame_size": 512, "deadlines": "unsupported" },
            "session": { "mtu": 256 },
            "request": { "ack_timeout_ms": 500 }
        }"#,
    )
    .unwrap();

    let (a, b) = duplex(4096);
    let cancel = CancellationToken::new();

    let server = Server::builder()
        .handle("/a", |_req, responder| async move {
            responder.respond(Code::CONTENT, "Hello World").await
        })
        .config(config.clone())
        .build();
    let token = cancel.clone();
    let _server = tokio::spawn(async move {
        server.run(b, PskHandshake::server("server", PSK), &token).await
    });

    let mut client = Client::builder()
        .config(config)
        .connect(a, PskHandshake::client("client", PSK), &cancel)
        .await
        .unwrap();
    assert_eq!(client.session().config().mtu, 256);
    assert_eq!(client.config().ack_timeout(), Duration::from_millis(500));

    let response = client.get("/a", &cancel).await.unwrap();
    assert_eq!(&response.payload[..], b"Hello World");

    // Above the 256-byte MTU.
    let err = client.post("/a", vec![0u8; 300], &cancel).await.unwrap_err();
    assert!(matches!(err, SerialwireError::FrameTooLarge { .. }));
}

/// Test the raw frames a plaintext client emits.
#[tokio::test]
async fn test_plaintext_frames_on_wire() {
    let (a, b) = duplex(4096);
    let frames = collect_frames(b);

    let mut session = SecureSession::new(
        StreamPacketAdapter::new(a, AdapterConfig::default()),
        NullHandshake::new(),
        SessionConfig::default(),
    );
    session.handshake(&CancellationToken::new()).await.unwrap();
    session.send(b"one").await.unwrap();
    session.send(b"two").await.unwrap();
    session.close().await;

    assert_eq!(
        frames.await.unwrap(),
        vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
    );
}
