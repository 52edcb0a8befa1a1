//! Pre-shared-key handshake engine.
//!
//! A compact three-message exchange in the shape of a PSK DTLS handshake:
//!
//! ```text
//! Client                                    Server
//!   │ ClientHello(random_c, identity_c)       │
//!   │────────────────────────────────────────>│
//!   │   ServerHello(random_s, identity_s, mac)│
//!   │<────────────────────────────────────────│
//!   │ ClientFinished(mac)                     │
//!   │────────────────────────────────────────>│
//! ```
//!
//! Keys come from HKDF-SHA256 over the PSK, salted with both randoms. Both
//! finished MACs are HMAC-SHA256 over the handshake transcript, so a peer
//! without the PSK cannot complete the exchange.
//!
//! # Wire format
//!
//! ```text
//! ClientHello    [0x16][0x01][random 32][id_len 1][identity]
//! ServerHello    [0x16][0x02][random 32][id_len 1][identity][mac 32]
//! ClientFinished [0x16][0x03][mac 32]
//! Record         [0x17][seq u64 BE][ChaCha20-Poly1305 ciphertext + tag]
//! Close notify   [0x15][seq u64 BE][tag]
//! ```
//!
//! The 9-byte record header is authenticated as associated data.

use std::fmt;

use bytes::Bytes;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{Result, SerialwireError};
use crate::session::{Flight, HandshakeEngine, Opened, PeerIdentity, Progress, Role};

type HmacSha256 = Hmac<Sha256>;

const CONTENT_ALERT: u8 = 0x15;
const CONTENT_HANDSHAKE: u8 = 0x16;
const CONTENT_RECORD: u8 = 0x17;

const CLIENT_HELLO: u8 = 0x01;
const SERVER_HELLO: u8 = 0x02;
const CLIENT_FINISHED: u8 = 0x03;

const RANDOM_LEN: usize = 32;
const MAC_LEN: usize = 32;
const TAG_LEN: usize = 16;
const RECORD_HEADER_LEN: usize = 9;
const MAX_IDENTITY_LEN: usize = 255;

const LABEL_SERVER_FINISHED: &[u8] = b"serialwire server finished";
const LABEL_CLIENT_FINISHED: &[u8] = b"serialwire client finished";

/// Per-direction keys plus the finished-MAC key.
struct Keys {
    send: Zeroizing<[u8; 32]>,
    recv: Zeroizing<[u8; 32]>,
    finished: Zeroizing<[u8; 32]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    ClientStart,
    AwaitServerHello,
    SendClientFinished,
    AwaitClientHello,
    SendServerHello,
    AwaitClientFinished,
    Established,
}

/// Pre-shared-key handshake engine with ChaCha20-Poly1305 records.
pub struct PskHandshake {
    role: Role,
    identity: String,
    psk: Zeroizing<Vec<u8>>,
    state: State,
    client_random: [u8; RANDOM_LEN],
    client_hello: Vec<u8>,
    server_hello: Vec<u8>,
    keys: Option<Keys>,
    peer: Option<PeerIdentity>,
    last_recv_seq: Option<u64>,
}

impl PskHandshake {
    /// Engine for the initiating side.
    pub fn client(identity: impl Into<String>, psk: impl AsRef<[u8]>) -> Self {
        Self::new(Role::Client, identity.into(), psk.as_ref())
    }

    /// Engine for the answering side.
    pub fn server(identity: impl Into<String>, psk: impl AsRef<[u8]>) -> Self {
        Self::new(Role::Server, identity.into(), psk.as_ref())
    }

    fn new(role: Role, identity: String, psk: &[u8]) -> Self {
        Self {
            role,
            identity,
            psk: Zeroizing::new(psk.to_vec()),
            state: match role {
                Role::Client => State::ClientStart,
                Role::Server => State::AwaitClientHello,
            },
            client_random: [0u8; RANDOM_LEN],
            client_hello: Vec::new(),
            server_hello: Vec::new(),
            keys: None,
            peer: None,
            last_recv_seq: None,
        }
    }

    /// Which side this engine plays.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns true once keys are agreed.
    pub fn is_established(&self) -> bool {
        self.state == State::Established
    }

    fn identity_bytes(&self) -> Result<&[u8]> {
        let id = self.identity.as_bytes();
        if id.len() > MAX_IDENTITY_LEN {
            return Err(SerialwireError::Handshake(format!(
                "identity is {} bytes, at most {} allowed",
                id.len(),
                MAX_IDENTITY_LEN
            )));
        }
        Ok(id)
    }

    fn build_client_hello(&mut self) -> Result<Bytes> {
        self.client_random = random_bytes_32();
        let id = self.identity_bytes()?;

        let mut hello = Vec::with_capacity(2 + RANDOM_LEN + 1 + id.len());
        hello.extend_from_slice(&[CONTENT_HANDSHAKE, CLIENT_HELLO]);
        hello.extend_from_slice(&self.client_random);
        hello.push(id.len() as u8);
        hello.extend_from_slice(id);

        self.client_hello = hello.clone();
        Ok(Bytes::from(hello))
    }

    fn accept_client_hello(&mut self, packet: &[u8]) -> Result<Progress> {
        let Some((client_random, client_id)) = parse_hello(packet, CLIENT_HELLO, 0) else {
            return Ok(Progress::NeedMore);
        };

        let server_random = random_bytes_32();
        let keys = derive_keys(&self.psk, &client_random, &server_random, Role::Server)?;
        let id = self.identity_bytes()?;

        let mut hello = Vec::with_capacity(2 + RANDOM_LEN + 1 + id.len() + MAC_LEN);
        hello.extend_from_slice(&[CONTENT_HANDSHAKE, SERVER_HELLO]);
        hello.extend_from_slice(&server_random);
        hello.push(id.len() as u8);
        hello.extend_from_slice(id);

        let mac = finished_mac(&keys.finished[..], LABEL_SERVER_FINISHED, &[packet, hello.as_slice()])?;
        hello.extend_from_slice(&mac.finalize().into_bytes());

        tracing::debug!(peer = %client_id, "ClientHello accepted");
        self.client_hello = packet.to_vec();
        self.server_hello = hello;
        self.keys = Some(keys);
        self.peer = Some(PeerIdentity::new(client_id));
        self.state = State::SendServerHello;
        Ok(Progress::FlightComplete)
    }

    fn accept_server_hello(&mut self, packet: &[u8]) -> Result<Progress> {
        let Some((server_random, server_id)) = parse_hello(packet, SERVER_HELLO, MAC_LEN) else {
            return Ok(Progress::NeedMore);
        };

        let keys = derive_keys(&self.psk, &self.client_random, &server_random, Role::Client)?;
        let (body, tag) = packet.split_at(packet.len() - MAC_LEN);
        finished_mac(&keys.finished[..], LABEL_SERVER_FINISHED, &[self.client_hello.as_slice(), body])?
            .verify_slice(tag)
            .map_err(|_| SerialwireError::Handshake("server finished MAC mismatch".into()))?;

        tracing::debug!(peer = %server_id, "ServerHello verified");
        self.server_hello = packet.to_vec();
        self.keys = Some(keys);
        self.peer = Some(PeerIdentity::new(server_id));
        self.state = State::SendClientFinished;
        Ok(Progress::FlightComplete)
    }

    fn build_client_finished(&self) -> Result<Bytes> {
        let keys = self.keys()?;
        let mac = finished_mac(
            &keys.finished[..],
            LABEL_CLIENT_FINISHED,
            &[self.client_hello.as_slice(), self.server_hello.as_slice()],
        )?;

        let mut finished = Vec::with_capacity(2 + MAC_LEN);
        finished.extend_from_slice(&[CONTENT_HANDSHAKE, CLIENT_FINISHED]);
        finished.extend_from_slice(&mac.finalize().into_bytes());
        Ok(Bytes::from(finished))
    }

    fn accept_client_finished(&mut self, packet: &[u8]) -> Result<Progress> {
        if packet == self.client_hello.as_slice() {
            return Ok(Progress::PeerRetransmitted);
        }
        if packet.len() != 2 + MAC_LEN || packet[..2] != [CONTENT_HANDSHAKE, CLIENT_FINISHED] {
            return Ok(Progress::NeedMore);
        }

        let keys = self.keys()?;
        finished_mac(
            &keys.finished[..],
            LABEL_CLIENT_FINISHED,
            &[self.client_hello.as_slice(), self.server_hello.as_slice()],
        )?
        .verify_slice(&packet[2..])
        .map_err(|_| SerialwireError::Handshake("client finished MAC mismatch".into()))?;

        self.state = State::Established;
        Ok(Progress::FlightComplete)
    }

    fn keys(&self) -> Result<&Keys> {
        self.keys
            .as_ref()
            .ok_or_else(|| SerialwireError::Handshake("session keys not established".into()))
    }

    fn seal_with_type(&self, content: u8, seq: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        let keys = self.keys()?;

        let mut header = [0u8; RECORD_HEADER_LEN];
        header[0] = content;
        header[1..].copy_from_slice(&seq.to_be_bytes());

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.send[..]));
        let nonce = construct_nonce(seq);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &header,
                },
            )
            .map_err(|_| SerialwireError::RecordAuthFailure("record sealing failed".into()))?;

        let mut record = Vec::with_capacity(RECORD_HEADER_LEN + ciphertext.len());
        record.extend_from_slice(&header);
        record.extend_from_slice(&ciphertext);
        Ok(record)
    }

    fn open_sealed(&mut self, record: &[u8]) -> Result<Vec<u8>> {
        if record.len() < RECORD_HEADER_LEN + TAG_LEN {
            return Err(SerialwireError::RecordAuthFailure(format!(
                "record of {} bytes is too short",
                record.len()
            )));
        }

        let (header, ciphertext) = record.split_at(RECORD_HEADER_LEN);
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&header[1..]);
        let seq = u64::from_be_bytes(seq_bytes);

        if self.last_recv_seq.is_some_and(|last| seq <= last) {
            return Err(SerialwireError::RecordAuthFailure(format!(
                "replayed sequence number {}",
                seq
            )));
        }

        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| SerialwireError::RecordAuthFailure("no session keys".into()))?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.recv[..]));
        let nonce = construct_nonce(seq);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: ciphertext,
                    aad: header,
                },
            )
            .map_err(|_| SerialwireError::RecordAuthFailure("authentication tag mismatch".into()))?;

        self.last_recv_seq = Some(seq);
        Ok(plaintext)
    }
}

impl fmt::Debug for PskHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PskHandshake")
            .field("role", &self.role)
            .field("identity", &self.identity)
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("last_recv_seq", &self.last_recv_seq)
            .finish_non_exhaustive()
    }
}

impl HandshakeEngine for PskHandshake {
    fn produce_flight(&mut self) -> Result<Flight> {
        match self.state {
            State::ClientStart => {
                let hello = self.build_client_hello()?;
                self.state = State::AwaitServerHello;
                Ok(Flight::Send(vec![hello]))
            }
            State::SendServerHello => {
                self.state = State::AwaitClientFinished;
                Ok(Flight::Send(vec![Bytes::from(self.server_hello.clone())]))
            }
            State::SendClientFinished => {
                let finished = self.build_client_finished()?;
                self.state = State::Established;
                Ok(Flight::Final(vec![finished]))
            }
            State::AwaitServerHello | State::AwaitClientHello | State::AwaitClientFinished => {
                Ok(Flight::Await)
            }
            State::Established => Ok(Flight::Complete),
        }
    }

    fn consume_flight(&mut self, packet: &[u8]) -> Result<Progress> {
        match self.state {
            State::AwaitServerHello => self.accept_server_hello(packet),
            State::AwaitClientHello => self.accept_client_hello(packet),
            State::AwaitClientFinished => self.accept_client_finished(packet),
            _ => Ok(Progress::NeedMore),
        }
    }

    fn record_overhead(&self) -> usize {
        RECORD_HEADER_LEN + TAG_LEN
    }

    fn seal(&mut self, seq: u64, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.state != State::Established {
            return Err(SerialwireError::Handshake("handshake not complete".into()));
        }
        self.seal_with_type(CONTENT_RECORD, seq, plaintext)
    }

    fn open(&mut self, record: &[u8]) -> Result<Opened> {
        match record.first() {
            Some(&CONTENT_RECORD) => Ok(Opened::Data(Bytes::from(self.open_sealed(record)?))),
            Some(&CONTENT_ALERT) => {
                self.open_sealed(record)?;
                Ok(Opened::CloseNotify)
            }
            Some(&CONTENT_HANDSHAKE) => {
                let repeated_server_hello = self.role == Role::Client
                    && record.get(1) == Some(&SERVER_HELLO)
                    && record == self.server_hello.as_slice();
                if repeated_server_hello {
                    Ok(Opened::HandshakeRetransmit)
                } else {
                    Ok(Opened::Ignore)
                }
            }
            Some(other) => Err(SerialwireError::RecordAuthFailure(format!(
                "unknown content type 0x{:02x}",
                other
            ))),
            None => Err(SerialwireError::RecordAuthFailure("empty record".into())),
        }
    }

    fn close_notify(&mut self, seq: u64) -> Option<Vec<u8>> {
        if self.state != State::Established {
            return None;
        }
        self.seal_with_type(CONTENT_ALERT, seq, &[]).ok()
    }

    fn peer_identity(&self) -> Option<PeerIdentity> {
        if self.state == State::Established {
            self.peer.clone()
        } else {
            None
        }
    }
}

/// Parse a hello message, returning the random and identity.
///
/// `trailer` is the number of bytes expected after the identity.
fn parse_hello(packet: &[u8], kind: u8, trailer: usize) -> Option<([u8; RANDOM_LEN], String)> {
    if packet.len() < 2 + RANDOM_LEN + 1 + trailer || packet[..2] != [CONTENT_HANDSHAKE, kind] {
        return None;
    }

    let mut random = [0u8; RANDOM_LEN];
    random.copy_from_slice(&packet[2..2 + RANDOM_LEN]);

    let id_len = packet[2 + RANDOM_LEN] as usize;
    let id_start = 2 + RANDOM_LEN + 1;
    if packet.len() != id_start + id_len + trailer {
        return None;
    }

    let identity = String::from_utf8_lossy(&packet[id_start..id_start + id_len]).into_owned();
    Some((random, identity))
}

fn derive_keys(
    psk: &[u8],
    client_random: &[u8; RANDOM_LEN],
    server_random: &[u8; RANDOM_LEN],
    role: Role,
) -> Result<Keys> {
    let mut salt = Vec::with_capacity(2 * RANDOM_LEN);
    salt.extend_from_slice(client_random);
    salt.extend_from_slice(server_random);

    let hk = Hkdf::<Sha256>::new(Some(&salt), psk);
    let expand = |info: &[u8]| -> Result<Zeroizing<[u8; 32]>> {
        let mut okm = Zeroizing::new([0u8; 32]);
        hk.expand(info, &mut okm[..])
            .map_err(|_| SerialwireError::Handshake("HKDF expansion failed".into()))?;
        Ok(okm)
    };

    let c2s = expand(b"serialwire c2s")?;
    let s2c = expand(b"serialwire s2c")?;
    let finished = expand(b"serialwire finished")?;

    Ok(match role {
        Role::Client => Keys {
            send: c2s,
            recv: s2c,
            finished,
        },
        Role::Server => Keys {
            send: s2c,
            recv: c2s,
            finished,
        },
    })
}

fn finished_mac(key: &[u8], label: &[u8], transcript: &[&[u8]]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| SerialwireError::Handshake("invalid MAC key".into()))?;
    mac.update(label);
    for part in transcript {
        mac.update(part);
    }
    Ok(mac)
}

/// 12-byte AEAD nonce: four zero bytes, then the record sequence number
/// little-endian.
fn construct_nonce(seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[4..].copy_from_slice(&seq.to_le_bytes());
    nonce
}

fn random_bytes_32() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes
}
