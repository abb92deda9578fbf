//! The client facade: a `Connection` plus everything that's specific to
//! speaking this protocol over it — protocol state, the packet parser, and
//! the optional cipher once login completes.
//!
//! Decryption happens exactly once, as bytes arrive off the wire, straight
//! into one persistent plaintext buffer the parser reads from. That sidesteps
//! the original's `packet_in_progress`/`packet_encrypted` bookkeeping for a
//! packet that started before encryption turned on mid-stream: because
//! nothing here ever re-decrypts already-buffered bytes, a frame that began
//! arriving in plaintext stays correctly reassembled in plaintext even if
//! encryption is enabled partway through it.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::cipher::Cipher;
use crate::connection::{Connection, SendHandle};
use crate::error::Error;
use crate::packet::PacketParser;
use crate::protocol::{ProtocolDirection, ProtocolState};
use crate::registry::Packet;
use crate::varint::write_uvarint;

/// Formats a single byte as `0xHH`, for protocol-analysis trace logging.
fn byte_format(b: u8) -> String {
    format!("0x{b:02x}")
}

/// Hex-dumps `buf`, one `byte_format`ed byte per entry, eight to a line.
fn buffer_format(buf: &[u8]) -> String {
    let mut out = String::with_capacity(buf.len() * 5);
    for (i, b) in buf.iter().enumerate() {
        if i != 0 {
            out.push(if i % 8 == 0 { '\n' } else { ' ' });
        }
        out.push_str(&byte_format(*b));
    }
    out
}

struct CipherState<C> {
    protocol_state: ProtocolState,
    cipher: Option<Arc<Mutex<C>>>,
}

struct RecvState {
    parser: PacketParser,
    buf: BytesMut,
}

/// A connected client speaking this protocol. `C` is the concrete cipher
/// implementation installed once login negotiates a shared secret.
pub struct Client<C: Cipher> {
    conn: Arc<Connection>,
    cipher_state: RwLock<CipherState<C>>,
    recv: Mutex<RecvState>,
    username: Mutex<Option<String>>,
    connected_at: DateTime<Utc>,
    last_active: Mutex<Instant>,
    ping_ms: AtomicU32,
    protocol_analysis: bool,
}

impl<C: Cipher> Client<C> {
    pub fn new(conn: Arc<Connection>) -> Self {
        Self::with_protocol_analysis(conn, false)
    }

    pub fn with_protocol_analysis(conn: Arc<Connection>, protocol_analysis: bool) -> Self {
        Client {
            conn,
            cipher_state: RwLock::new(CipherState { protocol_state: ProtocolState::Handshaking, cipher: None }),
            recv: Mutex::new(RecvState { parser: PacketParser::new(), buf: BytesMut::new() }),
            username: Mutex::new(None),
            connected_at: Utc::now(),
            last_active: Mutex::new(Instant::now()),
            ping_ms: AtomicU32::new(0),
            protocol_analysis,
        }
    }

    pub fn protocol_state(&self) -> ProtocolState {
        self.cipher_state.read().protocol_state
    }

    pub fn set_state(&self, state: ProtocolState) {
        self.cipher_state.write().protocol_state = state;
    }

    fn frame(packet: &Packet) -> BytesMut {
        let mut body = BytesMut::new();
        packet.encode_body(&mut body);
        let mut frame = BytesMut::with_capacity(body.len() + 5);
        write_uvarint(body.len() as u32, &mut frame);
        frame.extend_from_slice(&body);
        frame
    }

    fn send_frame(&self, packet: &Packet, cipher: Option<Arc<Mutex<C>>>) -> SendHandle {
        let frame = Self::frame(packet);
        if self.protocol_analysis {
            log::trace!(
                "{}:{} <== server - packet id {}\n{}",
                self.ip(),
                self.port(),
                byte_format(packet.id() as u8),
                buffer_format(&frame)
            );
        }
        match cipher {
            Some(cipher) => {
                let mut data = frame.to_vec();
                cipher.lock().encrypt(&mut data);
                self.conn.send(Bytes::from(data))
            }
            None => self.conn.send(frame.freeze()),
        }
    }

    /// Sends `packet`, encrypted if a cipher is installed.
    pub fn send(&self, packet: &Packet) -> SendHandle {
        let cipher = self.cipher_state.read().cipher.clone();
        self.send_frame(packet, cipher)
    }

    /// Sends `packet`, then installs the cipher keyed with `key`.
    ///
    /// Idempotent: if a cipher is already installed, this is equivalent to
    /// an ordinary [`Client::send`] — the spurious re-enable request is
    /// ignored rather than re-keying mid-session.
    pub fn send_then_enable_encryption(&self, packet: &Packet, key: &[u8; 16]) -> SendHandle {
        let mut guard = self.cipher_state.write();
        if guard.cipher.is_some() {
            let cipher = guard.cipher.clone();
            drop(guard);
            return self.send_frame(packet, cipher);
        }
        let handle = self.send_frame(packet, None);
        guard.cipher = Some(Arc::new(Mutex::new(C::new(key))));
        handle
    }

    /// Feeds freshly-arrived bytes in, decrypting them (if a cipher is
    /// installed) exactly once, and returns every packet that's now fully
    /// buffered. Leftover partial bytes stay queued for the next call.
    pub fn receive(&self, incoming: &[u8]) -> Result<Vec<Packet>, Error> {
        if incoming.is_empty() {
            return Ok(Vec::new());
        }
        self.touch();

        let cipher = self.cipher_state.read().cipher.clone();
        let mut recv = self.recv.lock();
        match cipher {
            Some(cipher) => cipher.lock().decrypt(incoming, &mut recv.buf),
            None => recv.buf.extend_from_slice(incoming),
        }

        let state = self.protocol_state();
        let mut packets = Vec::new();
        loop {
            match recv.parser.poll(&mut recv.buf, state, ProtocolDirection::Serverbound)? {
                Some(packet) => {
                    if self.protocol_analysis {
                        let frame = Self::frame(&packet);
                        log::trace!(
                            "{}:{} ==> server - packet id {}\n{}",
                            self.ip(),
                            self.port(),
                            byte_format(packet.id() as u8),
                            buffer_format(&frame)
                        );
                    }
                    packets.push(packet);
                }
                None => break,
            }
        }
        Ok(packets)
    }

    pub fn disconnect(&self) {
        self.conn.disconnect();
    }

    pub fn disconnect_with_reason(&self, reason: impl Into<String>) {
        self.conn.disconnect_with_reason(reason);
    }

    pub fn ip(&self) -> IpAddr {
        self.conn.ip()
    }

    pub fn port(&self) -> u16 {
        self.conn.port()
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    pub fn set_username(&self, username: impl Into<String>) {
        *self.username.lock() = Some(username.into());
    }

    pub fn username(&self) -> Option<String> {
        self.username.lock().clone()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Resets the inactivity timer. Called automatically on every
    /// `receive`; callers may also call it directly on any other activity
    /// (e.g. a keep-alive response).
    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    pub fn set_ping_ms(&self, ping_ms: u32) {
        self.ping_ms.store(ping_ms, Ordering::Relaxed);
    }

    pub fn ping_ms(&self) -> u32 {
        self.ping_ms.load(Ordering::Relaxed)
    }
}
