//! Non-destructive length-prefix framing over the packet registry.
//!
//! The wire frame is `uvarint length || body`, where `body` is `varint id
//! || fields` and `length` counts exactly the bytes of `body`. Framing only
//! ever reports "not enough bytes yet" at the outermost boundary (the frame
//! length itself, or the body not being fully buffered); once a full body
//! is in hand, any decode failure inside it — including running out of
//! bytes mid-field — is a fatal `BadFormat`, per the parser's contract.

use bytes::{Buf, BytesMut};

use crate::error::Error;
use crate::protocol::{ProtocolDirection, ProtocolState};
use crate::registry::Packet;
use crate::varint::read_uvarint;

/// Stateless with respect to buffered data: callers own the `BytesMut` and
/// re-poll it as more bytes arrive. `state`/`direction` tell the registry
/// which table to look the packet id up in.
#[derive(Debug, Default)]
pub struct PacketParser;

impl PacketParser {
    pub fn new() -> Self {
        PacketParser
    }

    /// Attempts to parse one complete packet off the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched if a full frame isn't
    /// buffered yet. Returns `Ok(Some(packet))` and advances `buf` past the
    /// consumed frame on success. Returns `Err` (and does not advance
    /// `buf`) on a malformed frame or packet body — the caller should treat
    /// this as fatal and disconnect.
    pub fn poll(
        &mut self,
        buf: &mut BytesMut,
        state: ProtocolState,
        direction: ProtocolDirection,
    ) -> Result<Option<Packet>, Error> {
        let mut cursor: &[u8] = buf;
        let before = cursor.len();

        let length = match read_uvarint(&mut cursor) {
            Ok(length) => length,
            Err(Error::InsufficientBytes) => return Ok(None),
            Err(e) => return Err(e),
        };
        let header_len = before - cursor.len();
        let length = length as usize;

        if cursor.len() < length {
            return Ok(None);
        }

        let body = &cursor[..length];
        let mut body_cursor = body;
        let packet = match Packet::decode_body(state, direction, &mut body_cursor) {
            Ok(packet) => packet,
            Err(Error::InsufficientBytes) => {
                return Err(Error::BadFormat("packet body truncated within its declared length".into()))
            }
            Err(e) => return Err(e),
        };
        if !body_cursor.is_empty() {
            return Err(Error::BadFormat(format!(
                "packet body had {} trailing unconsumed bytes",
                body_cursor.len()
            )));
        }

        buf.advance(header_len + length);
        Ok(Some(packet))
    }
}
