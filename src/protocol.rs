//! The per-client protocol state machine and packet direction.

use bytes::BytesMut;

use crate::codec::Codec;
use crate::codec::VarInt;
use crate::error::Error;

/// Which phase of the protocol a client is currently speaking.
///
/// A fresh connection always starts in `Handshaking`. From there the only
/// legal transitions are `Handshaking -> Status`, `Handshaking -> Login`,
/// and `Login -> Play`; anything else is a programming error in the caller,
/// not a wire-level condition, so it is not represented as an `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    Handshaking,
    Status,
    Login,
    Play,
}

impl ProtocolState {
    /// Decodes the `next_state` field of the handshake packet: `1` selects
    /// `Status`, `2` selects `Login`. Any other value is a malformed
    /// handshake.
    pub fn from_wire(byte: i32) -> Result<Self, Error> {
        match byte {
            1 => Ok(ProtocolState::Status),
            2 => Ok(ProtocolState::Login),
            other => Err(Error::BadFormat(format!("unknown protocol state byte {other}"))),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            ProtocolState::Status => 1,
            ProtocolState::Login => 2,
            // Handshaking/Play never appear on the wire as a next_state value.
            ProtocolState::Handshaking => 0,
            ProtocolState::Play => 3,
        }
    }
}

/// Which side of the connection a packet travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolDirection {
    Clientbound,
    Serverbound,
    /// Registered for both directions under the same id and shape.
    Both,
}

impl ProtocolDirection {
    /// Whether a packet registered under `self` may be read/written by a
    /// connection acting as `actual`.
    pub fn matches(self, actual: ProtocolDirection) -> bool {
        self == ProtocolDirection::Both || self == actual
    }
}

impl Codec for ProtocolState {
    fn encode(&self, out: &mut BytesMut) {
        VarInt(self.to_wire()).encode(out);
    }

    fn decode(buf: &mut &[u8]) -> Result<Self, Error> {
        let VarInt(v) = VarInt::decode(buf)?;
        ProtocolState::from_wire(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_state_byte_mapping() {
        assert_eq!(ProtocolState::from_wire(1).unwrap(), ProtocolState::Status);
        assert_eq!(ProtocolState::from_wire(2).unwrap(), ProtocolState::Login);
        assert!(ProtocolState::from_wire(3).is_err());
    }

    #[test]
    fn both_direction_matches_either_side() {
        assert!(ProtocolDirection::Both.matches(ProtocolDirection::Clientbound));
        assert!(ProtocolDirection::Both.matches(ProtocolDirection::Serverbound));
        assert!(!ProtocolDirection::Clientbound.matches(ProtocolDirection::Serverbound));
    }
}
