use std::fmt;
use std::io;

/// Everything that can go wrong while framing, decoding, or shipping a packet.
///
/// `InsufficientBytes` is only ever constructed inside the codec layer, where
/// it means "this value's encoding is truncated" rather than "the outer frame
/// isn't fully buffered yet" — the parser treats the latter as a normal
/// not-ready-yet condition and never turns it into this variant.
#[derive(Debug)]
pub enum Error {
    /// A value's encoding ran past the end of the buffer it was read from.
    InsufficientBytes,
    /// The bytes present don't decode to a valid value of the expected shape
    /// (overlong VarInt, invalid UTF-8, unknown protocol state byte,
    /// negative array length, ...).
    BadFormat(String),
    /// A packet id has no registered shape for the current state/direction.
    BadPacketId { state: String, direction: String, id: i32 },
    /// The underlying socket failed.
    Socket(io::Error),
    /// The operation was cancelled because the connection shut down first.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InsufficientBytes => write!(f, "insufficient bytes to decode value"),
            Error::BadFormat(msg) => write!(f, "bad format: {msg}"),
            Error::BadPacketId { state, direction, id } => {
                write!(f, "no packet registered for state={state} direction={direction} id={id:#x}")
            }
            Error::Socket(e) => write!(f, "socket error: {e}"),
            Error::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Socket(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Socket(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
