//! Network and protocol core: TCP connection lifecycle, a length-prefixed
//! VarInt-framed packet protocol, a cipher bridge, and the per-client
//! protocol state machine.

pub mod cipher;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod packet;
pub mod protocol;
pub mod registry;
pub mod varint;

pub use cipher::{Aes128Cfb8Cipher, Cipher};
pub use client::Client;
pub use config::Config;
pub use connection::{Connection, ConnectionId, SendHandle, SendState};
pub use error::Error;
pub use handler::{Callbacks, ConnectionHandler};
pub use packet::PacketParser;
pub use protocol::{ProtocolDirection, ProtocolState};
pub use registry::Packet;
