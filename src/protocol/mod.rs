//! Protocol module - Decodes the DSI streamer wire protocol
//!
//! Every packet starts with a fixed 12-byte header:
//! - 5 bytes marker (`@ABCD`)
//! - 1 byte packet type
//! - 2 bytes payload length (big-endian)
//! - 4 bytes sequence number (big-endian)
//!
//! followed by a type-specific payload.

mod codec;
mod packet;

pub use codec::*;
pub use packet::*;

/// Default port of the DSI streamer
pub const DEFAULT_PORT: u16 = 8844;

/// Default address of the DSI streamer
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Marker that opens every packet
pub const MARKER: [u8; 5] = *b"@ABCD";

/// Header size: marker(5) + type(1) + length(2) + sequence(4) = 12 bytes
pub const HEADER_SIZE: usize = 12;

/// Size of the filler carried by NULL packets
pub const NULL_FILLER_SIZE: usize = 111;

/// Fixed part of an EEG_DATA payload: timestamp(4) + counter(1) + status(6)
pub const EEG_FIXED_SIZE: usize = 11;

/// Fixed part of an EVENT payload: code(4) + sending node(4)
pub const EVENT_FIXED_SIZE: usize = 8;

/// Streamer versions the packet layout has been checked against
pub const KNOWN_STREAMER_VERSIONS: [&str; 3] = [
    "DSI-Streamer-v.0.7.15",
    "DSI-Streamer-v.0.7.20",
    "DSI-Streamer-v.0.7.28",
];
