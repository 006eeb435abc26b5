//! Fixed-size packet header.
//!
//! Every wire frame starts with this header, followed by a
//! bincode-encoded [`Message`](crate::message::Message) payload.
//!
//! Layout (little-endian, 24 bytes):
//!
//! ```text
//! magic:          u32  (4)   b"TTH0"
//! checksum:       u32  (4)   first 4 bytes of blake3(payload), 0 if empty
//! flags:          u64  (8)   ProtocolFlags bits
//! payload_length: u64  (8)
//! ```

use crate::error::TetherError;
use crate::flags::ProtocolFlags;

/// Magic bytes identifying a tether frame.
pub const MAGIC: [u8; 4] = *b"TTH0";

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 24;

/// The fixed wire header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Truncated blake3 checksum of the payload (0 for empty payloads).
    pub checksum: u32,
    /// Protocol flags.
    pub flags: ProtocolFlags,
    /// Payload length in bytes.
    pub payload_length: u64,
}

impl PacketHeader {
    /// Create a header for a payload of `payload_length` bytes.
    pub fn new(checksum: u32, flags: ProtocolFlags, payload_length: u64) -> Self {
        Self {
            checksum,
            flags,
            payload_length,
        }
    }

    /// Serialize to bytes (little-endian).
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf[8..16].copy_from_slice(&self.flags.bits().to_le_bytes());
        buf[16..24].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Deserialize from bytes, validating magic and flag bits.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Result<Self, TetherError> {
        if bytes[0..4] != MAGIC {
            return Err(TetherError::InvalidMagic);
        }

        let checksum = u32::from_le_bytes(bytes[4..8].try_into().expect("4-byte slice"));
        let flag_bits = u64::from_le_bytes(bytes[8..16].try_into().expect("8-byte slice"));
        let payload_length = u64::from_le_bytes(bytes[16..24].try_into().expect("8-byte slice"));

        let flags = ProtocolFlags::from_bits(flag_bits).ok_or(TetherError::UnknownVariant {
            type_name: "ProtocolFlags",
            value: flag_bits,
        })?;

        Ok(Self {
            checksum,
            flags,
            payload_length,
        })
    }
}
