//! A framed packet: fixed header + bincode message payload.

use crate::error::TetherError;
use crate::header::{PacketHeader, HEADER_SIZE};
use crate::message::Message;

/// Maximum payload size (16 MiB) — comfortably above the largest
/// key-unit payload at full quality.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Maximum total frame size.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE;

/// One wire frame.
#[derive(Debug, Clone)]
pub struct Packet {
    header: PacketHeader,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet from a [`Message`].
    pub fn from_message(message: &Message) -> Result<Self, TetherError> {
        let payload = message.to_bytes()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TetherError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let checksum = if payload.is_empty() {
            0
        } else {
            truncated_checksum(&payload)
        };
        let header = PacketHeader::new(checksum, message.flags(), payload.len() as u64);

        Ok(Self { header, payload })
    }

    /// Decode the payload back into a [`Message`], verifying the
    /// checksum first.
    pub fn into_message(self) -> Result<Message, TetherError> {
        if !self.payload.is_empty() && truncated_checksum(&self.payload) != self.header.checksum {
            return Err(TetherError::ChecksumMismatch);
        }
        Message::from_bytes(&self.payload)
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Reassemble a packet from a raw header and payload bytes.
    ///
    /// Used by the codec; length consistency is the codec's job, size
    /// and checksum limits are enforced here.
    pub fn from_parts(header: PacketHeader, payload: Vec<u8>) -> Result<Self, TetherError> {
        if payload.len() as u64 != header.payload_length {
            return Err(TetherError::ProtocolViolation(
                "payload length does not match header",
            ));
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TetherError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { header, payload })
    }

    /// Serialize header + payload for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

/// First 4 bytes of the blake3 hash, little-endian.
fn truncated_checksum(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    u32::from_le_bytes(hash.as_bytes()[0..4].try_into().expect("4-byte slice"))
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_packet_roundtrip() {
        let msg = Message::Ping { timestamp_ms: 77 };
        let packet = Packet::from_message(&msg).unwrap();
        assert_eq!(
            packet.header().payload_length as usize,
            packet.payload().len()
        );
        assert_eq!(packet.into_message().unwrap(), msg);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let msg = Message::Ping { timestamp_ms: 77 };
        let mut packet = Packet::from_message(&msg).unwrap();
        packet.payload[0] ^= 0xFF;
        assert!(matches!(
            packet.into_message(),
            Err(TetherError::ChecksumMismatch)
        ));
    }

    #[test]
    fn from_parts_validates_length() {
        let header = PacketHeader::new(0, crate::flags::ProtocolFlags::empty(), 10);
        assert!(matches!(
            Packet::from_parts(header, vec![0; 4]),
            Err(TetherError::ProtocolViolation(_))
        ));
    }
}
