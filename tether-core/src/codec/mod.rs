//! Framed TCP codec for [`Packet`]s via `tokio_util`.

use tokio_util::codec::{Decoder, Encoder};

use crate::error::TetherError;
use crate::header::{PacketHeader, HEADER_SIZE};
use crate::packet::{Packet, MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};

/// Length-delimited codec: fixed header, then `payload_length` bytes.
#[derive(Debug, Default)]
pub struct TetherCodec;

impl Decoder for TetherCodec {
    type Item = Packet;
    type Error = TetherError;

    fn decode(&mut self, src: &mut bytes::BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() > MAX_FRAME_SIZE {
            return Err(TetherError::FrameTooLarge {
                size: src.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header_bytes: [u8; HEADER_SIZE] =
            src[..HEADER_SIZE].try_into().expect("header-sized slice");
        let header = PacketHeader::from_bytes(&header_bytes)?;

        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(TetherError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }
        if src.len() < HEADER_SIZE + payload_len {
            // Wait for the rest of the frame.
            src.reserve(HEADER_SIZE + payload_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(HEADER_SIZE + payload_len);
        let payload = frame[HEADER_SIZE..].to_vec();
        Ok(Some(Packet::from_parts(header, payload)?))
    }
}

impl Encoder<Packet> for TetherCodec {
    type Error = TetherError;

    fn encode(&mut self, item: Packet, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item.to_bytes());
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use bytes::BytesMut;

    #[test]
    fn encode_decode_roundtrip() {
        let msg = Message::StartSession;
        let packet = Packet::from_message(&msg).unwrap();

        let mut codec = TetherCodec;
        let mut buf = BytesMut::new();
        codec.encode(packet, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.into_message().unwrap(), msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_yields_none() {
        let msg = Message::Ping { timestamp_ms: 1 };
        let packet = Packet::from_message(&msg).unwrap();

        let mut codec = TetherCodec;
        let mut full = BytesMut::new();
        codec.encode(packet, &mut full).unwrap();

        // Feed only the first half of the frame.
        let half = full.len() / 2;
        let mut partial = BytesMut::from(&full[..half]);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn two_frames_back_to_back() {
        let mut codec = TetherCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::from_message(&Message::StartSession).unwrap(), &mut buf)
            .unwrap();
        codec
            .encode(
                Packet::from_message(&Message::WillDisconnect).unwrap(),
                &mut buf,
            )
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.into_message().unwrap(), Message::StartSession);
        assert_eq!(second.into_message().unwrap(), Message::WillDisconnect);
    }

    #[test]
    fn bad_magic_is_an_error() {
        let mut buf = BytesMut::from(&[0u8; HEADER_SIZE][..]);
        let mut codec = TetherCodec;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(TetherError::InvalidMagic)
        ));
    }
}
