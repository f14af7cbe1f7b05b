use crate::error::DecodeError;
use crate::protocol::*;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Frames packets for the transport.
///
/// Layout, little-endian: `entity_id: u32`, `sequence: u64`,
/// `base_sequence: i64`, `field_mask: u16`, `payload_len: u16`, then the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketSerializer;

impl PacketSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Write `packet` into `buf` and split the frame off as `Bytes`.
    ///
    /// Reusing one `buf` across calls keeps allocation off the send path once
    /// the previously returned frames have been dropped.
    pub fn serialize_packet(&self, packet: &Packet, buf: &mut BytesMut) -> Bytes {
        buf.clear();
        buf.reserve(packet.frame_size());
        buf.put_u32_le(packet.entity_id);
        buf.put_u64_le(packet.sequence);
        buf.put_i64_le(packet.base_sequence);
        buf.put_u16_le(packet.field_mask);
        buf.put_u16_le(packet.payload.len() as u16);
        buf.put_slice(&packet.payload);
        buf.split().freeze()
    }

    /// Parse a frame. The payload is a zero-copy slice of `frame`.
    pub fn deserialize_packet(&self, frame: Bytes) -> Result<Packet, DecodeError> {
        if frame.len() < FRAME_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: FRAME_HEADER_SIZE,
                available: frame.len(),
            });
        }

        let mut header = &frame[..FRAME_HEADER_SIZE];
        let entity_id = header.get_u32_le();
        let sequence = header.get_u64_le();
        let base_sequence = header.get_i64_le();
        let field_mask = header.get_u16_le();
        let payload_len = header.get_u16_le() as usize;

        if base_sequence < FULL_BASE_SEQUENCE {
            return Err(DecodeError::InvalidBase(base_sequence));
        }

        let actual = frame.len() - FRAME_HEADER_SIZE;
        if payload_len != actual {
            return Err(DecodeError::Malformed {
                expected: payload_len,
                actual,
            });
        }
        if !is_valid_mask(field_mask) {
            return Err(DecodeError::InvalidMask(field_mask));
        }

        Ok(Packet {
            entity_id,
            sequence,
            base_sequence,
            field_mask,
            payload: frame.slice(FRAME_HEADER_SIZE..),
        })
    }
}
