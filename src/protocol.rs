use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub type EntityId = u32;
pub type Sequence = u64;
pub type FieldMask = u16;

/// Base sequence carried by packets that need no prior state to decode.
pub const FULL_BASE_SEQUENCE: i64 = -1;

pub const POS_X: FieldMask = 1 << 0;
pub const POS_Y: FieldMask = 1 << 1;
pub const POS_Z: FieldMask = 1 << 2;
pub const ROT_X: FieldMask = 1 << 3;
pub const ROT_Y: FieldMask = 1 << 4;
pub const ROT_Z: FieldMask = 1 << 5;
pub const ROT_W: FieldMask = 1 << 6;
pub const VEL_X: FieldMask = 1 << 7;
pub const VEL_Y: FieldMask = 1 << 8;
pub const VEL_Z: FieldMask = 1 << 9;
pub const STATE: FieldMask = 1 << 10;

pub const POSITION_BITS: [FieldMask; 3] = [POS_X, POS_Y, POS_Z];
pub const ROTATION_BITS: [FieldMask; 4] = [ROT_X, ROT_Y, ROT_Z, ROT_W];
pub const VELOCITY_BITS: [FieldMask; 3] = [VEL_X, VEL_Y, VEL_Z];

pub const FULL_FIELD_MASK: FieldMask = 0x7FF;

/// Frame header: entity id, sequence, base sequence, field mask, payload length.
pub const FRAME_HEADER_SIZE: usize = 4 + 8 + 8 + 2 + 2;

/// Position and velocity as i32, rotation as i16, state as u8.
pub const FULL_PAYLOAD_SIZE: usize = 3 * 4 + 4 * 2 + 3 * 4 + 1;

pub const FULL_FRAME_SIZE: usize = FRAME_HEADER_SIZE + FULL_PAYLOAD_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketKind {
    Full = 0,
    Delta = 1,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub entity_id: EntityId,
    pub sequence: Sequence,
    pub base_sequence: i64,
    pub field_mask: FieldMask,
    pub payload: Bytes,
}

impl Packet {
    pub fn full(entity_id: EntityId, sequence: Sequence, payload: Bytes) -> Self {
        Self {
            entity_id,
            sequence,
            base_sequence: FULL_BASE_SEQUENCE,
            field_mask: FULL_FIELD_MASK,
            payload,
        }
    }

    pub fn delta(
        entity_id: EntityId,
        sequence: Sequence,
        base_sequence: Sequence,
        field_mask: FieldMask,
        payload: Bytes,
    ) -> Self {
        Self {
            entity_id,
            sequence,
            base_sequence: base_sequence as i64,
            field_mask,
            payload,
        }
    }

    pub fn kind(&self) -> PacketKind {
        if self.base_sequence == FULL_BASE_SEQUENCE {
            PacketKind::Full
        } else {
            PacketKind::Delta
        }
    }

    pub fn is_full(&self) -> bool {
        self.kind() == PacketKind::Full
    }

    /// The delta base, or `None` for full packets.
    ///
    /// Negative values other than the full sentinel have no base either.
    pub fn base(&self) -> Option<Sequence> {
        if self.base_sequence == FULL_BASE_SEQUENCE {
            None
        } else {
            Sequence::try_from(self.base_sequence).ok()
        }
    }

    pub fn has_field(&self, bit: FieldMask) -> bool {
        self.field_mask & bit != 0
    }

    pub fn frame_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

/// Payload length a delta packet with `mask` must carry.
///
/// Every position, rotation and velocity bit contributes an i16; the state bit
/// contributes a single byte.
pub fn delta_payload_size(mask: FieldMask) -> usize {
    let wide = (mask & !STATE & FULL_FIELD_MASK).count_ones() as usize;
    let state = usize::from(mask & STATE != 0);
    wide * 2 + state
}

pub fn is_valid_mask(mask: FieldMask) -> bool {
    mask & !FULL_FIELD_MASK == 0
}
