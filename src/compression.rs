use crate::error::{DecodeError, EncodeError};
use crate::protocol::*;
use crate::snapshot::{Snapshot, SnapshotStore};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

const POSITION_FIELDS: [&str; 3] = ["position.x", "position.y", "position.z"];
const VELOCITY_FIELDS: [&str; 3] = ["velocity.x", "velocity.y", "velocity.z"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub pos_threshold: f32,
    pub rot_threshold: f32,
    pub vel_threshold: f32,
    pub quant_scale: f32,
    pub rot_scale: f32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            pos_threshold: 0.01,
            rot_threshold: 0.001,
            vel_threshold: 0.1,
            quant_scale: 1000.0,
            rot_scale: 32767.0,
        }
    }
}

impl CodecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(mut self, position: f32, rotation: f32, velocity: f32) -> Self {
        self.pos_threshold = position;
        self.rot_threshold = rotation;
        self.vel_threshold = velocity;
        self
    }

    pub fn with_quant_scale(mut self, scale: f32) -> Self {
        self.quant_scale = scale;
        self
    }

    pub fn with_rot_scale(mut self, scale: f32) -> Self {
        self.rot_scale = scale;
        self
    }

    /// Largest magnitude a quantized i16 can carry at `quant_scale`.
    pub fn max_encodable_delta(&self) -> f32 {
        i16::MAX as f32 / self.quant_scale
    }
}

fn quantize_i16(value: f32, scale: f32) -> i16 {
    (value * scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn quantize_i32(value: f32, scale: f32) -> i32 {
    // Float to int casts saturate, so out-of-range world coordinates clamp.
    (value * scale).round() as i32
}

/// Quantized field-mask codec for entity motion snapshots.
///
/// Full packets carry every field with position and velocity as i32. Delta
/// packets carry only the fields whose change exceeds the configured threshold,
/// in bit order: position deltas, absolute rotation components, absolute
/// velocity components, then the state byte.
#[derive(Debug, Clone, Default)]
pub struct DeltaCodec {
    config: CodecConfig,
}

impl DeltaCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Encode `curr` against `base`, falling back to a full packet when there
    /// is no base or a delta would overflow. Returns `None` when nothing
    /// changed enough to be worth sending.
    pub fn encode(
        &self,
        entity_id: EntityId,
        base: Option<&Snapshot>,
        curr: &Snapshot,
        buf: &mut BytesMut,
    ) -> Option<Packet> {
        let Some(base) = base else {
            return Some(self.encode_full(entity_id, curr, buf));
        };

        match self.encode_delta(entity_id, base, curr, buf) {
            Ok(packet) => packet,
            Err(err) => {
                tracing::trace!(entity_id, sequence = curr.sequence, %err, "delta overflow, sending full");
                Some(self.encode_full(entity_id, curr, buf))
            }
        }
    }

    pub fn encode_delta(
        &self,
        entity_id: EntityId,
        base: &Snapshot,
        curr: &Snapshot,
        buf: &mut BytesMut,
    ) -> Result<Option<Packet>, EncodeError> {
        let config = &self.config;
        let max_delta = config.max_encodable_delta();
        let mut mask: FieldMask = 0;

        let mut position = [0i16; 3];
        for i in 0..3 {
            let delta = curr.position[i] - base.position[i];
            if delta.abs() > max_delta {
                return Err(EncodeError::Overflow { field: POSITION_FIELDS[i], value: delta });
            }
            if delta.abs() > config.pos_threshold {
                mask |= POSITION_BITS[i];
                position[i] = quantize_i16(delta, config.quant_scale);
            }
        }

        let mut rotation = [0i16; 4];
        for i in 0..4 {
            if (curr.rotation[i] - base.rotation[i]).abs() > config.rot_threshold {
                mask |= ROTATION_BITS[i];
                rotation[i] = quantize_i16(curr.rotation[i], config.rot_scale);
            }
        }

        let mut velocity = [0i16; 3];
        for i in 0..3 {
            let delta = curr.velocity[i] - base.velocity[i];
            if delta.abs() > max_delta {
                return Err(EncodeError::Overflow { field: VELOCITY_FIELDS[i], value: delta });
            }
            if curr.velocity[i].abs() > max_delta {
                return Err(EncodeError::Overflow { field: VELOCITY_FIELDS[i], value: curr.velocity[i] });
            }
            if delta.abs() > config.vel_threshold {
                mask |= VELOCITY_BITS[i];
                velocity[i] = quantize_i16(curr.velocity[i], config.quant_scale);
            }
        }

        if curr.state != base.state {
            mask |= STATE;
        }

        if mask == 0 {
            return Ok(None);
        }

        buf.clear();
        buf.reserve(delta_payload_size(mask));
        for (i, bit) in POSITION_BITS.iter().enumerate() {
            if mask & bit != 0 {
                buf.put_i16_le(position[i]);
            }
        }
        for (i, bit) in ROTATION_BITS.iter().enumerate() {
            if mask & bit != 0 {
                buf.put_i16_le(rotation[i]);
            }
        }
        for (i, bit) in VELOCITY_BITS.iter().enumerate() {
            if mask & bit != 0 {
                buf.put_i16_le(velocity[i]);
            }
        }
        if mask & STATE != 0 {
            buf.put_u8(curr.state);
        }

        Ok(Some(Packet::delta(
            entity_id,
            curr.sequence,
            base.sequence,
            mask,
            buf.split().freeze(),
        )))
    }

    pub fn encode_full(&self, entity_id: EntityId, curr: &Snapshot, buf: &mut BytesMut) -> Packet {
        let config = &self.config;

        buf.clear();
        buf.reserve(FULL_PAYLOAD_SIZE);
        for value in curr.position {
            buf.put_i32_le(quantize_i32(value, config.quant_scale));
        }
        for value in curr.rotation {
            buf.put_i16_le(quantize_i16(value, config.rot_scale));
        }
        for value in curr.velocity {
            buf.put_i32_le(quantize_i32(value, config.quant_scale));
        }
        buf.put_u8(curr.state);

        Packet::full(entity_id, curr.sequence, buf.split().freeze())
    }

    /// Decode a packet, looking up its delta base in `store`.
    ///
    /// The returned snapshot carries the packet's sequence. Its timestamp is
    /// the base's for deltas and zero for full packets; receivers stamp
    /// arrival time themselves.
    pub fn decode(&self, packet: &Packet, store: &SnapshotStore) -> Result<Snapshot, DecodeError> {
        if packet.is_full() {
            return self.decode_full(packet);
        }
        let base_sequence = packet
            .base()
            .ok_or(DecodeError::InvalidBase(packet.base_sequence))?;
        let base = store
            .find_by_sequence(base_sequence)
            .ok_or(DecodeError::MissingBase(base_sequence))?;
        self.apply_delta(packet, base)
    }

    /// Decode against an explicitly supplied base instead of a store lookup.
    pub fn reconstruct(&self, packet: &Packet, base: Option<&Snapshot>) -> Result<Snapshot, DecodeError> {
        if packet.is_full() {
            return self.decode_full(packet);
        }
        let base_sequence = packet
            .base()
            .ok_or(DecodeError::InvalidBase(packet.base_sequence))?;
        match base {
            Some(base) if base.sequence == base_sequence => self.apply_delta(packet, base),
            _ => Err(DecodeError::MissingBase(base_sequence)),
        }
    }

    fn decode_full(&self, packet: &Packet) -> Result<Snapshot, DecodeError> {
        if packet.field_mask != FULL_FIELD_MASK {
            return Err(DecodeError::InvalidMask(packet.field_mask));
        }
        if packet.payload.len() != FULL_PAYLOAD_SIZE {
            return Err(DecodeError::Malformed {
                expected: FULL_PAYLOAD_SIZE,
                actual: packet.payload.len(),
            });
        }

        let config = &self.config;
        let mut payload = &packet.payload[..];
        let mut snapshot = Snapshot {
            sequence: packet.sequence,
            ..Snapshot::default()
        };

        for value in snapshot.position.iter_mut() {
            *value = payload.get_i32_le() as f32 / config.quant_scale;
        }
        for value in snapshot.rotation.iter_mut() {
            *value = payload.get_i16_le() as f32 / config.rot_scale;
        }
        for value in snapshot.velocity.iter_mut() {
            *value = payload.get_i32_le() as f32 / config.quant_scale;
        }
        snapshot.state = payload.get_u8();

        Ok(snapshot)
    }

    fn apply_delta(&self, packet: &Packet, base: &Snapshot) -> Result<Snapshot, DecodeError> {
        let mask = packet.field_mask;
        if !is_valid_mask(mask) {
            return Err(DecodeError::InvalidMask(mask));
        }
        let expected = delta_payload_size(mask);
        if packet.payload.len() != expected {
            return Err(DecodeError::Malformed {
                expected,
                actual: packet.payload.len(),
            });
        }

        let config = &self.config;
        let mut payload = &packet.payload[..];
        let mut snapshot = *base;
        snapshot.sequence = packet.sequence;

        for (i, bit) in POSITION_BITS.iter().enumerate() {
            if mask & bit != 0 {
                snapshot.position[i] += payload.get_i16_le() as f32 / config.quant_scale;
            }
        }
        for (i, bit) in ROTATION_BITS.iter().enumerate() {
            if mask & bit != 0 {
                snapshot.rotation[i] = payload.get_i16_le() as f32 / config.rot_scale;
            }
        }
        for (i, bit) in VELOCITY_BITS.iter().enumerate() {
            if mask & bit != 0 {
                snapshot.velocity[i] = payload.get_i16_le() as f32 / config.quant_scale;
            }
        }
        if mask & STATE != 0 {
            snapshot.state = payload.get_u8();
        }

        Ok(snapshot)
    }
}
