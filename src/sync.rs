use crate::compression::{CodecConfig, DeltaCodec};
use crate::debug;
use crate::error::{DecodeError, LinkError, Result};
use crate::interpolation::{InterpolationConfig, InterpolationState};
use crate::protocol::{EntityId, Packet, PacketKind, Sequence, FULL_FRAME_SIZE};
use crate::serialization::PacketSerializer;
use crate::snapshot::{MotionSample, Snapshot, SnapshotStore, DEFAULT_BUFFER_CAPACITY};
use crate::transport::{CompressingTransport, RenderSink, Transport};
use ahash::AHashMap;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub codec: CodecConfig,
    pub interpolation: InterpolationConfig,
    pub buffer_capacity: usize,
    /// Force a full packet after this many sends per entity. `None` disables.
    pub full_snapshot_interval: Option<u32>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            interpolation: InterpolationConfig::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            full_snapshot_interval: Some(60),
        }
    }
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity < 2 {
            return Err(LinkError::InvalidConfig(format!(
                "buffer_capacity must be at least 2, got {}",
                self.buffer_capacity
            )));
        }
        if self.codec.quant_scale <= 0.0 || self.codec.rot_scale <= 0.0 {
            return Err(LinkError::InvalidConfig("quantization scales must be positive".to_string()));
        }
        if self.full_snapshot_interval == Some(0) {
            return Err(LinkError::InvalidConfig("full_snapshot_interval must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn with_codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_interpolation(mut self, interpolation: InterpolationConfig) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_full_snapshot_interval(mut self, interval: Option<u32>) -> Self {
        self.full_snapshot_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delta { bytes: usize },
    Full { bytes: usize },
    Suppressed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub delta_packets: u32,
    pub full_packets: u32,
    pub suppressed: u32,
    pub bytes_sent: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub delta_packets: u64,
    pub full_packets: u64,
    pub suppressed: u64,
    /// What every send would have cost as a full frame.
    pub bytes_uncompressed: u64,
    pub bytes_sent: u64,
}

impl SyncStats {
    pub fn packets_sent(&self) -> u64 {
        self.delta_packets + self.full_packets
    }

    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_sent == 0 {
            return 0.0;
        }
        self.bytes_uncompressed as f64 / self.bytes_sent as f64
    }
}

struct AuthorityEntity {
    store: SnapshotStore,
    /// The receiver's view of the last snapshot sent; the next delta base.
    last_sent: Option<Snapshot>,
    sends_since_full: u32,
    force_full: bool,
    scratch: BytesMut,
}

impl AuthorityEntity {
    fn new(capacity: usize) -> Self {
        Self {
            store: SnapshotStore::new(capacity),
            last_sent: None,
            sends_since_full: 0,
            force_full: false,
            scratch: BytesMut::with_capacity(FULL_FRAME_SIZE * 4),
        }
    }
}

/// Simulation-host side: samples motion each tick and sends packets.
pub struct AuthorityCoordinator<T: Transport> {
    transport: CompressingTransport<T>,
    config: SyncConfig,
    codec: DeltaCodec,
    entities: AHashMap<EntityId, AuthorityEntity>,
    next_sequence: Sequence,
    stats: SyncStats,
}

impl<T: Transport> AuthorityCoordinator<T> {
    pub fn new(transport: T, config: SyncConfig) -> Self {
        let codec = DeltaCodec::new(config.codec.clone());
        Self {
            transport: CompressingTransport::new(transport),
            config,
            codec,
            entities: AHashMap::new(),
            next_sequence: 1,
            stats: SyncStats::default(),
        }
    }

    pub fn register_entity(&mut self, entity_id: EntityId) {
        let capacity = self.config.buffer_capacity.max(2);
        if self.entities.contains_key(&entity_id) {
            return;
        }
        self.entities.insert(entity_id, AuthorityEntity::new(capacity));
        tracing::info!(entity_id, "registered entity for sync");
    }

    pub fn remove_entity(&mut self, entity_id: EntityId) -> bool {
        let removed = self.entities.remove(&entity_id).is_some();
        if removed {
            tracing::info!(entity_id, "removed entity from sync");
        }
        removed
    }

    /// Make the next send for `entity_id` a full packet.
    pub fn force_full(&mut self, entity_id: EntityId) -> Result<()> {
        let entity = self
            .entities
            .get_mut(&entity_id)
            .ok_or(LinkError::UnknownEntity(entity_id))?;
        entity.force_full = true;
        Ok(())
    }

    /// Process one simulation tick worth of changed entities.
    pub fn tick<I>(&mut self, samples: I, now: f64) -> Result<TickSummary>
    where
        I: IntoIterator<Item = MotionSample>,
    {
        let mut summary = TickSummary::default();
        for sample in samples {
            match self.sample(&sample, now)? {
                SendOutcome::Delta { bytes } => {
                    summary.delta_packets += 1;
                    summary.bytes_sent += bytes;
                }
                SendOutcome::Full { bytes } => {
                    summary.full_packets += 1;
                    summary.bytes_sent += bytes;
                }
                SendOutcome::Suppressed => summary.suppressed += 1,
            }
        }
        Ok(summary)
    }

    /// Record one entity's motion and send whatever packet it warrants.
    pub fn sample(&mut self, sample: &MotionSample, now: f64) -> Result<SendOutcome> {
        if !self.entities.contains_key(&sample.entity_id) {
            self.register_entity(sample.entity_id);
        }
        let Some(entity) = self.entities.get_mut(&sample.entity_id) else {
            return Err(LinkError::UnknownEntity(sample.entity_id));
        };

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let snapshot = sample.to_snapshot(sequence, now);
        entity.store.push(snapshot);

        let keyframe_due = self
            .config
            .full_snapshot_interval
            .filter(|&interval| interval > 0)
            .is_some_and(|interval| entity.sends_since_full >= interval);
        let base = if entity.force_full || keyframe_due {
            None
        } else {
            entity.last_sent.as_ref()
        };

        let Some(packet) = self.codec.encode(sample.entity_id, base, &snapshot, &mut entity.scratch) else {
            self.stats.suppressed += 1;
            tracing::trace!(entity_id = sample.entity_id, sequence, "no significant change, suppressed");
            return Ok(SendOutcome::Suppressed);
        };

        let bytes = self.transport.send_packet(&packet)?;

        // Track what the observer will reconstruct so later deltas don't
        // accumulate quantization error.
        match self.codec.reconstruct(&packet, entity.last_sent.as_ref()) {
            Ok(mut sent) => {
                sent.timestamp = now;
                entity.last_sent = Some(sent);
            }
            Err(err) => {
                tracing::warn!(entity_id = sample.entity_id, %err, "could not mirror sent packet");
                entity.last_sent = None;
            }
        }

        self.stats.bytes_uncompressed += FULL_FRAME_SIZE as u64;
        self.stats.bytes_sent += bytes as u64;
        debug::trace_compression(sample.entity_id, FULL_FRAME_SIZE, bytes);

        let outcome = match packet.kind() {
            PacketKind::Full => {
                entity.sends_since_full = 0;
                entity.force_full = false;
                self.stats.full_packets += 1;
                SendOutcome::Full { bytes }
            }
            PacketKind::Delta => {
                entity.sends_since_full += 1;
                self.stats.delta_packets += 1;
                SendOutcome::Delta { bytes }
            }
        };

        tracing::trace!(entity_id = sample.entity_id, summary = %debug::packet_summary(&packet), "sent");
        Ok(outcome)
    }

    pub fn store(&self, entity_id: EntityId) -> Option<&SnapshotStore> {
        self.entities.get(&entity_id).map(|e| &e.store)
    }

    pub fn is_tracking(&self, entity_id: EntityId) -> bool {
        self.entities.contains_key(&entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn next_sequence(&self) -> Sequence {
        self.next_sequence
    }

    pub fn get_stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        self.transport.inner()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.transport.inner_mut()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Applied { entity_id: EntityId, sequence: Sequence },
    Stale { entity_id: EntityId, sequence: Sequence },
    Dropped(DecodeError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserverStats {
    pub decoded: u64,
    pub missing_base: u64,
    pub malformed: u64,
    pub stale: u64,
}

struct ObservedEntity {
    store: SnapshotStore,
    interpolation: InterpolationState,
}

/// Observer side: decodes inbound packets and drives interpolation.
pub struct ObserverCoordinator {
    config: SyncConfig,
    codec: DeltaCodec,
    serializer: PacketSerializer,
    local_entity_id: Option<EntityId>,
    entities: AHashMap<EntityId, ObservedEntity>,
    last_frame_time: Option<f64>,
    stats: ObserverStats,
}

impl ObserverCoordinator {
    /// `local_entity_id` names the locally controlled entity, which is never
    /// interpolated.
    pub fn new(config: SyncConfig, local_entity_id: Option<EntityId>) -> Self {
        let codec = DeltaCodec::new(config.codec.clone());
        Self {
            config,
            codec,
            serializer: PacketSerializer::new(),
            local_entity_id,
            entities: AHashMap::new(),
            last_frame_time: None,
            stats: ObserverStats::default(),
        }
    }

    pub fn register_entity(&mut self, entity_id: EntityId) {
        let capacity = self.config.buffer_capacity.max(2);
        self.entities.entry(entity_id).or_insert_with(|| {
            tracing::info!(entity_id, "observing entity");
            ObservedEntity {
                store: SnapshotStore::new(capacity),
                interpolation: InterpolationState::new(),
            }
        });
    }

    /// Drop all state for an entity the registry reported removed.
    pub fn remove_entity(&mut self, entity_id: EntityId) -> bool {
        let removed = self.entities.remove(&entity_id).is_some();
        if removed {
            tracing::info!(entity_id, "stopped observing entity");
        }
        removed
    }

    /// Drain every frame currently queued on `transport`.
    pub fn drain<T: Transport>(&mut self, transport: &mut T, now: f64) -> Result<usize> {
        let mut received = 0;
        while let Some(frame) = transport.receive()? {
            self.receive_frame(frame, now);
            received += 1;
        }
        Ok(received)
    }

    pub fn receive_frame(&mut self, frame: Bytes, now: f64) -> ReceiveOutcome {
        debug::trace_transport_receive(frame.len());
        match self.serializer.deserialize_packet(frame) {
            Ok(packet) => self.receive_packet(&packet, now),
            Err(err) => self.drop_packet(None, err),
        }
    }

    pub fn receive_packet(&mut self, packet: &Packet, now: f64) -> ReceiveOutcome {
        debug::log_packet("Inbound", packet);
        let entity_id = packet.entity_id;

        // Unseen entities are only tracked once a packet for them decodes.
        if !self.entities.contains_key(&entity_id) {
            return match self.codec.reconstruct(packet, None) {
                Ok(snapshot) => {
                    self.register_entity(entity_id);
                    self.apply_snapshot(entity_id, snapshot, now)
                }
                Err(err) => self.drop_packet(Some(entity_id), err),
            };
        }
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return self.drop_packet(Some(entity_id), DecodeError::MissingBase(packet.sequence));
        };

        if let Some(latest) = entity.store.latest() {
            if packet.sequence <= latest.sequence {
                self.stats.stale += 1;
                tracing::debug!(entity_id, sequence = packet.sequence, latest = latest.sequence, "dropping stale packet");
                return ReceiveOutcome::Stale { entity_id, sequence: packet.sequence };
            }
        }

        match self.codec.decode(packet, &entity.store) {
            Ok(snapshot) => self.apply_snapshot(entity_id, snapshot, now),
            Err(err) => self.drop_packet(Some(entity_id), err),
        }
    }

    fn apply_snapshot(&mut self, entity_id: EntityId, mut snapshot: Snapshot, now: f64) -> ReceiveOutcome {
        let Some(entity) = self.entities.get_mut(&entity_id) else {
            return self.drop_packet(Some(entity_id), DecodeError::MissingBase(snapshot.sequence));
        };
        snapshot.timestamp = now;
        entity.store.push(snapshot);
        entity.interpolation.mark_updated(now);
        self.stats.decoded += 1;
        ReceiveOutcome::Applied { entity_id, sequence: snapshot.sequence }
    }

    fn drop_packet(&mut self, entity_id: Option<EntityId>, err: DecodeError) -> ReceiveOutcome {
        match err {
            DecodeError::MissingBase(_) => self.stats.missing_base += 1,
            _ => self.stats.malformed += 1,
        }
        tracing::debug!(?entity_id, %err, "dropping packet");
        ReceiveOutcome::Dropped(err)
    }

    /// Advance interpolation for every observed entity and hand the smoothed
    /// transforms to `sink`. Returns how many entities were rendered.
    pub fn render_frame<S: RenderSink>(&mut self, now: f64, sink: &mut S) -> usize {
        let frame_delta = self
            .last_frame_time
            .map(|last| ((now - last) / 1000.0).max(0.0) as f32)
            .unwrap_or(0.0);
        self.last_frame_time = Some(now);

        let mut rendered = 0;
        for (&entity_id, entity) in self.entities.iter_mut() {
            if Some(entity_id) == self.local_entity_id {
                continue;
            }
            let update = entity.interpolation.update(
                &entity.store,
                now,
                frame_delta,
                &self.config.interpolation,
            );
            if let Some((position, rotation)) = update {
                sink.update_transform(entity_id, position, rotation);
                rendered += 1;
            }
        }
        rendered
    }

    pub fn store(&self, entity_id: EntityId) -> Option<&SnapshotStore> {
        self.entities.get(&entity_id).map(|e| &e.store)
    }

    pub fn interpolation_state(&self, entity_id: EntityId) -> Option<&InterpolationState> {
        self.entities.get(&entity_id).map(|e| &e.interpolation)
    }

    pub fn is_tracking(&self, entity_id: EntityId) -> bool {
        self.entities.contains_key(&entity_id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn local_entity_id(&self) -> Option<EntityId> {
        self.local_entity_id
    }

    pub fn get_stats(&self) -> &ObserverStats {
        &self.stats
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}
