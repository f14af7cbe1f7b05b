pub mod protocol;
pub mod snapshot;
pub mod compression;
pub mod serialization;
pub mod interpolation;
pub mod transport;
pub mod error;
pub mod sync;
pub mod debug;

pub use protocol::{
    EntityId, Sequence, FieldMask,
    Packet, PacketKind,
    FULL_BASE_SEQUENCE, FULL_FIELD_MASK,
};

pub use snapshot::{
    Snapshot, SnapshotStore, MotionSample,
};

pub use compression::{
    CodecConfig, DeltaCodec,
};

pub use serialization::PacketSerializer;

pub use interpolation::{
    InterpolationConfig, InterpolationState, MotionTarget, TargetKind,
    sample_target,
};

pub use transport::{
    Transport, MemoryTransport, CompressingTransport, RenderSink,
};

pub use error::{
    LinkError, DecodeError, EncodeError, Result,
};

pub use sync::{
    AuthorityCoordinator, ObserverCoordinator,
    SyncConfig, SyncStats, ObserverStats, TickSummary,
    SendOutcome, ReceiveOutcome,
};

pub use debug::{
    init_debug_mode, is_debug_enabled, is_trace_enabled,
    log_packet, format_bytes, packet_summary,
};
