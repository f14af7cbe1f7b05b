use crate::protocol::{EntityId, Packet, PacketKind};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG_MODE: AtomicBool = AtomicBool::new(false);
static TRACE_MODE: AtomicBool = AtomicBool::new(false);

/// Initialize debug mode from environment variables
///
/// - `MOTION_LINK_DEBUG=1`: dump every packet as JSON at `debug` level
/// - `MOTION_LINK_TRACE=1`: emit per-operation trace events
///
/// Events go through `tracing`; install a subscriber to see them.
pub fn init_debug_mode() {
    let debug = env::var("MOTION_LINK_DEBUG").is_ok();
    let trace = env::var("MOTION_LINK_TRACE").is_ok();

    set_debug_mode(debug, trace);

    if debug {
        tracing::info!("motion-link debug mode enabled, packets will be logged as JSON");
    }

    if trace {
        tracing::info!("motion-link trace mode enabled");
    }
}

pub fn set_debug_mode(debug: bool, trace: bool) {
    DEBUG_MODE.store(debug, Ordering::Relaxed);
    TRACE_MODE.store(trace, Ordering::Relaxed);
}

pub fn is_debug_enabled() -> bool {
    DEBUG_MODE.load(Ordering::Relaxed)
}

pub fn is_trace_enabled() -> bool {
    TRACE_MODE.load(Ordering::Relaxed)
}

/// Log a packet as JSON if debug mode is enabled
pub fn log_packet(direction: &str, packet: &Packet) {
    if !is_debug_enabled() {
        return;
    }

    match serde_json::to_string_pretty(packet) {
        Ok(json) => tracing::debug!("{} packet:\n{}", direction, json),
        Err(e) => tracing::warn!("failed to serialize packet to JSON: {}", e),
    }
}

pub fn trace_compression(entity_id: EntityId, uncompressed: usize, sent: usize) {
    if !is_trace_enabled() {
        return;
    }

    let ratio = if sent > 0 {
        uncompressed as f64 / sent as f64
    } else {
        0.0
    };

    tracing::trace!(
        entity_id,
        "compressed {} -> {} ({:.2}x reduction)",
        format_bytes(uncompressed),
        format_bytes(sent),
        ratio
    );
}

pub fn trace_transport_send(bytes: usize, entity_id: EntityId) {
    if !is_trace_enabled() {
        return;
    }

    tracing::trace!(entity_id, "sent {}", format_bytes(bytes));
}

pub fn trace_transport_receive(bytes: usize) {
    if !is_trace_enabled() {
        return;
    }

    tracing::trace!("received {}", format_bytes(bytes));
}

/// Format bytes in human-readable format (KB, MB, etc.)
pub fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;
    const GB: usize = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

pub fn packet_summary(packet: &Packet) -> String {
    match packet.kind() {
        PacketKind::Full => {
            format!("Full (entity: {}, seq: {})", packet.entity_id, packet.sequence)
        }
        PacketKind::Delta => {
            format!(
                "Delta (entity: {}, seq: {}, base: {}, mask: {:#05x})",
                packet.entity_id, packet.sequence, packet.base_sequence, packet.field_mask
            )
        }
    }
}
