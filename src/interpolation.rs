//! Snapshot interpolation for observed entities.
//!
//! Rendering runs `interpolation_delay_ms` behind the newest data so that two
//! snapshots usually bracket the render time. When they don't, motion is
//! extrapolated from the last two snapshots until `extrapolation_limit_ms`
//! passes without an update, after which the entity freezes in place. The
//! result is then smoothed exponentially so corrections glide instead of snap.

use crate::snapshot::{SnapshotStore, IDENTITY_ROTATION};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    pub interpolation_delay_ms: f64,
    pub extrapolation_limit_ms: f64,
    /// Exponential smoothing rate, per second.
    pub smoothing_rate: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            interpolation_delay_ms: 100.0,
            extrapolation_limit_ms: 500.0,
            smoothing_rate: 5.0,
        }
    }
}

impl InterpolationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpolation_delay(mut self, delay_ms: f64) -> Self {
        self.interpolation_delay_ms = delay_ms;
        self
    }

    pub fn with_extrapolation_limit(mut self, limit_ms: f64) -> Self {
        self.extrapolation_limit_ms = limit_ms;
        self
    }

    pub fn with_smoothing_rate(mut self, rate: f32) -> Self {
        self.smoothing_rate = rate;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetKind {
    /// Only one snapshot is held; render it as is.
    Single,
    /// Render time precedes all held history.
    Oldest,
    Interpolated { t: f32 },
    Extrapolated,
    /// Updates stopped arriving; pinned to the last snapshot.
    Frozen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionTarget {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub kind: TargetKind,
}

impl MotionTarget {
    /// Targets that should be applied directly instead of smoothed toward.
    pub fn is_exact(&self) -> bool {
        matches!(self.kind, TargetKind::Single | TargetKind::Frozen)
    }
}

/// Compute where an entity should be at `render_time`.
///
/// `now` and `last_update_time` only decide whether extrapolation has run past
/// its limit. Returns `None` when the store is empty.
pub fn sample_target(
    store: &SnapshotStore,
    render_time: f64,
    now: f64,
    last_update_time: f64,
    config: &InterpolationConfig,
) -> Option<MotionTarget> {
    let last = store.latest()?;

    if store.len() == 1 {
        return Some(MotionTarget {
            position: last.position,
            rotation: last.normalized_rotation(),
            kind: TargetKind::Single,
        });
    }

    if let Some((older, newer)) = store.bracket(render_time) {
        let span = newer.timestamp - older.timestamp;
        let t = if span > 0.0 {
            ((render_time - older.timestamp) / span).clamp(0.0, 1.0) as f32
        } else {
            1.0
        };
        return Some(MotionTarget {
            position: lerp3(older.position, newer.position, t),
            rotation: nlerp(older.normalized_rotation(), newer.normalized_rotation(), t),
            kind: TargetKind::Interpolated { t },
        });
    }

    if let Some(oldest) = store.oldest() {
        if render_time < oldest.timestamp {
            return Some(MotionTarget {
                position: oldest.position,
                rotation: oldest.normalized_rotation(),
                kind: TargetKind::Oldest,
            });
        }
    }

    let rotation = last.normalized_rotation();
    if now - last_update_time > config.extrapolation_limit_ms {
        return Some(MotionTarget {
            position: last.position,
            rotation,
            kind: TargetKind::Frozen,
        });
    }

    let mut position = last.position;
    if let Some(prev) = store.second_latest() {
        let dt = last.timestamp - prev.timestamp;
        if dt > 0.0 {
            let ahead = (render_time - last.timestamp) as f32;
            let dt = dt as f32;
            for i in 0..3 {
                let velocity = (last.position[i] - prev.position[i]) / dt;
                position[i] = last.position[i] + velocity * ahead;
            }
        }
    }

    Some(MotionTarget {
        position,
        rotation,
        kind: TargetKind::Extrapolated,
    })
}

/// Per-entity render state on the observer side.
///
/// `current_position` and `current_rotation` are what the renderable sees.
#[derive(Debug, Clone)]
pub struct InterpolationState {
    current_position: [f32; 3],
    current_rotation: [f32; 4],
    last_update_time: f64,
    initialized: bool,
    last_target: Option<TargetKind>,
}

impl InterpolationState {
    pub fn new() -> Self {
        Self {
            current_position: [0.0; 3],
            current_rotation: IDENTITY_ROTATION,
            last_update_time: 0.0,
            initialized: false,
            last_target: None,
        }
    }

    /// Record that a snapshot arrived at `now`.
    pub fn mark_updated(&mut self, now: f64) {
        self.last_update_time = now;
    }

    /// Advance one render frame. `frame_delta` is in seconds.
    ///
    /// Returns the smoothed transform, or `None` if nothing has been received.
    pub fn update(
        &mut self,
        store: &SnapshotStore,
        now: f64,
        frame_delta: f32,
        config: &InterpolationConfig,
    ) -> Option<([f32; 3], [f32; 4])> {
        let render_time = now - config.interpolation_delay_ms;
        let target = sample_target(store, render_time, now, self.last_update_time, config)?;
        self.last_target = Some(target.kind);

        if !self.initialized || target.is_exact() {
            self.current_position = target.position;
            self.current_rotation = target.rotation;
            self.initialized = true;
        } else {
            let factor = 1.0 - (-config.smoothing_rate * frame_delta.max(0.0)).exp();
            self.current_position = lerp3(self.current_position, target.position, factor);
            self.current_rotation = slerp(self.current_rotation, target.rotation, factor);
        }

        Some((self.current_position, self.current_rotation))
    }

    pub fn current_position(&self) -> [f32; 3] {
        self.current_position
    }

    pub fn current_rotation(&self) -> [f32; 4] {
        self.current_rotation
    }

    pub fn last_update_time(&self) -> f64 {
        self.last_update_time
    }

    pub fn last_target(&self) -> Option<TargetKind> {
        self.last_target
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for InterpolationState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn lerp3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

fn dot4(a: [f32; 4], b: [f32; 4]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2] + a[3] * b[3]
}

/// Normalize a quaternion; degenerate input yields identity.
pub fn normalize_quat(q: [f32; 4]) -> [f32; 4] {
    let len = dot4(q, q).sqrt();
    if len <= f32::EPSILON || !len.is_finite() {
        return IDENTITY_ROTATION;
    }
    [q[0] / len, q[1] / len, q[2] / len, q[3] / len]
}

/// Componentwise lerp followed by normalization, along the shorter arc.
///
/// Adequate between consecutive snapshots where the angle is small.
pub fn nlerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let b = if dot4(a, b) < 0.0 { [-b[0], -b[1], -b[2], -b[3]] } else { b };
    normalize_quat([
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ])
}

pub fn slerp(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let mut cos_theta = dot4(a, b);
    let b = if cos_theta < 0.0 {
        cos_theta = -cos_theta;
        [-b[0], -b[1], -b[2], -b[3]]
    } else {
        b
    };

    // Nearly parallel: sin(theta) approaches zero.
    if cos_theta > 0.9995 {
        return nlerp(a, b, t);
    }

    let theta = cos_theta.min(1.0).acos();
    let sin_theta = theta.sin();
    let wa = ((1.0 - t) * theta).sin() / sin_theta;
    let wb = (t * theta).sin() / sin_theta;
    normalize_quat([
        a[0] * wa + b[0] * wb,
        a[1] * wa + b[1] * wb,
        a[2] * wa + b[2] * wb,
        a[3] * wa + b[3] * wb,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    fn snap(sequence: u64, timestamp: f64, position: [f32; 3]) -> Snapshot {
        Snapshot {
            position,
            timestamp,
            sequence,
            ..Snapshot::default()
        }
    }

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-4)
    }

    #[test]
    fn test_bracketed_interpolation() {
        let mut store = SnapshotStore::new(8);
        store.push(snap(1, 100.0, [0.0, 0.0, 0.0]));
        store.push(snap(2, 150.0, [10.0, 0.0, 0.0]));

        let config = InterpolationConfig::default();
        let target = sample_target(&store, 120.0, 220.0, 150.0, &config).unwrap();

        assert!(approx(target.position, [4.0, 0.0, 0.0]));
        match target.kind {
            TargetKind::Interpolated { t } => assert!((t - 0.4).abs() < 1e-6),
            other => panic!("expected interpolation, got {:?}", other),
        }
    }

    #[test]
    fn test_single_snapshot_snaps() {
        let mut store = SnapshotStore::new(8);
        store.push(snap(1, 100.0, [3.0, 2.0, 1.0]));

        let mut state = InterpolationState::new();
        state.mark_updated(100.0);
        let (position, rotation) = state
            .update(&store, 400.0, 0.016, &InterpolationConfig::default())
            .unwrap();

        assert_eq!(position, [3.0, 2.0, 1.0]);
        assert_eq!(rotation, IDENTITY_ROTATION);
        assert_eq!(state.last_target(), Some(TargetKind::Single));
    }

    #[test]
    fn test_empty_store_does_nothing() {
        let store = SnapshotStore::new(4);
        let mut state = InterpolationState::new();
        assert!(state.update(&store, 100.0, 0.016, &InterpolationConfig::default()).is_none());
        assert_eq!(state.current_position(), [0.0; 3]);
    }

    #[test]
    fn test_extrapolation_uses_estimated_velocity() {
        let mut store = SnapshotStore::new(8);
        store.push(snap(1, 100.0, [0.0, 0.0, 0.0]));
        store.push(snap(2, 200.0, [1.0, 0.0, 0.0]));

        let config = InterpolationConfig::default();
        // 0.01 units/ms, 50 ms past the newest snapshot.
        let target = sample_target(&store, 250.0, 350.0, 200.0, &config).unwrap();
        assert_eq!(target.kind, TargetKind::Extrapolated);
        assert!(approx(target.position, [1.5, 0.0, 0.0]));
    }

    #[test]
    fn test_extrapolation_freezes_after_limit() {
        let mut store = SnapshotStore::new(8);
        store.push(snap(1, 0.0, [0.0, 0.0, 0.0]));
        store.push(snap(2, 100.0, [5.0, 0.0, 0.0]));

        let config = InterpolationConfig::default();
        let mut state = InterpolationState::new();
        state.mark_updated(100.0);

        // Warm up with a frame while data is fresh.
        state.update(&store, 150.0, 0.016, &config).unwrap();

        // 600 ms since the last update, limit is 500 ms.
        let (position, _) = state.update(&store, 700.0, 0.016, &config).unwrap();
        assert_eq!(position, [5.0, 0.0, 0.0]);
        assert_eq!(state.last_target(), Some(TargetKind::Frozen));

        let (position, _) = state.update(&store, 900.0, 0.016, &config).unwrap();
        assert_eq!(position, [5.0, 0.0, 0.0]);
    }

    #[test]
    fn test_render_time_before_history() {
        let mut store = SnapshotStore::new(8);
        store.push(snap(1, 500.0, [1.0, 0.0, 0.0]));
        store.push(snap(2, 550.0, [2.0, 0.0, 0.0]));

        let target = sample_target(&store, 400.0, 500.0, 550.0, &InterpolationConfig::default()).unwrap();
        assert_eq!(target.kind, TargetKind::Oldest);
        assert_eq!(target.position, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_smoothing_moves_toward_target() {
        let mut store = SnapshotStore::new(8);
        store.push(snap(1, 0.0, [0.0, 0.0, 0.0]));
        store.push(snap(2, 100.0, [0.0, 0.0, 0.0]));

        let config = InterpolationConfig::default();
        let mut state = InterpolationState::new();
        state.mark_updated(100.0);
        state.update(&store, 150.0, 0.016, &config).unwrap();
        assert_eq!(state.current_position(), [0.0, 0.0, 0.0]);

        store.push(snap(3, 200.0, [10.0, 0.0, 0.0]));
        state.mark_updated(200.0);
        // Render time 200 brackets exactly to the newest snapshot.
        let (position, _) = state.update(&store, 300.0, 0.1, &config).unwrap();
        let factor = 1.0 - (-5.0f32 * 0.1).exp();
        assert!((position[0] - 10.0 * factor).abs() < 1e-4);
        assert!(position[0] > 0.0 && position[0] < 10.0);
    }

    #[test]
    fn test_zero_frame_delta_holds_position() {
        let mut store = SnapshotStore::new(8);
        store.push(snap(1, 0.0, [0.0, 0.0, 0.0]));
        store.push(snap(2, 100.0, [0.0, 0.0, 0.0]));

        let config = InterpolationConfig::default();
        let mut state = InterpolationState::new();
        state.mark_updated(100.0);
        state.update(&store, 150.0, 0.016, &config).unwrap();

        store.push(snap(3, 200.0, [10.0, 0.0, 0.0]));
        state.mark_updated(200.0);
        let (position, _) = state.update(&store, 300.0, 0.0, &config).unwrap();
        assert_eq!(position, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_normalize_quat() {
        let q = normalize_quat([0.0, 0.0, 0.0, 2.0]);
        assert_eq!(q, IDENTITY_ROTATION);
        assert_eq!(normalize_quat([0.0; 4]), IDENTITY_ROTATION);
        let q = normalize_quat([1.0, 1.0, 1.0, 1.0]);
        assert!((dot4(q, q) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_slerp_halfway() {
        let a = IDENTITY_ROTATION;
        // 90 degrees about Z.
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let b = [0.0, 0.0, half, half];
        let mid = slerp(a, b, 0.5);

        // 45 degrees about Z.
        let expected_z = (std::f32::consts::PI / 8.0).sin();
        let expected_w = (std::f32::consts::PI / 8.0).cos();
        assert!((mid[2] - expected_z).abs() < 1e-5);
        assert!((mid[3] - expected_w).abs() < 1e-5);
    }

    #[test]
    fn test_slerp_takes_shorter_arc() {
        let a = IDENTITY_ROTATION;
        let b = [0.0, 0.0, 0.0, -1.0];
        let q = slerp(a, b, 0.5);
        assert!((q[3].abs() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_nlerp_endpoints() {
        let half = std::f32::consts::FRAC_1_SQRT_2;
        let a = IDENTITY_ROTATION;
        let b = [0.0, half, 0.0, half];
        let start = nlerp(a, b, 0.0);
        let end = nlerp(a, b, 1.0);
        assert!((start[3] - 1.0).abs() < 1e-6);
        assert!((end[1] - half).abs() < 1e-6);
    }
}
