use crate::protocol::{EntityId, Sequence};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUFFER_CAPACITY: usize = 20;

pub const IDENTITY_ROTATION: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub position: [f32; 3],
    /// Stored as received. Use [`Snapshot::normalized_rotation`] when reading.
    pub rotation: [f32; 4],
    pub velocity: [f32; 3],
    pub state: u8,
    /// Monotonic clock, milliseconds.
    pub timestamp: f64,
    pub sequence: Sequence,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: IDENTITY_ROTATION,
            velocity: [0.0; 3],
            state: 0,
            timestamp: 0.0,
            sequence: 0,
        }
    }
}

impl Snapshot {
    pub fn normalized_rotation(&self) -> [f32; 4] {
        crate::interpolation::normalize_quat(self.rotation)
    }
}

/// One sample of an entity's motion as reported by the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub entity_id: EntityId,
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub velocity: [f32; 3],
    pub state: u8,
}

impl MotionSample {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            position: [0.0; 3],
            rotation: IDENTITY_ROTATION,
            velocity: [0.0; 3],
            state: 0,
        }
    }

    pub fn with_position(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: [f32; 4]) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_velocity(mut self, velocity: [f32; 3]) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_state(mut self, state: u8) -> Self {
        self.state = state;
        self
    }

    pub fn to_snapshot(&self, sequence: Sequence, timestamp: f64) -> Snapshot {
        Snapshot {
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            state: self.state,
            timestamp,
            sequence,
        }
    }
}

/// Fixed-capacity ring of snapshots for a single entity.
///
/// Slots are allocated once in [`SnapshotStore::new`]. `head` is the next slot
/// to write and `count` the number of valid entries, so the oldest entry lives
/// at `head - count` (mod capacity) regardless of how often the ring wrapped.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    slots: Vec<Snapshot>,
    head: usize,
    count: usize,
}

impl SnapshotStore {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "snapshot store capacity must be non-zero");
        Self {
            slots: vec![Snapshot::default(); capacity],
            head: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, snapshot: Snapshot) {
        let capacity = self.slots.len();
        self.slots[self.head] = snapshot;
        self.head = (self.head + 1) % capacity;
        self.count = (self.count + 1).min(capacity);
    }

    /// Entry `index` in chronological order, 0 being the oldest.
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        if index >= self.count {
            return None;
        }
        let capacity = self.slots.len();
        let oldest = (self.head + capacity - self.count) % capacity;
        Some(&self.slots[(oldest + index) % capacity])
    }

    pub fn find_by_sequence(&self, sequence: Sequence) -> Option<&Snapshot> {
        self.iter().find(|s| s.sequence == sequence)
    }

    /// The adjacent pair `(older, newer)` with
    /// `older.timestamp <= render_time <= newer.timestamp`, searched newest first.
    pub fn bracket(&self, render_time: f64) -> Option<(&Snapshot, &Snapshot)> {
        for i in (1..self.count).rev() {
            let newer = self.get(i)?;
            let older = self.get(i - 1)?;
            if older.timestamp <= render_time && render_time <= newer.timestamp {
                return Some((older, newer));
            }
        }
        None
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.count.checked_sub(1).and_then(|i| self.get(i))
    }

    pub fn second_latest(&self) -> Option<&Snapshot> {
        self.count.checked_sub(2).and_then(|i| self.get(i))
    }

    pub fn oldest(&self) -> Option<&Snapshot> {
        self.get(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        (0..self.count).filter_map(move |i| self.get(i))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Forget all entries. The slots stay allocated.
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(sequence: Sequence, timestamp: f64, x: f32) -> Snapshot {
        Snapshot {
            position: [x, 0.0, 0.0],
            timestamp,
            sequence,
            ..Snapshot::default()
        }
    }

    #[test]
    fn test_push_and_latest() {
        let mut store = SnapshotStore::new(4);
        assert!(store.is_empty());
        assert!(store.latest().is_none());
        assert!(store.second_latest().is_none());

        store.push(snap(1, 10.0, 1.0));
        assert_eq!(store.latest().unwrap().sequence, 1);
        assert!(store.second_latest().is_none());

        store.push(snap(2, 20.0, 2.0));
        assert_eq!(store.latest().unwrap().sequence, 2);
        assert_eq!(store.second_latest().unwrap().sequence, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_ring_buffer_wrap() {
        let mut store = SnapshotStore::new(3);
        for seq in 1..=5 {
            store.push(snap(seq, seq as f64 * 10.0, seq as f32));
        }

        assert_eq!(store.len(), 3);
        assert_eq!(store.capacity(), 3);
        let sequences: Vec<_> = store.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![3, 4, 5]);
        assert_eq!(store.oldest().unwrap().sequence, 3);
        assert_eq!(store.latest().unwrap().sequence, 5);
        assert_eq!(store.second_latest().unwrap().sequence, 4);
    }

    #[test]
    fn test_find_by_sequence_after_eviction() {
        let mut store = SnapshotStore::new(2);
        store.push(snap(10, 1.0, 0.0));
        store.push(snap(11, 2.0, 0.0));
        store.push(snap(12, 3.0, 0.0));

        assert!(store.find_by_sequence(10).is_none());
        assert_eq!(store.find_by_sequence(11).unwrap().timestamp, 2.0);
        assert_eq!(store.find_by_sequence(12).unwrap().timestamp, 3.0);
    }

    #[test]
    fn test_bracket() {
        let mut store = SnapshotStore::new(4);
        store.push(snap(1, 100.0, 0.0));
        store.push(snap(2, 150.0, 10.0));
        store.push(snap(3, 200.0, 20.0));

        let (older, newer) = store.bracket(120.0).unwrap();
        assert_eq!((older.sequence, newer.sequence), (1, 2));

        let (older, newer) = store.bracket(175.0).unwrap();
        assert_eq!((older.sequence, newer.sequence), (2, 3));

        let (older, newer) = store.bracket(200.0).unwrap();
        assert_eq!((older.sequence, newer.sequence), (2, 3));

        assert!(store.bracket(250.0).is_none());
        assert!(store.bracket(50.0).is_none());
    }

    #[test]
    fn test_bracket_after_wrap() {
        let mut store = SnapshotStore::new(3);
        for seq in 1..=7 {
            store.push(snap(seq, seq as f64 * 50.0, 0.0));
        }

        // Valid entries are 250, 300, 350 even though physical slot 0 holds 350.
        let (older, newer) = store.bracket(320.0).unwrap();
        assert_eq!((older.sequence, newer.sequence), (6, 7));
        let (older, newer) = store.bracket(260.0).unwrap();
        assert_eq!((older.sequence, newer.sequence), (5, 6));
        assert!(store.bracket(240.0).is_none());
    }

    #[test]
    fn test_bracket_needs_two_entries() {
        let mut store = SnapshotStore::new(3);
        store.push(snap(1, 100.0, 0.0));
        assert!(store.bracket(100.0).is_none());
    }

    #[test]
    fn test_clear() {
        let mut store = SnapshotStore::new(3);
        store.push(snap(1, 1.0, 0.0));
        store.push(snap(2, 2.0, 0.0));
        store.clear();

        assert!(store.is_empty());
        assert!(store.latest().is_none());
        assert_eq!(store.capacity(), 3);

        store.push(snap(3, 3.0, 0.0));
        assert_eq!(store.oldest().unwrap().sequence, 3);
    }

    #[test]
    fn test_motion_sample_to_snapshot() {
        let sample = MotionSample::new(4)
            .with_position([1.0, 2.0, 3.0])
            .with_velocity([0.5, 0.0, 0.0])
            .with_state(2);
        let snapshot = sample.to_snapshot(9, 123.0);

        assert_eq!(snapshot.position, [1.0, 2.0, 3.0]);
        assert_eq!(snapshot.rotation, IDENTITY_ROTATION);
        assert_eq!(snapshot.velocity, [0.5, 0.0, 0.0]);
        assert_eq!(snapshot.state, 2);
        assert_eq!(snapshot.sequence, 9);
        assert_eq!(snapshot.timestamp, 123.0);
    }
}
