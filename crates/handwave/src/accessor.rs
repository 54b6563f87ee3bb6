//! Tabular per-hand views of the current snapshot.

use serde::Serialize;

use crate::{
    hand::{Handedness, HandednessLabel},
    landmark::{FrameOfReference, LandmarkFrame, Position},
    snapshot::{HandDetection, Snapshot},
    store::StateStore,
};

/// Landmark coordinates of one hand in columnar form: one row per landmark, columns `x`, `y`, `z`.
///
/// Serialized as `{"x": [...], "y": [...], "z": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LandmarkTable {
    x: Vec<f32>,
    y: Vec<f32>,
    z: Vec<f32>,
}

impl LandmarkTable {
    pub fn from_frame(frame: &LandmarkFrame) -> Self {
        let mut table = Self {
            x: Vec::with_capacity(frame.len()),
            y: Vec::with_capacity(frame.len()),
            z: Vec::with_capacity(frame.len()),
        };
        for &[x, y, z] in frame.positions() {
            table.x.push(x);
            table.y.push(y);
            table.z.push(z);
        }
        table
    }

    /// Number of rows (landmarks).
    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x(&self) -> &[f32] {
        &self.x
    }

    pub fn y(&self) -> &[f32] {
        &self.y
    }

    pub fn z(&self) -> &[f32] {
        &self.z
    }

    pub fn row(&self, index: usize) -> Option<Position> {
        Some([*self.x.get(index)?, *self.y.get(index)?, *self.z.get(index)?])
    }

    pub fn rows(&self) -> impl ExactSizeIterator<Item = Position> + '_ {
        (0..self.len()).map(|i| [self.x[i], self.y[i], self.z[i]])
    }
}

/// A hand's landmark table together with its handedness classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandTable {
    pub table: LandmarkTable,
    pub handedness: Handedness,
    pub handedness_score: f32,
}

impl HandTable {
    pub fn from_detection(hand: &HandDetection) -> Self {
        Self::new(hand.landmarks(), hand.handedness())
    }

    pub fn new(landmarks: &LandmarkFrame, label: HandednessLabel) -> Self {
        Self {
            table: LandmarkTable::from_frame(landmarks),
            handedness: label.handedness(),
            handedness_score: label.score(),
        }
    }
}

/// One [`HandTable`] per hand in `snapshot`, in detection order.
///
/// Returns [`None`] if `snapshot` is [`None`] (nothing has been published yet).
pub fn all_hands(snapshot: Option<&Snapshot>) -> Option<Vec<HandTable>> {
    Some(snapshot?.hands().iter().map(HandTable::from_detection).collect())
}

/// The [`HandTable`] of the first hand in `snapshot`, if there is one.
pub fn first_hand(snapshot: Option<&Snapshot>) -> Option<HandTable> {
    snapshot?.hands().first().map(HandTable::from_detection)
}

/// Derives [`HandTable`]s from the store's current snapshot.
///
/// Nothing is cached: every call reads the snapshot that is current at that moment, so a view can
/// never be older than the snapshot it was derived from.
#[derive(Clone)]
pub struct SnapshotAccessor {
    store: StateStore,
}

impl SnapshotAccessor {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Returns one table per detected hand.
    ///
    /// Returns an empty list if the last tick found no hands, and [`None`] if no snapshot has been
    /// published yet.
    pub fn all_hands(&self) -> Option<Vec<HandTable>> {
        all_hands(self.store.snapshot().as_deref())
    }

    /// Returns the table of the first detected hand, or [`None`] if there is none.
    pub fn first_hand(&self) -> Option<HandTable> {
        first_hand(self.store.snapshot().as_deref())
    }

    /// Frame of reference of the current snapshot's landmarks.
    pub fn frame_of_reference(&self) -> Option<FrameOfReference> {
        self.store
            .snapshot()
            .map(|snapshot| snapshot.frame_of_reference())
    }
}

#[cfg(test)]
mod tests {
    use crate::test::{hand_frame, two_hands};

    use super::*;

    #[test]
    fn columns() {
        let frame = LandmarkFrame::new(
            FrameOfReference::Image,
            [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]],
        );
        let table = LandmarkTable::from_frame(&frame);
        assert_eq!(table.len(), 2);
        assert_eq!(table.x(), [0.1, 0.4]);
        assert_eq!(table.z(), [0.3, 0.6]);
        assert_eq!(table.row(1), Some([0.4, 0.5, 0.6]));
        assert_eq!(table.row(2), None);
        assert_eq!(table.rows().collect::<Vec<_>>(), frame.positions());
        assert_eq!(
            serde_json::to_value(&table).unwrap(),
            serde_json::json!({ "x": [0.1f32, 0.4f32], "y": [0.2f32, 0.5f32], "z": [0.3f32, 0.6f32] })
        );
    }

    #[test]
    fn absent_empty_and_present() {
        assert_eq!(all_hands(None), None);
        assert_eq!(first_hand(None), None);

        let empty = Snapshot::empty(FrameOfReference::Image);
        assert_eq!(all_hands(Some(&empty)), Some(Vec::new()));
        assert_eq!(first_hand(Some(&empty)), None);

        let snapshot = two_hands();
        let all = all_hands(Some(&snapshot)).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(first_hand(Some(&snapshot)).as_ref(), all.first());
        assert_eq!(all[1].handedness, Handedness::Right);
        assert_eq!(all[1].table, LandmarkTable::from_frame(&hand_frame(0.75)));
    }

    #[test]
    fn accessor_reads_current_snapshot() {
        let store = StateStore::new();
        let accessor = SnapshotAccessor::new(store.clone());
        assert!(accessor.all_hands().is_none());
        assert!(accessor.frame_of_reference().is_none());

        store.publish(two_hands());
        assert_eq!(accessor.all_hands().unwrap().len(), 2);
        assert_eq!(accessor.frame_of_reference(), Some(FrameOfReference::Image));

        store.publish(Snapshot::empty(FrameOfReference::Image));
        assert_eq!(accessor.all_hands(), Some(Vec::new()));
        assert!(accessor.first_hand().is_none());
    }
}
