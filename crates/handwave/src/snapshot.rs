//! Detection snapshots: everything one tracking tick found.

use serde::Serialize;

use crate::{
    error::SnapshotDefect,
    hand::HandednessLabel,
    iter::{zip_checked, LengthMismatch},
    landmark::{FrameOfReference, LandmarkFrame},
    Error, Result,
};

/// The landmarks and handedness of one detected hand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HandDetection {
    landmarks: LandmarkFrame,
    handedness: HandednessLabel,
}

impl HandDetection {
    #[inline]
    pub fn landmarks(&self) -> &LandmarkFrame {
        &self.landmarks
    }

    #[inline]
    pub fn handedness(&self) -> HandednessLabel {
        self.handedness
    }
}

/// The complete set of hand detections produced by one tracking tick.
///
/// Landmark frames and handedness labels are paired at construction, so a snapshot can never hold
/// landmarks without their matching label. An empty snapshot means "no hands in view", which is
/// different from having no snapshot at all (tracking has not produced anything yet).
///
/// Serialized as:
///
/// ```json
/// {
///   "frame_of_reference": "image",
///   "hands": [{ "landmarks": [[0.5, 0.5, 0.0], ...], "handedness": { "label": "Left", "score": 0.9 } }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    frame_of_reference: FrameOfReference,
    hands: Vec<HandDetection>,
    #[serde(skip)]
    frame_index: u64,
    #[serde(skip)]
    sequence: u64,
}

impl Snapshot {
    /// Creates a snapshot by pairing `landmarks[i]` with `handedness[i]`.
    ///
    /// Fails with [`Error::MalformedSnapshot`] if the two sequences differ in length or if a
    /// landmark frame is not in `frame_of_reference`.
    pub fn new(
        frame_of_reference: FrameOfReference,
        landmarks: Vec<LandmarkFrame>,
        handedness: Vec<HandednessLabel>,
    ) -> Result<Self> {
        let pairs = zip_checked(landmarks, handedness).map_err(
            |LengthMismatch { left, right }| {
                Error::MalformedSnapshot(SnapshotDefect::LengthMismatch {
                    landmarks: left,
                    handedness: right,
                })
            },
        )?;

        let mut hands = Vec::with_capacity(pairs.len());
        for (index, (landmarks, handedness)) in pairs.enumerate() {
            if landmarks.frame_of_reference() != frame_of_reference {
                return Err(Error::MalformedSnapshot(
                    SnapshotDefect::MixedFrameOfReference {
                        index,
                        expected: frame_of_reference,
                        found: landmarks.frame_of_reference(),
                    },
                ));
            }
            hands.push(HandDetection {
                landmarks,
                handedness,
            });
        }

        Ok(Self {
            frame_of_reference,
            hands,
            frame_index: 0,
            sequence: 0,
        })
    }

    /// Creates the snapshot of a tick in which no hands were detected.
    pub fn empty(frame_of_reference: FrameOfReference) -> Self {
        Self {
            frame_of_reference,
            hands: Vec::new(),
            frame_index: 0,
            sequence: 0,
        }
    }

    /// Sets the index of the camera frame this snapshot was computed from.
    pub fn with_frame_index(self, frame_index: u64) -> Self {
        Self {
            frame_index,
            ..self
        }
    }

    #[inline]
    pub fn frame_of_reference(&self) -> FrameOfReference {
        self.frame_of_reference
    }

    #[inline]
    pub fn hands(&self) -> &[HandDetection] {
        &self.hands
    }

    pub fn len(&self) -> usize {
        self.hands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }

    pub fn landmarks(&self) -> impl ExactSizeIterator<Item = &LandmarkFrame> + '_ {
        self.hands.iter().map(|hand| &hand.landmarks)
    }

    pub fn handedness(&self) -> impl ExactSizeIterator<Item = HandednessLabel> + '_ {
        self.hands.iter().map(|hand| hand.handedness)
    }

    /// Index of the camera frame this snapshot was computed from.
    #[inline]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Publish sequence number, assigned by the [`StateStore`] starting at 1.
    ///
    /// Unpublished snapshots have a sequence number of 0.
    ///
    /// [`StateStore`]: crate::store::StateStore
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}
