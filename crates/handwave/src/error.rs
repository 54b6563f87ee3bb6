//! The error taxonomy shared by configuration, session and store.

use crate::landmark::FrameOfReference;

/// Errors reported by `handwave`.
///
/// [`Error::InvalidConfig`] is returned synchronously by configuration updates and never touches
/// any state. The camera and detector errors are fatal to a running session: the loop stops, the
/// status flags are cleared, and the error is stored in the [`StateStore`] and delivered as a
/// terminal notification. [`Error::Inference`] and [`Error::MalformedSnapshot`] only ever cost a
/// single frame.
///
/// [`StateStore`]: crate::store::StateStore
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A configuration field is out of range.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// The camera could not be acquired.
    #[error("camera unavailable")]
    DeviceUnavailable(#[source] anyhow::Error),

    /// Reading from the camera failed too many times in a row.
    #[error("camera lost after {attempts} consecutive read failures")]
    CameraLost {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The hand detector could not be constructed with the configured parameters.
    #[error("failed to initialize hand detector")]
    DetectorInit(#[source] anyhow::Error),

    /// Landmark inference failed on a single frame.
    #[error("hand landmark inference failed")]
    Inference(#[source] anyhow::Error),

    /// Inference failed on too many consecutive frames.
    #[error("hand detector failed on {failures} consecutive frames")]
    DetectorUnhealthy {
        failures: u32,
        #[source]
        source: anyhow::Error,
    },

    /// A snapshot was assembled from inconsistent detector output.
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(SnapshotDefect),

    /// `start` was called while the tracking loop is still running.
    #[error("tracking session is already running")]
    AlreadyRunning,

    /// The tracking thread could not be spawned.
    #[error("failed to spawn tracking thread")]
    Spawn(#[source] std::io::Error),
}

impl Error {
    /// Returns whether this error ends a tracking session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceUnavailable(_)
                | Error::CameraLost { .. }
                | Error::DetectorInit(_)
                | Error::DetectorUnhealthy { .. }
        )
    }

    pub(crate) fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Error::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

/// What is wrong with a rejected snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotDefect {
    #[error("{landmarks} landmark frames but {handedness} handedness labels")]
    LengthMismatch { landmarks: usize, handedness: usize },
    #[error("landmark frame {index} is in the `{found}` frame of reference, expected `{expected}`")]
    MixedFrameOfReference {
        index: usize,
        expected: FrameOfReference,
        found: FrameOfReference,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
