//! Per-frame diagnostics emitted while `debug` is enabled.

use std::{fmt, time::Duration};

use crate::{hand::LandmarkIdx, landmark::Position, snapshot::Snapshot};

/// Diagnostic information about one processed camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameDiagnostics {
    pub frame_index: u64,
    pub num_hands: usize,
    /// Wrist position of the first detected hand.
    pub wrist: Option<Position>,
    pub capture_time: Duration,
    pub inference_time: Duration,
}

impl FrameDiagnostics {
    pub fn new(snapshot: &Snapshot, capture_time: Duration, inference_time: Duration) -> Self {
        Self {
            frame_index: snapshot.frame_index(),
            num_hands: snapshot.len(),
            wrist: snapshot
                .landmarks()
                .next()
                .and_then(|frame| frame.get(LandmarkIdx::Wrist.index()))
                .map(|lm| lm.position()),
            capture_time,
            inference_time,
        }
    }
}

impl fmt::Display for FrameDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame {}: ", self.frame_index)?;
        match self.wrist {
            Some([x, y, z]) => write!(
                f,
                "{} hand(s), wrist x={}, y={}, z={}",
                self.num_hands,
                Coord(x),
                Coord(y),
                Coord(z)
            )?,
            None => f.write_str("no hand detected")?,
        }
        write!(
            f,
            " (capture {:.1}ms, inference {:.1}ms)",
            self.capture_time.as_secs_f32() * 1000.0,
            self.inference_time.as_secs_f32() * 1000.0,
        )
    }
}

/// Signed fixed-precision coordinate.
struct Coord(f32);

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+.3}", self.0)
    }
}

/// Receives frame diagnostics from the tracking loop.
///
/// Sinks run on the tracking thread and should return quickly.
pub trait DiagnosticSink: Send {
    fn frame(&mut self, diagnostics: &FrameDiagnostics);
}

impl<F: FnMut(&FrameDiagnostics) + Send> DiagnosticSink for F {
    fn frame(&mut self, diagnostics: &FrameDiagnostics) {
        self(diagnostics)
    }
}

/// The default sink: logs every frame at *debug* level.
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn frame(&mut self, diagnostics: &FrameDiagnostics) {
        log::debug!("{}", diagnostics);
    }
}
