//! Landmark positions and the per-hand landmark frame.

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

/// A 3D landmark position `[x, y, z]`.
pub type Position = [f32; 3];

/// Coordinate system convention of reported landmarks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameOfReference {
    /// X and Y normalized to `[0.0, 1.0]` by the image size, Z is depth relative to the wrist.
    #[default]
    Image,
    /// Metric 3D coordinates centered on the hand.
    World,
}

impl FrameOfReference {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameOfReference::Image => "image",
            FrameOfReference::World => "world",
        }
    }
}

impl fmt::Display for FrameOfReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameOfReference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(FrameOfReference::Image),
            "world" => Ok(FrameOfReference::World),
            _ => Err(format!("expected `image` or `world`, got `{s}`")),
        }
    }
}

/// A landmark in 3D space.
#[derive(Debug, PartialEq, PartialOrd, Clone, Copy)]
pub struct Landmark {
    pos: Position,
}

impl Landmark {
    pub fn new(position: Position) -> Self {
        Self { pos: position }
    }

    #[inline]
    pub fn position(&self) -> Position {
        self.pos
    }

}

/// The ordered landmarks the detector produced for one hand.
///
/// A [`LandmarkFrame`] cannot be modified after construction. Cloning it is cheap, since the
/// positions are shared.
#[derive(Clone, PartialEq)]
pub struct LandmarkFrame {
    frame_of_reference: FrameOfReference,
    positions: Arc<[Position]>,
}

impl LandmarkFrame {
    /// Creates a landmark frame from positions in the given frame of reference.
    pub fn new<I>(frame_of_reference: FrameOfReference, positions: I) -> Self
    where
        I: IntoIterator<Item = Position>,
    {
        Self {
            frame_of_reference,
            positions: positions.into_iter().collect(),
        }
    }

    /// Creates a landmark frame with every coordinate rounded to `precision` decimal digits.
    pub fn rounded<I>(frame_of_reference: FrameOfReference, positions: I, precision: u32) -> Self
    where
        I: IntoIterator<Item = Position>,
    {
        Self::new(
            frame_of_reference,
            positions
                .into_iter()
                .map(|pos| pos.map(|coord| round_to(coord, precision))),
        )
    }

    #[inline]
    pub fn frame_of_reference(&self) -> FrameOfReference {
        self.frame_of_reference
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Landmark> {
        self.positions.get(index).copied().map(Landmark::new)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }
}

impl fmt::Debug for LandmarkFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LandmarkFrame")
            .field("frame_of_reference", &self.frame_of_reference)
            .field("len", &self.positions.len())
            .finish()
    }
}

/// Serialized as the bare list of `[x, y, z]` triples.
impl Serialize for LandmarkFrame {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.positions().serialize(serializer)
    }
}

/// Largest precision [`round_to`] rounds to. `f32` coordinates of landmark magnitude carry fewer
/// significant digits than this.
pub const MAX_PRECISION: u32 = 15;

/// Rounds `value` to `precision` decimal digits, rounding half away from zero.
///
/// Non-finite values are returned unchanged. Precisions above [`MAX_PRECISION`] are treated as
/// [`MAX_PRECISION`].
pub fn round_to(value: f32, precision: u32) -> f32 {
    if !value.is_finite() {
        return value;
    }
    // `MAX_PRECISION` fits an `i32`, and the scaled value stays finite in f64.
    let factor = 10f64.powi(precision.min(MAX_PRECISION) as i32);
    ((f64::from(value) * factor).round() / factor) as f32
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_to(0.123456, 3), 0.123);
        assert_eq!(round_to(0.12351, 3), 0.124);
        assert_eq!(round_to(-0.12351, 3), -0.124);
        assert_eq!(round_to(12.5, 0), 13.0);
        assert_relative_eq!(round_to(0.987654321, 6), 0.987654, epsilon = 1e-7);
        assert!(round_to(f32::NAN, 3).is_nan());
        assert_eq!(round_to(f32::INFINITY, 3), f32::INFINITY);
    }

    #[test]
    fn large_precision_keeps_value() {
        for value in [0.1f32, -123.456, 0.0015, 3.4e38] {
            assert_eq!(round_to(value, 16), value);
            assert_eq!(round_to(value, u32::MAX), value);
        }
        assert_eq!(round_to(1e-20, u32::MAX), round_to(1e-20, MAX_PRECISION));
    }

    #[test]
    fn rounded_frame() {
        let frame = LandmarkFrame::rounded(
            FrameOfReference::World,
            [[0.11111, 0.22222, -0.33333], [1.0, 2.0, 3.0]],
            2,
        );
        assert_eq!(frame.frame_of_reference(), FrameOfReference::World);
        assert_eq!(frame.positions(), &[[0.11, 0.22, -0.33], [1.0, 2.0, 3.0]]);
        assert_eq!(frame.get(1).unwrap().position(), [1.0, 2.0, 3.0]);
        assert!(frame.get(2).is_none());
    }

    #[test]
    fn frame_of_reference_strings() {
        assert_eq!("world".parse::<FrameOfReference>(), Ok(FrameOfReference::World));
        assert!("screen".parse::<FrameOfReference>().is_err());
        assert_eq!(
            serde_json::to_string(&FrameOfReference::Image).unwrap(),
            "\"image\""
        );
    }
}
