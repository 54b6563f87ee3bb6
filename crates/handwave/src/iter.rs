//! Iterator helpers for pairing sequences that must have equal lengths.

use std::iter::Zip;

/// Error returned by [`zip_checked`] when the two sequences differ in length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub left: usize,
    pub right: usize,
}

/// A variant of [`Iterator::zip`] that refuses to pair sequences of different lengths.
///
/// [`Iterator::zip`] silently stops at the end of the shorter iterator, which would pair landmark
/// frames with the wrong handedness labels (or drop some) if the detector output is inconsistent.
pub fn zip_checked<A, B>(a: A, b: B) -> Result<Zip<A::IntoIter, B::IntoIter>, LengthMismatch>
where
    A: IntoIterator,
    B: IntoIterator,
    A::IntoIter: ExactSizeIterator,
    B::IntoIter: ExactSizeIterator,
{
    let a = a.into_iter();
    let b = b.into_iter();
    if a.len() != b.len() {
        return Err(LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    Ok(a.zip(b))
}
