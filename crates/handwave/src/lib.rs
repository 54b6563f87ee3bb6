//! Hand tracking widget state.
//!
//! `handwave` connects a continuously running hand tracking loop (camera + landmark detector) to
//! the consumers that read its results. The loop produces one [`Snapshot`] per tick, containing
//! the landmarks and handedness of every detected hand, and publishes it into a [`StateStore`].
//! Consumers read the latest snapshot, subscribe to changes, or derive per-hand tables through the
//! [`SnapshotAccessor`].
//!
//! Camera access and landmark inference are not implemented here. They are plugged in through the
//! [`CameraProvider`] and [`DetectorFactory`] traits.
//!
//! # Coordinates
//!
//! Landmarks are reported in one of two frames of reference (see [`FrameOfReference`]):
//!
//! * `image`: X and Y are normalized to `[0.0, 1.0]` by the image width and height, Y pointing
//!   *down*. Z is the depth relative to the wrist, using roughly the same scale as X.
//! * `world`: metric 3D coordinates with the origin at the hand's approximate geometric center.
//!
//! # Environment Variables
//!
//! Some of the [`SessionPolicy`] defaults can be overridden by setting environment variables:
//!
//! * `HANDWAVE_CAPTURE_RETRIES`: number of consecutive camera read failures after which the
//!   session gives up and reports [`Error::CameraLost`].
//! * `HANDWAVE_INFERENCE_FAILURE_LIMIT`: number of consecutive failed inferences after which the
//!   session reports [`Error::DetectorUnhealthy`]. `none` disables the limit.
//!
//! [`Snapshot`]: snapshot::Snapshot
//! [`StateStore`]: store::StateStore
//! [`SnapshotAccessor`]: accessor::SnapshotAccessor
//! [`CameraProvider`]: session::CameraProvider
//! [`DetectorFactory`]: session::DetectorFactory
//! [`FrameOfReference`]: landmark::FrameOfReference
//! [`SessionPolicy`]: config::SessionPolicy

use log::LevelFilter;

pub mod accessor;
pub mod config;
pub mod diagnostics;
mod drop;
mod error;
pub mod hand;
pub mod iter;
pub mod landmark;
pub mod remote;
pub mod resolution;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod timer;
pub mod widget;
pub mod worker;

#[cfg(test)]
mod test;

pub use error::{Error, Result, SnapshotDefect};
pub use widget::HandwaveWidget;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = LevelFilter::Debug;
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// The calling crate and `handwave` will log at *debug* level, unless overridden by `RUST_LOG`.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
