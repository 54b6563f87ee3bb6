//! Tracking configuration and session policy.

use std::{env, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{landmark::FrameOfReference, resolution::Resolution, Error, Result};

/// Landmark model variant.
///
/// The full model is more accurate but takes longer to infer than the lite model.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ModelComplexity {
    Lite,
    #[default]
    Full,
}

impl TryFrom<u8> for ModelComplexity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ModelComplexity::Lite),
            1 => Ok(ModelComplexity::Full),
            _ => Err(format!("must be 0 or 1, got {value}")),
        }
    }
}

impl From<ModelComplexity> for u8 {
    fn from(value: ModelComplexity) -> u8 {
        match value {
            ModelComplexity::Lite => 0,
            ModelComplexity::Full => 1,
        }
    }
}

/// The complete, validated tracking configuration.
///
/// A [`TrackingConfig`] obtained from this crate always satisfies the field constraints checked
/// by [`TrackingConfig::validate`]. Changes are made through [`ConfigUpdate`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub frame_of_reference: FrameOfReference,
    /// Maximum number of hands reported per snapshot. At least 1.
    pub max_num_hands: u32,
    pub model_complexity: ModelComplexity,
    /// In `[0.0, 1.0]`.
    pub min_detection_confidence: f32,
    /// In `[0.0, 1.0]`.
    pub min_tracking_confidence: f32,
    /// Number of decimal digits landmark coordinates are rounded to.
    ///
    /// Any value is accepted. Rounding is capped at [`MAX_PRECISION`] digits.
    ///
    /// [`MAX_PRECISION`]: crate::landmark::MAX_PRECISION
    pub precision: u32,
    /// Enables per-frame diagnostics.
    pub debug: bool,
    /// Capture width in pixels. Nonzero.
    pub width: u32,
    /// Capture height in pixels. Nonzero.
    pub height: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            frame_of_reference: FrameOfReference::Image,
            max_num_hands: 1,
            model_complexity: ModelComplexity::Full,
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            precision: 3,
            debug: true,
            width: Resolution::RES_480P.width(),
            height: Resolution::RES_480P.height(),
        }
    }
}

impl TrackingConfig {
    /// Checks every field against its domain, reporting the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_num_hands < 1 {
            return Err(Error::invalid_config("max_num_hands", "must be at least 1"));
        }
        validate_confidence("min_detection_confidence", self.min_detection_confidence)?;
        validate_confidence("min_tracking_confidence", self.min_tracking_confidence)?;
        if self.width == 0 {
            return Err(Error::invalid_config("width", "must be greater than 0"));
        }
        if self.height == 0 {
            return Err(Error::invalid_config("height", "must be greater than 0"));
        }
        Ok(())
    }

    /// Returns the configuration with `update` applied, or the first validation error.
    ///
    /// `self` is never modified.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<TrackingConfig> {
        let mut config = self.clone();
        if let Some(v) = update.frame_of_reference {
            config.frame_of_reference = v;
        }
        if let Some(v) = update.max_num_hands {
            config.max_num_hands = v;
        }
        if let Some(v) = update.model_complexity {
            config.model_complexity = v;
        }
        if let Some(v) = update.min_detection_confidence {
            config.min_detection_confidence = v;
        }
        if let Some(v) = update.min_tracking_confidence {
            config.min_tracking_confidence = v;
        }
        if let Some(v) = update.precision {
            config.precision = v;
        }
        if let Some(v) = update.debug {
            config.debug = v;
        }
        if let Some(v) = update.width {
            config.width = v;
        }
        if let Some(v) = update.height {
            config.height = v;
        }
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// The subset of the configuration the hand detector is constructed with.
    pub fn detector_params(&self) -> DetectorParams {
        DetectorParams {
            max_num_hands: self.max_num_hands,
            model_complexity: self.model_complexity,
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
        }
    }

    /// Determines which session resources have to be rebuilt to go from `self` to `new`.
    pub fn changes(&self, new: &TrackingConfig) -> Reconfiguration {
        Reconfiguration {
            detector: self.detector_params() != new.detector_params(),
            camera: self.resolution() != new.resolution(),
        }
    }
}

/// Defines the field name list and the field-wise comparison from a single list of fields.
macro_rules! config_fields {
    ($($field:ident),+ $(,)?) => {
        impl TrackingConfig {
            /// Names of all fields, in declaration order.
            pub const FIELDS: &'static [&'static str] = &[$(stringify!($field)),+];

            /// Names of the fields that differ between `self` and `other`.
            pub fn changed_fields(&self, other: &TrackingConfig) -> Vec<&'static str> {
                let mut fields = Vec::new();
                $(
                    if self.$field != other.$field {
                        fields.push(stringify!($field));
                    }
                )+
                fields
            }
        }
    };
}

config_fields!(
    frame_of_reference,
    max_num_hands,
    model_complexity,
    min_detection_confidence,
    min_tracking_confidence,
    precision,
    debug,
    width,
    height,
);

fn validate_confidence(field: &'static str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::invalid_config(
            field,
            format!("must be in [0, 1], got {value}"),
        ));
    }
    Ok(())
}

/// Parameters the hand detector is constructed with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    pub max_num_hands: u32,
    pub model_complexity: ModelComplexity,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
}

/// Session resources affected by a configuration change.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Reconfiguration {
    /// The detector has to be recreated.
    pub detector: bool,
    /// The camera has to be reacquired.
    pub camera: bool,
}

/// A partial configuration change.
///
/// Fields left unset keep their current value.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub frame_of_reference: Option<FrameOfReference>,
    pub max_num_hands: Option<u32>,
    pub model_complexity: Option<ModelComplexity>,
    pub min_detection_confidence: Option<f32>,
    pub min_tracking_confidence: Option<f32>,
    pub precision: Option<u32>,
    pub debug: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ConfigUpdate {
    /// Creates an update that sets every field to the value in `config`.
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self {
            frame_of_reference: Some(config.frame_of_reference),
            max_num_hands: Some(config.max_num_hands),
            model_complexity: Some(config.model_complexity),
            min_detection_confidence: Some(config.min_detection_confidence),
            min_tracking_confidence: Some(config.min_tracking_confidence),
            precision: Some(config.precision),
            debug: Some(config.debug),
            width: Some(config.width),
            height: Some(config.height),
        }
    }

    #[inline]
    pub fn frame_of_reference(self, frame_of_reference: FrameOfReference) -> Self {
        Self {
            frame_of_reference: Some(frame_of_reference),
            ..self
        }
    }

    #[inline]
    pub fn max_num_hands(self, max_num_hands: u32) -> Self {
        Self {
            max_num_hands: Some(max_num_hands),
            ..self
        }
    }

    #[inline]
    pub fn model_complexity(self, model_complexity: ModelComplexity) -> Self {
        Self {
            model_complexity: Some(model_complexity),
            ..self
        }
    }

    #[inline]
    pub fn min_detection_confidence(self, confidence: f32) -> Self {
        Self {
            min_detection_confidence: Some(confidence),
            ..self
        }
    }

    #[inline]
    pub fn min_tracking_confidence(self, confidence: f32) -> Self {
        Self {
            min_tracking_confidence: Some(confidence),
            ..self
        }
    }

    #[inline]
    pub fn precision(self, precision: u32) -> Self {
        Self {
            precision: Some(precision),
            ..self
        }
    }

    #[inline]
    pub fn debug(self, debug: bool) -> Self {
        Self {
            debug: Some(debug),
            ..self
        }
    }

    /// Sets both capture dimensions.
    #[inline]
    pub fn resolution(self, resolution: Resolution) -> Self {
        Self {
            width: Some(resolution.width()),
            height: Some(resolution.height()),
            ..self
        }
    }

    #[inline]
    pub fn width(self, width: u32) -> Self {
        Self {
            width: Some(width),
            ..self
        }
    }

    #[inline]
    pub fn height(self, height: u32) -> Self {
        Self {
            height: Some(height),
            ..self
        }
    }

    /// Returns whether the update sets no field.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Failure handling policy of a tracking session.
///
/// Unlike [`TrackingConfig`], the policy is fixed for the lifetime of a session and is not
/// mirrored to remote observers.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    /// Consecutive camera read failures after which the camera is considered lost.
    pub capture_retries: u32,
    /// Delay before the first capture retry. Doubled for each further retry, up to
    /// [`SessionPolicy::MAX_RETRY_BACKOFF`].
    pub retry_backoff: Duration,
    /// Consecutive inference failures after which the detector is considered unhealthy.
    ///
    /// `None` skips failed frames forever.
    pub inference_failure_limit: Option<u32>,
    /// Whether the detector classifies handedness assuming a mirrored (selfie) image.
    ///
    /// If set, reported handedness is flipped so that it refers to the user's actual hand.
    pub mirrored_input: bool,
}

const ENV_VAR_CAPTURE_RETRIES: &str = "HANDWAVE_CAPTURE_RETRIES";
const ENV_VAR_INFERENCE_FAILURE_LIMIT: &str = "HANDWAVE_INFERENCE_FAILURE_LIMIT";

impl SessionPolicy {
    pub const DEFAULT_CAPTURE_RETRIES: u32 = 5;

    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(20);

    pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(1);

    pub const DEFAULT_INFERENCE_FAILURE_LIMIT: u32 = 50;

    /// Returns the default policy, with overrides from the `HANDWAVE_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut policy = Self::default();
        if let Some(retries) = env_override::<u32>(ENV_VAR_CAPTURE_RETRIES) {
            policy.capture_retries = retries;
        }
        if let Ok(value) = env::var(ENV_VAR_INFERENCE_FAILURE_LIMIT) {
            if value.eq_ignore_ascii_case("none") {
                policy.inference_failure_limit = None;
            } else if let Some(limit) = parse_override::<u32>(ENV_VAR_INFERENCE_FAILURE_LIMIT, &value)
            {
                policy.inference_failure_limit = Some(limit);
            }
        }
        policy
    }

    /// Backoff before retry number `attempt` (starting at 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(1 << shift)
            .min(Self::MAX_RETRY_BACKOFF)
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            capture_retries: Self::DEFAULT_CAPTURE_RETRIES,
            retry_backoff: Self::DEFAULT_RETRY_BACKOFF,
            inference_failure_limit: Some(Self::DEFAULT_INFERENCE_FAILURE_LIMIT),
            mirrored_input: true,
        }
    }
}

fn env_override<T: FromStr>(var: &str) -> Option<T> {
    let value = env::var(var).ok()?;
    parse_override(var, &value)
}

fn parse_override<T: FromStr>(var: &str, value: &str) -> Option<T> {
    match value.trim().parse() {
        Ok(v) => {
            log::debug!("policy override: `{}` is set to '{}'", var, value);
            Some(v)
        }
        Err(_) => {
            log::warn!("ignoring invalid value '{}' for `{}`", value, var);
            None
        }
    }
}
