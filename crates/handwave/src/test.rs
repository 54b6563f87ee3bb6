//! Scripted cameras and detectors shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use anyhow::bail;
use parking_lot::Mutex;

use crate::{
    config::{DetectorParams, SessionPolicy, TrackingConfig},
    hand::{Handedness, HandednessLabel, NUM_LANDMARKS},
    landmark::{FrameOfReference, LandmarkFrame},
    resolution::Resolution,
    session::{Camera, CameraProvider, DetectorFactory, Frame, HandDetector, RawHand, TrackingSession},
    snapshot::Snapshot,
    store::StateStore,
};

/// A hand whose landmarks all share the X coordinate `x`.
///
/// Every coordinate has at most 3 decimal digits, so the frame is unchanged by the default
/// rounding.
pub fn hand_frame(x: f32) -> LandmarkFrame {
    LandmarkFrame::new(
        FrameOfReference::Image,
        (0..NUM_LANDMARKS).map(|i| [x, i as f32 / 20.0, -(i as f32) / 100.0]),
    )
}

pub fn raw_hand(x: f32, handedness: Handedness) -> RawHand {
    RawHand {
        landmarks: hand_frame(x),
        handedness: HandednessLabel::new(handedness, 0.75),
    }
}

/// A left hand at `x = 0.25` and a right hand at `x = 0.75`.
pub fn two_hands() -> Snapshot {
    Snapshot::new(
        FrameOfReference::Image,
        vec![hand_frame(0.25), hand_frame(0.75)],
        vec![
            HandednessLabel::new(Handedness::Left, 0.75),
            HandednessLabel::new(Handedness::Right, 0.75),
        ],
    )
    .unwrap()
}

/// Polls `cond` until it holds, panicking after 5 seconds.
#[track_caller]
pub fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Creates a store and a session using the scripted capabilities.
pub fn scripted_session(
    camera: &ScriptedCamera,
    detector: &ScriptedDetector,
    policy: SessionPolicy,
) -> (StateStore, TrackingSession) {
    let store = StateStore::new();
    let session = TrackingSession::new(
        store.clone(),
        Arc::new(camera.clone()),
        Arc::new(detector.clone()),
        policy,
    );
    (store, session)
}

/// Outcome of one camera read.
#[derive(Debug, Clone, Copy)]
pub enum Read {
    Frame,
    Fail,
}

#[derive(Default)]
struct CameraState {
    script: VecDeque<Read>,
    /// Read outcome once the script is exhausted.
    then: Option<Read>,
    fail_open: bool,
    open: usize,
    total_opened: usize,
    last_resolution: Option<Resolution>,
    next_index: u64,
    failed_reads: usize,
}

/// A [`CameraProvider`] whose reads follow a script.
#[derive(Clone)]
pub struct ScriptedCamera {
    state: Arc<Mutex<CameraState>>,
}

impl ScriptedCamera {
    /// Plays `script`, then fails every read.
    pub fn new<I: IntoIterator<Item = Read>>(script: I) -> Self {
        Self {
            state: Arc::new(Mutex::new(CameraState {
                script: script.into_iter().collect(),
                then: Some(Read::Fail),
                ..CameraState::default()
            })),
        }
    }

    /// Yields frames forever.
    pub fn endless() -> Self {
        Self::new([]).recovered()
    }

    fn recovered(self) -> Self {
        self.recover();
        self
    }

    /// Yields frames forever from now on.
    pub fn recover(&self) {
        let mut state = self.state.lock();
        state.script.clear();
        state.then = Some(Read::Frame);
    }

    pub fn fail_open(&self) {
        self.state.lock().fail_open = true;
    }

    /// Number of devices currently open.
    pub fn open_count(&self) -> usize {
        self.state.lock().open
    }

    pub fn total_opened(&self) -> usize {
        self.state.lock().total_opened
    }

    pub fn last_resolution(&self) -> Option<Resolution> {
        self.state.lock().last_resolution
    }

    pub fn failed_reads(&self) -> usize {
        self.state.lock().failed_reads
    }
}

impl CameraProvider for ScriptedCamera {
    fn open(&self, resolution: Resolution) -> anyhow::Result<Box<dyn Camera>> {
        let mut state = self.state.lock();
        if state.fail_open {
            bail!("no such device");
        }
        state.open += 1;
        state.total_opened += 1;
        state.last_resolution = Some(resolution);
        Ok(Box::new(ScriptedDevice {
            state: self.state.clone(),
            resolution,
        }))
    }
}

struct ScriptedDevice {
    state: Arc<Mutex<CameraState>>,
    resolution: Resolution,
}

impl Camera for ScriptedDevice {
    fn read(&mut self) -> anyhow::Result<Frame> {
        // Roughly pace the loop instead of spinning.
        thread::sleep(Duration::from_millis(1));
        let mut state = self.state.lock();
        let read = match state.script.pop_front() {
            Some(read) => read,
            None => state.then.unwrap_or(Read::Fail),
        };
        match read {
            Read::Frame => {
                let index = state.next_index;
                state.next_index += 1;
                Ok(Frame::new(index, self.resolution, vec![0; 4]))
            }
            Read::Fail => {
                state.failed_reads += 1;
                bail!("device disconnected")
            }
        }
    }
}

impl Drop for ScriptedDevice {
    fn drop(&mut self) {
        self.state.lock().open -= 1;
    }
}

#[derive(Default)]
struct DetectorState {
    script: VecDeque<Vec<RawHand>>,
    repeat: Option<Vec<RawHand>>,
    fail_next: u32,
    fail_create: bool,
    created: usize,
    last_params: Option<DetectorParams>,
    last_config: Option<TrackingConfig>,
}

/// A [`DetectorFactory`] whose detectors return scripted hands.
#[derive(Clone)]
pub struct ScriptedDetector {
    state: Arc<Mutex<DetectorState>>,
}

impl ScriptedDetector {
    /// Returns each entry of `script` once, then no hands.
    pub fn new<I: IntoIterator<Item = Vec<RawHand>>>(script: I) -> Self {
        Self {
            state: Arc::new(Mutex::new(DetectorState {
                script: script.into_iter().collect(),
                ..DetectorState::default()
            })),
        }
    }

    /// Returns `hands` for every frame.
    pub fn repeat(hands: Vec<RawHand>) -> Self {
        let this = Self::new([]);
        this.state.lock().repeat = Some(hands);
        this
    }

    /// Makes the next `n` inferences fail.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    pub fn fail_create(&self) {
        self.state.lock().fail_create = true;
    }

    /// Number of detectors created so far.
    pub fn created(&self) -> usize {
        self.state.lock().created
    }

    pub fn last_params(&self) -> Option<DetectorParams> {
        self.state.lock().last_params
    }

    /// The configuration the most recent frame was processed with.
    pub fn last_config(&self) -> Option<TrackingConfig> {
        self.state.lock().last_config.clone()
    }
}

impl DetectorFactory for ScriptedDetector {
    fn create(&self, params: &DetectorParams) -> anyhow::Result<Box<dyn HandDetector>> {
        let mut state = self.state.lock();
        if state.fail_create {
            bail!("model file not found");
        }
        state.created += 1;
        state.last_params = Some(*params);
        Ok(Box::new(ScriptedModel {
            state: self.state.clone(),
        }))
    }
}

struct ScriptedModel {
    state: Arc<Mutex<DetectorState>>,
}

impl HandDetector for ScriptedModel {
    fn detect(&mut self, _: &Frame, config: &TrackingConfig) -> anyhow::Result<Vec<RawHand>> {
        let mut state = self.state.lock();
        state.last_config = Some(config.clone());
        if state.fail_next > 0 {
            state.fail_next -= 1;
            bail!("inference failed");
        }
        if let Some(hands) = state.script.pop_front() {
            return Ok(hands);
        }
        Ok(state.repeat.clone().unwrap_or_default())
    }
}
