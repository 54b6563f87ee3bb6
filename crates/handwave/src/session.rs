//! The tracking session: a dedicated thread running capture, detection and publishing.
//!
//! The session owns the camera and the hand detector for as long as it runs. Both are obtained
//! from user-supplied capabilities ([`CameraProvider`] and [`DetectorFactory`]), so the session
//! itself does not depend on any particular camera API or landmark model.
//!
//! Every tick of the loop captures one [`Frame`], runs the detector on it, and publishes the
//! result to the [`StateStore`] as a single [`Snapshot`]. Stopping and reconfiguration requests
//! are delivered to the loop over a channel and applied between ticks, so they never affect a
//! snapshot that is already being computed.

use std::{
    fmt,
    panic::resume_unwind,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::{
    config::{ConfigUpdate, DetectorParams, SessionPolicy, TrackingConfig},
    diagnostics::{DiagnosticSink, FrameDiagnostics, LogSink},
    drop::defer,
    hand::HandednessLabel,
    landmark::LandmarkFrame,
    resolution::Resolution,
    snapshot::Snapshot,
    store::{SessionStatus, StateStore},
    timer::{FpsCounter, Timer},
    worker::{promise, Promise},
    Error, Result,
};

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    index: u64,
    resolution: Resolution,
    data: Arc<[u8]>,
}

impl Frame {
    /// Creates a frame from raw image data.
    ///
    /// The pixel format of `data` is an agreement between the [`Camera`] and the [`HandDetector`]
    /// in use; the session never looks at it.
    pub fn new<D: Into<Arc<[u8]>>>(index: u64, resolution: Resolution, data: D) -> Self {
        Self {
            index,
            resolution,
            data: data.into(),
        }
    }

    /// The index of this frame in the camera's stream.
    #[inline]
    pub fn index(&self) -> u64 {
        self.index
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("resolution", &self.resolution)
            .field("len", &self.data.len())
            .finish()
    }
}

/// An open camera device.
///
/// Dropping the camera releases the device.
pub trait Camera: Send {
    /// Reads the next frame, blocking until one is available.
    fn read(&mut self) -> anyhow::Result<Frame>;
}

/// Opens cameras.
pub trait CameraProvider: Send + Sync {
    /// Acquires the camera and configures it to capture at `resolution`.
    ///
    /// This is called on the tracking thread and may block while the device initializes.
    fn open(&self, resolution: Resolution) -> anyhow::Result<Box<dyn Camera>>;
}

/// One hand found by a [`HandDetector`].
#[derive(Debug, Clone)]
pub struct RawHand {
    /// The hand's landmarks, in the configured frame of reference.
    pub landmarks: LandmarkFrame,
    pub handedness: HandednessLabel,
}

/// A hand landmark model.
pub trait HandDetector: Send {
    /// Finds hands in `frame`.
    ///
    /// Finding no hands is not an error and returns an empty list. Hands should be returned in
    /// descending order of confidence; the session keeps the first `max_num_hands` of them.
    fn detect(&mut self, frame: &Frame, config: &TrackingConfig) -> anyhow::Result<Vec<RawHand>>;
}

/// Constructs [`HandDetector`]s.
pub trait DetectorFactory: Send + Sync {
    fn create(&self, params: &DetectorParams) -> anyhow::Result<Box<dyn HandDetector>>;
}

enum Control {
    Reconfigure(TrackingConfig),
    Stop,
}

/// Lets the [`StateStore`] forward configuration changes to a running session.
#[derive(Clone)]
pub(crate) struct ControlHandle {
    sender: Sender<Control>,
}

impl ControlHandle {
    pub(crate) fn reconfigure(&self, config: TrackingConfig) {
        // Fails only if the loop has already exited, in which case there is nothing to update.
        self.sender.send(Control::Reconfigure(config)).ok();
    }
}

struct Running {
    control: ControlHandle,
    thread: JoinHandle<()>,
}

/// Runs the capture-detect-publish loop on a dedicated thread.
///
/// A session can be started and stopped any number of times. Dropping it stops the loop.
pub struct TrackingSession {
    store: StateStore,
    cameras: Arc<dyn CameraProvider>,
    detectors: Arc<dyn DetectorFactory>,
    policy: SessionPolicy,
    sink: Arc<Mutex<Box<dyn DiagnosticSink>>>,
    running: Option<Running>,
}

impl TrackingSession {
    /// Creates a session that publishes to `store`.
    ///
    /// Nothing is acquired until [`TrackingSession::start`] is called.
    pub fn new(
        store: StateStore,
        cameras: Arc<dyn CameraProvider>,
        detectors: Arc<dyn DetectorFactory>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            store,
            cameras,
            detectors,
            policy,
            sink: Arc::new(Mutex::new(Box::new(LogSink))),
            running: None,
        }
    }

    /// Replaces the sink receiving per-frame diagnostics while `debug` is enabled.
    ///
    /// Takes effect on the next frame, even if the session is running.
    pub fn set_diagnostic_sink<S: DiagnosticSink + 'static>(&self, sink: S) {
        *self.sink.lock() = Box::new(sink);
    }

    #[inline]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    #[inline]
    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Returns whether the tracking loop is running.
    ///
    /// This becomes `false` when the session is stopped and when the loop ends because of a fatal
    /// error.
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.thread.is_finished())
    }

    /// Acquires the camera and detector and starts the tracking loop with the store's current
    /// configuration.
    ///
    /// Blocks until the loop thread has acquired both. On success, `camera_active` and
    /// `is_tracking` are set and any error left over from a previous session is cleared.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyRunning`] if the loop is still running.
    /// - [`Error::DeviceUnavailable`] if the camera cannot be acquired.
    /// - [`Error::DetectorInit`] if the detector cannot be constructed.
    /// - [`Error::Spawn`] if the loop thread cannot be created.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }
        // The loop of a previous session may have ended on its own; reap its thread.
        self.stop();

        let (sender, receiver) = channel::unbounded();
        let control = ControlHandle { sender };
        // Every configuration change made after this point is forwarded to the loop and applied
        // on its first tick.
        let config = self.store.attach_session(control.clone());

        let (started, start_handle) = promise();
        let tracking = TrackingLoop {
            store: self.store.clone(),
            cameras: self.cameras.clone(),
            detectors: self.detectors.clone(),
            policy: self.policy.clone(),
            sink: self.sink.clone(),
            control: receiver,
            config,
            camera: None,
            detector: None,
            t_capture: Timer::new("capture"),
            t_infer: Timer::new("inference"),
            fps: FpsCounter::new("hand tracking"),
        };

        let thread = thread::Builder::new()
            .name("hand tracking".into())
            .spawn(move || tracking.run(started))
            .map_err(|e| {
                self.store.detach_session();
                Error::Spawn(e)
            })?;

        match start_handle.block() {
            Ok(Ok(())) => {
                self.running = Some(Running { control, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                self.store.detach_session();
                join(thread);
                Err(e)
            }
            Err(_) => {
                // The loop thread panicked during start-up.
                self.store.detach_session();
                join(thread);
                unreachable!("tracking thread dropped its start-up promise without panicking");
            }
        }
    }

    /// Stops the tracking loop and releases the camera and detector.
    ///
    /// The loop finishes the frame it is working on first. When this returns, `is_tracking` and
    /// `camera_active` are both `false`. Calling `stop` on a stopped session does nothing.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.store.detach_session();
        running.control.sender.send(Control::Stop).ok();
        join(running.thread);
    }

    /// Replaces the whole configuration, reconfiguring the loop if it is running.
    ///
    /// The configuration is stored in the [`StateStore`] like any other change. Only the resources
    /// affected by the change are rebuilt: the detector if any of its [`DetectorParams`] changed,
    /// the camera if the resolution changed. The change takes effect between two ticks. If
    /// rebuilding fails, the session ends with the corresponding error.
    pub fn reconfigure(&self, config: &TrackingConfig) -> Result<()> {
        self.store.set_config(&ConfigUpdate::from_config(config))?;
        Ok(())
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Joins `thread`, forwarding its panic.
fn join(thread: JoinHandle<()>) {
    if let Err(payload) = thread.join() {
        if !thread::panicking() {
            resume_unwind(payload);
        }
    }
}

/// What the loop does after handling a control message.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// State owned by the tracking thread.
struct TrackingLoop {
    store: StateStore,
    cameras: Arc<dyn CameraProvider>,
    detectors: Arc<dyn DetectorFactory>,
    policy: SessionPolicy,
    sink: Arc<Mutex<Box<dyn DiagnosticSink>>>,
    control: Receiver<Control>,
    config: TrackingConfig,
    camera: Option<Box<dyn Camera>>,
    detector: Option<Box<dyn HandDetector>>,
    t_capture: Timer,
    t_infer: Timer,
    fps: FpsCounter,
}

impl TrackingLoop {
    fn run(mut self, started: Promise<Result<()>>) {
        log::trace!("tracking thread starting");
        let _guard = defer(|| log::trace!("tracking thread exiting"));

        if let Err(e) = self.acquire() {
            log::error!("failed to start tracking: {}", e);
            started.fulfill(Err(e));
            return;
        }

        // If the loop panics, at least don't leave the flags claiming that it is running.
        let store = self.store.clone();
        let _status = defer(move || store.update_status(|s| *s = SessionStatus::default()));

        self.store.clear_error();
        self.store.update_status(|s| s.camera_active = true);
        self.store.update_status(|s| s.is_tracking = true);
        log::info!(
            "tracking started at {} (max_num_hands={}, model_complexity={:?})",
            self.config.resolution(),
            self.config.max_num_hands,
            self.config.model_complexity,
        );
        started.fulfill(Ok(()));

        let result = self.track();

        self.release();
        match result {
            Ok(()) => log::info!("tracking stopped"),
            Err(e) => {
                log::error!("tracking stopped: {}", error_chain(&e));
                self.store.set_error(Arc::new(e));
            }
        }
    }

    /// Opens the camera, then constructs the detector.
    fn acquire(&mut self) -> Result<()> {
        let camera = self
            .cameras
            .open(self.config.resolution())
            .map_err(Error::DeviceUnavailable)?;
        let detector = self
            .detectors
            .create(&self.config.detector_params())
            .map_err(Error::DetectorInit)?;
        self.camera = Some(camera);
        self.detector = Some(detector);
        Ok(())
    }

    /// Releases the detector, then the camera, clearing the status flags in the same order.
    fn release(&mut self) {
        self.detector = None;
        self.store.update_status(|s| s.is_tracking = false);
        self.camera = None;
        self.store.update_status(|s| s.camera_active = false);
    }

    fn track(&mut self) -> Result<()> {
        let mut capture_failures = 0;
        let mut inference_failures = 0;

        loop {
            loop {
                let flow = match self.control.try_recv() {
                    Ok(control) => self.apply(control)?,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => Flow::Stop,
                };
                if flow == Flow::Stop {
                    return Ok(());
                }
            }

            let (Some(camera), Some(detector)) = (&mut self.camera, &mut self.detector) else {
                return Ok(());
            };

            let frame = match self.t_capture.time(|| camera.read()) {
                Ok(frame) => {
                    capture_failures = 0;
                    frame
                }
                Err(e) => {
                    capture_failures += 1;
                    if capture_failures >= self.policy.capture_retries {
                        return Err(Error::CameraLost {
                            attempts: capture_failures,
                            source: e,
                        });
                    }
                    let backoff = self.policy.backoff(capture_failures);
                    log::warn!(
                        "camera read failed ({}/{}), retrying in {:?}: {:#}",
                        capture_failures,
                        self.policy.capture_retries,
                        backoff,
                        e,
                    );
                    if self.wait(backoff)? == Flow::Stop {
                        return Ok(());
                    }
                    continue;
                }
            };

            let config = &self.config;
            let hands = match self.t_infer.time(|| detector.detect(&frame, config)) {
                Ok(hands) => {
                    inference_failures = 0;
                    hands
                }
                Err(e) => {
                    inference_failures += 1;
                    if let Some(limit) = self.policy.inference_failure_limit {
                        if inference_failures >= limit {
                            return Err(Error::DetectorUnhealthy {
                                failures: inference_failures,
                                source: e,
                            });
                        }
                    }
                    log::warn!(
                        "skipping frame {}: {}",
                        frame.index(),
                        error_chain(&Error::Inference(e)),
                    );
                    continue;
                }
            };

            let snapshot = match self.assemble(frame.index(), hands) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    log::error!("skipping frame {}: {}", frame.index(), e);
                    continue;
                }
            };
            let snapshot = self.store.publish(snapshot);

            if self.config.debug {
                let diagnostics =
                    FrameDiagnostics::new(&snapshot, self.t_capture.last(), self.t_infer.last());
                self.sink.lock().frame(&diagnostics);
                self.fps.tick_with([&self.t_capture, &self.t_infer]);
            }
        }
    }

    /// Turns detector output into a snapshot according to the current configuration.
    fn assemble(&self, frame_index: u64, hands: Vec<RawHand>) -> Result<Snapshot> {
        let config = &self.config;
        let max_hands = config.max_num_hands as usize;
        if hands.len() > max_hands {
            log::trace!(
                "detector returned {} hands, keeping {}",
                hands.len(),
                max_hands
            );
        }

        let (landmarks, handedness): (Vec<_>, Vec<_>) = hands
            .into_iter()
            .take(max_hands)
            .map(|hand| {
                let landmarks = LandmarkFrame::rounded(
                    hand.landmarks.frame_of_reference(),
                    hand.landmarks.positions().iter().copied(),
                    config.precision,
                );
                let handedness = if self.policy.mirrored_input {
                    hand.handedness.flipped()
                } else {
                    hand.handedness
                };
                (landmarks, handedness)
            })
            .unzip();

        Ok(Snapshot::new(config.frame_of_reference, landmarks, handedness)?
            .with_frame_index(frame_index))
    }

    /// Waits for up to `timeout`, handling a control message if one arrives.
    fn wait(&mut self, timeout: Duration) -> Result<Flow> {
        match self.control.recv_timeout(timeout) {
            Ok(control) => self.apply(control),
            Err(RecvTimeoutError::Timeout) => Ok(Flow::Continue),
            Err(RecvTimeoutError::Disconnected) => Ok(Flow::Stop),
        }
    }

    fn apply(&mut self, control: Control) -> Result<Flow> {
        match control {
            Control::Stop => Ok(Flow::Stop),
            Control::Reconfigure(config) => {
                self.reconfigure(config)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn reconfigure(&mut self, config: TrackingConfig) -> Result<()> {
        let changes = self.config.changes(&config);
        if changes.detector {
            log::debug!("recreating hand detector: {:?}", config.detector_params());
            self.detector = None;
            let detector = self
                .detectors
                .create(&config.detector_params())
                .map_err(Error::DetectorInit)?;
            self.detector = Some(detector);
        }
        if changes.camera {
            // On failure the loop ends and `release` clears the status flags.
            log::debug!("reopening camera at {}", config.resolution());
            self.camera = None;
            let camera = self
                .cameras
                .open(config.resolution())
                .map_err(Error::DeviceUnavailable)?;
            self.camera = Some(camera);
        }
        self.config = config;
        Ok(())
    }
}

/// Formats an error together with all of its sources.
fn error_chain(error: &Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
