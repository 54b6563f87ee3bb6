//! The hand tracking widget.

use std::sync::Arc;

use crate::{
    accessor::{HandTable, SnapshotAccessor},
    config::{ConfigUpdate, SessionPolicy, TrackingConfig},
    diagnostics::DiagnosticSink,
    remote::{RemoteId, RemoteObserver, RemoteSync},
    session::{CameraProvider, DetectorFactory, TrackingSession},
    snapshot::Snapshot,
    store::{Field, SessionStatus, StateStore, Subscription},
    Error, Result,
};

/// A hand tracking widget.
///
/// Bundles a [`StateStore`], the [`TrackingSession`] publishing into it, and a
/// [`SnapshotAccessor`] reading from it. Dropping the widget stops tracking.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use handwave::{HandwaveWidget, config::ConfigUpdate, session::{CameraProvider, DetectorFactory}};
/// # fn run(cameras: Arc<dyn CameraProvider>, detectors: Arc<dyn DetectorFactory>) -> handwave::Result<()> {
/// let mut widget = HandwaveWidget::new(cameras, detectors);
/// widget.set_config(&ConfigUpdate::default().max_num_hands(2))?;
/// widget.start()?;
///
/// if let Some(hand) = widget.hand() {
///     println!("{:?} hand, wrist at {:?}", hand.handedness, hand.table.row(0));
/// }
///
/// widget.stop();
/// # Ok(())
/// # }
/// ```
pub struct HandwaveWidget {
    store: StateStore,
    session: TrackingSession,
    accessor: SnapshotAccessor,
}

impl HandwaveWidget {
    /// Creates a widget with the default configuration and the [`SessionPolicy`] from the
    /// environment.
    pub fn new(cameras: Arc<dyn CameraProvider>, detectors: Arc<dyn DetectorFactory>) -> Self {
        Self::build(
            StateStore::new(),
            cameras,
            detectors,
            SessionPolicy::from_env(),
        )
    }

    /// Creates a widget with a custom initial configuration.
    ///
    /// Fails with [`Error::InvalidConfig`] if `config` is invalid.
    pub fn with_config(
        cameras: Arc<dyn CameraProvider>,
        detectors: Arc<dyn DetectorFactory>,
        config: TrackingConfig,
    ) -> Result<Self> {
        Ok(Self::build(
            StateStore::try_with_config(config)?,
            cameras,
            detectors,
            SessionPolicy::from_env(),
        ))
    }

    /// Creates a widget with a custom session policy, ignoring the environment.
    pub fn with_policy(
        cameras: Arc<dyn CameraProvider>,
        detectors: Arc<dyn DetectorFactory>,
        policy: SessionPolicy,
    ) -> Self {
        Self::build(StateStore::new(), cameras, detectors, policy)
    }

    fn build(
        store: StateStore,
        cameras: Arc<dyn CameraProvider>,
        detectors: Arc<dyn DetectorFactory>,
        policy: SessionPolicy,
    ) -> Self {
        Self {
            session: TrackingSession::new(store.clone(), cameras, detectors, policy),
            accessor: SnapshotAccessor::new(store.clone()),
            store,
        }
    }

    /// Starts tracking with the current configuration.
    ///
    /// See [`TrackingSession::start`].
    pub fn start(&mut self) -> Result<()> {
        self.session.start()
    }

    /// Stops tracking. Does nothing if tracking is not running.
    pub fn stop(&mut self) {
        self.session.stop();
    }

    /// Returns whether the tracking loop is running.
    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    /// Applies a partial configuration update, reconfiguring the running session.
    ///
    /// See [`StateStore::set_config`].
    pub fn set_config(&self, update: &ConfigUpdate) -> Result<TrackingConfig> {
        self.store.set_config(update)
    }

    pub fn config(&self) -> TrackingConfig {
        self.store.config()
    }

    pub fn status(&self) -> SessionStatus {
        self.store.status()
    }

    /// The error that ended the last tracking session, if any.
    pub fn error(&self) -> Option<Arc<Error>> {
        self.store.error()
    }

    /// The latest snapshot. Remains available after tracking stops.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.store.snapshot()
    }

    /// All hands of the latest snapshot. See [`SnapshotAccessor::all_hands`].
    pub fn hands(&self) -> Option<Vec<HandTable>> {
        self.accessor.all_hands()
    }

    /// The first hand of the latest snapshot. See [`SnapshotAccessor::first_hand`].
    pub fn hand(&self) -> Option<HandTable> {
        self.accessor.first_hand()
    }

    pub fn accessor(&self) -> &SnapshotAccessor {
        &self.accessor
    }

    pub fn subscribe<I: IntoIterator<Item = Field>>(&self, fields: I) -> Subscription {
        self.store.subscribe(fields)
    }

    /// Mirrors all widget state to `observer`.
    ///
    /// See [`StateStore::attach_remote`].
    pub fn attach_remote<O: RemoteObserver>(&self, observer: O) -> std::io::Result<RemoteId> {
        self.store
            .attach_remote(observer, RemoteSync::DEFAULT_CAPACITY)
    }

    pub fn detach_remote(&self, id: RemoteId) -> bool {
        self.store.detach_remote(id)
    }

    /// Replaces the sink receiving per-frame diagnostics while `debug` is enabled.
    pub fn set_diagnostic_sink<S: DiagnosticSink + 'static>(&self, sink: S) {
        self.session.set_diagnostic_sink(sink);
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }
}
