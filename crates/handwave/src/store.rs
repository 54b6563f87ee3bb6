//! The synced state store.
//!
//! The [`StateStore`] holds the single current value of everything a consumer can observe: the
//! [`TrackingConfig`], the latest [`Snapshot`], the [`SessionStatus`] flags and the last fatal
//! error. The tracking session is its only writer for snapshots and status; consumers write the
//! configuration.
//!
//! # Consistency
//!
//! The current snapshot is stored as an `Arc<Snapshot>` and replaced as a whole on every publish.
//! Readers clone the `Arc`, so a reader holding an old snapshot keeps a complete (if stale) one and
//! can never observe a half-written update.
//!
//! All mutations are applied and announced under one lock, so every subscriber observes changes in
//! the same order they were made.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use crossbeam::channel::{self, Receiver, RecvError, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::{
    config::{ConfigUpdate, TrackingConfig},
    remote::{self, FieldUpdate, RemoteId, RemoteObserver, RemoteSync},
    session::ControlHandle,
    snapshot::Snapshot,
    Error, Result,
};

/// The two independent session status flags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// The camera device is acquired.
    pub camera_active: bool,
    /// The tracking loop is running.
    pub is_tracking: bool,
}

/// An observable field of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Config,
    Snapshot,
    Status,
    Error,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Config, Field::Snapshot, Field::Status, Field::Error];

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A change notification.
#[derive(Debug, Clone)]
pub enum Change {
    /// The configuration was updated.
    Config(TrackingConfig),
    /// A snapshot was published.
    Snapshot(Arc<Snapshot>),
    /// A status flag changed.
    Status(SessionStatus),
    /// The tracking session stopped because of this error.
    ///
    /// This is the last notification of a session; a new one has to be started explicitly.
    Error(Arc<Error>),
}

impl Change {
    pub fn field(&self) -> Field {
        match self {
            Change::Config(_) => Field::Config,
            Change::Snapshot(_) => Field::Snapshot,
            Change::Status(_) => Field::Status,
            Change::Error(_) => Field::Error,
        }
    }
}

struct Subscriber {
    id: u64,
    fields: u8,
    sender: Sender<Change>,
}

struct Shared {
    config: RwLock<TrackingConfig>,
    /// Serializes `set_config` calls.
    config_write: Mutex<()>,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    status: RwLock<SessionStatus>,
    error: RwLock<Option<Arc<Error>>>,
    /// Held while a mutation is applied and announced.
    observers: Mutex<Observers>,
    session: Mutex<Option<ControlHandle>>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Observers {
    sequence: u64,
    subscribers: Vec<Subscriber>,
    remotes: Vec<RemoteSync>,
}

impl Observers {
    fn notify(&mut self, change: &Change, updates: Vec<FieldUpdate>) {
        let bit = change.field().bit();
        self.subscribers.retain(|sub| {
            if sub.fields & bit == 0 {
                return true;
            }
            // Unbounded, so this never blocks. It only fails if the `Subscription` is gone.
            sub.sender.send(change.clone()).is_ok()
        });
        self.mirror(updates);
    }

    fn mirror(&mut self, updates: Vec<FieldUpdate>) {
        if updates.is_empty() || self.remotes.is_empty() {
            return;
        }
        let updates: Arc<[FieldUpdate]> = updates.into();
        self.remotes.retain(|remote| remote.push(updates.clone()));
    }
}

/// Holds the current configuration, snapshot and session status.
///
/// Cloning a [`StateStore`] yields another handle to the same store.
#[derive(Clone)]
pub struct StateStore {
    shared: Arc<Shared>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Creates a store holding the default configuration and no snapshot.
    pub fn new() -> Self {
        Self::with_config(TrackingConfig::default())
    }

    /// Creates a store holding `config`.
    ///
    /// Fails with [`Error::InvalidConfig`] if `config` is invalid.
    pub fn try_with_config(config: TrackingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: TrackingConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                config_write: Mutex::new(()),
                snapshot: RwLock::new(None),
                status: RwLock::new(SessionStatus::default()),
                error: RwLock::new(None),
                observers: Mutex::new(Observers::default()),
                session: Mutex::new(None),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.shared.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the current configuration.
    pub fn config(&self) -> TrackingConfig {
        self.shared.config.read().clone()
    }

    /// Applies a partial configuration update.
    ///
    /// Every field is validated before anything is changed. If a field is out of range, this
    /// fails with [`Error::InvalidConfig`] naming it, and the store is left untouched.
    ///
    /// On success the new configuration is announced and, if a tracking session is attached, the
    /// session is reconfigured. Concurrent calls are applied one at a time.
    pub fn set_config(&self, update: &ConfigUpdate) -> Result<TrackingConfig> {
        let _write = self.shared.config_write.lock();

        let old = self.config();
        let new = old.apply(update)?;
        if new == old {
            return Ok(new);
        }

        {
            let mut observers = self.shared.observers.lock();
            *self.shared.config.write() = new.clone();
            observers.notify(
                &Change::Config(new.clone()),
                remote::config_updates(&old, &new),
            );
        }
        log::debug!("configuration changed: {:?}", old.changed_fields(&new));

        if let Some(session) = &*self.shared.session.lock() {
            session.reconfigure(new.clone());
        }
        Ok(new)
    }

    /// Returns the current snapshot, or [`None`] if none has been published yet.
    ///
    /// This only clones an [`Arc`] and never waits for the tracking loop.
    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.shared.snapshot.read().clone()
    }

    /// Replaces the current snapshot.
    ///
    /// Assigns the snapshot its sequence number and notifies every subscriber of
    /// [`Field::Snapshot`] exactly once. Returns the published snapshot.
    pub fn publish(&self, mut snapshot: Snapshot) -> Arc<Snapshot> {
        let mut observers = self.shared.observers.lock();
        observers.sequence += 1;
        snapshot.set_sequence(observers.sequence);
        let snapshot = Arc::new(snapshot);

        *self.shared.snapshot.write() = Some(snapshot.clone());
        let updates = remote::snapshot_updates(Some(&snapshot));
        observers.notify(&Change::Snapshot(snapshot.clone()), updates);
        snapshot
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.read()
    }

    /// Updates the status flags. Announced only if a flag actually changed.
    pub(crate) fn update_status(&self, f: impl FnOnce(&mut SessionStatus)) {
        let mut observers = self.shared.observers.lock();
        let mut status = self.shared.status.write();
        let old = *status;
        f(&mut status);
        let new = *status;
        drop(status);

        if old != new {
            observers.notify(&Change::Status(new), remote::status_updates(old, new));
        }
    }

    /// The error that ended the last tracking session, if it failed.
    pub fn error(&self) -> Option<Arc<Error>> {
        self.shared.error.read().clone()
    }

    /// Records the error that ended the tracking session and delivers the terminal notification.
    pub(crate) fn set_error(&self, error: Arc<Error>) {
        let mut observers = self.shared.observers.lock();
        *self.shared.error.write() = Some(error.clone());
        let update = remote::error_update(Some(&error));
        observers.notify(&Change::Error(error), vec![update]);
    }

    pub(crate) fn clear_error(&self) {
        let mut observers = self.shared.observers.lock();
        if self.shared.error.write().take().is_some() {
            observers.mirror(vec![remote::error_update(None)]);
        }
    }

    /// Subscribes to changes of the given fields.
    ///
    /// The subscription receives every matching change made after this call, in order, without
    /// coalescing. Dropping it unsubscribes.
    pub fn subscribe<I: IntoIterator<Item = Field>>(&self, fields: I) -> Subscription {
        let fields = fields.into_iter().fold(0, |mask, field| mask | field.bit());
        let (sender, receiver) = channel::unbounded();
        let id = self.next_id();
        self.shared.observers.lock().subscribers.push(Subscriber {
            id,
            fields,
            sender,
        });
        Subscription {
            id,
            receiver,
            store: Arc::downgrade(&self.shared),
        }
    }

    /// Subscribes to changes of every field.
    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(Field::ALL)
    }

    /// Attaches a remote observer that is sent every field mutation from now on.
    ///
    /// The observer is first sent the full current state. Updates are delivered on a dedicated
    /// thread through a queue of `capacity` batches; if the queue is full, updates are dropped.
    pub fn attach_remote<O: RemoteObserver>(
        &self,
        observer: O,
        capacity: usize,
    ) -> std::io::Result<RemoteId> {
        let id = RemoteId(self.next_id());
        let remote = RemoteSync::spawn(id, observer, capacity)?;

        let mut observers = self.shared.observers.lock();
        let mut initial = remote::full_config_updates(&self.shared.config.read());
        initial.extend(remote::snapshot_updates(
            self.shared.snapshot.read().as_deref(),
        ));
        initial.extend(remote::full_status_updates(*self.shared.status.read()));
        initial.push(remote::error_update(self.shared.error.read().as_deref()));
        remote.push(initial.into());
        observers.remotes.push(remote);
        Ok(id)
    }

    /// Detaches a remote observer.
    ///
    /// Updates already queued for it are still delivered. Returns `false` if no observer with this
    /// ID is attached.
    pub fn detach_remote(&self, id: RemoteId) -> bool {
        let removed = {
            let mut observers = self.shared.observers.lock();
            let Some(index) = observers.remotes.iter().position(|r| r.id() == id) else {
                return false;
            };
            observers.remotes.remove(index)
        };
        // Joins the delivery thread, so drop it outside the lock.
        drop(removed);
        true
    }

    /// Number of update batches dropped for a remote observer because its queue was full.
    pub fn remote_dropped(&self, id: RemoteId) -> Option<u64> {
        let observers = self.shared.observers.lock();
        observers
            .remotes
            .iter()
            .find(|r| r.id() == id)
            .map(|r| r.dropped())
    }

    /// Links a tracking session and returns the configuration it starts with.
    ///
    /// Every successful [`StateStore::set_config`] that does not return that configuration is
    /// forwarded to `handle`.
    pub(crate) fn attach_session(&self, handle: ControlHandle) -> TrackingConfig {
        let _write = self.shared.config_write.lock();
        *self.shared.session.lock() = Some(handle);
        self.config()
    }

    pub(crate) fn detach_session(&self) {
        self.shared.session.lock().take();
    }

    fn unsubscribe_id(shared: &Shared, id: u64) {
        shared.observers.lock().subscribers.retain(|sub| sub.id != id);
    }
}

/// A stream of [`Change`] notifications from a [`StateStore`].
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    id: u64,
    receiver: Receiver<Change>,
    store: Weak<Shared>,
}

impl Subscription {
    /// Blocks until the next change arrives.
    ///
    /// Fails only if the store has been dropped and every queued change has been received.
    pub fn recv(&self) -> Result<Change, RecvError> {
        self.receiver.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Change, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn try_recv(&self) -> Result<Change, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Returns an iterator over the changes that are already queued.
    pub fn try_iter(&self) -> impl Iterator<Item = Change> + '_ {
        self.receiver.try_iter()
    }

    /// Number of queued, unreceived changes.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Stops receiving changes. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.store.upgrade() {
            StateStore::unsubscribe_id(&shared, self.id);
        }
    }
}
