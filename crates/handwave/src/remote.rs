//! Mirroring store fields to a remote observer (the UI layer).
//!
//! Every successful mutation of the [`StateStore`] is translated into a batch of
//! [`FieldUpdate`]s, one per changed field, using the field names and JSON shapes of the widget's
//! synced traits:
//!
//! | name | value |
//! |------|-------|
//! | `frame_of_reference` ... `height` | the [`TrackingConfig`] field |
//! | `hands_data` | `[{"x": [...], "y": [...], "z": [...]}, ...]` or `null` |
//! | `handedness` | `[["Left", 0.97], ...]` or `null` |
//! | `is_tracking`, `camera_active` | booleans |
//! | `error` | error message or `null` |
//!
//! Each observer gets its own worker thread and a bounded queue. If an observer falls behind and
//! its queue fills up, further batches are dropped (and logged) until it catches up. The store
//! never waits for an observer.
//!
//! [`StateStore`]: crate::store::StateStore

use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use serde_json::Value;

use crate::{
    accessor::LandmarkTable,
    config::TrackingConfig,
    snapshot::Snapshot,
    store::SessionStatus,
    worker::{TrySendFailure, Worker},
    Error,
};

/// A new value for one synced field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub name: &'static str,
    pub value: Value,
}

impl FieldUpdate {
    pub fn new(name: &'static str, value: Value) -> Self {
        Self { name, value }
    }
}

/// Receives field updates mirrored from the store.
///
/// Each batch corresponds to one store mutation and should be applied atomically. For example, a
/// published snapshot updates `hands_data` and `handedness` in the same batch.
pub trait RemoteObserver: Send + 'static {
    fn sync(&mut self, updates: &[FieldUpdate]);
}

impl<F: FnMut(&[FieldUpdate]) + Send + 'static> RemoteObserver for F {
    fn sync(&mut self, updates: &[FieldUpdate]) {
        self(updates)
    }
}

/// Identifies an attached remote observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemoteId(pub(crate) u64);

/// A remote observer together with its delivery worker.
pub(crate) struct RemoteSync {
    id: RemoteId,
    name: String,
    worker: Worker<Arc<[FieldUpdate]>>,
    dropped: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
}

impl RemoteSync {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn spawn<O: RemoteObserver>(
        id: RemoteId,
        mut observer: O,
        capacity: usize,
    ) -> std::io::Result<Self> {
        let name = format!("remote sync {}", id.0);
        let failed = Arc::new(AtomicBool::new(false));
        let worker = Worker::builder()
            .name(name.clone())
            .capacity(capacity)
            .spawn({
                let name = name.clone();
                let failed = failed.clone();
                move |updates: Arc<[FieldUpdate]>| {
                    if failed.load(Ordering::Relaxed) {
                        return;
                    }
                    // A panicking observer must not take the store's writer down with it.
                    if catch_unwind(AssertUnwindSafe(|| observer.sync(&updates))).is_err() {
                        log::error!("{name} panicked, no further updates will be delivered");
                        failed.store(true, Ordering::Relaxed);
                    }
                }
            })?;
        Ok(Self {
            id,
            name,
            worker,
            dropped: Arc::new(AtomicU64::new(0)),
            failed,
        })
    }

    #[inline]
    pub fn id(&self) -> RemoteId {
        self.id
    }

    /// Queues a batch without blocking.
    ///
    /// Returns `false` if the observer has failed and should be detached.
    pub fn push(&self, updates: Arc<[FieldUpdate]>) -> bool {
        if self.failed.load(Ordering::Relaxed) {
            log::debug!("detaching {}", self.name);
            return false;
        }
        match self.worker.try_send(updates) {
            Ok(()) => true,
            Err(TrySendFailure::Full(updates)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!(
                    "{} is lagging behind, dropped update of {:?} ({} dropped so far)",
                    self.name,
                    updates.iter().map(|u| u.name).collect::<Vec<_>>(),
                    dropped,
                );
                true
            }
            Err(TrySendFailure::Disconnected(_)) => {
                log::debug!("{} has exited, detaching", self.name);
                false
            }
        }
    }

    /// Number of batches dropped because the observer's queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

/// Updates for every configuration field that differs between `old` and `new`.
pub fn config_updates(old: &TrackingConfig, new: &TrackingConfig) -> Vec<FieldUpdate> {
    let fields = old.changed_fields(new);
    if fields.is_empty() {
        return Vec::new();
    }
    let Value::Object(mut values) = to_value(new) else {
        return Vec::new();
    };
    fields
        .into_iter()
        .map(|name| FieldUpdate::new(name, values.remove(name).unwrap_or_default()))
        .collect()
}

/// Updates for every configuration field.
pub fn full_config_updates(config: &TrackingConfig) -> Vec<FieldUpdate> {
    let Value::Object(values) = to_value(config) else {
        return Vec::new();
    };
    TrackingConfig::FIELDS
        .iter()
        .map(|&name| FieldUpdate::new(name, values.get(name).cloned().unwrap_or_default()))
        .collect()
}

/// `hands_data` and `handedness` updates for a published snapshot.
pub fn snapshot_updates(snapshot: Option<&Snapshot>) -> Vec<FieldUpdate> {
    let (hands_data, handedness) = match snapshot {
        Some(snapshot) => (
            Value::Array(
                snapshot
                    .landmarks()
                    .map(|frame| to_value(&LandmarkTable::from_frame(frame)))
                    .collect(),
            ),
            Value::Array(
                snapshot
                    .handedness()
                    .map(|label| {
                        serde_json::json!([label.handedness().as_str(), label.score()])
                    })
                    .collect(),
            ),
        ),
        None => (Value::Null, Value::Null),
    };
    vec![
        FieldUpdate::new("hands_data", hands_data),
        FieldUpdate::new("handedness", handedness),
    ]
}

/// Updates for the status flags that differ between `old` and `new`.
pub fn status_updates(old: SessionStatus, new: SessionStatus) -> Vec<FieldUpdate> {
    let mut updates = Vec::new();
    if old.is_tracking != new.is_tracking {
        updates.push(FieldUpdate::new("is_tracking", Value::Bool(new.is_tracking)));
    }
    if old.camera_active != new.camera_active {
        updates.push(FieldUpdate::new(
            "camera_active",
            Value::Bool(new.camera_active),
        ));
    }
    updates
}

/// Updates for both status flags.
pub fn full_status_updates(status: SessionStatus) -> Vec<FieldUpdate> {
    vec![
        FieldUpdate::new("is_tracking", Value::Bool(status.is_tracking)),
        FieldUpdate::new("camera_active", Value::Bool(status.camera_active)),
    ]
}

pub fn error_update(error: Option<&Error>) -> FieldUpdate {
    FieldUpdate::new(
        "error",
        error.map_or(Value::Null, |e| Value::String(e.to_string())),
    )
}
