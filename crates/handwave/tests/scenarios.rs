use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::bail;
use approx::assert_relative_eq;
use parking_lot::Mutex;

use handwave::{
    config::{ConfigUpdate, DetectorParams, SessionPolicy, TrackingConfig},
    hand::{Handedness, HandednessLabel},
    landmark::{FrameOfReference, LandmarkFrame},
    remote::FieldUpdate,
    resolution::Resolution,
    session::{Camera, CameraProvider, DetectorFactory, Frame, HandDetector, RawHand},
    store::{Change, Field, SessionStatus, Subscription},
    Error, HandwaveWidget,
};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Fails every read once `healthy_reads` frames have been delivered.
struct TestCamera {
    healthy_reads: Option<u32>,
    failed_reads: Arc<AtomicU32>,
}

impl CameraProvider for TestCamera {
    fn open(&self, resolution: Resolution) -> anyhow::Result<Box<dyn Camera>> {
        Ok(Box::new(TestStream {
            resolution,
            index: 0,
            healthy_reads: self.healthy_reads,
            failed_reads: self.failed_reads.clone(),
        }))
    }
}

struct TestStream {
    resolution: Resolution,
    index: u64,
    healthy_reads: Option<u32>,
    failed_reads: Arc<AtomicU32>,
}

impl Camera for TestStream {
    fn read(&mut self) -> anyhow::Result<Frame> {
        thread::sleep(Duration::from_millis(1));
        if let Some(healthy) = self.healthy_reads {
            if self.index >= u64::from(healthy) {
                self.failed_reads.fetch_add(1, Ordering::SeqCst);
                bail!("USB device disconnected");
            }
        }
        self.index += 1;
        Ok(Frame::new(self.index - 1, self.resolution, Vec::new()))
    }
}

/// Detects `num_hands` hands in every frame, alternating left and right.
struct TestDetector {
    num_hands: usize,
    params: Arc<Mutex<Vec<DetectorParams>>>,
}

impl DetectorFactory for TestDetector {
    fn create(&self, params: &DetectorParams) -> anyhow::Result<Box<dyn HandDetector>> {
        self.params.lock().push(*params);
        Ok(Box::new(TestModel {
            num_hands: self.num_hands,
        }))
    }
}

struct TestModel {
    num_hands: usize,
}

impl HandDetector for TestModel {
    fn detect(&mut self, _: &Frame, config: &TrackingConfig) -> anyhow::Result<Vec<RawHand>> {
        Ok((0..self.num_hands)
            .map(|i| RawHand {
                landmarks: LandmarkFrame::new(
                    config.frame_of_reference,
                    (0..21).map(|j| [i as f32 * 0.5, j as f32 * 0.04, 0.001]),
                ),
                handedness: HandednessLabel::new(
                    if i % 2 == 0 {
                        Handedness::Left
                    } else {
                        Handedness::Right
                    },
                    0.9,
                ),
            })
            .collect())
    }
}

struct Harness {
    widget: HandwaveWidget,
    failed_reads: Arc<AtomicU32>,
    params: Arc<Mutex<Vec<DetectorParams>>>,
}

fn harness(num_hands: usize, healthy_reads: Option<u32>) -> Harness {
    let failed_reads = Arc::new(AtomicU32::new(0));
    let params = Arc::new(Mutex::new(Vec::new()));
    let widget = HandwaveWidget::with_policy(
        Arc::new(TestCamera {
            healthy_reads,
            failed_reads: failed_reads.clone(),
        }),
        Arc::new(TestDetector {
            num_hands,
            params: params.clone(),
        }),
        SessionPolicy {
            capture_retries: 5,
            retry_backoff: Duration::from_millis(1),
            inference_failure_limit: None,
            mirrored_input: false,
        },
    );
    Harness {
        widget,
        failed_reads,
        params,
    }
}

fn next_snapshot(sub: &Subscription) -> Arc<handwave::snapshot::Snapshot> {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match sub.recv_timeout(remaining) {
            Ok(Change::Snapshot(snapshot)) => return snapshot,
            Ok(_) => {}
            Err(e) => panic!("no snapshot within {TIMEOUT:?}: {e}"),
        }
    }
}

#[test]
fn two_hands_with_max_two() {
    let mut h = harness(2, None);
    h.widget
        .set_config(&ConfigUpdate::default().max_num_hands(2))
        .unwrap();
    let sub = h.widget.subscribe([Field::Snapshot]);
    h.widget.start().unwrap();
    let snapshot = next_snapshot(&sub);
    h.widget.stop();

    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.landmarks().len(), snapshot.handedness().len());
    let hands = h.widget.hands().unwrap();
    assert_eq!(hands.len(), 2);
    assert_eq!(hands[0].handedness, Handedness::Left);
    assert_eq!(hands[1].handedness, Handedness::Right);
    assert_relative_eq!(hands[1].handedness_score, 0.9);
    assert_relative_eq!(hands[1].table.x()[0], 0.5);
    assert_eq!(h.widget.hand().as_ref(), hands.first());
}

#[test]
fn no_hands() {
    let mut h = harness(0, None);
    let sub = h.widget.subscribe([Field::Snapshot]);
    h.widget.start().unwrap();
    let snapshot = next_snapshot(&sub);
    h.widget.stop();

    assert!(snapshot.is_empty());
    assert_eq!(h.widget.hands(), Some(Vec::new()));
    assert_eq!(h.widget.hand(), None);
}

#[test]
fn camera_lost_after_five_failures() {
    let mut h = harness(1, Some(3));
    let sub = h.widget.subscribe([Field::Status, Field::Error]);
    h.widget.start().unwrap();

    let deadline = Instant::now() + TIMEOUT;
    let error = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match sub.recv_timeout(remaining) {
            Ok(Change::Error(error)) => break error,
            Ok(_) => {}
            Err(e) => panic!("no error within {TIMEOUT:?}: {e}"),
        }
    };

    assert!(matches!(*error, Error::CameraLost { attempts: 5, .. }));
    assert!(error.is_fatal());
    assert_eq!(h.failed_reads.load(Ordering::SeqCst), 5);
    assert!(!h.widget.status().is_tracking);
    assert_eq!(h.widget.status(), SessionStatus::default());
    assert!(h.widget.error().is_some());
    // Snapshots published before the failure are still readable.
    assert_eq!(h.widget.snapshot().unwrap().frame_index(), 2);
    // Nothing else is delivered after the terminal error.
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn reconfigure_to_fewer_hands() {
    let mut h = harness(2, None);
    h.widget
        .set_config(&ConfigUpdate::default().max_num_hands(2))
        .unwrap();
    let sub = h.widget.subscribe([Field::Snapshot]);
    h.widget.start().unwrap();

    let before = next_snapshot(&sub);
    assert_eq!(before.len(), 2);

    h.widget
        .set_config(&ConfigUpdate::default().max_num_hands(1))
        .unwrap();
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let snapshot = next_snapshot(&sub);
        if snapshot.len() == 1 {
            break;
        }
        assert!(Instant::now() < deadline, "reconfiguration never applied");
    }
    h.widget.stop();

    assert_eq!(before.len(), 2);
    assert_eq!(
        h.params.lock().iter().map(|p| p.max_num_hands).collect::<Vec<_>>(),
        [2, 1]
    );
    assert!(h.widget.hands().unwrap().len() <= 1);
}

#[test]
fn invalid_config_is_rejected_whole() {
    let h = harness(1, None);
    let before = h.widget.config();
    for update in [
        ConfigUpdate::default().max_num_hands(0),
        ConfigUpdate::default()
            .max_num_hands(2)
            .min_tracking_confidence(1.5),
        ConfigUpdate::default().width(0),
    ] {
        assert!(matches!(
            h.widget.set_config(&update),
            Err(Error::InvalidConfig { .. })
        ));
        assert_eq!(h.widget.config(), before);
    }
}

#[test]
fn stop_is_idempotent() {
    let mut h = harness(1, None);
    h.widget.stop();
    h.widget.start().unwrap();
    assert!(h.widget.is_running());
    h.widget.stop();
    h.widget.stop();
    assert!(!h.widget.is_running());
    assert_eq!(h.widget.status(), SessionStatus::default());
}

#[test]
fn every_publish_is_observed_once() {
    let mut h = harness(1, None);
    let sub = h.widget.subscribe([Field::Snapshot]);
    h.widget.start().unwrap();
    thread::sleep(Duration::from_millis(50));
    h.widget.stop();

    let sequences = sub
        .try_iter()
        .map(|change| match change {
            Change::Snapshot(snapshot) => snapshot.sequence(),
            other => panic!("unexpected change {other:?}"),
        })
        .collect::<Vec<_>>();
    assert!(!sequences.is_empty());
    assert_eq!(sequences, (1..=sequences.len() as u64).collect::<Vec<_>>());
    assert_eq!(
        h.widget.snapshot().unwrap().sequence(),
        sequences.len() as u64
    );
}

#[test]
fn remote_observer_sees_widget_state() {
    let mut h = harness(1, None);
    let synced = Arc::new(Mutex::new(Vec::<FieldUpdate>::new()));
    let synced2 = synced.clone();
    let id = h
        .widget
        .attach_remote(move |updates: &[FieldUpdate]| synced2.lock().extend_from_slice(updates))
        .unwrap();

    h.widget
        .set_config(&ConfigUpdate::default().frame_of_reference(FrameOfReference::World))
        .unwrap();
    let sub = h.widget.subscribe([Field::Snapshot]);
    h.widget.start().unwrap();
    next_snapshot(&sub);
    h.widget.stop();
    assert!(h.widget.detach_remote(id));

    let synced = synced.lock();
    let last = |name: &str| {
        synced
            .iter()
            .rev()
            .find(|u| u.name == name)
            .map(|u| u.value.clone())
    };
    assert_eq!(last("frame_of_reference"), Some(serde_json::json!("world")));
    assert_eq!(last("is_tracking"), Some(serde_json::json!(false)));
    assert_eq!(last("camera_active"), Some(serde_json::json!(false)));
    let hands_data = last("hands_data").unwrap();
    assert_eq!(hands_data[0]["x"].as_array().unwrap().len(), 21);
    assert_eq!(last("handedness").unwrap()[0][0], "Left");
}
