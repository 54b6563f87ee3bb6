//! Runs the hand tracking widget against a synthetic camera and a synthetic waving hand.
//!
//! Usage: `handwave [seconds]` (default: 3).

use std::{
    env,
    f32::consts::TAU,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use handwave::{
    config::{ConfigUpdate, DetectorParams, TrackingConfig},
    hand::{Handedness, HandednessLabel, LandmarkIdx, NUM_LANDMARKS},
    landmark::LandmarkFrame,
    remote::FieldUpdate,
    resolution::Resolution,
    session::{Camera, CameraProvider, DetectorFactory, Frame, HandDetector, RawHand},
    store::{Change, Field},
    HandwaveWidget,
};

const FPS: u32 = 30;

fn main() -> anyhow::Result<()> {
    handwave::init_logger!();

    let seconds = match env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 3,
    };

    let mut widget = HandwaveWidget::new(Arc::new(SyntheticCamera), Arc::new(WavingHands));
    widget.set_config(&ConfigUpdate::default().max_num_hands(2).debug(false))?;

    widget.attach_remote(|updates: &[FieldUpdate]| {
        for update in updates {
            log::trace!("sync {} = {}", update.name, update.value);
        }
    })?;

    let changes = widget.subscribe([Field::Status, Field::Error]);
    widget.start()?;

    let end = Instant::now() + Duration::from_secs(seconds);
    let mut reduced = false;
    while Instant::now() < end {
        thread::sleep(Duration::from_millis(500));

        for change in changes.try_iter() {
            match change {
                Change::Status(status) => log::info!("{:?}", status),
                Change::Error(e) => anyhow::bail!("tracking failed: {e}"),
                _ => {}
            }
        }

        match widget.hand() {
            Some(hand) => {
                let wrist = hand.table.row(LandmarkIdx::Wrist.index());
                log::info!(
                    "{} hand(s), first: {} ({:.2}), wrist at {:?}",
                    widget.hands().map_or(0, |hands| hands.len()),
                    hand.handedness,
                    hand.handedness_score,
                    wrist,
                );
            }
            None => log::info!("no hand"),
        }

        if !reduced && Instant::now() + Duration::from_secs(seconds) / 2 > end {
            log::info!("tracking only one hand from now on");
            widget.set_config(&ConfigUpdate::default().max_num_hands(1))?;
            reduced = true;
        }
    }

    widget.stop();
    if let Some(snapshot) = widget.snapshot() {
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
    }
    Ok(())
}

/// A camera producing blank frames at a fixed rate.
struct SyntheticCamera;

impl CameraProvider for SyntheticCamera {
    fn open(&self, resolution: Resolution) -> anyhow::Result<Box<dyn Camera>> {
        log::info!("opening synthetic camera at {}", resolution);
        Ok(Box::new(SyntheticStream {
            resolution,
            next_index: 0,
            next_frame: Instant::now(),
        }))
    }
}

struct SyntheticStream {
    resolution: Resolution,
    next_index: u64,
    next_frame: Instant,
}

impl Camera for SyntheticStream {
    fn read(&mut self) -> anyhow::Result<Frame> {
        let now = Instant::now();
        if self.next_frame > now {
            thread::sleep(self.next_frame - now);
        }
        self.next_frame += Duration::from_secs(1) / FPS;

        let frame = Frame::new(
            self.next_index,
            self.resolution,
            vec![0; self.resolution.num_pixels() as usize],
        );
        self.next_index += 1;
        Ok(frame)
    }
}

/// A detector "seeing" two hands waving side to side.
struct WavingHands;

impl DetectorFactory for WavingHands {
    fn create(&self, params: &DetectorParams) -> anyhow::Result<Box<dyn HandDetector>> {
        log::info!("creating detector: {:?}", params);
        Ok(Box::new(WavingHands))
    }
}

impl HandDetector for WavingHands {
    fn detect(&mut self, frame: &Frame, config: &TrackingConfig) -> anyhow::Result<Vec<RawHand>> {
        let phase = (frame.index() % u64::from(FPS)) as f32 / FPS as f32 * TAU;
        let hand = |center: f32, handedness| RawHand {
            landmarks: LandmarkFrame::new(
                config.frame_of_reference,
                (0..NUM_LANDMARKS).map(|i| {
                    let t = i as f32 / NUM_LANDMARKS as f32;
                    [center + 0.1 * phase.sin() + 0.05 * t, 0.8 - 0.4 * t, -0.01 * t]
                }),
            ),
            handedness: HandednessLabel::new(handedness, 0.9),
        };
        Ok(vec![hand(0.3, Handedness::Right), hand(0.7, Handedness::Left)])
    }
}
