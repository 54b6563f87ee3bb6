//! Performance measurement for the tracking loop.

use std::{
    fmt, mem,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// A timer that measures and averages the time an operation takes.
///
/// Collected timings are averaged and reset when the timer is displayed using `{}`
/// ([`std::fmt::Display`]).
pub struct Timer {
    name: &'static str,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    total: Duration,
    count: u32,
    last: Duration,
}

impl Timer {
    /// Creates a new timer.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Mutex::new(State::default()),
        }
    }

    /// Invokes a closure, measuring and recording the time it takes.
    pub fn time<T>(&self, timee: impl FnOnce() -> T) -> T {
        let _guard = self.start();
        timee()
    }

    /// Starts timing an operation using a drop guard.
    ///
    /// When the returned [`TimerGuard`] is dropped, the time between the call to `start` and the
    /// drop is measured and recorded.
    pub fn start(&self) -> TimerGuard<'_> {
        TimerGuard {
            start: Instant::now(),
            timer: self,
        }
    }

    /// Returns the duration of the most recently completed measurement.
    pub fn last(&self) -> Duration {
        self.state.lock().last
    }

    fn stop(&self, start: Instant) {
        let duration = start.elapsed();
        let mut state = self.state.lock();
        state.total += duration;
        state.count += 1;
        state.last = duration;
    }
}

/// Displays the average recorded time and resets it.
impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = self.state.lock();
        let total = mem::take(&mut state.total);
        let count = mem::take(&mut state.count);
        let avg_ms = if count == 0 {
            0.0
        } else {
            total.as_secs_f32() * 1000.0 / count as f32
        };

        write!(f, "{}: {count}x{avg_ms:.01}ms", self.name)
    }
}

/// Guard returned by [`Timer::start`]. Stops timing the operation when dropped.
pub struct TimerGuard<'a> {
    start: Instant,
    timer: &'a Timer,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.stop(self.start);
    }
}

/// Logs frames per second with optional extra data.
pub struct FpsCounter {
    name: String,
    frames: u32,
    start: Instant,
}

impl FpsCounter {
    pub fn new<N: Into<String>>(name: N) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            start: Instant::now(),
        }
    }

    /// Advances the frame counter by 1 and logs FPS and the `timers` if one second has passed.
    ///
    /// Returns the measured FPS when it was logged.
    pub fn tick_with<'a, I: IntoIterator<Item = &'a Timer>>(&mut self, timers: I) -> Option<u32> {
        self.frames += 1;
        if self.start.elapsed() <= Duration::from_secs(1) {
            return None;
        }

        let mut extra = String::new();
        for (i, timer) in timers.into_iter().enumerate() {
            extra.push_str(if i == 0 { " (" } else { ", " });
            extra.push_str(&timer.to_string());
        }
        if !extra.is_empty() {
            extra.push(')');
        }
        log::debug!("{}: {} FPS{}", self.name, self.frames, extra);

        let fps = self.frames;
        self.frames = 0;
        self.start = Instant::now();
        Some(fps)
    }
}
