//! Progress accounting for one operation.
//!
//! A [`ProgressCounter`] tracks a completion fraction together with the wall
//! time spent actively working (paused intervals are excluded). ETA and
//! throughput are derived from the progress made since [`ProgressCounter::start`],
//! so a resumed operation that starts at 0.6 is not credited for work done by
//! an earlier run.

use std::time::{Duration, Instant};

/// Lifecycle of a [`ProgressCounter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProgressState {
    /// Created, not started.
    Idle,
    /// Accumulating elapsed time.
    Running,
    /// Elapsed time frozen until resumed.
    Paused,
    /// Terminal.
    Finished,
}

/// Fraction, elapsed time, ETA and throughput for one operation.
#[derive(Clone, Debug)]
pub struct ProgressCounter {
    state: ProgressState,
    progress: f64,
    initial_progress: f64,
    total_bytes: u64,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
    finished_at: Option<Instant>,
}

impl ProgressCounter {
    /// Create an idle counter at 0.0.
    pub fn new() -> Self {
        Self {
            state: ProgressState::Idle,
            progress: 0.0,
            initial_progress: 0.0,
            total_bytes: 0,
            started_at: None,
            paused_at: None,
            paused_total: Duration::ZERO,
            finished_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Current fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Total size of the work in bytes (0 when unknown).
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Set the total size of the work.
    pub fn set_total_bytes(&mut self, total_bytes: u64) {
        self.total_bytes = total_bytes;
    }

    /// Record a new fraction and return the effective value.
    ///
    /// The fraction is clamped to `[0, 1]` and never moves backwards; NaN is
    /// ignored. Updates after [`finish`](Self::finish) are ignored.
    pub fn set_progress(&mut self, alpha: f64) -> f64 {
        if self.state == ProgressState::Finished || alpha.is_nan() {
            return self.progress;
        }
        let alpha = alpha.clamp(0.0, 1.0);
        if alpha > self.progress {
            self.progress = alpha;
        }
        if self.state == ProgressState::Idle {
            self.initial_progress = self.progress;
        }
        self.progress
    }

    /// Start accounting elapsed time. No-op unless idle.
    pub fn start(&mut self) {
        self.start_at(Instant::now());
    }

    fn start_at(&mut self, now: Instant) {
        if self.state != ProgressState::Idle {
            return;
        }
        self.state = ProgressState::Running;
        self.started_at = Some(now);
        self.initial_progress = self.progress;
    }

    /// Freeze elapsed-time accounting. No-op unless running.
    pub fn pause(&mut self) {
        self.pause_at(Instant::now());
    }

    fn pause_at(&mut self, now: Instant) {
        if self.state == ProgressState::Running {
            self.state = ProgressState::Paused;
            self.paused_at = Some(now);
        }
    }

    /// Resume elapsed-time accounting. No-op unless paused.
    pub fn resume(&mut self) {
        self.resume_at(Instant::now());
    }

    fn resume_at(&mut self, now: Instant) {
        if self.state != ProgressState::Paused {
            return;
        }
        if let Some(paused_at) = self.paused_at.take() {
            self.paused_total += now.saturating_duration_since(paused_at);
        }
        self.state = ProgressState::Running;
    }

    /// Stop the counter for good.
    pub fn finish(&mut self) {
        self.finish_at(Instant::now());
    }

    fn finish_at(&mut self, now: Instant) {
        if self.state == ProgressState::Finished {
            return;
        }
        self.resume_at(now);
        self.state = ProgressState::Finished;
        self.finished_at = Some(now);
    }

    /// Active (non-paused) time since start.
    pub fn elapsed(&self) -> Duration {
        self.elapsed_at(Instant::now())
    }

    fn elapsed_at(&self, now: Instant) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.finished_at.or(self.paused_at).unwrap_or(now);
        end.saturating_duration_since(started_at)
            .saturating_sub(self.paused_total)
    }

    /// Estimated time remaining, from the rate observed since start.
    pub fn eta(&self) -> Duration {
        self.eta_at(Instant::now())
    }

    fn eta_at(&self, now: Instant) -> Duration {
        let done = self.progress - self.initial_progress;
        let elapsed = self.elapsed_at(now).as_secs_f64();
        if done <= 0.0 || elapsed <= 0.0 || self.progress >= 1.0 {
            return Duration::ZERO;
        }
        let rate = done / elapsed;
        Duration::from_secs_f64((1.0 - self.progress) / rate)
    }

    /// Observed throughput in bytes per second since start.
    pub fn bps(&self) -> f64 {
        self.bps_at(Instant::now())
    }

    #[allow(clippy::cast_precision_loss)]
    fn bps_at(&self, now: Instant) -> f64 {
        let elapsed = self.elapsed_at(now).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        let done = (self.progress - self.initial_progress).max(0.0);
        self.total_bytes as f64 * done / elapsed
    }
}

impl Default for ProgressCounter {
    fn default() -> Self {
        Self::new()
    }
}
