//! Progress bridge: internal progress callbacks → throttled `Progress`
//! notifications, sink messages → `Log` notifications.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use stagehand_core::{LogLevel, ProgressCounter, StateSink};
use tracing::{debug, error, info, warn};

use crate::notify::Notifier;

/// Notification method carrying progress.
pub const PROGRESS_NOTIFICATION: &str = "Progress";
/// Notification method carrying sink messages.
pub const LOG_NOTIFICATION: &str = "Log";

/// Payload of a `Progress` notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressNotification {
    /// Fraction in `[0, 1]`.
    pub progress: f64,
    /// Estimated seconds remaining.
    pub eta: f64,
    /// Observed bytes per second.
    pub bps: f64,
}

/// Payload of a `Log` notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogNotification {
    /// Severity.
    pub level: LogLevel,
    /// Message text.
    pub message: String,
}

struct Tracking {
    counter: ProgressCounter,
    last_emit: Instant,
    last_sent: f64,
}

/// Per-request progress bridge.
///
/// Notifications are enqueued while the tracking lock is held, so the peer
/// sees one operation's fractions in non-decreasing order. Interceptors for
/// `Progress` must therefore not report progress themselves.
pub struct ProgressBridge {
    notifier: Arc<Notifier>,
    interval: Duration,
    tracking: Mutex<Option<Tracking>>,
}

impl ProgressBridge {
    /// Create a bridge emitting at most one notification per `interval`.
    pub fn new(notifier: Arc<Notifier>, interval: Duration) -> Self {
        Self {
            notifier,
            interval,
            tracking: Mutex::new(None),
        }
    }

    /// Begin tracking and emit the initial fraction.
    ///
    /// Returns `false` (and logs a warning) if already tracking; the first
    /// tracker wins.
    pub fn start(&self, initial: f64, total_bytes: u64) -> bool {
        self.start_at(initial, total_bytes, Instant::now())
    }

    fn start_at(&self, initial: f64, total_bytes: u64, now: Instant) -> bool {
        let mut tracking = self.tracking.lock();
        if tracking.is_some() {
            warn!("asked to start progress but already tracking progress");
            return false;
        }
        let mut counter = ProgressCounter::new();
        let initial = counter.set_progress(initial);
        counter.set_total_bytes(total_bytes);
        counter.start();
        info!(initial, total_bytes, "starting progress");
        self.emit(&counter);
        *tracking = Some(Tracking {
            counter,
            last_emit: now,
            last_sent: initial,
        });
        true
    }

    /// Stop tracking.
    ///
    /// Returns `false` (and logs a warning) if not tracking.
    pub fn end(&self) -> bool {
        let Some(mut tracking) = self.tracking.lock().take() else {
            warn!("asked to end progress but not tracking progress");
            return false;
        };
        tracking.counter.finish();
        debug!(
            progress = tracking.counter.progress(),
            elapsed_ms = u64::try_from(tracking.counter.elapsed().as_millis()).unwrap_or(u64::MAX),
            "ended progress"
        );
        true
    }

    /// Whether progress is currently being tracked.
    pub fn is_tracking(&self) -> bool {
        self.tracking.lock().is_some()
    }

    fn report_at(&self, alpha: f64, now: Instant) {
        let mut guard = self.tracking.lock();
        let Some(tracking) = guard.as_mut() else {
            return;
        };
        let progress = tracking.counter.set_progress(alpha);
        if progress <= tracking.last_sent {
            return;
        }
        let completed = progress >= 1.0;
        if !completed && now.saturating_duration_since(tracking.last_emit) < self.interval {
            return;
        }
        self.emit(&tracking.counter);
        tracking.last_emit = now;
        tracking.last_sent = progress;
    }

    fn emit(&self, counter: &ProgressCounter) {
        let payload = ProgressNotification {
            progress: counter.progress(),
            eta: counter.eta().as_secs_f64(),
            bps: counter.bps(),
        };
        self.send(PROGRESS_NOTIFICATION, &payload);
    }

    fn send<T: Serialize>(&self, method: &str, payload: &T) {
        let params = match serde_json::to_value(payload) {
            Ok(params) => params,
            Err(e) => {
                debug!(method, error = %e, "could not encode notification");
                return;
            }
        };
        if let Err(e) = self.notifier.notify(method, params) {
            debug!(method, error = %e, "notification interceptor failed");
        }
    }
}

impl StateSink for ProgressBridge {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
        self.send(
            LOG_NOTIFICATION,
            &LogNotification {
                level,
                message: message.to_owned(),
            },
        );
    }

    fn progress(&self, alpha: f64) {
        self.report_at(alpha, Instant::now());
    }

    fn pause_progress(&self) {
        if let Some(tracking) = self.tracking.lock().as_mut() {
            tracking.counter.pause();
        }
    }

    fn resume_progress(&self) {
        if let Some(tracking) = self.tracking.lock().as_mut() {
            tracking.counter.resume();
        }
    }
}
