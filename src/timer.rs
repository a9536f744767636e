//! Wall-clock timing helpers.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds elapsed since the first call in this process.
///
/// This is a monotonic, high-resolution timer suitable for benchmarking.
pub fn wtime() -> f64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// A stopwatch created by [`ProcessGroup::create_timer`](crate::ProcessGroup::create_timer).
///
/// # Example
///
/// ```
/// use ferrogroup::ProcessGroup;
///
/// let group = ProcessGroup::serial();
/// let mut timer = group.create_timer();
/// timer.start();
/// // ... work ...
/// timer.stop();
/// assert!(timer.elapsed_seconds() >= 0.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Timer {
    started: Option<Instant>,
    accumulated: Duration,
}

impl Timer {
    /// A stopped timer with zero elapsed time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or resume) timing. Has no effect if already running.
    pub fn start(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    /// Stop timing, keeping the elapsed time.
    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.accumulated += started.elapsed();
        }
    }

    /// Whether the timer is running.
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Total elapsed time, including the current run.
    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.started.map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// Total elapsed time in seconds.
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }

    /// Stop and zero the timer.
    pub fn reset(&mut self) {
        self.started = None;
        self.accumulated = Duration::ZERO;
    }
}
