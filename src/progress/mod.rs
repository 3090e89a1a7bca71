//! Completion counter with a smoothed per-item duration and ETA reporting.
//!
//! Worker tasks call [`ProgressTracker::record_completion`] concurrently; all
//! counter and timing state lives behind one mutex so increments are never
//! lost and the duration estimate sees completions in lock order.

use crate::utils::fmt_eta;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Reports are emitted on every multiple of this many percent.
const REPORT_STEP: usize = 5;

/// Smoothing factor used when the configured one is not a number.
const DEFAULT_ALPHA: f64 = 0.6;

#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    alpha: f64,
    state: Mutex<ProgressState>,
}

#[derive(Debug)]
struct ProgressState {
    completed: usize,
    avg_secs: Option<f64>,
    last_tick: Instant,
    last_reported: Option<usize>,
}

/// One emitted status line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressReport {
    pub completed: usize,
    pub total: usize,
    pub percent: usize,
    pub remaining: Duration,
}

impl fmt::Display for ProgressReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Processed {}/{} companies ({}%), remaining time: {}",
            self.completed,
            self.total,
            self.percent,
            fmt_eta(self.remaining)
        )
    }
}

impl ProgressTracker {
    pub fn new(total: usize, alpha: f64) -> Self {
        Self {
            total,
            alpha: if alpha.is_finite() {
                alpha.clamp(0.0, 1.0)
            } else {
                DEFAULT_ALPHA
            },
            state: Mutex::new(ProgressState {
                completed: 0,
                avg_secs: None,
                last_tick: Instant::now(),
                last_reported: None,
            }),
        }
    }

    #[cfg(test)]
    pub fn completed(&self) -> usize {
        self.lock().completed
    }

    /// Count one finished item. Returns the status line if this completion
    /// crossed a new reporting step.
    pub fn record_completion(&self) -> Option<ProgressReport> {
        let mut state = self.lock();
        state.completed += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_tick).as_secs_f64();
        state.last_tick = now;
        state.avg_secs = Some(match state.avg_secs {
            Some(old) => elapsed * self.alpha + (1.0 - self.alpha) * old,
            None => elapsed,
        });

        if self.total == 0 {
            return None;
        }

        let percent = state.completed * 100 / self.total;
        if percent < REPORT_STEP
            || percent > 100
            || percent % REPORT_STEP != 0
            || state.last_reported == Some(percent)
        {
            return None;
        }
        state.last_reported = Some(percent);

        let left = self.total.saturating_sub(state.completed);
        let remaining = Duration::from_secs_f64(left as f64 * state.avg_secs.unwrap_or(0.0));
        let report = ProgressReport {
            completed: state.completed,
            total: self.total,
            percent,
            remaining,
        };
        drop(state);

        info!("{}", report);
        Some(report)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
