use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

/// Format a remaining duration as `m:ss`, truncating fractional seconds.
pub fn fmt_eta(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
