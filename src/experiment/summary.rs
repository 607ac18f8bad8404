//! Scan time estimate and progress summary.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Snapshot of how far an acquisition has come.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Total number of sample points
    pub point_count: usize,
    /// Number of points measured so far
    pub current_point: usize,
    /// Estimated duration of the whole scan
    pub estimated_total: Duration,
    /// Time since the run started
    pub elapsed: Duration,
}

impl ScanSummary {
    /// Summary before the first point, with the total estimated as
    /// `seconds_per_point * point_count + overhead_seconds`.
    pub fn new(point_count: usize, seconds_per_point: f64, overhead_seconds: f64) -> Self {
        let seconds = seconds_per_point * point_count as f64 + overhead_seconds;
        Self {
            point_count,
            current_point: 0,
            estimated_total: Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX),
            elapsed: Duration::ZERO,
        }
    }

    /// Same estimate at a later point of the run.
    pub fn at(self, current_point: usize, elapsed: Duration) -> Self {
        Self {
            current_point: current_point.min(self.point_count),
            elapsed,
            ..self
        }
    }

    /// Completed fraction in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.point_count == 0 {
            return 0.0;
        }
        self.current_point as f64 / self.point_count as f64
    }

    /// Completed percentage, truncated like a progress bar.
    pub fn percent(&self) -> u8 {
        (self.progress() * 100.0) as u8
    }

    /// `estimated_total * (1 - progress)`
    pub fn estimated_remaining(&self) -> Duration {
        self.estimated_total.mul_f64(1.0 - self.progress())
    }
}

/// Human-readable duration: `"42 s"`, `"3 min, 5 s"` or `"1 h, 2 min, 3 s"`.
///
/// Fractional seconds are truncated.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total < 60 {
        format!("{} s", total)
    } else if total < 3600 {
        format!("{} min, {} s", total / 60, total % 60)
    } else {
        format!(
            "{} h, {} min, {} s",
            total / 3600,
            (total % 3600) / 60,
            total % 60
        )
    }
}
