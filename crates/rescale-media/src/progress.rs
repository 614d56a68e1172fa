//! FFmpeg progress parsing and percentage tracking.

use rescale_models::timestamp::parse_timestamp;
use rescale_models::PROGRESS_CEILING;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Encoded media time in seconds.
    ///
    /// Prefers the `out_time` clock string and falls back to the numeric
    /// counter. Early blocks report negative or `N/A` times; those read as
    /// `None`.
    pub fn elapsed_secs(&self) -> Option<f64> {
        if let Ok(secs) = parse_timestamp(&self.out_time) {
            return Some(secs);
        }
        (self.out_time_ms > 0).then(|| self.out_time_ms as f64 / 1000.0)
    }
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(FfmpegProgress) + Send + Sync + 'static>;

/// Turns encoder time reports into a monotonic percentage.
///
/// The percentage is `min(98, elapsed / duration * 100)` and never moves
/// backwards. [`ProgressMonitor::observe`] reports a value worth persisting
/// at most once per interval, so the store is not written on every block.
#[derive(Debug, Clone)]
pub struct ProgressMonitor {
    duration_secs: f64,
    interval: Duration,
    current: f64,
    last_reported: Option<(Instant, f64)>,
}

impl ProgressMonitor {
    pub fn new(duration_secs: f64, interval: Duration) -> Self {
        Self {
            duration_secs,
            interval,
            current: 0.0,
            last_reported: None,
        }
    }

    /// Percentage for an elapsed time, before the monotonic clamp.
    pub fn percent_for(&self, elapsed_secs: f64) -> f64 {
        if self.duration_secs <= 0.0 || !elapsed_secs.is_finite() || elapsed_secs <= 0.0 {
            return 0.0;
        }
        (elapsed_secs / self.duration_secs * 100.0).min(PROGRESS_CEILING)
    }

    /// Highest percentage seen so far.
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Record an elapsed time; returns the percentage to persist, if any.
    pub fn observe(&mut self, elapsed_secs: f64) -> Option<f64> {
        self.observe_at(elapsed_secs, Instant::now())
    }

    pub fn observe_at(&mut self, elapsed_secs: f64, now: Instant) -> Option<f64> {
        self.current = self.current.max(self.percent_for(elapsed_secs));

        match self.last_reported {
            Some((at, reported)) => {
                if self.current > reported && now.duration_since(at) >= self.interval {
                    self.last_reported = Some((now, self.current));
                    Some(self.current)
                } else {
                    None
                }
            }
            None if self.current > 0.0 => {
                self.last_reported = Some((now, self.current));
                Some(self.current)
            }
            None => None,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_prefers_clock_string() {
        let progress = FfmpegProgress {
            out_time: "00:00:05.500000".to_string(),
            out_time_ms: 1,
            ..Default::default()
        };
        assert!((progress.elapsed_secs().unwrap() - 5.5).abs() < 1e-6);

        let early = FfmpegProgress {
            out_time: "-577014:32:22.775808".to_string(),
            ..Default::default()
        };
        assert_eq!(early.elapsed_secs(), None);
    }

    #[test]
    fn test_monitor_caps_below_hundred() {
        let monitor = ProgressMonitor::new(10.0, Duration::ZERO);
        assert_eq!(monitor.percent_for(5.0), 50.0);
        assert_eq!(monitor.percent_for(10.0), PROGRESS_CEILING);
        assert_eq!(monitor.percent_for(60.0), PROGRESS_CEILING);
        assert_eq!(monitor.percent_for(-1.0), 0.0);

        let unknown_duration = ProgressMonitor::new(0.0, Duration::ZERO);
        assert_eq!(unknown_duration.percent_for(5.0), 0.0);
    }

    #[test]
    fn test_monitor_is_monotonic() {
        let mut monitor = ProgressMonitor::new(100.0, Duration::ZERO);
        let start = Instant::now();
        assert_eq!(monitor.observe_at(40.0, start), Some(40.0));
        assert_eq!(monitor.observe_at(30.0, start + Duration::from_secs(1)), None);
        assert_eq!(monitor.current(), 40.0);
        assert_eq!(monitor.observe_at(45.0, start + Duration::from_secs(2)), Some(45.0));
    }

    #[test]
    fn test_monitor_rate_limits_reports() {
        let mut monitor = ProgressMonitor::new(100.0, Duration::from_secs(2));
        let start = Instant::now();
        assert_eq!(monitor.observe_at(10.0, start), Some(10.0));
        assert_eq!(monitor.observe_at(20.0, start + Duration::from_millis(500)), None);
        assert_eq!(monitor.observe_at(25.0, start + Duration::from_secs(2)), Some(25.0));
    }
}
