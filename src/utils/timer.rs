//! Timer utilities
//!
//! Durations travel through events as fractional milliseconds.

use std::time::{Duration, Instant};

/// Simple timer for measuring elapsed time
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed time in fractional milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Stop timer and return elapsed milliseconds
    pub fn stop(self) -> f64 {
        let elapsed = self.elapsed_ms();
        tracing::debug!("{}: {:.1}ms", self.label, elapsed);
        elapsed
    }
}

/// Render a millisecond duration for humans
pub fn format_duration(ms: f64) -> String {
    if ms < 1.0 {
        format!("{:.2}ms", ms)
    } else if ms < 1000.0 {
        format!("{:.0}ms", ms)
    } else if ms < 60_000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        let seconds = (ms / 1000.0).round();
        let minutes = (seconds / 60.0).floor();
        format!("{}m {}s", minutes, seconds - minutes * 60.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10.0);
        assert!(timer.stop() >= 10.0);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0.5), "0.50ms");
        assert_eq!(format_duration(12.4), "12ms");
        assert_eq!(format_duration(1500.0), "1.50s");
        assert_eq!(format_duration(61_000.0), "1m 1s");
        assert_eq!(format_duration(119_999.0), "2m 0s");
        assert_eq!(format_duration(90_400.0), "1m 30s");
    }
}
