//! Transfer-speed estimation over a sliding sample window.

use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(5);
const MAX_SAMPLES: usize = 100;

struct Sample {
    bytes: u64,
    timestamp: Instant,
}

/// Sliding-window speed tracker feeding `uploadSpeed` and
/// `timeRemaining` in progress events.
pub(crate) struct SpeedTracker {
    inner: Mutex<Vec<Sample>>,
}

impl SpeedTracker {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Records `bytes` transferred at the current instant.
    pub(crate) fn add_sample(&self, bytes: u64) {
        let mut samples = self.inner.lock().expect("speed mutex poisoned");
        let now = Instant::now();
        samples.push(Sample {
            bytes,
            timestamp: now,
        });

        let cutoff = now - WINDOW;
        samples.retain(|s| s.timestamp >= cutoff);
        if samples.len() > MAX_SAMPLES {
            let excess = samples.len() - MAX_SAMPLES;
            samples.drain(..excess);
        }
    }

    /// Average speed in bytes/second within the window, or `None` with
    /// fewer than two samples.
    pub(crate) fn bytes_per_second(&self) -> Option<f64> {
        let samples = self.inner.lock().expect("speed mutex poisoned");
        if samples.len() < 2 {
            return None;
        }
        let elapsed = samples[samples.len() - 1]
            .timestamp
            .duration_since(samples[0].timestamp);
        if elapsed.is_zero() {
            return None;
        }
        let total: u64 = samples.iter().map(|s| s.bytes).sum();
        Some(total as f64 / elapsed.as_secs_f64())
    }

    /// Estimated seconds to transfer `remaining` bytes at the current
    /// speed.
    pub(crate) fn eta_seconds(&self, remaining: u64) -> Option<f64> {
        let speed = self.bytes_per_second()?;
        if speed <= 0.0 {
            return None;
        }
        Some(remaining as f64 / speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_samples_means_no_estimate() {
        let tracker = SpeedTracker::new();
        assert!(tracker.bytes_per_second().is_none());
        assert!(tracker.eta_seconds(1000).is_none());
    }

    #[test]
    fn single_sample_is_not_enough() {
        let tracker = SpeedTracker::new();
        tracker.add_sample(1024);
        assert!(tracker.bytes_per_second().is_none());
    }

    #[test]
    fn speed_and_eta_positive_with_samples() {
        let tracker = SpeedTracker::new();
        tracker.add_sample(512);
        std::thread::sleep(Duration::from_millis(20));
        tracker.add_sample(512);

        let speed = tracker.bytes_per_second().unwrap();
        assert!(speed > 0.0);
        let eta = tracker.eta_seconds(10_000).unwrap();
        assert!(eta > 0.0);
    }

    #[test]
    fn sample_count_is_bounded() {
        let tracker = SpeedTracker::new();
        for _ in 0..(MAX_SAMPLES * 2) {
            tracker.add_sample(1);
        }
        assert!(tracker.inner.lock().unwrap().len() <= MAX_SAMPLES);
    }
}
