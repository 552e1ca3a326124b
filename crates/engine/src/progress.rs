//! Smoothed throughput for ETA estimates.

use std::time::Duration;

use tokio::time::Instant;

/// Samples shorter than this are folded into the next one.
const MIN_SAMPLE: Duration = Duration::from_millis(200);

/// Exponentially weighted moving average of bytes per second.
///
/// Bytes are accumulated until at least [`MIN_SAMPLE`] has elapsed, then
/// folded into the average with weight `alpha`. The first sample seeds the
/// average directly.
#[derive(Debug, Clone)]
pub struct Throughput {
    alpha: f64,
    rate: Option<f64>,
    window_start: Instant,
    window_bytes: u64,
}

impl Throughput {
    pub fn new(alpha: f64, now: Instant) -> Self {
        Self {
            alpha: alpha.clamp(0.01, 1.0),
            rate: None,
            window_start: now,
            window_bytes: 0,
        }
    }

    /// Account for `bytes` read at `now` and return the current estimate.
    pub fn record(&mut self, bytes: u64, now: Instant) -> f64 {
        self.window_bytes = self.window_bytes.saturating_add(bytes);
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= MIN_SAMPLE {
            #[allow(clippy::cast_precision_loss)]
            let sample = self.window_bytes as f64 / elapsed.as_secs_f64();
            self.rate = Some(match self.rate {
                Some(rate) => self.alpha * sample + (1.0 - self.alpha) * rate,
                None => sample,
            });
            self.window_start = now;
            self.window_bytes = 0;
        }
        self.rate()
    }

    /// Current estimate, 0 until the first full sample.
    pub fn rate(&self) -> f64 {
        self.rate.unwrap_or(0.0)
    }
}
