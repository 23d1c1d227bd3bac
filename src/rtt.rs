//! Adaptive retransmission timeout.
//!
//! Round-trip samples are smoothed with exponentially weighted moving
//! averages (Jacobson's algorithm):
//!
//! ```text
//!   EstimatedRTT = (1 − α)·EstimatedRTT + α·sample
//!   DevRTT       = (1 − β)·DevRTT       + β·|sample − EstimatedRTT|
//!   Timeout      = EstimatedRTT + 4·DevRTT
//! ```
//!
//! The timeout is clamped into `[min_timeout, max_timeout]`.

use std::time::Duration;

use crate::config::ProtocolConfig;

const DEV_MULTIPLIER: f64 = 4.0;

/// RTT smoothing state owned by one sender.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT in seconds.
    estimated_rtt: f64,
    /// Smoothed mean deviation in seconds.
    dev_rtt: f64,
    alpha: f64,
    beta: f64,
    min_timeout: Duration,
    max_timeout: Duration,
    timeout: Duration,
    last_sample: Option<Duration>,
}

impl RttEstimator {
    /// Seed the estimator with `initial_timeout` as the first RTT estimate.
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            estimated_rtt: config.initial_timeout.as_secs_f64(),
            dev_rtt: 0.0,
            alpha: config.rtt_smoothing,
            beta: config.deviation_smoothing,
            min_timeout: config.min_timeout,
            max_timeout: config.max_timeout,
            timeout: bounded(config.initial_timeout, config.min_timeout, config.max_timeout),
            last_sample: None,
        }
    }

    /// Fold in one RTT sample and return the new timeout.
    pub fn observe(&mut self, sample: Duration) -> Duration {
        let r = sample.as_secs_f64();
        self.estimated_rtt = (1.0 - self.alpha) * self.estimated_rtt + self.alpha * r;
        self.dev_rtt =
            (1.0 - self.beta) * self.dev_rtt + self.beta * (r - self.estimated_rtt).abs();
        let raw = self.estimated_rtt + DEV_MULTIPLIER * self.dev_rtt;
        let raw = Duration::try_from_secs_f64(raw).unwrap_or(self.max_timeout);
        self.timeout = bounded(raw, self.min_timeout, self.max_timeout);
        self.last_sample = Some(sample);
        self.timeout
    }

    /// Interval to arm the retransmission timer with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn estimated_rtt(&self) -> Duration {
        Duration::try_from_secs_f64(self.estimated_rtt).unwrap_or_default()
    }

    pub fn dev_rtt(&self) -> Duration {
        Duration::try_from_secs_f64(self.dev_rtt).unwrap_or_default()
    }

    pub fn last_sample(&self) -> Option<Duration> {
        self.last_sample
    }
}

/// Clamp without panicking on inverted bounds; `min` wins.
fn bounded(value: Duration, min: Duration, max: Duration) -> Duration {
    value.min(max).max(min)
}
