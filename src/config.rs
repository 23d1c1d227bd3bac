//! Engine configuration.
//!
//! Loss and corruption rates and the timeout-estimation constants are
//! injected here rather than hard-coded; `main.rs` fills these from CLI flags.

use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::MAX_HEADER_LEN;

/// Timing and sizing parameters for one sender/receiver pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Retransmission timeout before any RTT sample is available.
    pub initial_timeout: Duration,
    /// Lower clamp for the adaptive timeout.
    pub min_timeout: Duration,
    /// Upper clamp for the adaptive timeout.
    pub max_timeout: Duration,
    /// EWMA weight α given to a new RTT sample.
    pub rtt_smoothing: f64,
    /// EWMA weight β given to a new RTT deviation sample.
    pub deviation_smoothing: f64,
    /// Largest datagram read from or written to the transport.
    pub max_datagram: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(100),
            min_timeout: Duration::from_millis(10),
            max_timeout: Duration::from_secs(5),
            rtt_smoothing: 0.125,
            deviation_smoothing: 0.25,
            max_datagram: 1024,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        smoothing("rtt_smoothing", self.rtt_smoothing)?;
        smoothing("deviation_smoothing", self.deviation_smoothing)?;
        if self.min_timeout.is_zero()
            || self.min_timeout > self.initial_timeout
            || self.initial_timeout > self.max_timeout
        {
            return Err(ConfigError::TimeoutBounds {
                min: self.min_timeout,
                initial: self.initial_timeout,
                max: self.max_timeout,
            });
        }
        if self.max_datagram <= MAX_HEADER_LEN {
            return Err(ConfigError::DatagramTooSmall(self.max_datagram));
        }
        Ok(())
    }

    /// Largest payload one packet can carry.
    pub fn max_payload(&self) -> usize {
        self.max_datagram.saturating_sub(MAX_HEADER_LEN)
    }
}

/// Fault-injection model.  All probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FaultConfig {
    /// Probability that an arriving frame is silently dropped.
    pub loss_probability: f64,
    /// Probability that a surviving frame is marked corrupt.
    pub corrupt_probability: f64,
    /// Seed for reproducible runs; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl FaultConfig {
    /// Same probability for loss and corruption.
    pub fn uniform(probability: f64) -> Self {
        Self {
            loss_probability: probability,
            corrupt_probability: probability,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        probability("loss_probability", self.loss_probability)?;
        probability("corrupt_probability", self.corrupt_probability)
    }
}

fn probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Probability { name, value })
    }
}

fn smoothing(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Smoothing { name, value })
    }
}
