//! Error types.
//!
//! Bad network input is never an error here: malformed and corrupt frames
//! decode to a flagged [`crate::packet::Packet`] and flow through the normal
//! protocol branches.  What remains are configuration mistakes, caller misuse
//! and the terminal "transport closed" condition.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`crate::socket::Transport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport was closed; every blocked receive returns this.
    #[error("transport closed")]
    Closed,
    /// Underlying I/O error from the OS.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the async engine to its driver.
#[derive(Debug, Error)]
pub enum RdtError {
    /// The payload does not fit in one datagram alongside the header.
    #[error("payload of {len} bytes exceeds the {max}-byte capacity of one packet")]
    PayloadTooLarge { len: usize, max: usize },
    /// The engine was shut down while the caller was waiting.
    #[error("engine shut down")]
    Shutdown,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must lie in [0, 1], got {value}")]
    Probability { name: &'static str, value: f64 },
    #[error("{name} must lie in (0, 1), got {value}")]
    Smoothing { name: &'static str, value: f64 },
    #[error("timeouts must satisfy 0 < min ({min:?}) <= initial ({initial:?}) <= max ({max:?})")]
    TimeoutBounds {
        min: Duration,
        initial: Duration,
        max: Duration,
    },
    #[error("max_datagram of {0} bytes leaves no room for a payload")]
    DatagramTooSmall(usize),
}
