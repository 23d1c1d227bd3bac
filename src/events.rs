//! Structured protocol events.
//!
//! The engine reports what it does through an injected [`EventSink`] instead
//! of printing.  [`LogSink`] renders events through the `log` facade (enable
//! with `RUST_LOG=rdt_over_udp=debug`); [`RecordingSink`] keeps them in
//! memory so tests can assert on exact frame and ACK counts.

use std::sync::Mutex;
use std::time::Duration;

use crate::receiver::Disposition;
use crate::sender::DiscardReason;
use crate::state::Bit;

/// What triggered a retransmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransmitCause {
    Timeout,
    /// An ACK for the other bit arrived.
    AckMismatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A new data packet went out.
    DataSent { seq: Bit, len: usize },
    Retransmitted { seq: Bit, cause: RetransmitCause },
    AckAccepted {
        ack: Bit,
        rtt: Duration,
        timeout: Duration,
    },
    AckDiscarded { reason: DiscardReason },
    /// Receiver classified a data packet and answered with `ack`.
    PacketHandled {
        seq: i32,
        disposition: Disposition,
        ack: Bit,
    },
    /// The fault injector swallowed an arriving frame.
    FrameLost,
    /// The fault injector flagged an arriving frame corrupt.
    FrameCorrupted,
    /// A loop ended because its transport closed or shutdown was requested.
    Stopped { role: &'static str },
}

/// Destination for [`ProtocolEvent`]s.
pub trait EventSink: Send + Sync {
    fn record(&self, event: ProtocolEvent);
}

/// Forwards events to the `log` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: ProtocolEvent) {
        match event {
            ProtocolEvent::DataSent { seq, len } => {
                log::debug!("[rdt:sender] → DATA seq={seq} len={len}");
            }
            ProtocolEvent::Retransmitted { seq, cause } => match cause {
                RetransmitCause::Timeout => {
                    log::info!("[rdt:sender] timeout, retransmitting seq={seq}");
                }
                RetransmitCause::AckMismatch => {
                    log::info!("[rdt:sender] wrong ACK, retransmitting seq={seq}");
                }
            },
            ProtocolEvent::AckAccepted { ack, rtt, timeout } => {
                log::debug!(
                    "[rdt:sender] ← ACK ack={ack} rtt={:.3}s timeout={:.3}s",
                    rtt.as_secs_f64(),
                    timeout.as_secs_f64()
                );
            }
            ProtocolEvent::AckDiscarded { reason } => {
                log::debug!("[rdt:sender] ← discarded ({reason:?})");
            }
            ProtocolEvent::PacketHandled {
                seq,
                disposition: Disposition::Accepted,
                ack,
            } => {
                log::debug!("[rdt:receiver] ← DATA seq={seq} accepted; → ACK ack={ack}");
            }
            ProtocolEvent::PacketHandled {
                seq,
                disposition,
                ack,
            } => {
                log::debug!("[rdt:receiver] ← seq={seq} {disposition:?}; → ACK ack={ack}");
            }
            ProtocolEvent::FrameLost => log::debug!("[rdt:link] frame lost"),
            ProtocolEvent::FrameCorrupted => log::debug!("[rdt:link] frame corrupted"),
            ProtocolEvent::Stopped { role } => log::info!("[rdt:{role}] stopped"),
        }
    }
}

/// Keeps every event in arrival order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProtocolEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of recorded events matching `pred`.
    pub fn count(&self, pred: impl Fn(&ProtocolEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn record(&self, event: ProtocolEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
