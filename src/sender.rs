//! Sender FSM for the alternating-bit protocol.
//!
//! [`Sender`] owns the state cycle, the single in-flight packet and the RTT
//! estimator.  It does **not** touch the socket or the timer;
//! [`crate::connection::RdtSender`] calls these methods under its lock and
//! carries out the returned [`Transmission`]s.
//!
//! # Stop-and-Wait contract
//! - At most **one** packet is in flight (`pending`).
//! - `send` only acts in a `ReadyToSend*` state; elsewhere it is a no-op.
//! - Corrupt or non-ACK input never changes state.
//! - Matching ACK: sample RTT, stop the timer, flip the bit.
//! - Mismatched ACK: retransmit immediately, exactly as a timeout would.

use std::time::{Duration, Instant};

use crate::config::ProtocolConfig;
use crate::packet::Packet;
use crate::rtt::RttEstimator;
use crate::state::{Bit, SenderState};

/// A frame the caller must put on the wire, then arm the timer for `timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub seq: Bit,
    pub frame: Vec<u8>,
    pub timeout: Duration,
}

/// Why an inbound frame did not advance the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Digest mismatch, malformed frame, or injected corruption.
    Corrupt,
    /// A well-formed packet that is not an ACK.
    NotAck,
    /// An ACK while no packet is outstanding.
    Idle,
}

/// Result of feeding one inbound packet to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The awaited ACK arrived; the caller stops the timer.
    Accepted {
        ack: Bit,
        rtt: Duration,
        timeout: Duration,
    },
    /// A different ACK arrived; the caller retransmits and re-arms.
    Mismatch {
        expected: Bit,
        got: i32,
        retransmit: Transmission,
    },
    Discarded(DiscardReason),
}

/// Counters kept by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderStats {
    /// Payload bytes of new messages (retransmissions excluded).
    pub bytes_sent: u64,
    /// Data frames put on the wire, first sends and retransmissions.
    pub transmissions: u64,
    pub timeout_retransmissions: u64,
    pub mismatch_retransmissions: u64,
    pub acks_accepted: u64,
    pub acks_discarded: u64,
}

impl SenderStats {
    pub fn retransmissions(&self) -> u64 {
        self.timeout_retransmissions + self.mismatch_retransmissions
    }

    /// Goodput in kilobits per second over `elapsed`.
    pub fn throughput_kbps(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        (self.bytes_sent as f64 * 8.0) / secs / 1000.0
    }
}

/// Stop-and-wait send-side state.
#[derive(Debug)]
pub struct Sender {
    state: SenderState,
    /// Last packet transmitted; kept until its ACK is confirmed.
    pending: Option<Packet>,
    /// Time of the most recent (re)transmission of `pending`.
    sent_at: Option<Instant>,
    rtt: RttEstimator,
    stats: SenderStats,
}

impl Sender {
    pub fn new(config: &ProtocolConfig) -> Self {
        Self {
            state: SenderState::default(),
            pending: None,
            sent_at: None,
            rtt: RttEstimator::new(config),
            stats: SenderStats::default(),
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn is_ready_to_send(&self) -> bool {
        self.state.is_ready()
    }

    pub fn pending(&self) -> Option<&Packet> {
        self.pending.as_ref()
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Hand a new message to the FSM.
    ///
    /// Returns `None` (and does nothing) unless the sender is ready.
    pub fn send(&mut self, payload: &[u8], now: Instant) -> Option<Transmission> {
        if !self.state.is_ready() {
            return None;
        }
        let seq = self.state.bit();
        let packet = Packet::data(seq, payload.to_vec());
        let frame = packet.encode();
        self.pending = Some(packet);
        self.sent_at = Some(now);
        self.state = self.state.after_send();
        self.stats.bytes_sent += payload.len() as u64;
        self.stats.transmissions += 1;
        Some(Transmission {
            seq,
            frame,
            timeout: self.rtt.timeout(),
        })
    }

    /// Retransmission timer expired.
    ///
    /// Returns the pending packet, unchanged, for retransmission; `None` when
    /// nothing is outstanding.
    pub fn on_timeout(&mut self, now: Instant) -> Option<Transmission> {
        let transmission = self.retransmit(now)?;
        self.stats.timeout_retransmissions += 1;
        Some(transmission)
    }

    /// Decode and process an inbound frame.
    pub fn receive(&mut self, frame: &[u8], now: Instant) -> AckOutcome {
        self.receive_packet(Packet::decode(frame), now)
    }

    /// Process an already-decoded inbound packet.
    pub fn receive_packet(&mut self, packet: Packet, now: Instant) -> AckOutcome {
        if packet.is_corrupt {
            return self.discard(DiscardReason::Corrupt);
        }
        if !packet.is_ack {
            return self.discard(DiscardReason::NotAck);
        }
        let Some(expected) = self.state.awaited_ack() else {
            return self.discard(DiscardReason::Idle);
        };

        if packet.ack_bit() == Some(expected) {
            let rtt = self
                .sent_at
                .map_or(Duration::ZERO, |sent| now.saturating_duration_since(sent));
            let timeout = self.rtt.observe(rtt);
            self.pending = None;
            self.sent_at = None;
            self.state = self.state.after_ack();
            self.stats.acks_accepted += 1;
            return AckOutcome::Accepted {
                ack: expected,
                rtt,
                timeout,
            };
        }

        match self.retransmit(now) {
            Some(retransmit) => {
                self.stats.mismatch_retransmissions += 1;
                AckOutcome::Mismatch {
                    expected,
                    got: packet.ack,
                    retransmit,
                }
            }
            None => self.discard(DiscardReason::Idle),
        }
    }

    fn retransmit(&mut self, now: Instant) -> Option<Transmission> {
        if self.state.is_ready() {
            return None;
        }
        let packet = self.pending.as_ref()?;
        self.sent_at = Some(now);
        self.stats.transmissions += 1;
        Some(Transmission {
            seq: self.state.bit(),
            frame: packet.encode(),
            timeout: self.rtt.timeout(),
        })
    }

    fn discard(&mut self, reason: DiscardReason) -> AckOutcome {
        self.stats.acks_discarded += 1;
        AckOutcome::Discarded(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Bit;

    fn sender() -> Sender {
        Sender::new(&ProtocolConfig::default())
    }

    fn ack(bit: Bit) -> Vec<u8> {
        Packet::ack(bit).encode()
    }

    #[test]
    fn send_builds_packet_and_awaits() {
        let mut s = sender();
        let now = Instant::now();
        let tx = s.send(b"hello", now).expect("ready");
        assert_eq!(tx.seq, Bit::Zero);
        assert_eq!(tx.timeout, Duration::from_millis(100));

        let on_wire = Packet::decode(&tx.frame);
        assert_eq!(on_wire.seq, 0);
        assert!(!on_wire.is_ack);
        assert_eq!(on_wire.payload, b"hello");
        assert_eq!(s.state(), SenderState::AwaitAck0);
        assert_eq!(s.stats().bytes_sent, 5);
    }

    #[test]
    fn send_while_awaiting_is_noop() {
        let mut s = sender();
        let now = Instant::now();
        s.send(b"first", now).unwrap();
        assert_eq!(s.send(b"second", now), None);
        assert_eq!(s.pending().unwrap().payload, b"first");
        assert_eq!(s.stats().bytes_sent, 5);
        assert_eq!(s.stats().transmissions, 1);
    }

    #[test]
    fn matching_ack_advances_and_samples_rtt() {
        let mut s = sender();
        let t0 = Instant::now();
        s.send(b"a", t0).unwrap();
        let outcome = s.receive(&ack(Bit::Zero), t0 + Duration::from_millis(30));
        match outcome {
            AckOutcome::Accepted { ack, rtt, .. } => {
                assert_eq!(ack, Bit::Zero);
                assert_eq!(rtt, Duration::from_millis(30));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.state(), SenderState::ReadyToSend1);
        assert!(s.pending().is_none());
        assert_eq!(s.rtt().last_sample(), Some(Duration::from_millis(30)));

        let tx = s.send(b"b", t0).unwrap();
        assert_eq!(tx.seq, Bit::One);
    }

    #[test]
    fn corrupt_or_data_input_never_advances() {
        let mut s = sender();
        let now = Instant::now();
        s.send(b"x", now).unwrap();

        let mut garbled = ack(Bit::Zero);
        let last = garbled.len() - 1;
        garbled[last] = b'!';
        garbled.push(b'?');
        assert_eq!(
            s.receive(&garbled, now),
            AckOutcome::Discarded(DiscardReason::Corrupt)
        );
        assert_eq!(
            s.receive(b"not a frame", now),
            AckOutcome::Discarded(DiscardReason::Corrupt)
        );
        let data = Packet::data(Bit::Zero, b"x".to_vec()).encode();
        assert_eq!(
            s.receive(&data, now),
            AckOutcome::Discarded(DiscardReason::NotAck)
        );

        let mut marked = Packet::ack(Bit::Zero);
        marked.is_corrupt = true;
        assert_eq!(
            s.receive_packet(marked, now),
            AckOutcome::Discarded(DiscardReason::Corrupt)
        );

        assert_eq!(s.state(), SenderState::AwaitAck0);
        assert_eq!(s.stats().acks_discarded, 4);
        assert_eq!(s.stats().transmissions, 1);
    }

    #[test]
    fn timeout_retransmits_identical_frame() {
        let mut s = sender();
        let now = Instant::now();
        let first = s.send(b"again", now).unwrap();
        let second = s.on_timeout(now + Duration::from_millis(100)).unwrap();
        assert_eq!(first.frame, second.frame);
        assert_eq!(s.state(), SenderState::AwaitAck0);
        assert_eq!(s.stats().timeout_retransmissions, 1);
        assert_eq!(s.stats().bytes_sent, 5);
    }

    #[test]
    fn timeout_while_idle_does_nothing() {
        let mut s = sender();
        assert_eq!(s.on_timeout(Instant::now()), None);
        assert_eq!(s.stats().transmissions, 0);
    }

    #[test]
    fn rtt_measures_only_last_attempt() {
        let mut s = sender();
        let t0 = Instant::now();
        s.send(b"m", t0).unwrap();
        let t1 = t0 + Duration::from_millis(100);
        s.on_timeout(t1).unwrap();
        let outcome = s.receive(&ack(Bit::Zero), t1 + Duration::from_millis(7));
        assert!(matches!(
            outcome,
            AckOutcome::Accepted { rtt, .. } if rtt == Duration::from_millis(7)
        ));
    }

    #[test]
    fn wrong_ack_triggers_early_retransmit() {
        let mut s = sender();
        let now = Instant::now();
        s.send(b"zero", now).unwrap();
        s.receive(&ack(Bit::Zero), now);
        let tx = s.send(b"one", now).unwrap();

        // A late duplicate ACK 0 while awaiting ACK 1.
        match s.receive(&ack(Bit::Zero), now) {
            AckOutcome::Mismatch {
                expected,
                got,
                retransmit,
            } => {
                assert_eq!(expected, Bit::One);
                assert_eq!(got, 0);
                assert_eq!(retransmit.frame, tx.frame);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.state(), SenderState::AwaitAck1);
        assert_eq!(s.stats().mismatch_retransmissions, 1);
    }

    #[test]
    fn ack_while_ready_is_ignored() {
        let mut s = sender();
        assert_eq!(
            s.receive(&ack(Bit::One), Instant::now()),
            AckOutcome::Discarded(DiscardReason::Idle)
        );
        assert_eq!(s.state(), SenderState::ReadyToSend0);
    }

    #[test]
    fn throughput_in_kbps() {
        let stats = SenderStats {
            bytes_sent: 1000,
            ..SenderStats::default()
        };
        assert!((stats.throughput_kbps(Duration::from_secs(2)) - 4.0).abs() < 1e-9);
        assert_eq!(stats.throughput_kbps(Duration::ZERO), 0.0);
    }
}
