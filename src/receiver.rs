//! Receiver FSM for the alternating-bit protocol.
//!
//! The [`Receiver`] keeps a single bit: the sequence number it expects next.
//! Every inbound packet produces exactly one ACK:
//! - In-order and intact: ACK its sequence bit, deliver the payload, flip.
//! - Anything else (corrupt, duplicate, unexpected): re-ACK the previously
//!   accepted bit so a sender whose ACK was lost can recover.
//!
//! No out-of-order buffering is needed since at most one packet is in flight.
//! Like [`crate::sender::Sender`], this type performs no I/O.

use crate::packet::Packet;
use crate::state::Bit;

/// How an inbound packet was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Accepted,
    /// Repeat of the last accepted sequence bit.
    Duplicate,
    Corrupt,
    /// Intact but carrying neither expected bit (e.g. a stray ACK).
    Unexpected,
}

/// What the caller must do after [`Receiver::on_packet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverOutput {
    pub disposition: Disposition,
    /// Encoded ACK to send back to the packet's source.
    pub ack_frame: Vec<u8>,
    /// The bit acknowledged by `ack_frame`.
    pub ack: Bit,
    /// Payload to hand to the application, present only when accepted.
    pub delivered: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiverStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub corrupt: u64,
    pub unexpected: u64,
    /// ACKs the transport accepted; see [`Receiver::ack_sent`].
    pub acks_sent: u64,
    pub bytes_delivered: u64,
}

/// Receive-side state for one connection.
#[derive(Debug, Default)]
pub struct Receiver {
    expected: Bit,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expected_seq(&self) -> Bit {
        self.expected
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Record that the ACK from the last [`ReceiverOutput`] reached the wire.
    pub fn ack_sent(&mut self) {
        self.stats.acks_sent += 1;
    }

    /// Decode and process a raw inbound frame.
    pub fn on_packet(&mut self, frame: &[u8]) -> ReceiverOutput {
        self.on_decoded(Packet::decode(frame))
    }

    /// Process an already-decoded packet.
    pub fn on_decoded(&mut self, packet: Packet) -> ReceiverOutput {
        let disposition = if packet.is_corrupt {
            Disposition::Corrupt
        } else if packet.seq_bit() == Some(self.expected) {
            Disposition::Accepted
        } else if packet.seq_bit() == Some(self.expected.flip()) {
            Disposition::Duplicate
        } else {
            Disposition::Unexpected
        };

        if disposition != Disposition::Accepted {
            match disposition {
                Disposition::Duplicate => self.stats.duplicates += 1,
                Disposition::Corrupt => self.stats.corrupt += 1,
                _ => self.stats.unexpected += 1,
            }
            let last = self.expected.flip();
            return ReceiverOutput {
                disposition,
                ack_frame: Packet::ack(last).encode(),
                ack: last,
                delivered: None,
            };
        }

        let accepted = self.expected;
        self.expected = self.expected.flip();
        self.stats.accepted += 1;
        self.stats.bytes_delivered += packet.payload.len() as u64;
        ReceiverOutput {
            disposition,
            ack_frame: Packet::ack(accepted).encode(),
            ack: accepted,
            delivered: Some(packet.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(bit: Bit, payload: &[u8]) -> Vec<u8> {
        Packet::data(bit, payload.to_vec()).encode()
    }

    #[test]
    fn accepts_expected_and_acks_it() {
        let mut r = Receiver::new();
        let out = r.on_packet(&data(Bit::Zero, b"first"));
        assert_eq!(out.disposition, Disposition::Accepted);
        assert_eq!(out.ack, Bit::Zero);
        assert_eq!(out.delivered.as_deref(), Some(&b"first"[..]));
        assert_eq!(r.expected_seq(), Bit::One);

        let ack = Packet::decode(&out.ack_frame);
        assert!(ack.is_ack);
        assert!(!ack.is_corrupt);
        assert_eq!(ack.seq, crate::packet::SENTINEL);
        assert_eq!(ack.ack, 0);
        assert!(ack.payload.is_empty());
    }

    #[test]
    fn duplicate_is_reacked_without_toggle() {
        let mut r = Receiver::new();
        r.on_packet(&data(Bit::Zero, b"m0"));
        let out = r.on_packet(&data(Bit::Zero, b"m0"));
        assert_eq!(out.disposition, Disposition::Duplicate);
        assert_eq!(out.ack, Bit::Zero);
        assert_eq!(out.delivered, None);
        assert_eq!(r.expected_seq(), Bit::One);
        assert_eq!(r.stats().duplicates, 1);
    }

    #[test]
    fn corrupt_packet_reacks_previous_bit() {
        let mut r = Receiver::new();
        let mut frame = data(Bit::Zero, b"payload");
        let last = frame.len() - 1;
        frame[last] ^= 0x20;
        let out = r.on_packet(&frame);
        assert_eq!(out.disposition, Disposition::Corrupt);
        // Nothing accepted yet: the "previous" bit is 1.
        assert_eq!(out.ack, Bit::One);
        assert_eq!(r.expected_seq(), Bit::Zero);

        let out = r.on_packet(b"garbage");
        assert_eq!(out.disposition, Disposition::Corrupt);
        assert_eq!(r.stats().corrupt, 2);
    }

    #[test]
    fn stray_ack_is_unexpected() {
        let mut r = Receiver::new();
        let out = r.on_packet(&Packet::ack(Bit::Zero).encode());
        assert_eq!(out.disposition, Disposition::Unexpected);
        assert_eq!(out.ack, Bit::One);
        assert_eq!(r.expected_seq(), Bit::Zero);
    }

    #[test]
    fn accepted_sequence_strictly_alternates() {
        let mut r = Receiver::new();
        let mut accepted = Vec::new();
        let arrivals = [
            Bit::Zero,
            Bit::Zero,
            Bit::One,
            Bit::One,
            Bit::One,
            Bit::Zero,
            Bit::One,
            Bit::Zero,
            Bit::Zero,
        ];
        for (i, bit) in arrivals.into_iter().enumerate() {
            let out = r.on_packet(&data(bit, format!("p{i}").as_bytes()));
            if out.disposition == Disposition::Accepted {
                accepted.push(bit);
            }
        }
        assert_eq!(
            accepted,
            vec![Bit::Zero, Bit::One, Bit::Zero, Bit::One, Bit::Zero]
        );
        assert!(accepted.windows(2).all(|w| w[0] != w[1]));
        assert_eq!(r.stats().acks_sent, 0);
        assert_eq!(
            r.stats().accepted + r.stats().duplicates,
            arrivals.len() as u64
        );
    }
}
