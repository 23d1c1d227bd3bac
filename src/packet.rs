//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Serialising a [`Packet`] into the textual-delimited frame.
//! - Deserialising raw bytes back into a [`Packet`].  Decoding never fails:
//!   malformed input becomes a sentinel packet flagged `is_corrupt`.
//! - Computing and verifying the payload digest.
//!
//! No I/O happens here; pure data transformation only.
//!
//! # Wire format
//!
//! ```text
//!  <seq>|<ack>|<is_ack>|<digest>|<payload bytes ...>
//! ```
//!
//! `seq` and `ack` are signed decimal integers ([`SENTINEL`] = `-1` marks an
//! unused field), `is_ack` is `0` or `1`, `digest` is the lowercase hex MD5 of
//! the payload.  The payload is everything after the fourth `|` and is taken
//! verbatim, so it may itself contain `|` bytes.

use crate::state::Bit;

/// Field separator between header fields.
pub const SEPARATOR: u8 = b'|';

/// Value carried by `seq` / `ack` when the field has no meaning.
pub const SENTINEL: i32 = -1;

/// Length of the hex-encoded digest.
pub const DIGEST_LEN: usize = 32;

/// Upper bound on the encoded header of any packet this crate builds:
/// `-1|-1|1|<32 hex>|`.
pub const MAX_HEADER_LEN: usize = 2 + 1 + 2 + 1 + 1 + 1 + DIGEST_LEN + 1;

/// A protocol frame.
///
/// `is_corrupt` is local to the process that decoded the packet and is never
/// written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Data sequence bit as an integer, or [`SENTINEL`] on ACK-only packets.
    pub seq: i32,
    /// Acknowledged sequence bit; meaningful only when `is_ack`.
    pub ack: i32,
    pub payload: Vec<u8>,
    pub is_ack: bool,
    /// Hex digest as carried on the wire.
    pub digest: String,
    pub is_corrupt: bool,
}

impl Packet {
    /// Build a data packet carrying `payload` under sequence bit `seq`.
    pub fn data(seq: Bit, payload: Vec<u8>) -> Self {
        let digest = digest(&payload);
        Self {
            seq: seq.as_i32(),
            ack: 0,
            payload,
            is_ack: false,
            digest,
            is_corrupt: false,
        }
    }

    /// Build an ACK-only packet acknowledging sequence bit `ack`.
    pub fn ack(ack: Bit) -> Self {
        Self {
            seq: SENTINEL,
            ack: ack.as_i32(),
            payload: Vec::new(),
            is_ack: true,
            digest: digest(&[]),
            is_corrupt: false,
        }
    }

    /// The packet a malformed frame decodes to.
    pub fn corrupt_sentinel() -> Self {
        Self {
            seq: SENTINEL,
            ack: SENTINEL,
            payload: Vec::new(),
            is_ack: false,
            digest: String::new(),
            is_corrupt: true,
        }
    }

    /// Sequence bit of a data packet, `None` for sentinel or out-of-range values.
    pub fn seq_bit(&self) -> Option<Bit> {
        Bit::from_i32(self.seq)
    }

    /// Acknowledged bit of an ACK packet, `None` for out-of-range values.
    pub fn ack_bit(&self) -> Option<Bit> {
        Bit::from_i32(self.ack)
    }

    /// Serialise this packet into a newly allocated frame.
    ///
    /// The stored `digest` is written as-is; constructors compute it.
    pub fn encode(&self) -> Vec<u8> {
        let header = format!(
            "{}|{}|{}|{}|",
            self.seq,
            self.ack,
            u8::from(self.is_ack),
            self.digest
        );
        let mut buf = Vec::with_capacity(header.len() + self.payload.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a [`Packet`] from a raw frame.
    ///
    /// Malformed frames yield [`Packet::corrupt_sentinel`].  Well-formed frames
    /// get `is_corrupt = true` when the digest recomputed over the extracted
    /// payload differs from the transmitted one.
    pub fn decode(buf: &[u8]) -> Self {
        match parse(buf) {
            Some(mut packet) => {
                packet.is_corrupt = digest(&packet.payload) != packet.digest;
                packet
            }
            None => Self::corrupt_sentinel(),
        }
    }
}

fn parse(buf: &[u8]) -> Option<Packet> {
    let mut parts = buf.splitn(5, |&b| b == SEPARATOR);
    let seq = parse_int(parts.next()?)?;
    let ack = parse_int(parts.next()?)?;
    let is_ack = match parts.next()? {
        b"0" => false,
        b"1" => true,
        _ => return None,
    };
    let digest = std::str::from_utf8(parts.next()?).ok()?.to_owned();
    let payload = parts.next()?.to_vec();
    Some(Packet {
        seq,
        ack,
        payload,
        is_ack,
        digest,
        is_corrupt: false,
    })
}

fn parse_int(field: &[u8]) -> Option<i32> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Lowercase hex MD5 of `payload`.
pub fn digest(payload: &[u8]) -> String {
    format!("{:x}", md5::compute(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packet_roundtrip() {
        let pkt = Packet::data(Bit::One, b"hello".to_vec());
        let decoded = Packet::decode(&pkt.encode());
        assert_eq!(decoded.seq, 1);
        assert_eq!(decoded.ack, 0);
        assert!(!decoded.is_ack);
        assert_eq!(decoded.payload, b"hello");
        assert!(!decoded.is_corrupt);
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn ack_packet_roundtrip() {
        let decoded = Packet::decode(&Packet::ack(Bit::Zero).encode());
        assert_eq!(decoded.seq, SENTINEL);
        assert_eq!(decoded.ack_bit(), Some(Bit::Zero));
        assert!(decoded.is_ack);
        assert!(decoded.payload.is_empty());
        assert!(!decoded.is_corrupt);
    }

    #[test]
    fn ack_digest_covers_empty_payload() {
        assert_eq!(Packet::ack(Bit::One).digest, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn payload_containing_separator_is_not_resplit() {
        let payload = b"a|b||c|".to_vec();
        let decoded = Packet::decode(&Packet::data(Bit::Zero, payload.clone()).encode());
        assert_eq!(decoded.payload, payload);
        assert!(!decoded.is_corrupt);
    }

    #[test]
    fn binary_payload_survives() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let decoded = Packet::decode(&Packet::data(Bit::One, payload.clone()).encode());
        assert_eq!(decoded.payload, payload);
        assert!(!decoded.is_corrupt);
    }

    #[test]
    fn wire_layout_is_pipe_delimited() {
        let bytes = Packet::data(Bit::Zero, b"x".to_vec()).encode();
        let expected = format!("0|0|0|{}|x", digest(b"x"));
        assert_eq!(bytes, expected.as_bytes());
    }

    #[test]
    fn any_payload_mutation_is_detected() {
        let bytes = Packet::data(Bit::Zero, b"mutate me".to_vec()).encode();
        let header_len = bytes.len() - b"mutate me".len();
        for i in header_len..bytes.len() {
            let mut mutated = bytes.clone();
            mutated[i] ^= 0x01;
            assert!(Packet::decode(&mutated).is_corrupt, "flip at {i} undetected");
        }
    }

    #[test]
    fn truncated_payload_is_corrupt_not_malformed() {
        let mut bytes = Packet::data(Bit::One, b"data".to_vec()).encode();
        bytes.pop();
        let decoded = Packet::decode(&bytes);
        assert!(decoded.is_corrupt);
        assert_eq!(decoded.seq, 1);
    }

    #[test]
    fn empty_buffer_is_sentinel() {
        assert_eq!(Packet::decode(&[]), Packet::corrupt_sentinel());
    }

    #[test]
    fn too_few_fields_is_sentinel() {
        let decoded = Packet::decode(b"0|0|0");
        assert!(decoded.is_corrupt);
        assert_eq!(decoded.seq, SENTINEL);
        assert_eq!(decoded.ack, SENTINEL);
    }

    #[test]
    fn non_numeric_fields_are_sentinel() {
        let d = digest(b"");
        for frame in [
            format!("x|0|0|{d}|"),
            format!("0|y|0|{d}|"),
            format!("0|0|2|{d}|"),
            format!("0|0||{d}|"),
        ] {
            assert_eq!(Packet::decode(frame.as_bytes()), Packet::corrupt_sentinel(), "{frame}");
        }
    }

    #[test]
    fn non_utf8_header_is_sentinel() {
        assert!(Packet::decode(b"\xff|0|0|abc|").is_corrupt);
    }

    #[test]
    fn transmitted_corrupt_flag_is_not_trusted() {
        // A peer cannot mark a frame clean or dirty; only the digest decides.
        let mut pkt = Packet::data(Bit::Zero, b"ok".to_vec());
        pkt.is_corrupt = true;
        assert!(!Packet::decode(&pkt.encode()).is_corrupt);
    }

    #[test]
    fn header_never_exceeds_bound() {
        let data = Packet::data(Bit::One, Vec::new()).encode();
        let ack = Packet::ack(Bit::One).encode();
        assert!(data.len() <= MAX_HEADER_LEN);
        assert!(ack.len() <= MAX_HEADER_LEN);
        assert_eq!(Packet::corrupt_sentinel().seq_bit(), None);
    }
}
