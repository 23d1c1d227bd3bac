//! Finite-state-machine types.
//!
//! The sender cycles through four states driven by a single alternating bit:
//!
//! ```text
//!  ReadyToSend0 ──send──▶ AwaitAck0 ──ACK 0──▶ ReadyToSend1
//!       ▲                                            │
//!       │                                          send
//!       │                                            ▼
//!       └──────────ACK 1────────────────────── AwaitAck1
//! ```
//!
//! The receiver needs only the [`Bit`] it expects next.

use std::fmt;

/// An alternating-bit sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Bit {
    #[default]
    Zero,
    One,
}

impl Bit {
    /// The other bit.
    pub fn flip(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }

    /// Map a wire integer back to a bit; anything but 0 or 1 is `None`.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Zero),
            1 => Some(Self::One),
            _ => None,
        }
    }
}

impl fmt::Display for Bit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// All states of the sender FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Idle; the next message goes out with sequence bit 0.
    #[default]
    ReadyToSend0,
    /// Packet 0 in flight; waiting for ACK 0.
    AwaitAck0,
    /// Idle; the next message goes out with sequence bit 1.
    ReadyToSend1,
    /// Packet 1 in flight; waiting for ACK 1.
    AwaitAck1,
}

impl SenderState {
    /// `true` in either `ReadyToSend*` state.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::ReadyToSend0 | Self::ReadyToSend1)
    }

    /// The bit this state sends with (ready) or waits for (await).
    pub fn bit(self) -> Bit {
        match self {
            Self::ReadyToSend0 | Self::AwaitAck0 => Bit::Zero,
            Self::ReadyToSend1 | Self::AwaitAck1 => Bit::One,
        }
    }

    /// The ACK this state is waiting for, `None` while ready.
    pub fn awaited_ack(self) -> Option<Bit> {
        (!self.is_ready()).then(|| self.bit())
    }

    /// Transition taken by `send`: ready-to-send-b → await-ack-b.
    pub fn after_send(self) -> Self {
        match self {
            Self::ReadyToSend0 => Self::AwaitAck0,
            Self::ReadyToSend1 => Self::AwaitAck1,
            other => other,
        }
    }

    /// Transition taken on the matching ACK: await-ack-b → ready-to-send-(1-b).
    pub fn after_ack(self) -> Self {
        match self {
            Self::AwaitAck0 => Self::ReadyToSend1,
            Self::AwaitAck1 => Self::ReadyToSend0,
            other => other,
        }
    }
}

impl fmt::Display for SenderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadyToSend0 => "ready-to-send-0",
            Self::AwaitAck0 => "await-ack-0",
            Self::ReadyToSend1 => "ready-to-send-1",
            Self::AwaitAck1 => "await-ack-1",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_cycle_returns_to_start() {
        let s = SenderState::default();
        let s = s.after_send().after_ack().after_send().after_ack();
        assert_eq!(s, SenderState::ReadyToSend0);
    }

    #[test]
    fn transitions_ignore_wrong_phase() {
        assert_eq!(SenderState::AwaitAck0.after_send(), SenderState::AwaitAck0);
        assert_eq!(SenderState::ReadyToSend1.after_ack(), SenderState::ReadyToSend1);
    }

    #[test]
    fn awaited_ack_only_while_waiting() {
        assert_eq!(SenderState::ReadyToSend0.awaited_ack(), None);
        assert_eq!(SenderState::AwaitAck1.awaited_ack(), Some(Bit::One));
    }

    #[test]
    fn bit_wire_mapping() {
        assert_eq!(Bit::from_i32(-1), None);
        assert_eq!(Bit::from_i32(1), Some(Bit::One));
        assert_eq!(Bit::One.flip(), Bit::Zero);
        assert_eq!(SenderState::AwaitAck1.to_string(), "await-ack-1");
    }
}
