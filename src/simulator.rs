//! Fault injection for arriving frames.
//!
//! Real networks drop and damage packets.  To exercise the recovery paths
//! without depending on actual network conditions, a [`FaultInjector`] sits
//! between the transport and an FSM and decides a [`Fate`] for every frame
//! that arrives:
//!
//! | Fate      | Effect                                                   |
//! |-----------|----------------------------------------------------------|
//! | `Drop`    | Frame vanishes, as if never sent (`loss_probability`).   |
//! | `Corrupt` | Frame is decoded but flagged `is_corrupt`                |
//! |           | (`corrupt_probability`, rolled only for surviving frames). |
//! | `Deliver` | Frame is decoded untouched.                              |
//!
//! Payload bytes are never modified; the FSM's own corruption check decides
//! what to discard.  One injector serves one direction of one link, so the
//! data and ACK directions are faulted independently.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::FaultConfig;
use crate::packet::Packet;

/// Outcome chosen for one arriving frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Deliver,
    Drop,
    Corrupt,
}

impl Fate {
    /// Decode `frame` under this fate; `None` when it is lost.
    pub fn apply(self, frame: &[u8]) -> Option<Packet> {
        match self {
            Fate::Drop => None,
            Fate::Corrupt => {
                let mut packet = Packet::decode(frame);
                packet.is_corrupt = true;
                Some(packet)
            }
            Fate::Deliver => Some(Packet::decode(frame)),
        }
    }
}

enum Plan {
    Random {
        rng: StdRng,
        loss: f64,
        corrupt: f64,
    },
    /// Replays fixed fates in order, then delivers everything.
    Scripted(VecDeque<Fate>),
}

/// Counters kept by an injector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub seen: u64,
    pub dropped: u64,
    pub corrupted: u64,
}

/// Per-direction fault model.
pub struct FaultInjector {
    plan: Plan,
    stats: FaultStats,
}

impl FaultInjector {
    /// Random faults drawn with the probabilities in `config`.
    ///
    /// `config` is expected to have passed [`FaultConfig::validate`];
    /// probabilities are clamped into `[0, 1]` regardless.
    pub fn new(config: &FaultConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            plan: Plan::Random {
                rng,
                loss: clamp_probability(config.loss_probability),
                corrupt: clamp_probability(config.corrupt_probability),
            },
            stats: FaultStats::default(),
        }
    }

    /// A transparent pass-through.
    pub fn passthrough() -> Self {
        Self::scripted([])
    }

    /// Deterministic fates for tests: `fates` in order, then `Deliver`.
    pub fn scripted(fates: impl IntoIterator<Item = Fate>) -> Self {
        Self {
            plan: Plan::Scripted(fates.into_iter().collect()),
            stats: FaultStats::default(),
        }
    }

    /// Decide the fate of the next arriving frame.
    pub fn next_fate(&mut self) -> Fate {
        let fate = match &mut self.plan {
            Plan::Random { rng, loss, corrupt } => {
                if rng.random_bool(*loss) {
                    Fate::Drop
                } else if rng.random_bool(*corrupt) {
                    Fate::Corrupt
                } else {
                    Fate::Deliver
                }
            }
            Plan::Scripted(queue) => queue.pop_front().unwrap_or(Fate::Deliver),
        };
        self.stats.seen += 1;
        match fate {
            Fate::Drop => self.stats.dropped += 1,
            Fate::Corrupt => self.stats.corrupted += 1,
            Fate::Deliver => {}
        }
        fate
    }

    /// Apply the next fate to `frame`.
    ///
    /// Returns the fate alongside `None` when the frame is lost, otherwise
    /// the decoded packet, with `is_corrupt` forced on for a `Corrupt` fate.
    pub fn admit(&mut self, frame: &[u8]) -> (Fate, Option<Packet>) {
        let fate = self.next_fate();
        (fate, fate.apply(frame))
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }
}

fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 1.0)
    }
}
