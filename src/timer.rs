//! Retransmission timer.
//!
//! A [`RetransmitTimer`] is a single-shot, cancelable alarm backed by a
//! spawned tokio task.  It is owned by the sender and lives inside the
//! sender's lock, so arming, cancelling and firing all serialize with ACK
//! processing.
//!
//! Every arming bumps a generation number which is handed to the expiry
//! callback.  The callback must call [`RetransmitTimer::claim_expiry`] after
//! taking the lock: an expiry that lost the race against `stop()` or a newer
//! `start()` then does nothing.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Single-shot alarm; at most one pending expiry at a time.
#[derive(Debug, Default)]
pub struct RetransmitTimer {
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl RetransmitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer to run `on_expiry(generation)` after `after`.
    ///
    /// Any previously armed expiry is cancelled.  Must be called from within
    /// a tokio runtime.
    pub fn start<F, Fut>(&mut self, after: Duration, on_expiry: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stop();
        self.generation = self.generation.wrapping_add(1);
        let fire = on_expiry(self.generation);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            fire.await;
        }));
        self.generation
    }

    /// Disarm.  Safe to call when already disarmed.
    pub fn stop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Called by the expiry callback once it holds the lock.
    ///
    /// Returns `true` if `generation` is the live arming, and marks the timer
    /// disarmed without aborting the (currently running) expiry task.
    pub fn claim_expiry(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// `true` if `generation` identifies the live arming.
    pub fn is_current(&self, generation: u64) -> bool {
        self.pending.is_some() && self.generation == generation
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
