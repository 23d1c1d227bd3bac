//! Async protocol engine: binds the FSMs to a transport.
//!
//! # Architecture
//!
//! ```text
//!  Application                                   Application
//!      │ send(payload)                               ▲ delivered payloads
//!      ▼                                             │ (mpsc)
//!  RdtSender ──────────── data ─────────────▶ RdtReceiver
//!   ├── Mutex { Sender FSM, RetransmitTimer }        ├── Receiver FSM
//!   ├── run(): ACK listener ◀──── ACKs ──────────────┤
//!   └── timer task ── expiry ──▶ retransmit          └── run(): data listener
//!
//!  Each listener passes arriving frames through its own FaultInjector.
//! ```
//!
//! # Lock discipline
//!
//! Application `send`, ACK processing and timer expiry may run concurrently
//! on one sender.  All of them mutate the FSM, the pending packet and the
//! timer only while holding the sender's single `tokio::sync::Mutex`; the
//! frame is written to the transport under that same lock, so a firing timer
//! can never interleave with an arriving ACK.
//!
//! # Shutdown
//!
//! Both sides observe a shared [`CancellationToken`].  Once cancelled, timer
//! expiries do nothing, blocked `send` callers return [`RdtError::Shutdown`]
//! and the listener loops exit.  A closed transport ends the loops too.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ProtocolConfig;
use crate::error::{ConfigError, RdtError, TransportError};
use crate::events::{EventSink, ProtocolEvent, RetransmitCause};
use crate::packet::Packet;
use crate::receiver::{Disposition, Receiver, ReceiverStats};
use crate::sender::{AckOutcome, Sender, SenderStats, Transmission};
use crate::simulator::{Fate, FaultInjector};
use crate::socket::Transport;
use crate::state::{Bit, SenderState};
use crate::timer::RetransmitTimer;

/// Capacity of the channel that hands accepted payloads to the application.
const DELIVERY_QUEUE: usize = 64;

type ExpiryFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

fn now() -> std::time::Instant {
    Instant::now().into_std()
}

/// Run one arriving frame through `injector`, reporting what it did.
fn admit(injector: &mut FaultInjector, frame: &[u8], events: &dyn EventSink) -> Option<Packet> {
    let (fate, packet) = injector.admit(frame);
    match fate {
        Fate::Drop => events.record(ProtocolEvent::FrameLost),
        Fate::Corrupt => events.record(ProtocolEvent::FrameCorrupted),
        Fate::Deliver => {}
    }
    packet
}

// ---------------------------------------------------------------------------
// RdtSender
// ---------------------------------------------------------------------------

/// Point-in-time view of a sender.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SenderReport {
    pub state: SenderState,
    pub stats: SenderStats,
    pub timeout: Duration,
    pub last_rtt: Option<Duration>,
    pub elapsed: Duration,
}

impl SenderReport {
    pub fn throughput_kbps(&self) -> f64 {
        self.stats.throughput_kbps(self.elapsed)
    }
}

/// Everything guarded by the sender's lock.
struct SenderSlot {
    fsm: Sender,
    timer: RetransmitTimer,
}

struct SenderShared {
    slot: Mutex<SenderSlot>,
    transport: Arc<dyn Transport>,
    peer: SocketAddr,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    state_tx: watch::Sender<SenderState>,
    max_payload: usize,
    started_at: Instant,
}

/// Sending half of a connection.  Cheap to clone; clones share one FSM.
#[derive(Clone)]
pub struct RdtSender {
    shared: Arc<SenderShared>,
}

impl RdtSender {
    /// Build a sender that transmits to `peer` over `transport`.
    ///
    /// `config` is validated first.
    pub fn new(
        transport: Arc<dyn Transport>,
        peer: SocketAddr,
        config: &ProtocolConfig,
        events: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(SenderState::default());
        Ok(Self {
            shared: Arc::new(SenderShared {
                slot: Mutex::new(SenderSlot {
                    fsm: Sender::new(config),
                    timer: RetransmitTimer::new(),
                }),
                transport,
                peer,
                events,
                shutdown,
                state_tx,
                max_payload: config.max_payload(),
                started_at: Instant::now(),
            }),
        })
    }

    pub fn is_ready_to_send(&self) -> bool {
        self.state().is_ready()
    }

    pub fn state(&self) -> SenderState {
        *self.shared.state_tx.borrow()
    }

    /// Largest payload accepted by [`RdtSender::send`].
    pub fn max_payload(&self) -> usize {
        self.shared.max_payload
    }

    /// Send `payload` if the FSM is ready; a no-op returning `Ok(false)` while
    /// a packet is still awaiting its ACK.
    pub async fn try_send(&self, payload: &[u8]) -> Result<bool, RdtError> {
        if payload.len() > self.shared.max_payload {
            return Err(RdtError::PayloadTooLarge {
                len: payload.len(),
                max: self.shared.max_payload,
            });
        }
        if self.shared.shutdown.is_cancelled() {
            return Err(RdtError::Shutdown);
        }
        let mut slot = self.shared.slot.lock().await;
        let Some(tx) = slot.fsm.send(payload, now()) else {
            return Ok(false);
        };
        self.shared.events.record(ProtocolEvent::DataSent {
            seq: tx.seq,
            len: payload.len(),
        });
        self.shared.publish(&slot);
        self.shared.transmit_and_arm(&mut slot, tx).await?;
        Ok(true)
    }

    /// Send `payload`, first waiting until the previous message is
    /// acknowledged.
    pub async fn send(&self, payload: &[u8]) -> Result<(), RdtError> {
        loop {
            if self.try_send(payload).await? {
                return Ok(());
            }
            self.flush().await?;
        }
    }

    /// Wait until nothing is outstanding.
    pub async fn flush(&self) -> Result<(), RdtError> {
        let mut state_rx = self.shared.state_tx.subscribe();
        tokio::select! {
            ready = state_rx.wait_for(|s| s.is_ready()) => {
                ready.map(|_| ()).map_err(|_| RdtError::Shutdown)
            }
            _ = self.shared.shutdown.cancelled() => Err(RdtError::Shutdown),
        }
    }

    /// Feed a raw inbound frame to the FSM.
    pub async fn receive(&self, frame: &[u8]) -> Result<(), RdtError> {
        self.receive_packet(Packet::decode(frame)).await
    }

    /// Feed an already-decoded (and possibly fault-injected) packet.
    pub async fn receive_packet(&self, packet: Packet) -> Result<(), RdtError> {
        let mut slot = self.shared.slot.lock().await;
        match slot.fsm.receive_packet(packet, now()) {
            AckOutcome::Accepted { ack, rtt, timeout } => {
                slot.timer.stop();
                self.shared.publish(&slot);
                self.shared
                    .events
                    .record(ProtocolEvent::AckAccepted { ack, rtt, timeout });
            }
            AckOutcome::Mismatch { retransmit, .. } => {
                self.shared.events.record(ProtocolEvent::Retransmitted {
                    seq: retransmit.seq,
                    cause: RetransmitCause::AckMismatch,
                });
                self.shared.transmit_and_arm(&mut slot, retransmit).await?;
            }
            AckOutcome::Discarded(reason) => {
                self.shared
                    .events
                    .record(ProtocolEvent::AckDiscarded { reason });
            }
        }
        Ok(())
    }

    /// Retransmit the pending packet as if the timer had expired.
    pub async fn on_timeout(&self) -> Result<(), RdtError> {
        let mut slot = self.shared.slot.lock().await;
        self.shared.retransmit_on_timeout(&mut slot).await
    }

    /// ACK listener: receive frames until shutdown or transport close.
    pub async fn run(&self, mut injector: FaultInjector) -> Result<(), RdtError> {
        let shared = &self.shared;
        loop {
            let received = tokio::select! {
                _ = shared.shutdown.cancelled() => break,
                received = shared.transport.recv_from() => received,
            };
            match received {
                Ok((frame, from)) => {
                    if from != shared.peer {
                        log::trace!("[rdt:sender] ignoring frame from {from}");
                        continue;
                    }
                    if let Some(packet) = admit(&mut injector, &frame, shared.events.as_ref()) {
                        match self.receive_packet(packet).await {
                            Err(RdtError::Transport(TransportError::Closed)) => break,
                            Err(e) => return Err(e),
                            Ok(()) => {}
                        }
                    }
                }
                Err(TransportError::Closed) => break,
                Err(TransportError::Io(e)) => {
                    log::warn!("[rdt:sender] receive failed: {e}");
                }
            }
        }
        shared.events.record(ProtocolEvent::Stopped { role: "sender" });
        Ok(())
    }

    /// Stop timers, wake waiters and close the transport.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.slot.lock().await.timer.stop();
        self.shared.transport.close();
    }

    pub async fn report(&self) -> SenderReport {
        let slot = self.shared.slot.lock().await;
        SenderReport {
            state: slot.fsm.state(),
            stats: slot.fsm.stats(),
            timeout: slot.fsm.rtt().timeout(),
            last_rtt: slot.fsm.rtt().last_sample(),
            elapsed: self.shared.started_at.elapsed(),
        }
    }
}

impl SenderShared {
    fn publish(&self, slot: &SenderSlot) {
        self.state_tx.send_replace(slot.fsm.state());
    }

    /// Write `tx` to the wire and (re)arm the timer.
    ///
    /// An I/O failure is treated as a lost frame: the timer is still armed.
    async fn transmit_and_arm(
        self: &Arc<Self>,
        slot: &mut SenderSlot,
        tx: Transmission,
    ) -> Result<(), RdtError> {
        match self.transport.send_to(&tx.frame, self.peer).await {
            Ok(()) => {}
            Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
            Err(TransportError::Io(e)) => {
                log::warn!("[rdt:sender] send of seq={} failed: {e}", tx.seq);
            }
        }
        let weak = Arc::downgrade(self);
        slot.timer
            .start(tx.timeout, move |generation| Self::expire(weak, generation));
        Ok(())
    }

    async fn retransmit_on_timeout(self: &Arc<Self>, slot: &mut SenderSlot) -> Result<(), RdtError> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        let Some(tx) = slot.fsm.on_timeout(now()) else {
            return Ok(());
        };
        self.events.record(ProtocolEvent::Retransmitted {
            seq: tx.seq,
            cause: RetransmitCause::Timeout,
        });
        self.transmit_and_arm(slot, tx).await
    }

    /// Timer expiry callback.  Acts only if `generation` is still the live
    /// arming once the lock is held.
    fn expire(weak: Weak<Self>, generation: u64) -> ExpiryFuture {
        Box::pin(async move {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut slot = shared.slot.lock().await;
            if !slot.timer.claim_expiry(generation) {
                return;
            }
            if let Err(e) = shared.retransmit_on_timeout(&mut slot).await {
                log::debug!("[rdt:sender] retransmission abandoned: {e}");
            }
        })
    }
}

// ---------------------------------------------------------------------------
// RdtReceiver
// ---------------------------------------------------------------------------

/// Receiving half of a connection.
pub struct RdtReceiver {
    fsm: Receiver,
    transport: Arc<dyn Transport>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    deliver: mpsc::Sender<Vec<u8>>,
}

impl RdtReceiver {
    /// Build a receiver and the channel on which accepted payloads arrive,
    /// in order and exactly once.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (deliver, delivered) = mpsc::channel(DELIVERY_QUEUE);
        let receiver = Self {
            fsm: Receiver::new(),
            transport,
            events,
            shutdown,
            deliver,
        };
        (receiver, delivered)
    }

    pub fn expected_seq(&self) -> Bit {
        self.fsm.expected_seq()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.fsm.stats()
    }

    /// Decode `frame` from `from`, answer with an ACK and deliver the payload
    /// if it was accepted.
    pub async fn on_packet(&mut self, frame: &[u8], from: SocketAddr) -> Result<Disposition, RdtError> {
        self.handle(Packet::decode(frame), from).await
    }

    async fn handle(&mut self, packet: Packet, from: SocketAddr) -> Result<Disposition, RdtError> {
        let seq = packet.seq;
        let out = self.fsm.on_decoded(packet);
        self.events.record(ProtocolEvent::PacketHandled {
            seq,
            disposition: out.disposition,
            ack: out.ack,
        });

        match self.transport.send_to(&out.ack_frame, from).await {
            Ok(()) => self.fsm.ack_sent(),
            Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
            Err(TransportError::Io(e)) => log::warn!("[rdt:receiver] ACK send failed: {e}"),
        }

        if let Some(payload) = out.delivered {
            tokio::select! {
                sent = self.deliver.send(payload) => {
                    if sent.is_err() {
                        log::debug!("[rdt:receiver] application gone; payload dropped");
                    }
                }
                _ = self.shutdown.cancelled() => return Err(RdtError::Shutdown),
            }
        }
        Ok(out.disposition)
    }

    /// Data listener: receive frames until shutdown or transport close.
    ///
    /// Returns the final counters.
    pub async fn run(mut self, mut injector: FaultInjector) -> Result<ReceiverStats, RdtError> {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = self.transport.recv_from() => received,
            };
            match received {
                Ok((frame, from)) => {
                    let Some(packet) = admit(&mut injector, &frame, self.events.as_ref()) else {
                        continue;
                    };
                    match self.handle(packet, from).await {
                        Ok(_) => {}
                        Err(RdtError::Shutdown)
                        | Err(RdtError::Transport(TransportError::Closed)) => break,
                        Err(e) => return Err(e),
                    }
                }
                Err(TransportError::Closed) => break,
                Err(TransportError::Io(e)) => {
                    log::warn!("[rdt:receiver] receive failed: {e}");
                }
            }
        }
        self.events.record(ProtocolEvent::Stopped { role: "receiver" });
        Ok(self.fsm.stats())
    }
}
