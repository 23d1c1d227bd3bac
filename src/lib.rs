//! `rdt-over-udp`: stop-and-wait, alternating-bit reliable transfer over UDP
//! (RDT 3.0).
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐    data (seq 0/1)    ┌──────────────┐
//!  │ RdtSender  │─────────────────────▶│ RdtReceiver  │
//!  └─────┬──────┘                      └──────┬───────┘
//!        │          ACKs (ack 0/1)            │
//!        │◀───────────────────────────────────┘
//!        │
//!  ┌─────▼─────────────────────────────────────┐
//!  │  FaultInjector (per arriving direction)   │
//!  └─────┬─────────────────────────────────────┘
//!        │ raw datagrams
//!  ┌─────▼──────┐
//!  │ Transport  │  (UDP socket or in-memory link)
//!  └────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      : wire format (encode / decode, digest)
//! - [`state`]       : alternating bit and sender state cycle
//! - [`sender`]      : sender FSM (no I/O)
//! - [`receiver`]    : receiver FSM (no I/O)
//! - [`rtt`]         : adaptive timeout estimation
//! - [`timer`]       : cancelable retransmission timer
//! - [`simulator`]   : loss / corruption injection
//! - [`socket`]      : datagram transport abstraction
//! - [`connection`]  : async engine tying the above together
//! - [`events`]      : structured event sink
//! - [`config`]      : tunables and validation
//! - [`error`]       : error types

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod packet;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{FaultConfig, ProtocolConfig};
pub use connection::{RdtReceiver, RdtSender, SenderReport};
pub use error::{ConfigError, RdtError, TransportError};
pub use events::{EventSink, LogSink, ProtocolEvent, RecordingSink};
pub use packet::Packet;
pub use simulator::{Fate, FaultInjector};
pub use socket::{MemoryTransport, Transport, UdpTransport};
pub use state::{Bit, SenderState};
