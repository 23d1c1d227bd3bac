//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into **demo**, **send** or **receive**
//! mode.  All protocol work is delegated to library modules; `main.rs` owns
//! only process setup (logging, signal handling, argument parsing, sockets).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use rdt_over_udp::{
    EventSink, FaultConfig, FaultInjector, LogSink, ProtocolConfig, RdtError, RdtReceiver,
    RdtSender, Transport, UdpTransport,
};

/// Reliable stop-and-wait transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run a sender and a receiver in one process over loopback.
    Demo {
        /// Number of messages to send (0 = until Ctrl-C).
        #[arg(short, long, default_value_t = 20)]
        messages: u64,
        /// Pad each message with '_' to this many bytes.
        #[arg(long, default_value_t = 500)]
        payload_size: usize,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Send numbered messages to a remote receiver.
    Send {
        /// Remote receiver address (e.g. 127.0.0.1:12000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        #[arg(short, long, default_value_t = 20)]
        messages: u64,
        #[arg(long, default_value_t = 500)]
        payload_size: usize,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Receive messages and print them.
    Receive {
        /// Local address to bind.
        #[arg(short, long, default_value = "127.0.0.1:12000")]
        bind: SocketAddr,
        #[command(flatten)]
        tuning: Tuning,
    },
}

/// Protocol and fault-injection knobs shared by every mode.
#[derive(Args, Clone)]
struct Tuning {
    /// Probability that an arriving frame is dropped.
    #[arg(long, default_value_t = 0.1)]
    loss: f64,
    /// Probability that a surviving frame is marked corrupt.
    #[arg(long, default_value_t = 0.1)]
    corrupt: f64,
    /// Seed for reproducible fault injection.
    #[arg(long)]
    seed: Option<u64>,
    /// Initial retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 100)]
    timeout_ms: u64,
    /// EWMA weight of a new RTT sample.
    #[arg(long, default_value_t = 0.125)]
    rtt_smoothing: f64,
}

impl Tuning {
    fn protocol(&self) -> Result<ProtocolConfig> {
        let config = ProtocolConfig {
            initial_timeout: Duration::from_millis(self.timeout_ms),
            rtt_smoothing: self.rtt_smoothing,
            ..ProtocolConfig::default()
        };
        config.validate()?;
        Ok(config)
    }

    fn faults(&self, stream: u64) -> Result<FaultConfig> {
        let config = FaultConfig {
            loss_probability: self.loss,
            corrupt_probability: self.corrupt,
            // Decorrelate the two directions of a seeded run.
            seed: self.seed.map(|s| s.wrapping_add(stream)),
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Ctrl-C received, shutting down");
                shutdown.cancel();
            }
        });
    }
    let events: Arc<dyn EventSink> = Arc::new(LogSink);

    match cli.mode {
        Mode::Demo {
            messages,
            payload_size,
            tuning,
        } => {
            let protocol = tuning.protocol()?;
            let receiver_transport = bind(loopback(), &protocol).await?;
            let receiver_addr = receiver_transport.local_addr();
            let receiver = spawn_receiver(receiver_transport, &tuning, events.clone(), shutdown.clone())?;

            let sender_transport = bind(loopback(), &protocol).await?;
            let result = run_sender(
                sender_transport,
                receiver_addr,
                messages,
                payload_size,
                &tuning,
                events,
                shutdown.clone(),
            )
            .await;
            shutdown.cancel();
            receiver.await??;
            result
        }
        Mode::Send {
            peer,
            bind: local,
            messages,
            payload_size,
            tuning,
        } => {
            let protocol = tuning.protocol()?;
            let transport = bind(local, &protocol).await?;
            run_sender(transport, peer, messages, payload_size, &tuning, events, shutdown).await
        }
        Mode::Receive { bind: local, tuning } => {
            let protocol = tuning.protocol()?;
            let transport = bind(local, &protocol).await?;
            log::info!("Receiving on {}", transport.local_addr());
            spawn_receiver(transport, &tuning, events, shutdown)?.await?
        }
    }
}

fn loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

async fn bind(addr: SocketAddr, protocol: &ProtocolConfig) -> Result<Arc<dyn Transport>> {
    let transport = UdpTransport::bind(addr, protocol.max_datagram)
        .await
        .with_context(|| format!("binding {addr}"))?;
    Ok(Arc::new(transport))
}

/// Start the receive loop; accepted payloads are printed as they arrive.
fn spawn_receiver(
    transport: Arc<dyn Transport>,
    tuning: &Tuning,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<Result<()>>> {
    let injector = FaultInjector::new(&tuning.faults(0)?);
    let (receiver, mut delivered) = RdtReceiver::new(transport.clone(), events, shutdown);

    tokio::spawn(async move {
        while let Some(payload) = delivered.recv().await {
            let text = String::from_utf8_lossy(&payload);
            log::info!("[app] delivered: {}", text.trim_end_matches('_'));
        }
    });

    Ok(tokio::spawn(async move {
        let stats = receiver.run(injector).await?;
        transport.close();
        log::info!(
            "Receiver done: accepted={} duplicates={} corrupt={} acks={}",
            stats.accepted,
            stats.duplicates,
            stats.corrupt,
            stats.acks_sent
        );
        Ok(())
    }))
}

/// Send `messages` numbered messages (forever when 0), logging throughput.
async fn run_sender(
    transport: Arc<dyn Transport>,
    peer: SocketAddr,
    messages: u64,
    payload_size: usize,
    tuning: &Tuning,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) -> Result<()> {
    let sender = RdtSender::new(transport, peer, &tuning.protocol()?, events, shutdown)?;
    let injector = FaultInjector::new(&tuning.faults(1)?);
    let listener = {
        let sender = sender.clone();
        tokio::spawn(async move { sender.run(injector).await })
    };

    let payload_size = payload_size.min(sender.max_payload());
    let mut counter = 1u64;
    while messages == 0 || counter <= messages {
        let mut message = format!("M{counter}").into_bytes();
        message.resize(payload_size.max(message.len()), b'_');
        message.truncate(sender.max_payload());

        match sender.send(&message).await {
            Ok(()) => {}
            Err(RdtError::Shutdown) => break,
            Err(e) => return Err(e.into()),
        }
        match sender.flush().await {
            Ok(()) => {}
            Err(RdtError::Shutdown) => break,
            Err(e) => return Err(e.into()),
        }
        let report = sender.report().await;
        log::info!(
            "[THROUGHPUT] {:.2} kbps after {} message(s), timeout={:.3}s",
            report.throughput_kbps(),
            counter,
            report.timeout.as_secs_f64()
        );
        counter += 1;
    }

    let report = sender.report().await;
    sender.shutdown().await;
    listener.await??;
    log::info!(
        "Sender done: {} bytes, {} frames ({} retransmitted), {:.2} kbps",
        report.stats.bytes_sent,
        report.stats.transmissions,
        report.stats.retransmissions(),
        report.throughput_kbps()
    );
    Ok(())
}
