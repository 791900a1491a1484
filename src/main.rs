// src/main.rs
use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use memmap2::Mmap;
use serde_json::json;
use std::{
    fs::File,
    io::{self, Write},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::net::UdpSocket;
use tracing::{info, warn};

use ndfex_feed::{
    book::Side,
    capture::CaptureReader,
    sink::BboSink,
    sync::{Channel, Engine, Phase, SyncConfig},
    wire,
};

/// Datagrams pulled per channel per wakeup before yielding.
const RECV_BATCH: usize = 16;

#[derive(Parser, Debug)]
#[command(name = "ndfex-feed", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Consume the feed and emit top-of-book CSV records.
    Run {
        /// Live multicast group.
        #[arg(long, default_value = "239.255.0.1:30001")]
        live: SocketAddr,
        /// Replay/snapshot multicast group.
        #[arg(long, default_value = "239.255.0.2:30002")]
        replay: SocketAddr,
        /// Local interface to join the groups on.
        #[arg(long, default_value = "0.0.0.0")]
        iface: Ipv4Addr,
        /// Process a capture file instead of joining the groups.
        #[arg(long)]
        file: Option<PathBuf>,
        /// BBO CSV destination; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write a JSON summary of every book on shutdown.
        #[arg(long)]
        summary: Option<PathBuf>,
        /// Consecutive empty polls on both channels before cutover.
        #[arg(long, default_value_t = 100)]
        quiet_ticks: u32,
        /// Poll interval while catching up (ms).
        #[arg(long, default_value_t = 10)]
        poll_ms: u64,
        /// Live-buffer bound during catch-up; overflow is fatal.
        #[arg(long, default_value_t = 100_000)]
        buffer_cap: usize,
    },
    /// Transmit a capture file to the multicast groups.
    Replay {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "239.255.0.1:30001")]
        live: SocketAddr,
        #[arg(long, default_value = "239.255.0.2:30002")]
        replay: SocketAddr,
        /// Packets per second; 0 = unpaced.
        #[arg(long, default_value_t = 0)]
        max_pps: u64,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // CSV owns stdout; everything human-readable goes to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run {
            live,
            replay,
            iface,
            file,
            out,
            summary,
            quiet_ticks,
            poll_ms,
            buffer_cap,
        } => {
            run(
                live, replay, iface, file, out, summary, quiet_ticks, poll_ms, buffer_cap,
            )
            .await
        }
        Cmd::Replay {
            file,
            live,
            replay,
            max_pps,
        } => replay_capture(file, live, replay, max_pps).await,
    }
}

async fn run(
    live: SocketAddr,
    replay: SocketAddr,
    iface: Ipv4Addr,
    file: Option<PathBuf>,
    out: Option<PathBuf>,
    summary: Option<PathBuf>,
    quiet_ticks: u32,
    poll_ms: u64,
    buffer_cap: usize,
) -> Result<()> {
    let cfg = SyncConfig {
        quiet_tick_threshold: quiet_ticks,
        live_buffer_cap: buffer_cap,
    };

    let writer: Box<dyn Write> = match &out {
        Some(path) => {
            Box::new(File::create(path).with_context(|| format!("create {path:?}"))?)
        }
        None => Box::new(io::stdout().lock()),
    };
    let mut engine = Engine::new(BboSink::new(writer), cfg);

    let result = match file {
        Some(path) => run_file(&mut engine, &path, quiet_ticks),
        None => run_sockets(&mut engine, live, replay, iface, poll_ms).await,
    };

    // Flush and report even on a fatal protocol error; the diagnostic
    // is the Err we return.
    if let Err(e) = engine.flush_sink() {
        warn!(error = %e, "sink flush failed during shutdown");
    }
    info!(stats = %engine.stats().render(), "feed handler stopped");
    if let Some(path) = summary {
        write_summary(&path, &engine)?;
    }
    result
}

/// Offline mode: a capture file stands in for both sockets, and EOF
/// behaves like silence on both channels.
fn run_file<W: Write>(engine: &mut Engine<W>, path: &Path, quiet_ticks: u32) -> Result<()> {
    let f = File::open(path).with_context(|| format!("open capture {path:?}"))?;
    let mmap = unsafe { Mmap::map(&f)? };
    info!(path = ?path, bytes = mmap.len(), "processing capture");

    for (channel, payload) in CaptureReader::new(&mmap)? {
        engine.on_datagram(channel, Bytes::copy_from_slice(payload))?;
    }

    for _ in 0..=quiet_ticks {
        if engine.on_quiet_tick()? {
            break;
        }
    }
    if engine.phase() != Phase::Live {
        warn!("capture ended before any snapshot; no cutover happened");
    }
    Ok(())
}

async fn run_sockets<W: Write>(
    engine: &mut Engine<W>,
    live: SocketAddr,
    replay: SocketAddr,
    iface: Ipv4Addr,
    poll_ms: u64,
) -> Result<()> {
    let live_sock =
        join_multicast(live, iface).with_context(|| format!("join live group {live}"))?;
    let replay_sock =
        join_multicast(replay, iface).with_context(|| format!("join replay group {replay}"))?;
    info!(%live, %replay, %iface, "joined multicast groups");

    let mut scratch = [0u8; wire::MAX_DATAGRAM];
    let poll = Duration::from_millis(poll_ms.max(1));

    loop {
        // The poll timeout drives the quiet-tick heuristic; once live,
        // we wait indefinitely for the next datagram.
        let idle_poll = engine.phase() != Phase::Live;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; shutting down");
                return Ok(());
            }
            r = live_sock.readable() => {
                r?;
                drain(&live_sock, Channel::Live, engine, &mut scratch)?;
                drain(&replay_sock, Channel::Replay, engine, &mut scratch)?;
            }
            r = replay_sock.readable() => {
                r?;
                drain(&replay_sock, Channel::Replay, engine, &mut scratch)?;
                drain(&live_sock, Channel::Live, engine, &mut scratch)?;
            }
            _ = tokio::time::sleep(poll), if idle_poll => {
                engine.on_quiet_tick()?;
            }
        }
    }
}

/// Pulls at most [`RECV_BATCH`] ready datagrams off one socket. Each
/// datagram is processed to completion before the next is read.
fn drain<W: Write>(
    sock: &UdpSocket,
    channel: Channel,
    engine: &mut Engine<W>,
    scratch: &mut [u8],
) -> Result<()> {
    for _ in 0..RECV_BATCH {
        match sock.try_recv_from(scratch) {
            Ok((n, _src)) => {
                engine.on_datagram(channel, Bytes::copy_from_slice(&scratch[..n]))?
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn join_multicast(group: SocketAddr, iface: Ipv4Addr) -> Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, group.port()))
        .with_context(|| format!("bind UDP port {}", group.port()))?;
    std_sock.set_nonblocking(true)?;
    let sock = UdpSocket::from_std(std_sock)?;
    match group.ip() {
        IpAddr::V4(g) if g.is_multicast() => sock
            .join_multicast_v4(g, iface)
            .with_context(|| format!("join group {g} on {iface}"))?,
        // A unicast address is a plain bind; handy for local testing.
        IpAddr::V4(_) => {}
        IpAddr::V6(_) => return Err(anyhow!("IPv6 groups are not supported")),
    }
    Ok(sock)
}

async fn replay_capture(
    file: PathBuf,
    live: SocketAddr,
    replay: SocketAddr,
    max_pps: u64,
) -> Result<()> {
    let f = File::open(&file).with_context(|| format!("open capture {file:?}"))?;
    let mmap = unsafe { Mmap::map(&f)? };
    info!(path = ?file, bytes = mmap.len(), %live, %replay, "replaying capture");

    let sock = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;

    let mut sent = 0u64;
    let mut window_sent = 0u64;
    let mut window = Instant::now();

    for (channel, payload) in CaptureReader::new(&mmap)? {
        let dst = match channel {
            Channel::Live => live,
            Channel::Replay => replay,
        };
        sock.send_to(payload, dst).await?;
        sent += 1;

        if max_pps > 0 {
            window_sent += 1;
            let elapsed = window.elapsed();
            if elapsed >= Duration::from_secs(1) {
                window_sent = 0;
                window = Instant::now();
            } else if window_sent >= max_pps {
                tokio::time::sleep(Duration::from_secs(1).saturating_sub(elapsed)).await;
                window_sent = 0;
                window = Instant::now();
            }
        }
    }

    info!(sent, "replay complete");
    Ok(())
}

fn write_summary<W: Write>(path: &Path, engine: &Engine<W>) -> Result<()> {
    let mut books: Vec<_> = engine.registry().books().collect();
    books.sort_by_key(|(symbol, _)| *symbol);

    let mut symbols = serde_json::Map::new();
    for (symbol, book) in books {
        symbols.insert(
            symbol.to_string(),
            json!({
                "last_seq_num": book.last_seq_num(),
                "orders": book.order_count(),
                "bid_px": book.best_bid_price(),
                "bid_qty": book.best_bid_qty(),
                "ask_px": book.best_ask_price(),
                "ask_qty": book.best_ask_qty(),
                "bids": book.levels(Side::Buy, 0),
                "asks": book.levels(Side::Sell, 0),
            }),
        );
    }

    let text = json!({ "type": "final", "symbols": symbols }).to_string();
    std::fs::write(path, text).with_context(|| format!("write summary {path:?}"))?;
    info!(path = ?path, "wrote book summary");
    Ok(())
}
