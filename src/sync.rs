// src/sync.rs
//! Sync controller: joins the sequenced feed mid-flight.
//!
//! Three phases. In `Init` nothing is known: live datagrams are
//! buffered raw, replay datagrams are processed. The first snapshot
//! moves us to `CatchingUp`, where replay reconstruction continues
//! while the live side keeps buffering. Once both channels go quiet
//! for [`SyncConfig::quiet_tick_threshold`] consecutive idle polls,
//! the buffered live datagrams are drained through the normal apply
//! path (stale filter still on), the sink is flushed, and the engine
//! is `Live`: strict per-symbol sequencing, replay ignored, and a
//! crossed book is now fatal.
//!
//! The engine owns every component below it and is driven entirely by
//! two calls: [`Engine::on_datagram`] and [`Engine::on_quiet_tick`].
//! The event loop decides *when* those fire; nothing in here blocks.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io::Write;
use tracing::{info, warn};

use crate::book::SymbolId;
use crate::error::FeedError;
use crate::registry::{Registry, RouteOutcome};
use crate::seq::{SeqCheck, SequenceTracker};
use crate::sink::BboSink;
use crate::stats::Stats;
use crate::wire::{self, Datagram, MarketBody, MarketMsg, SnapshotMsg};

/// The two logical input streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel {
    Live,
    Replay,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    CatchingUp,
    Live,
}

#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    /// Consecutive empty polls on both channels before cutover.
    pub quiet_tick_threshold: u32,
    /// Bound on buffered live datagrams during catch-up; overflow is
    /// fatal because correctness cannot be guaranteed past it.
    pub live_buffer_cap: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            quiet_tick_threshold: 100,
            live_buffer_cap: 100_000,
        }
    }
}

pub struct Engine<W: Write> {
    phase: Phase,
    registry: Registry,
    seq: SequenceTracker,
    live_buffer: VecDeque<Bytes>,
    quiet_ticks: u32,
    cfg: SyncConfig,
    sink: BboSink<W>,
    stats: Stats,
}

impl<W: Write> Engine<W> {
    pub fn new(sink: BboSink<W>, cfg: SyncConfig) -> Self {
        Self {
            phase: Phase::Init,
            registry: Registry::new(),
            seq: SequenceTracker::new(),
            live_buffer: VecDeque::new(),
            quiet_ticks: 0,
            cfg,
            sink,
            stats: Stats::new(),
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn expected_seq(&self, symbol: SymbolId) -> Option<u32> {
        self.seq.expected(symbol)
    }

    pub fn buffered(&self) -> usize {
        self.live_buffer.len()
    }

    pub fn flush_sink(&mut self) -> std::io::Result<()> {
        self.sink.flush()
    }

    /// Hands back the sink (tests read the CSV out of it).
    pub fn into_sink(self) -> BboSink<W> {
        self.sink
    }

    pub fn on_datagram(&mut self, channel: Channel, payload: Bytes) -> Result<(), FeedError> {
        self.quiet_ticks = 0;
        match channel {
            Channel::Live => self.stats.live_datagrams += 1,
            Channel::Replay => self.stats.replay_datagrams += 1,
        }

        match (self.phase, channel) {
            (Phase::Live, Channel::Live) => self.process(&payload),
            (Phase::Live, Channel::Replay) => {
                self.stats.replay_ignored += 1;
                Ok(())
            }
            (_, Channel::Live) => {
                if self.live_buffer.len() >= self.cfg.live_buffer_cap {
                    return Err(FeedError::BufferOverflow {
                        capacity: self.cfg.live_buffer_cap,
                    });
                }
                self.live_buffer.push_back(payload);
                self.stats.note_buffered(self.live_buffer.len());
                Ok(())
            }
            (_, Channel::Replay) => self.process(&payload),
        }
    }

    /// Called by the event loop each time the poll interval elapses
    /// with nothing ready on either channel. Returns true when this
    /// tick completed the cutover to `Live`.
    pub fn on_quiet_tick(&mut self) -> Result<bool, FeedError> {
        self.quiet_ticks = self.quiet_ticks.saturating_add(1);
        if self.phase == Phase::CatchingUp && self.quiet_ticks >= self.cfg.quiet_tick_threshold {
            self.cutover()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn process(&mut self, buf: &[u8]) -> Result<(), FeedError> {
        match wire::decode(buf) {
            None => {
                self.stats.unrecognized += 1;
                Ok(())
            }
            Some(Datagram::Market(m)) => {
                self.stats.decoded += 1;
                self.apply_market(m)
            }
            Some(Datagram::Snapshot(s)) => {
                self.stats.decoded += 1;
                self.apply_snapshot(s)
            }
        }
    }

    fn apply_snapshot(&mut self, snap: SnapshotMsg) -> Result<(), FeedError> {
        for group in &snap.groups {
            self.registry.snapshot_reset(group)?;
            self.seq.seed_from_snapshot(group.symbol, group.last_md_seq_num);
            self.stats.snapshots += 1;
            info!(
                symbol = group.symbol,
                last_md_seq_num = group.last_md_seq_num,
                bids = group.bid_count,
                asks = group.ask_count,
                orders = group.orders.len(),
                "snapshot applied"
            );
        }
        if self.phase == Phase::Init {
            self.phase = Phase::CatchingUp;
            info!("first snapshot received; catching up");
        }
        Ok(())
    }

    fn apply_market(&mut self, m: MarketMsg) -> Result<(), FeedError> {
        let caught_up = self.phase == Phase::Live;
        match m.body {
            MarketBody::Heartbeat | MarketBody::Other(_) => Ok(()),

            MarketBody::NewOrder(rec) => match self.seq.observe(rec.symbol, m.seq, caught_up) {
                SeqCheck::Stale => {
                    self.stats.stale_dropped += 1;
                    Ok(())
                }
                SeqCheck::Gap { expected, got } => Err(FeedError::SequenceGap {
                    symbol: rec.symbol,
                    expected,
                    got,
                }),
                SeqCheck::Apply => match self.registry.new_order(&rec, m.seq)? {
                    RouteOutcome::Applied { symbol } => self.after_apply(m.seq, symbol),
                    RouteOutcome::Rejected => {
                        self.stats.warned_skips += 1;
                        warn!(
                            order_id = rec.order_id,
                            price = rec.price,
                            "rejected new order"
                        );
                        Ok(())
                    }
                    RouteOutcome::UnknownOrder => Ok(()),
                },
            },

            MarketBody::DeleteOrder(rec) => {
                match self.registry.delete_order(rec.order_id, m.seq)? {
                    RouteOutcome::Applied { symbol } => self.after_apply(m.seq, symbol),
                    // Legitimately late: the order may have fully
                    // traded before this delete arrived.
                    RouteOutcome::UnknownOrder => {
                        self.stats.route_misses += 1;
                        Ok(())
                    }
                    RouteOutcome::Rejected => Ok(()),
                }
            }

            MarketBody::ModifyOrder(rec) => {
                match self.registry.modify_order(&rec, m.seq)? {
                    RouteOutcome::Applied { symbol } => self.after_apply(m.seq, symbol),
                    RouteOutcome::UnknownOrder => {
                        self.stats.warned_skips += 1;
                        warn!(order_id = rec.order_id, "modify of unknown order");
                        Ok(())
                    }
                    RouteOutcome::Rejected => {
                        self.stats.warned_skips += 1;
                        warn!(
                            order_id = rec.order_id,
                            price = rec.price,
                            quantity = rec.quantity,
                            "rejected modify"
                        );
                        Ok(())
                    }
                }
            }

            MarketBody::Trade(rec) => match self.registry.trade(rec.order_id, rec.quantity, m.seq)? {
                RouteOutcome::Applied { symbol } => self.after_apply(m.seq, symbol),
                RouteOutcome::UnknownOrder => {
                    self.stats.route_misses += 1;
                    Ok(())
                }
                RouteOutcome::Rejected => Ok(()),
            },
        }
    }

    /// Crossed-book policy plus the BBO record every applied mutation
    /// owes the sink. During catch-up a crossed book passes silently:
    /// the exchange's implicit removals may still be in transit.
    fn after_apply(&mut self, seq: u32, symbol: SymbolId) -> Result<(), FeedError> {
        let Some(book) = self.registry.book(symbol) else {
            return Ok(());
        };
        if self.phase == Phase::Live && book.is_crossed() {
            return Err(FeedError::CrossedBook {
                symbol,
                bid: book.best_bid_price(),
                ask: book.best_ask_price(),
            });
        }
        self.sink.record(
            seq,
            symbol,
            book.best_bid_price(),
            book.best_bid_qty(),
            book.best_ask_price(),
            book.best_ask_qty(),
        )?;
        self.stats.bbo_records += 1;
        Ok(())
    }

    fn cutover(&mut self) -> Result<(), FeedError> {
        info!(
            buffered = self.live_buffer.len(),
            "both channels quiet; draining live buffer"
        );
        // Drain in arrival order with catch-up semantics (stale filter
        // per symbol, forward jumps tolerated), then go strict.
        let mut buffered = std::mem::take(&mut self.live_buffer);
        while let Some(payload) = buffered.pop_front() {
            self.process(&payload)?;
        }
        self.phase = Phase::Live;
        self.sink.flush()?;
        info!(stats = %self.stats.render(), "cutover to live complete");
        Ok(())
    }
}
