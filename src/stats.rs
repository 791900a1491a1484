// src/stats.rs
//! Feed counters. The engine is single-threaded, so these are plain
//! integers bumped through `&mut`; they exist for the cutover and
//! shutdown log lines, not for a scrape endpoint.

#[derive(Debug, Default, Clone)]
pub struct Stats {
    pub live_datagrams: u64,
    pub replay_datagrams: u64,
    pub decoded: u64,
    pub unrecognized: u64,
    pub stale_dropped: u64,
    pub route_misses: u64,
    pub warned_skips: u64,
    pub snapshots: u64,
    pub bbo_records: u64,
    pub replay_ignored: u64,
    pub buffered_peak: usize,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn note_buffered(&mut self, depth: usize) {
        if depth > self.buffered_peak {
            self.buffered_peak = depth;
        }
    }

    pub fn render(&self) -> String {
        format!(
            "live={} replay={} decoded={} unrecognized={} stale={} route_miss={} \
             warned={} snapshots={} bbo={} replay_ignored={} buffered_peak={}",
            self.live_datagrams,
            self.replay_datagrams,
            self.decoded,
            self.unrecognized,
            self.stale_dropped,
            self.route_misses,
            self.warned_skips,
            self.snapshots,
            self.bbo_records,
            self.replay_ignored,
            self.buffered_peak,
        )
    }
}
