use std::collections::HashSet;

use anyhow::{Context, Result};
use ndfex_feed::capture::CaptureReader;
use ndfex_feed::sync::Channel;
use ndfex_feed::wire::{self, Datagram, MarketBody};

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "data/capture.ndfx".to_string());
    let bytes = std::fs::read(&path).with_context(|| format!("read {path}"))?;

    let mut symbols = HashSet::<u32>::new();
    let mut live = 0u64;
    let mut replay = 0u64;
    let mut new_orders = 0u64;
    let mut deletes = 0u64;
    let mut modifies = 0u64;
    let mut trades = 0u64;
    let mut heartbeats = 0u64;
    let mut other = 0u64;
    let mut snapshot_groups = 0u64;
    let mut snapshot_orders = 0u64;
    let mut unrecognized = 0u64;

    for (channel, payload) in CaptureReader::new(&bytes)? {
        match channel {
            Channel::Live => live += 1,
            Channel::Replay => replay += 1,
        }
        match wire::decode(payload) {
            Some(Datagram::Market(m)) => match m.body {
                MarketBody::NewOrder(rec) => {
                    symbols.insert(rec.symbol);
                    new_orders += 1;
                }
                MarketBody::DeleteOrder(_) => deletes += 1,
                MarketBody::ModifyOrder(_) => modifies += 1,
                MarketBody::Trade(_) => trades += 1,
                MarketBody::Heartbeat => heartbeats += 1,
                MarketBody::Other(_) => other += 1,
            },
            Some(Datagram::Snapshot(s)) => {
                for g in &s.groups {
                    symbols.insert(g.symbol);
                    snapshot_groups += 1;
                    snapshot_orders += g.orders.len() as u64;
                }
            }
            None => unrecognized += 1,
        }
    }

    println!("live_datagrams={live}");
    println!("replay_datagrams={replay}");
    println!("unique_symbols={}", symbols.len());
    println!("new_orders={new_orders}");
    println!("deletes={deletes}");
    println!("modifies={modifies}");
    println!("trades={trades}");
    println!("heartbeats={heartbeats}");
    println!("other={other}");
    println!("snapshot_groups={snapshot_groups}");
    println!("snapshot_orders={snapshot_orders}");
    println!("unrecognized={unrecognized}");
    Ok(())
}
