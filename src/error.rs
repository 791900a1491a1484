// src/error.rs
//! Fatal protocol error taxonomy.
//!
//! Everything in here means the book no longer reflects the exchange's
//! truth and the process must terminate. Benign conditions (unknown
//! message types, route misses, stale replay messages) never construct
//! a `FeedError`; they are counted and skipped at the call site.

use thiserror::Error;

use crate::book::Side;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("live sequence gap on symbol {symbol}: expected {expected}, got {got}")]
    SequenceGap { symbol: u32, expected: u32, got: u32 },

    #[error("crossed book on symbol {symbol}: best bid {bid} >= best ask {ask}")]
    CrossedBook { symbol: u32, bid: i32, ask: i32 },

    #[error("duplicate order id {order_id} on symbol {symbol}")]
    DuplicateOrder { order_id: u64, symbol: u32 },

    #[error("zero quantity for new order {order_id}")]
    ZeroQuantity { order_id: u64 },

    #[error("level underflow on {side:?} @ {price}: level holds {available}, removing {removed}")]
    LevelUnderflow {
        side: Side,
        price: i32,
        available: u64,
        removed: u64,
    },

    #[error("trade quantity {trade_qty} exceeds resting quantity {resting} on order {order_id}")]
    TradeOverfill {
        order_id: u64,
        trade_qty: u32,
        resting: u32,
    },

    #[error("aggregate overflow on {side:?} @ {price}")]
    AggregateOverflow { side: Side, price: i32 },

    #[error("live buffer overflow: {capacity} datagrams buffered during catch-up")]
    BufferOverflow { capacity: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
