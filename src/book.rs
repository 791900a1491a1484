// src/book.rs
//! Per-symbol limit-order book.
//!
//! Tracks every resting order individually and aggregates quantities
//! into price levels: bids iterate descending (highest first), asks
//! ascending (lowest first). A level exists only while its aggregate is
//! positive; the book never stores a zero-quantity order or level.
//!
//! Exactly four mutating operations exist — new, modify, delete, trade
//! — mirroring the feed's message kinds. Modify is a full replacement:
//! side, price, and quantity may all change. Each mutation reports via
//! [`Applied`] whether the book changed and whether the order was
//! destroyed, so the owning registry can keep its order→symbol index in
//! lockstep.
//!
//! Conditions that prove the feed and the book have diverged (duplicate
//! order id, level underflow, trade overfill) surface as [`FeedError`]
//! and are expected to terminate the process. Whether a *crossed* book
//! is fatal depends on the sync phase, so crossing is exposed as a read
//! ([`Book::is_crossed`]) and judged by the caller.
//!
//! ## Performance
//!
//! - new/modify/delete/trade: O(log P) in the number of price levels
//! - best bid/ask: O(log P)
//! - memory: one map entry per order plus one per non-empty level
//!
//! ## Example
//!
//! ```rust
//! use ndfex_feed::book::{Book, Side};
//!
//! let mut book = Book::new(7);
//! book.handle_new_order(1, Side::Buy, 100, 5, 1).unwrap();
//! book.handle_new_order(2, Side::Sell, 105, 2, 2).unwrap();
//!
//! assert_eq!(book.best_bid_price(), 100);
//! assert_eq!(book.best_bid_qty(), 5);
//! assert_eq!(book.best_ask_price(), 105);
//! assert!(!book.is_crossed());
//! ```

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::FeedError;

pub type OrderId = u64;
pub type SymbolId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Side {
    Buy,
    Sell,
}

/// A resting order as the feed describes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Order {
    pub side: Side,
    pub price: i32,
    pub quantity: u32,
    pub symbol: SymbolId,
}

/// One aggregated price level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Level {
    pub px: i32,
    pub qty: u64,
}

/// Outcome of a mutating operation that did not prove divergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    /// The book changed. `removed` is set when the order was destroyed
    /// (delete, or a trade that drained it).
    Applied { removed: bool },
    /// The order id is not resting here. Legitimate for delete/trade
    /// (the order may have been filled already); a warning for modify.
    UnknownOrder,
    /// The message failed validation (negative price, zero-quantity
    /// modify) and was skipped without touching the book.
    Rejected,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Book {
    symbol: SymbolId,
    orders: hashbrown::HashMap<OrderId, Order>,
    bids: BTreeMap<i32, u64>,
    asks: BTreeMap<i32, u64>,
    last_seq_num: u32,
}

impl Book {
    pub fn new(symbol: SymbolId) -> Self {
        Self {
            symbol,
            ..Self::default()
        }
    }

    /// A fresh book positioned at a snapshot's declared sequence.
    pub fn with_seq(symbol: SymbolId, last_seq_num: u32) -> Self {
        Self {
            symbol,
            last_seq_num,
            ..Self::default()
        }
    }

    #[inline]
    pub fn symbol(&self) -> SymbolId {
        self.symbol
    }

    #[inline]
    pub fn last_seq_num(&self) -> u32 {
        self.last_seq_num
    }

    #[inline]
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    #[inline]
    pub fn order(&self, order_id: OrderId) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    pub fn order_ids(&self) -> impl Iterator<Item = OrderId> + '_ {
        self.orders.keys().copied()
    }

    // Empty-side reads return 0, matching the sink's output contract.

    #[inline]
    pub fn best_bid_price(&self) -> i32 {
        self.bids.last_key_value().map(|(&p, _)| p).unwrap_or(0)
    }

    #[inline]
    pub fn best_bid_qty(&self) -> u64 {
        self.bids.last_key_value().map(|(_, &q)| q).unwrap_or(0)
    }

    #[inline]
    pub fn best_ask_price(&self) -> i32 {
        self.asks.first_key_value().map(|(&p, _)| p).unwrap_or(0)
    }

    #[inline]
    pub fn best_ask_qty(&self) -> u64 {
        self.asks.first_key_value().map(|(_, &q)| q).unwrap_or(0)
    }

    /// Best bid at or above best ask. Fatal in steady state; tolerated
    /// during catch-up, where implicit removals may still be in flight.
    pub fn is_crossed(&self) -> bool {
        match (self.bids.last_key_value(), self.asks.first_key_value()) {
            (Some((&bid, _)), Some((&ask, _))) => bid >= ask,
            _ => false,
        }
    }

    /// Price levels from the top of the given side; depth 0 means all.
    pub fn levels(&self, side: Side, depth: usize) -> Vec<Level> {
        let src = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        let take_n = if depth == 0 { src.len() } else { depth.min(src.len()) };
        let mut out = Vec::with_capacity(take_n);
        match side {
            Side::Buy => {
                for (&px, &qty) in src.iter().rev().take(take_n) {
                    out.push(Level { px, qty });
                }
            }
            Side::Sell => {
                for (&px, &qty) in src.iter().take(take_n) {
                    out.push(Level { px, qty });
                }
            }
        }
        out
    }

    pub fn handle_new_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: i32,
        quantity: u32,
        seq: u32,
    ) -> Result<Applied, FeedError> {
        if self.orders.contains_key(&order_id) {
            return Err(FeedError::DuplicateOrder {
                order_id,
                symbol: self.symbol,
            });
        }
        if quantity == 0 {
            return Err(FeedError::ZeroQuantity { order_id });
        }
        if price < 0 {
            return Ok(Applied::Rejected);
        }

        self.level_add(side, price, u64::from(quantity))?;
        self.orders.insert(
            order_id,
            Order {
                side,
                price,
                quantity,
                symbol: self.symbol,
            },
        );
        self.note_seq(seq);
        Ok(Applied::Applied { removed: false })
    }

    /// Full replacement: the old quantity leaves its level, the new
    /// fields are stored, the new quantity joins its level. Side,
    /// price, and quantity may all differ from the resting order.
    pub fn handle_modify_order(
        &mut self,
        order_id: OrderId,
        side: Side,
        price: i32,
        quantity: u32,
        seq: u32,
    ) -> Result<Applied, FeedError> {
        let Some(old) = self.orders.get(&order_id).copied() else {
            return Ok(Applied::UnknownOrder);
        };
        if quantity == 0 || price < 0 {
            return Ok(Applied::Rejected);
        }

        self.level_sub(old.side, old.price, u64::from(old.quantity))?;
        self.level_add(side, price, u64::from(quantity))?;
        self.orders.insert(
            order_id,
            Order {
                side,
                price,
                quantity,
                symbol: self.symbol,
            },
        );
        self.note_seq(seq);
        Ok(Applied::Applied { removed: false })
    }

    pub fn handle_delete_order(
        &mut self,
        order_id: OrderId,
        seq: u32,
    ) -> Result<Applied, FeedError> {
        let Some(order) = self.orders.get(&order_id).copied() else {
            return Ok(Applied::UnknownOrder);
        };

        self.level_sub(order.side, order.price, u64::from(order.quantity))?;
        self.orders.remove(&order_id);
        self.note_seq(seq);
        Ok(Applied::Applied { removed: true })
    }

    pub fn handle_trade(
        &mut self,
        order_id: OrderId,
        trade_qty: u32,
        seq: u32,
    ) -> Result<Applied, FeedError> {
        let Some(order) = self.orders.get(&order_id).copied() else {
            return Ok(Applied::UnknownOrder);
        };
        if trade_qty > order.quantity {
            return Err(FeedError::TradeOverfill {
                order_id,
                trade_qty,
                resting: order.quantity,
            });
        }

        self.level_sub(order.side, order.price, u64::from(trade_qty))?;
        let removed = trade_qty == order.quantity;
        if removed {
            self.orders.remove(&order_id);
        } else if let Some(o) = self.orders.get_mut(&order_id) {
            o.quantity -= trade_qty;
        }
        self.note_seq(seq);
        Ok(Applied::Applied { removed })
    }

    #[inline]
    fn note_seq(&mut self, seq: u32) {
        if seq > self.last_seq_num {
            self.last_seq_num = seq;
        }
    }

    fn level_add(&mut self, side: Side, price: i32, qty: u64) -> Result<(), FeedError> {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let agg = levels.entry(price).or_insert(0);
        let Some(next) = agg.checked_add(qty) else {
            return Err(FeedError::AggregateOverflow { side, price });
        };
        *agg = next;
        Ok(())
    }

    /// Removes `qty` from the (side, price) level, dropping the level
    /// when it reaches exactly zero. Removing more than the level holds
    /// is an invariant violation.
    fn level_sub(&mut self, side: Side, price: i32, qty: u64) -> Result<(), FeedError> {
        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        let Some(agg) = levels.get_mut(&price) else {
            return Err(FeedError::LevelUnderflow {
                side,
                price,
                available: 0,
                removed: qty,
            });
        };
        if *agg < qty {
            return Err(FeedError::LevelUnderflow {
                side,
                price,
                available: *agg,
                removed: qty,
            });
        }
        *agg -= qty;
        if *agg == 0 {
            levels.remove(&price);
        }
        Ok(())
    }
}

impl Book {
    /// Test validator: every level aggregate equals the sum of its
    /// orders' quantities, no zero levels or orders exist, and every
    /// order carries this book's symbol.
    pub fn assert_invariants(&self) {
        assert!(self.bids.values().all(|&q| q > 0), "zero bid level");
        assert!(self.asks.values().all(|&q| q > 0), "zero ask level");
        assert!(
            self.orders.values().all(|o| o.quantity > 0),
            "zero qty order"
        );
        assert!(
            self.orders.values().all(|o| o.symbol == self.symbol),
            "foreign order in book"
        );

        let mut agg_bids: hashbrown::HashMap<i32, u64> = hashbrown::HashMap::new();
        let mut agg_asks: hashbrown::HashMap<i32, u64> = hashbrown::HashMap::new();
        for o in self.orders.values() {
            let map = match o.side {
                Side::Buy => &mut agg_bids,
                Side::Sell => &mut agg_asks,
            };
            *map.entry(o.price).or_insert(0) += u64::from(o.quantity);
        }

        assert_eq!(self.bids.len(), agg_bids.len(), "bid level count mismatch");
        assert_eq!(self.asks.len(), agg_asks.len(), "ask level count mismatch");
        for (&px, &q) in self.bids.iter() {
            assert_eq!(Some(&q), agg_bids.get(&px), "bid level qty mismatch at px={px}");
        }
        for (&px, &q) in self.asks.iter() {
            assert_eq!(Some(&q), agg_asks.get(&px), "ask level qty mismatch at px={px}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_book() -> Book {
        // Three orders on symbol 7: two bids, one ask.
        let mut b = Book::new(7);
        b.handle_new_order(1, Side::Buy, 100, 5, 1).unwrap();
        b.handle_new_order(2, Side::Buy, 101, 3, 2).unwrap();
        b.handle_new_order(3, Side::Sell, 105, 2, 3).unwrap();
        b
    }

    #[test]
    fn top_of_book_basics() {
        let b = seeded_book();
        assert_eq!(b.best_bid_price(), 101);
        assert_eq!(b.best_bid_qty(), 3);
        assert_eq!(b.best_ask_price(), 105);
        assert_eq!(b.best_ask_qty(), 2);
        assert_eq!(b.last_seq_num(), 3);
        b.assert_invariants();
    }

    #[test]
    fn empty_side_reads_zero() {
        let b = Book::new(7);
        assert_eq!(b.best_bid_price(), 0);
        assert_eq!(b.best_bid_qty(), 0);
        assert_eq!(b.best_ask_price(), 0);
        assert_eq!(b.best_ask_qty(), 0);
        assert!(!b.is_crossed());
    }

    #[test]
    fn trade_partial_then_full_destroys_order() {
        let mut b = seeded_book();

        assert_eq!(
            b.handle_trade(3, 1, 4).unwrap(),
            Applied::Applied { removed: false }
        );
        assert_eq!(b.best_ask_price(), 105);
        assert_eq!(b.best_ask_qty(), 1);

        assert_eq!(
            b.handle_trade(3, 1, 5).unwrap(),
            Applied::Applied { removed: true }
        );
        assert_eq!(b.best_ask_price(), 0);
        assert_eq!(b.best_ask_qty(), 0);
        assert!(b.order(3).is_none());
        b.assert_invariants();
    }

    #[test]
    fn modify_across_price_moves_the_level() {
        let mut b = seeded_book();
        b.handle_modify_order(2, Side::Buy, 99, 3, 4).unwrap();
        assert_eq!(b.best_bid_price(), 100);
        assert_eq!(b.best_bid_qty(), 5);
        assert_eq!(
            b.levels(Side::Buy, 0),
            vec![Level { px: 100, qty: 5 }, Level { px: 99, qty: 3 }]
        );
        b.assert_invariants();
    }

    #[test]
    fn modify_replaces_all_fields() {
        let mut b = seeded_book();
        // A bid flips to the ask side entirely.
        b.handle_modify_order(1, Side::Sell, 106, 9, 4).unwrap();
        assert_eq!(b.best_bid_price(), 101);
        assert_eq!(
            b.levels(Side::Sell, 0),
            vec![Level { px: 105, qty: 2 }, Level { px: 106, qty: 9 }]
        );
        b.assert_invariants();
    }

    #[test]
    fn duplicate_new_order_is_fatal() {
        let mut b = seeded_book();
        assert!(matches!(
            b.handle_new_order(1, Side::Buy, 90, 1, 9),
            Err(FeedError::DuplicateOrder { order_id: 1, .. })
        ));
    }

    #[test]
    fn zero_quantity_new_order_is_fatal() {
        let mut b = Book::new(7);
        assert!(matches!(
            b.handle_new_order(1, Side::Buy, 100, 0, 1),
            Err(FeedError::ZeroQuantity { order_id: 1 })
        ));
    }

    #[test]
    fn negative_price_is_rejected_not_fatal() {
        let mut b = Book::new(7);
        assert_eq!(
            b.handle_new_order(1, Side::Buy, -1, 5, 1).unwrap(),
            Applied::Rejected
        );
        assert_eq!(b.order_count(), 0);
    }

    #[test]
    fn zero_price_is_permitted() {
        let mut b = Book::new(7);
        b.handle_new_order(1, Side::Buy, 0, 5, 1).unwrap();
        assert_eq!(b.best_bid_price(), 0);
        assert_eq!(b.best_bid_qty(), 5);
    }

    #[test]
    fn trade_overfill_is_fatal() {
        let mut b = seeded_book();
        assert!(matches!(
            b.handle_trade(3, 3, 4),
            Err(FeedError::TradeOverfill {
                order_id: 3,
                trade_qty: 3,
                resting: 2
            })
        ));
    }

    #[test]
    fn delete_of_unknown_order_is_a_skip() {
        let mut b = seeded_book();
        assert_eq!(b.handle_delete_order(99, 4).unwrap(), Applied::UnknownOrder);
        assert_eq!(b.order_count(), 3);
    }

    #[test]
    fn add_then_delete_restores_prior_state() {
        let b0 = seeded_book();
        let mut b = seeded_book();
        let seq = b.last_seq_num();
        b.handle_new_order(50, Side::Buy, 100, 7, seq).unwrap();
        b.handle_delete_order(50, seq).unwrap();
        assert_eq!(b, b0);
    }

    #[test]
    fn crossing_is_observable_but_not_enforced_here() {
        let mut b = seeded_book();
        b.handle_new_order(4, Side::Buy, 105, 1, 4).unwrap();
        assert!(b.is_crossed());
    }
}
