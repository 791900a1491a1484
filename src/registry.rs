// src/registry.rs
//! Book registry: the single owner of `symbol → Book` and
//! `order_id → symbol`.
//!
//! Delete, modify, and trade messages carry no symbol, so the registry
//! routes them through the order index. The two maps are only ever
//! mutated together here, which keeps the index invariant (every
//! resting order maps to the book holding it) local to this module.

use tracing::warn;

use crate::book::{Applied, Book, OrderId, SymbolId};
use crate::error::FeedError;
use crate::wire;

/// What a routed message did, reported back to the sync controller so
/// it can emit a BBO record for the affected symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied { symbol: SymbolId },
    UnknownOrder,
    Rejected,
}

#[derive(Debug, Default)]
pub struct Registry {
    books: hashbrown::HashMap<SymbolId, Book>,
    order_index: hashbrown::HashMap<OrderId, SymbolId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn book(&self, symbol: SymbolId) -> Option<&Book> {
        self.books.get(&symbol)
    }

    pub fn books(&self) -> impl Iterator<Item = (SymbolId, &Book)> {
        self.books.iter().map(|(&s, b)| (s, b))
    }

    pub fn book_count(&self) -> usize {
        self.books.len()
    }

    pub fn symbol_of(&self, order_id: OrderId) -> Option<SymbolId> {
        self.order_index.get(&order_id).copied()
    }

    /// Books are created lazily on the first NEW_ORDER for an unseen
    /// symbol; snapshots create them eagerly via [`snapshot_reset`].
    ///
    /// [`snapshot_reset`]: Registry::snapshot_reset
    pub fn new_order(&mut self, rec: &wire::NewOrder, seq: u32) -> Result<RouteOutcome, FeedError> {
        // An id resting under another symbol is the same protocol
        // violation as one resting in this book.
        if let Some(&symbol) = self.order_index.get(&rec.order_id) {
            return Err(FeedError::DuplicateOrder {
                order_id: rec.order_id,
                symbol,
            });
        }

        let book = self
            .books
            .entry(rec.symbol)
            .or_insert_with(|| Book::new(rec.symbol));
        match book.handle_new_order(rec.order_id, rec.side, rec.price, rec.quantity, seq)? {
            Applied::Applied { .. } => {
                self.order_index.insert(rec.order_id, rec.symbol);
                Ok(RouteOutcome::Applied { symbol: rec.symbol })
            }
            Applied::Rejected => Ok(RouteOutcome::Rejected),
            Applied::UnknownOrder => unreachable!("new order cannot miss"),
        }
    }

    pub fn modify_order(
        &mut self,
        rec: &wire::ModifyOrder,
        seq: u32,
    ) -> Result<RouteOutcome, FeedError> {
        let Some((symbol, book)) = self.route(rec.order_id) else {
            return Ok(RouteOutcome::UnknownOrder);
        };
        match book.handle_modify_order(rec.order_id, rec.side, rec.price, rec.quantity, seq)? {
            Applied::Applied { .. } => Ok(RouteOutcome::Applied { symbol }),
            Applied::Rejected => Ok(RouteOutcome::Rejected),
            Applied::UnknownOrder => Ok(RouteOutcome::UnknownOrder),
        }
    }

    pub fn delete_order(&mut self, order_id: OrderId, seq: u32) -> Result<RouteOutcome, FeedError> {
        let Some((symbol, book)) = self.route(order_id) else {
            return Ok(RouteOutcome::UnknownOrder);
        };
        match book.handle_delete_order(order_id, seq)? {
            Applied::Applied { removed } => {
                if removed {
                    self.order_index.remove(&order_id);
                }
                Ok(RouteOutcome::Applied { symbol })
            }
            _ => Ok(RouteOutcome::UnknownOrder),
        }
    }

    pub fn trade(
        &mut self,
        order_id: OrderId,
        quantity: u32,
        seq: u32,
    ) -> Result<RouteOutcome, FeedError> {
        let Some((symbol, book)) = self.route(order_id) else {
            return Ok(RouteOutcome::UnknownOrder);
        };
        match book.handle_trade(order_id, quantity, seq)? {
            Applied::Applied { removed } => {
                if removed {
                    self.order_index.remove(&order_id);
                }
                Ok(RouteOutcome::Applied { symbol })
            }
            _ => Ok(RouteOutcome::UnknownOrder),
        }
    }

    /// Drops the symbol's book and every index entry pointing at it,
    /// then rebuilds from the snapshot's embedded orders. Embedded
    /// orders do not consume stream sequence numbers: the fresh book
    /// starts and stays at the snapshot's declared `last_md_seq_num`.
    pub fn snapshot_reset(&mut self, group: &wire::SnapshotGroup) -> Result<(), FeedError> {
        let symbol = group.symbol;
        self.books.remove(&symbol);
        self.order_index.retain(|_, s| *s != symbol);

        let mut book = Book::with_seq(symbol, group.last_md_seq_num);
        for rec in &group.orders {
            match book.handle_new_order(
                rec.order_id,
                rec.side,
                rec.price,
                rec.quantity,
                group.last_md_seq_num,
            )? {
                Applied::Applied { .. } => {
                    self.order_index.insert(rec.order_id, symbol);
                }
                Applied::Rejected => {
                    warn!(order_id = rec.order_id, symbol, "rejected snapshot order");
                }
                Applied::UnknownOrder => unreachable!("new order cannot miss"),
            }
        }
        self.books.insert(symbol, book);
        Ok(())
    }

    fn route(&mut self, order_id: OrderId) -> Option<(SymbolId, &mut Book)> {
        let symbol = self.order_index.get(&order_id).copied()?;
        let book = self.books.get_mut(&symbol)?;
        Some((symbol, book))
    }
}

impl Registry {
    /// Test validator: per-book invariants plus index consistency in
    /// both directions.
    pub fn assert_invariants(&self) {
        for (symbol, book) in self.books.iter() {
            book.assert_invariants();
            for id in book.order_ids() {
                assert_eq!(
                    self.order_index.get(&id),
                    Some(symbol),
                    "order {id} missing from index"
                );
            }
        }
        for (&id, &symbol) in self.order_index.iter() {
            let book = self.books.get(&symbol).expect("index points at no book");
            assert!(
                book.order(id).is_some(),
                "index entry {id} has no resting order"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::Side;

    fn new_order(order_id: u64, symbol: u32, side: Side, price: i32, quantity: u32) -> wire::NewOrder {
        wire::NewOrder {
            order_id,
            symbol,
            side,
            price,
            quantity,
        }
    }

    #[test]
    fn routes_by_order_id_across_symbols() {
        let mut reg = Registry::new();
        reg.new_order(&new_order(1, 7, Side::Buy, 100, 5), 1).unwrap();
        reg.new_order(&new_order(2, 9, Side::Sell, 200, 4), 1).unwrap();

        assert_eq!(
            reg.trade(2, 1, 2).unwrap(),
            RouteOutcome::Applied { symbol: 9 }
        );
        assert_eq!(reg.book(9).unwrap().best_ask_qty(), 3);
        assert_eq!(reg.book(7).unwrap().best_bid_qty(), 5);
        reg.assert_invariants();
    }

    #[test]
    fn unknown_order_id_is_silently_ignored() {
        let mut reg = Registry::new();
        assert_eq!(reg.delete_order(42, 1).unwrap(), RouteOutcome::UnknownOrder);
        assert_eq!(reg.trade(42, 1, 1).unwrap(), RouteOutcome::UnknownOrder);
        assert_eq!(reg.book_count(), 0);
    }

    #[test]
    fn duplicate_id_across_books_is_fatal() {
        let mut reg = Registry::new();
        reg.new_order(&new_order(1, 7, Side::Buy, 100, 5), 1).unwrap();
        assert!(matches!(
            reg.new_order(&new_order(1, 9, Side::Buy, 50, 5), 2),
            Err(FeedError::DuplicateOrder { order_id: 1, symbol: 7 })
        ));
    }

    #[test]
    fn delete_and_full_trade_drop_index_entries() {
        let mut reg = Registry::new();
        reg.new_order(&new_order(1, 7, Side::Buy, 100, 5), 1).unwrap();
        reg.new_order(&new_order(2, 7, Side::Sell, 105, 2), 2).unwrap();

        reg.delete_order(1, 3).unwrap();
        assert_eq!(reg.symbol_of(1), None);

        reg.trade(2, 2, 4).unwrap();
        assert_eq!(reg.symbol_of(2), None);
        reg.assert_invariants();
    }

    #[test]
    fn snapshot_reset_replaces_book_and_index() {
        let mut reg = Registry::new();
        for id in [1u64, 2, 3] {
            reg.new_order(&new_order(id, 7, Side::Buy, 100 + id as i32, 5), id as u32)
                .unwrap();
        }

        let group = wire::snapshot_group(
            7,
            42,
            vec![
                new_order(10, 7, Side::Buy, 100, 5),
                new_order(11, 7, Side::Sell, 105, 2),
            ],
        );
        reg.snapshot_reset(&group).unwrap();

        let book = reg.book(7).unwrap();
        assert_eq!(book.order_count(), 2);
        assert_eq!(book.last_seq_num(), 42);
        assert!(book.order(10).is_some());
        assert!(book.order(11).is_some());
        for id in [1u64, 2, 3] {
            assert_eq!(reg.symbol_of(id), None);
        }
        reg.assert_invariants();
    }
}
