use ndfex_feed::book::{Book, Side};
use ndfex_feed::registry::Registry;
use ndfex_feed::wire::{self, ModifyOrder, NewOrder};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum FeedOp {
    New {
        order_id: u64,
        symbol: u32,
        side: Side,
        price: i32,
        qty: u32,
    },
    Modify {
        order_id: u64,
        side: Side,
        price: i32,
        qty: u32,
    },
    Delete {
        order_id: u64,
    },
    Trade {
        order_id: u64,
        qty: u32,
    },
}

fn any_side() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

fn any_op() -> impl Strategy<Value = FeedOp> {
    prop_oneof![
        (1u64..400, 1u32..4, any_side(), -50i32..1000, 0u32..500).prop_map(
            |(order_id, symbol, side, price, qty)| FeedOp::New {
                order_id,
                symbol,
                side,
                price,
                qty,
            }
        ),
        (1u64..400, any_side(), -50i32..1000, 0u32..500).prop_map(
            |(order_id, side, price, qty)| FeedOp::Modify {
                order_id,
                side,
                price,
                qty,
            }
        ),
        (1u64..400).prop_map(|order_id| FeedOp::Delete { order_id }),
        (1u64..400, 1u32..500).prop_map(|(order_id, qty)| FeedOp::Trade { order_id, qty }),
    ]
}

proptest! {
    // Level aggregates match resting orders, no zero levels or orders
    // exist, and the order index routes every id to the book holding
    // it. Protocol violations (duplicate ids, trade overfills, zero
    // quantities) abort a message without touching state, so they are
    // simply skipped here.
    #[test]
    fn registry_invariants_hold(ops in prop::collection::vec(any_op(), 1..2000)) {
        let mut reg = Registry::new();
        let mut seq = 0u32;
        for op in ops {
            seq += 1;
            let _ = match op {
                FeedOp::New { order_id, symbol, side, price, qty } => reg.new_order(
                    &NewOrder { order_id, symbol, side, price, quantity: qty },
                    seq,
                ),
                FeedOp::Modify { order_id, side, price, qty } => reg.modify_order(
                    &ModifyOrder { order_id, side, price, quantity: qty },
                    seq,
                ),
                FeedOp::Delete { order_id } => reg.delete_order(order_id, seq),
                FeedOp::Trade { order_id, qty } => reg.trade(order_id, qty, seq),
            };
        }
        reg.assert_invariants();
    }

    #[test]
    fn add_then_delete_is_identity(
        side in any_side(),
        price in 0i32..1000,
        qty in 1u32..500,
    ) {
        let mut baseline = Book::new(7);
        baseline.handle_new_order(1, Side::Buy, 100, 5, 1).unwrap();

        let mut book = Book::new(7);
        book.handle_new_order(1, Side::Buy, 100, 5, 1).unwrap();
        book.handle_new_order(2, side, price, qty, 1).unwrap();
        book.handle_delete_order(2, 1).unwrap();

        prop_assert_eq!(baseline, book);
    }

    #[test]
    fn modify_with_identical_fields_is_a_noop(
        side in any_side(),
        price in 0i32..1000,
        qty in 1u32..500,
    ) {
        let mut baseline = Book::new(7);
        baseline.handle_new_order(1, side, price, qty, 1).unwrap();

        let mut book = Book::new(7);
        book.handle_new_order(1, side, price, qty, 1).unwrap();
        book.handle_modify_order(1, side, price, qty, 1).unwrap();

        prop_assert_eq!(baseline, book);
    }

    #[test]
    fn split_trades_equal_one_trade(
        side in any_side(),
        price in 0i32..1000,
        q1 in 1u32..200,
        q2 in 1u32..200,
        leftover in 0u32..200,
    ) {
        let total = q1 + q2 + leftover;

        let mut split = Book::new(7);
        split.handle_new_order(1, side, price, total, 1).unwrap();
        split.handle_trade(1, q1, 2).unwrap();
        split.handle_trade(1, q2, 2).unwrap();

        let mut single = Book::new(7);
        single.handle_new_order(1, side, price, total, 1).unwrap();
        single.handle_trade(1, q1 + q2, 2).unwrap();

        prop_assert_eq!(split, single);
    }

    #[test]
    fn snapshot_ingest_matches_declaration(
        specs in prop::collection::vec((any_side(), 0i32..1000, 1u32..500), 0..40),
    ) {
        let orders: Vec<NewOrder> = specs
            .iter()
            .enumerate()
            .map(|(i, &(side, price, quantity))| NewOrder {
                order_id: i as u64 + 1,
                symbol: 7,
                side,
                price,
                quantity,
            })
            .collect();
        let group = wire::snapshot_group(7, 42, orders.clone());

        let mut reg = Registry::new();
        reg.snapshot_reset(&group).unwrap();
        reg.assert_invariants();

        let book = reg.book(7).unwrap();
        prop_assert_eq!(book.last_seq_num(), 42);
        prop_assert_eq!(book.order_count(), orders.len());

        for side in [Side::Buy, Side::Sell] {
            let declared: u64 = orders
                .iter()
                .filter(|o| o.side == side)
                .map(|o| u64::from(o.quantity))
                .sum();
            let held: u64 = book.levels(side, 0).iter().map(|l| l.qty).sum();
            prop_assert_eq!(declared, held);
        }
    }
}
