//! # ndfex-feed — NDFEX market-data feed handler
//!
//! Consumes the exchange's two multicast streams (live and replay),
//! reconstructs a limit-order book per instrument, and emits the best
//! bid/offer after every book-modifying event.
//!
//! ## Architecture
//!
//! - **wire**: binary codec for the feed's `md_header`-framed records
//!   and packed snapshot datagrams
//! - **book**: per-symbol order book (orders + aggregated price
//!   levels, four-operation state machine)
//! - **registry**: symbol→book plus order→symbol routing, kept in
//!   lockstep
//! - **seq**: per-symbol sequence tracking (stale / apply / fatal gap)
//! - **sync**: the INIT → CATCHING_UP → LIVE controller that joins the
//!   feed mid-flight via snapshots and a buffered live stream
//! - **sink**: batched top-of-book CSV output
//! - **capture**: length-delimited datagram capture files for offline
//!   runs and the replay tool
//!
//! ## Example
//!
//! ```rust
//! use ndfex_feed::book::{Book, Side};
//!
//! let mut book = Book::new(7);
//! book.handle_new_order(1, Side::Buy, 100, 5, 1).unwrap();
//! book.handle_new_order(2, Side::Buy, 101, 3, 2).unwrap();
//! book.handle_new_order(3, Side::Sell, 105, 2, 3).unwrap();
//!
//! assert_eq!(book.best_bid_price(), 101);
//! assert_eq!(book.best_bid_qty(), 3);
//! assert_eq!(book.best_ask_price(), 105);
//! assert_eq!(book.best_ask_qty(), 2);
//! ```

pub mod book;
pub mod capture;
pub mod error;
pub mod registry;
pub mod seq;
pub mod sink;
pub mod stats;
pub mod sync;
pub mod wire;
