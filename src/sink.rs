// src/sink.rs
//! Top-of-book CSV sink.
//!
//! One record per applied book mutation, in processing order:
//! `seq_num,symbol,bid_price,bid_qty,ask_price,ask_qty`, with `0` for
//! an empty side. Records accumulate in an in-memory batch and hit the
//! writer every [`BboSink::DEFAULT_BATCH`] records or on [`flush`],
//! which the sync controller calls at cutover and shutdown.
//!
//! [`flush`]: BboSink::flush

use itoa::Buffer;
use std::io::{self, Write};

const HEADER: &str = "seq_num,symbol,bid_price,bid_qty,ask_price,ask_qty\n";

pub struct BboSink<W: Write> {
    out: W,
    buf: Vec<u8>,
    pending: usize,
    batch: usize,
}

impl<W: Write> BboSink<W> {
    pub const DEFAULT_BATCH: usize = 64;

    pub fn new(out: W) -> Self {
        Self::with_batch(out, Self::DEFAULT_BATCH)
    }

    pub fn with_batch(out: W, batch: usize) -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(HEADER.as_bytes());
        Self {
            out,
            buf,
            pending: 0,
            batch: batch.max(1),
        }
    }

    pub fn record(
        &mut self,
        seq: u32,
        symbol: u32,
        bid_px: i32,
        bid_qty: u64,
        ask_px: i32,
        ask_qty: u64,
    ) -> io::Result<()> {
        let mut b = Buffer::new();
        self.buf.extend_from_slice(b.format(seq).as_bytes());
        self.buf.push(b',');
        self.buf.extend_from_slice(b.format(symbol).as_bytes());
        self.buf.push(b',');
        self.buf.extend_from_slice(b.format(bid_px).as_bytes());
        self.buf.push(b',');
        self.buf.extend_from_slice(b.format(bid_qty).as_bytes());
        self.buf.push(b',');
        self.buf.extend_from_slice(b.format(ask_px).as_bytes());
        self.buf.push(b',');
        self.buf.extend_from_slice(b.format(ask_qty).as_bytes());
        self.buf.push(b'\n');

        self.pending += 1;
        if self.pending >= self.batch {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.out.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.pending = 0;
        self.out.flush()
    }

    /// Flushes any partial batch and hands back the writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_then_records_in_order() {
        let mut sink = BboSink::new(Vec::new());
        sink.record(3, 7, 101, 3, 105, 2).unwrap();
        sink.record(4, 7, 101, 3, 105, 1).unwrap();
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(out, format!("{HEADER}3,7,101,3,105,2\n4,7,101,3,105,1\n"));
    }

    #[test]
    fn empty_sides_render_zero() {
        let mut sink = BboSink::new(Vec::new());
        sink.record(5, 7, 101, 3, 0, 0).unwrap();
        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert!(out.ends_with("5,7,101,3,0,0\n"));
    }

    #[test]
    fn batching_defers_writes_until_flush() {
        let mut sink = BboSink::with_batch(Vec::new(), 8);
        sink.record(1, 7, 100, 5, 0, 0).unwrap();
        // Nothing reaches the writer until the batch fills or flush().
        assert!(sink.out.is_empty());
        sink.flush().unwrap();
        assert!(!sink.out.is_empty());
    }
}
