// src/wire.rs
//! NDFEX wire codec.
//!
//! Every record on the feed starts with a 12-byte little-endian header:
//! magic (u32), msg_type (u16), length (u16, header included), seq_num
//! (u32). A market-data datagram carries exactly one record; a snapshot
//! datagram carries a packed run of (SNAPSHOT_INFO, then `bid_count +
//! ask_count` NEW_ORDER records) groups.
//!
//! [`decode`] is a pure function from bytes to a typed [`Datagram`].
//! Unrecognized input is `None`, never an error: an unknown magic, a
//! short header, or a snapshot with no well-formed group is silently
//! ignored by the caller. Each record's declared `length` is validated
//! against the remaining bytes before any field is read, and the cursor
//! advances by exactly that length.
//!
//! The `encode_*` functions produce exact wire images. Only the replay
//! tool, the capture inspector, and tests use them; the consumer path
//! never encodes.

use crate::book::Side;

pub const MAGIC_NUMBER: u32 = 0x4E44_4645;
pub const SNAPSHOT_MAGIC_NUMBER: u32 = 0x4E44_5353;

pub const HEADER_LEN: usize = 12;
pub const MAX_DATAGRAM: usize = 1500;

pub mod msg_type {
    pub const HEARTBEAT: u16 = 1;
    pub const NEW_ORDER: u16 = 2;
    pub const DELETE_ORDER: u16 = 3;
    pub const MODIFY_ORDER: u16 = 4;
    pub const TRADE: u16 = 5;
    pub const TRADE_SUMMARY: u16 = 6;
    pub const SNAPSHOT_INFO: u16 = 7;
}

// Minimum record sizes, header included.
pub const NEW_ORDER_LEN: usize = HEADER_LEN + 8 + 4 + 1 + 4 + 4;
pub const DELETE_ORDER_LEN: usize = HEADER_LEN + 8;
pub const MODIFY_ORDER_LEN: usize = HEADER_LEN + 8 + 1 + 4 + 4;
pub const TRADE_LEN: usize = HEADER_LEN + 8 + 4;
pub const SNAPSHOT_INFO_LEN: usize = HEADER_LEN + 4 + 4 + 4 + 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NewOrder {
    pub order_id: u64,
    pub symbol: u32,
    pub side: Side,
    pub price: i32,
    pub quantity: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeleteOrder {
    pub order_id: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModifyOrder {
    pub order_id: u64,
    pub side: Side,
    pub price: i32,
    pub quantity: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trade {
    pub order_id: u64,
    pub quantity: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketBody {
    NewOrder(NewOrder),
    DeleteOrder(DeleteOrder),
    ModifyOrder(ModifyOrder),
    Trade(Trade),
    Heartbeat,
    /// Accepted and ignored: TRADE_SUMMARY and anything newer than us.
    Other(u16),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarketMsg {
    pub seq: u32,
    pub body: MarketBody,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotGroup {
    pub symbol: u32,
    pub last_md_seq_num: u32,
    pub bid_count: u32,
    pub ask_count: u32,
    pub orders: Vec<NewOrder>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotMsg {
    pub seq: u32,
    pub groups: Vec<SnapshotGroup>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Datagram {
    Market(MarketMsg),
    Snapshot(SnapshotMsg),
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Option<u8> {
        let v = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(v)
    }

    fn u16(&mut self) -> Option<u16> {
        let b = self.buf.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Option<u32> {
        let b = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Option<i32> {
        self.u32().map(|v| v as i32)
    }

    fn u64(&mut self) -> Option<u64> {
        let b = self.buf.get(self.pos..self.pos + 8)?;
        self.pos += 8;
        Some(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

#[derive(Clone, Copy, Debug)]
struct RecordHeader {
    magic: u32,
    msg_type: u16,
    length: u16,
    seq: u32,
}

/// Reads one header and validates its declared length against the
/// remaining bytes. Returns the header and the offset of the next
/// record.
fn read_header(r: &mut Reader<'_>) -> Option<(RecordHeader, usize)> {
    if r.remaining() < HEADER_LEN {
        return None;
    }
    let start = r.pos;
    let hdr = RecordHeader {
        magic: r.u32()?,
        msg_type: r.u16()?,
        length: r.u16()?,
        seq: r.u32()?,
    };
    let len = hdr.length as usize;
    if len < HEADER_LEN || start + len > r.buf.len() {
        return None;
    }
    Some((hdr, start + len))
}

fn side_from_wire(v: u8) -> Option<Side> {
    match v {
        0 => Some(Side::Buy),
        1 => Some(Side::Sell),
        _ => None,
    }
}

fn read_new_order(r: &mut Reader<'_>, hdr: &RecordHeader) -> Option<NewOrder> {
    if (hdr.length as usize) < NEW_ORDER_LEN {
        return None;
    }
    Some(NewOrder {
        order_id: r.u64()?,
        symbol: r.u32()?,
        side: side_from_wire(r.u8()?)?,
        price: r.i32()?,
        quantity: r.u32()?,
    })
}

/// Classifies a datagram by the magic number of its first header and
/// decodes it. `None` means "nothing we recognize" and the datagram is
/// dropped without ceremony.
pub fn decode(buf: &[u8]) -> Option<Datagram> {
    let mut r = Reader::new(buf);
    let (hdr, _) = read_header(&mut r)?;
    match hdr.magic {
        MAGIC_NUMBER => decode_market(buf).map(Datagram::Market),
        SNAPSHOT_MAGIC_NUMBER => decode_snapshot(buf).map(Datagram::Snapshot),
        _ => None,
    }
}

fn decode_market(buf: &[u8]) -> Option<MarketMsg> {
    let mut r = Reader::new(buf);
    let (hdr, _) = read_header(&mut r)?;

    let body = match hdr.msg_type {
        msg_type::NEW_ORDER => MarketBody::NewOrder(read_new_order(&mut r, &hdr)?),
        msg_type::DELETE_ORDER => {
            if (hdr.length as usize) < DELETE_ORDER_LEN {
                return None;
            }
            MarketBody::DeleteOrder(DeleteOrder { order_id: r.u64()? })
        }
        msg_type::MODIFY_ORDER => {
            if (hdr.length as usize) < MODIFY_ORDER_LEN {
                return None;
            }
            MarketBody::ModifyOrder(ModifyOrder {
                order_id: r.u64()?,
                side: side_from_wire(r.u8()?)?,
                price: r.i32()?,
                quantity: r.u32()?,
            })
        }
        msg_type::TRADE => {
            if (hdr.length as usize) < TRADE_LEN {
                return None;
            }
            MarketBody::Trade(Trade {
                order_id: r.u64()?,
                quantity: r.u32()?,
            })
        }
        msg_type::HEARTBEAT => MarketBody::Heartbeat,
        other => MarketBody::Other(other),
    };

    Some(MarketMsg { seq: hdr.seq, body })
}

/// Walks the packed (SNAPSHOT_INFO, NEW_ORDER*) groups. A trailing
/// record that is incomplete or mistyped terminates decoding silently,
/// keeping everything decoded so far.
fn decode_snapshot(buf: &[u8]) -> Option<SnapshotMsg> {
    let mut r = Reader::new(buf);
    let mut groups = Vec::new();
    let mut seq = 0u32;

    'groups: while r.remaining() >= HEADER_LEN {
        let Some((info_hdr, info_end)) = read_header(&mut r) else {
            break;
        };
        if info_hdr.msg_type != msg_type::SNAPSHOT_INFO
            || (info_hdr.length as usize) < SNAPSHOT_INFO_LEN
        {
            break;
        }

        let symbol = r.u32()?;
        let last_md_seq_num = r.u32()?;
        let bid_count = r.u32()?;
        let ask_count = r.u32()?;
        r.pos = info_end;

        if groups.is_empty() {
            seq = info_hdr.seq;
        }

        let declared = bid_count as usize + ask_count as usize;
        // Counts are wire-declared; never trust them for allocation.
        let mut orders = Vec::with_capacity(declared.min(r.remaining() / NEW_ORDER_LEN));

        let mut complete = true;
        for _ in 0..declared {
            let Some((hdr, end)) = read_header(&mut r) else {
                complete = false;
                break;
            };
            if hdr.msg_type != msg_type::NEW_ORDER {
                complete = false;
                break;
            }
            let Some(rec) = read_new_order(&mut r, &hdr) else {
                complete = false;
                break;
            };
            r.pos = end;
            orders.push(rec);
        }

        groups.push(SnapshotGroup {
            symbol,
            last_md_seq_num,
            bid_count,
            ask_count,
            orders,
        });

        if !complete {
            break 'groups;
        }
    }

    if groups.is_empty() {
        return None;
    }
    Some(SnapshotMsg { seq, groups })
}

#[inline]
fn side_to_wire(side: Side) -> u8 {
    match side {
        Side::Buy => 0,
        Side::Sell => 1,
    }
}

fn push_header(out: &mut Vec<u8>, magic: u32, msg_type: u16, length: usize, seq: u32) {
    out.extend_from_slice(&magic.to_le_bytes());
    out.extend_from_slice(&msg_type.to_le_bytes());
    out.extend_from_slice(&(length as u16).to_le_bytes());
    out.extend_from_slice(&seq.to_le_bytes());
}

fn push_new_order(out: &mut Vec<u8>, magic: u32, seq: u32, rec: &NewOrder) {
    push_header(out, magic, msg_type::NEW_ORDER, NEW_ORDER_LEN, seq);
    out.extend_from_slice(&rec.order_id.to_le_bytes());
    out.extend_from_slice(&rec.symbol.to_le_bytes());
    out.push(side_to_wire(rec.side));
    out.extend_from_slice(&rec.price.to_le_bytes());
    out.extend_from_slice(&rec.quantity.to_le_bytes());
}

pub fn encode_new_order(seq: u32, rec: &NewOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(NEW_ORDER_LEN);
    push_new_order(&mut out, MAGIC_NUMBER, seq, rec);
    out
}

pub fn encode_delete_order(seq: u32, rec: &DeleteOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(DELETE_ORDER_LEN);
    push_header(&mut out, MAGIC_NUMBER, msg_type::DELETE_ORDER, DELETE_ORDER_LEN, seq);
    out.extend_from_slice(&rec.order_id.to_le_bytes());
    out
}

pub fn encode_modify_order(seq: u32, rec: &ModifyOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(MODIFY_ORDER_LEN);
    push_header(&mut out, MAGIC_NUMBER, msg_type::MODIFY_ORDER, MODIFY_ORDER_LEN, seq);
    out.extend_from_slice(&rec.order_id.to_le_bytes());
    out.push(side_to_wire(rec.side));
    out.extend_from_slice(&rec.price.to_le_bytes());
    out.extend_from_slice(&rec.quantity.to_le_bytes());
    out
}

pub fn encode_trade(seq: u32, rec: &Trade) -> Vec<u8> {
    let mut out = Vec::with_capacity(TRADE_LEN);
    push_header(&mut out, MAGIC_NUMBER, msg_type::TRADE, TRADE_LEN, seq);
    out.extend_from_slice(&rec.order_id.to_le_bytes());
    out.extend_from_slice(&rec.quantity.to_le_bytes());
    out
}

pub fn encode_heartbeat(seq: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN);
    push_header(&mut out, MAGIC_NUMBER, msg_type::HEARTBEAT, HEADER_LEN, seq);
    out
}

/// Encodes one snapshot datagram. Every record carries the snapshot
/// magic; the datagram is classified by its first header. Embedded
/// NEW_ORDER records do not consume stream sequence numbers, so they
/// are stamped with seq 0.
pub fn encode_snapshot(seq: u32, groups: &[SnapshotGroup]) -> Vec<u8> {
    let records: usize = groups.iter().map(|g| g.orders.len()).sum();
    let mut out = Vec::with_capacity(groups.len() * SNAPSHOT_INFO_LEN + records * NEW_ORDER_LEN);
    for g in groups {
        push_header(
            &mut out,
            SNAPSHOT_MAGIC_NUMBER,
            msg_type::SNAPSHOT_INFO,
            SNAPSHOT_INFO_LEN,
            seq,
        );
        out.extend_from_slice(&g.symbol.to_le_bytes());
        out.extend_from_slice(&g.last_md_seq_num.to_le_bytes());
        out.extend_from_slice(&g.bid_count.to_le_bytes());
        out.extend_from_slice(&g.ask_count.to_le_bytes());
        for rec in &g.orders {
            push_new_order(&mut out, SNAPSHOT_MAGIC_NUMBER, 0, rec);
        }
    }
    out
}

/// Builds a snapshot group from resting orders, deriving the declared
/// bid/ask counts from the order sides.
pub fn snapshot_group(symbol: u32, last_md_seq_num: u32, orders: Vec<NewOrder>) -> SnapshotGroup {
    let bid_count = orders.iter().filter(|o| o.side == Side::Buy).count() as u32;
    let ask_count = orders.len() as u32 - bid_count;
    SnapshotGroup {
        symbol,
        last_md_seq_num,
        bid_count,
        ask_count,
        orders,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: u64) -> NewOrder {
        NewOrder {
            order_id: id,
            symbol: 7,
            side: Side::Buy,
            price: 100,
            quantity: 5,
        }
    }

    #[test]
    fn decodes_new_order() {
        let bytes = encode_new_order(42, &order(1));
        match decode(&bytes) {
            Some(Datagram::Market(m)) => {
                assert_eq!(m.seq, 42);
                assert_eq!(m.body, MarketBody::NewOrder(order(1)));
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn unknown_magic_is_ignored() {
        let mut bytes = encode_heartbeat(1);
        bytes[0] = 0xFF;
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn short_datagram_is_ignored() {
        let bytes = encode_heartbeat(1);
        assert_eq!(decode(&bytes[..HEADER_LEN - 1]), None);
    }

    #[test]
    fn unknown_msg_type_decodes_as_other() {
        let mut out = Vec::new();
        push_header(&mut out, MAGIC_NUMBER, 99, HEADER_LEN, 5);
        match decode(&out) {
            Some(Datagram::Market(m)) => assert_eq!(m.body, MarketBody::Other(99)),
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn declared_length_over_datagram_is_ignored() {
        let mut bytes = encode_trade(9, &Trade { order_id: 3, quantity: 1 });
        // Claim more bytes than the datagram holds.
        bytes[6] = 0xFF;
        bytes[7] = 0x00;
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn snapshot_round_trips_groups() {
        let g = snapshot_group(7, 42, vec![order(10), order(11)]);
        let bytes = encode_snapshot(3, &[g.clone()]);
        match decode(&bytes) {
            Some(Datagram::Snapshot(s)) => {
                assert_eq!(s.seq, 3);
                assert_eq!(s.groups, vec![g]);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn snapshot_truncated_trailer_keeps_decoded_prefix() {
        let g1 = snapshot_group(7, 42, vec![order(10)]);
        let g2 = snapshot_group(8, 50, vec![order(20), order(21)]);
        let mut bytes = encode_snapshot(3, &[g1.clone(), g2]);
        // Chop the second group's last record in half.
        let keep = bytes.len() - NEW_ORDER_LEN / 2;
        bytes.truncate(keep);

        match decode(&bytes) {
            Some(Datagram::Snapshot(s)) => {
                assert_eq!(s.groups.len(), 2);
                assert_eq!(s.groups[0], g1);
                assert_eq!(s.groups[1].symbol, 8);
                assert_eq!(s.groups[1].orders.len(), 1);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn snapshot_with_no_group_is_ignored() {
        let mut out = Vec::new();
        push_header(&mut out, SNAPSHOT_MAGIC_NUMBER, msg_type::HEARTBEAT, HEADER_LEN, 1);
        assert_eq!(decode(&out), None);
    }
}
