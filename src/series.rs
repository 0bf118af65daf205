// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Gorilla-style per-series float/timestamp compressor (`TsStore`) and
//! the `memSeries` that pairs one with its canonical labels.
//!
//! Timestamps are delta-of-delta encoded against a 32-bit anchor — the
//! engine deliberately truncates timestamps to `u32` once they reach a
//! series' block, per the on-disk format. Values are XOR-compressed
//! against the previous value's bit pattern. Both streams are packed
//! into MSB-first bit buffers, the classic Gorilla paper scheme.

use crate::coding::{Decoder, EncodeBuf};
use crate::error::DecodeError;
use crate::label::LabelList;
use crate::row::Point;
use bitvec::prelude::*;
use std::sync::RwLock;

type BitBuf = BitVec<u8, Msb0>;

#[derive(Clone)]
struct Block {
    base_ts: u32,
    base_val: f64,
    prev_ts: i64,
    prev_delta: i64,
    prev_val_bits: u64,
    prev_leading: u8,
    prev_trailing: u8,
    ts_bits: BitBuf,
    val_bits: BitBuf,
    count: u64,
}

impl Block {
    fn anchor(ts: u32, val: f64) -> Self {
        Self {
            base_ts: ts,
            base_val: val,
            prev_ts: i64::from(ts),
            prev_delta: 0,
            prev_val_bits: val.to_bits(),
            prev_leading: 64,
            prev_trailing: 0,
            ts_bits: BitBuf::new(),
            val_bits: BitBuf::new(),
            count: 1,
        }
    }

    fn push(&mut self, ts: u32, val: f64) {
        let ts = i64::from(ts);
        let delta = ts - self.prev_ts;
        let dod = delta - self.prev_delta;
        encode_timestamp(&mut self.ts_bits, dod);
        self.prev_ts = ts;
        self.prev_delta = delta;

        let bits = val.to_bits();
        encode_value(
            &mut self.val_bits,
            self.prev_val_bits,
            bits,
            &mut self.prev_leading,
            &mut self.prev_trailing,
        );
        self.prev_val_bits = bits;

        self.count += 1;
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = EncodeBuf::new();
        buf.marshal_u32(&[self.base_ts]);
        buf.marshal_u64(&[self.base_val.to_bits(), self.count]);

        let ts_bytes = self.ts_bits.clone().into_vec();
        buf.marshal_u32(&[self.ts_bits.len() as u32, ts_bytes.len() as u32]);
        buf.marshal_bytes(&ts_bytes);

        let val_bytes = self.val_bits.clone().into_vec();
        buf.marshal_u32(&[self.val_bits.len() as u32, val_bytes.len() as u32]);
        buf.marshal_bytes(&val_bytes);

        buf.into_bytes()
    }
}

fn push_bits(buf: &mut BitBuf, value: u64, bits: u32) {
    for i in (0..bits).rev() {
        buf.push(((value >> i) & 1) == 1);
    }
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn encode_timestamp(buf: &mut BitBuf, dod: i64) {
    let zz = zigzag_encode(dod);
    if zz == 0 {
        buf.push(false);
        return;
    }
    buf.push(true);
    let width = 64 - zz.leading_zeros();
    match width {
        0..=12 => {
            push_bits(buf, 0b00, 2);
            push_bits(buf, zz, 12);
        }
        13..=20 => {
            push_bits(buf, 0b01, 2);
            push_bits(buf, zz, 20);
        }
        21..=32 => {
            push_bits(buf, 0b10, 2);
            push_bits(buf, zz, 32);
        }
        _ => {
            push_bits(buf, 0b11, 2);
            push_bits(buf, zz, 64);
        }
    }
}

fn encode_value(buf: &mut BitBuf, prev_bits: u64, bits: u64, prev_leading: &mut u8, prev_trailing: &mut u8) {
    let xor = prev_bits ^ bits;
    if xor == 0 {
        buf.push(false);
        return;
    }
    buf.push(true);

    let leading = xor.leading_zeros() as u8;
    let trailing = xor.trailing_zeros() as u8;

    if leading >= *prev_leading && trailing >= *prev_trailing {
        buf.push(false);
        let significant = 64 - u32::from(*prev_leading) - u32::from(*prev_trailing);
        push_bits(buf, xor >> *prev_trailing, significant);
    } else {
        buf.push(true);
        push_bits(buf, u64::from(leading), 6);
        let significant = 64 - u32::from(leading) - u32::from(trailing);
        push_bits(buf, u64::from(significant - 1), 6);
        push_bits(buf, xor >> trailing, significant);
        *prev_leading = leading;
        *prev_trailing = trailing;
    }
}

struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bits: &'a BitSlice<u8, Msb0>) -> Self {
        Self { bits, pos: 0 }
    }

    fn read_bit(&mut self) -> Option<bool> {
        let b = self.bits.get(self.pos).copied()?;
        self.pos += 1;
        Some(b)
    }

    fn read_bits(&mut self, n: u32) -> Option<u64> {
        if self.pos + n as usize > self.bits.len() {
            return None;
        }
        let mut v: u64 = 0;
        for i in 0..n as usize {
            let b = self.bits.get(self.pos + i).copied().unwrap_or(false);
            v = (v << 1) | u64::from(b);
        }
        self.pos += n as usize;
        Some(v)
    }
}

fn decode_timestamps(base_ts: u32, bits: &BitSlice<u8, Msb0>, remaining: u64) -> Result<Vec<i64>, DecodeError> {
    let mut ts = Vec::with_capacity(remaining as usize + 1);
    ts.push(i64::from(base_ts));

    let mut reader = BitReader::new(bits);
    let mut prev_ts = i64::from(base_ts);
    let mut prev_delta = 0i64;

    for _ in 0..remaining {
        let control = reader.read_bit().ok_or(DecodeError::Decompress)?;
        let dod = if !control {
            0
        } else {
            let tag = reader.read_bits(2).ok_or(DecodeError::Decompress)?;
            let width = match tag {
                0 => 12,
                1 => 20,
                2 => 32,
                _ => 64,
            };
            let zz = reader.read_bits(width).ok_or(DecodeError::Decompress)?;
            zigzag_decode(zz)
        };
        let delta = prev_delta + dod;
        let t = prev_ts + delta;
        ts.push(t);
        prev_ts = t;
        prev_delta = delta;
    }
    Ok(ts)
}

fn decode_values(base_val_bits: u64, bits: &BitSlice<u8, Msb0>, remaining: u64) -> Result<Vec<f64>, DecodeError> {
    let mut vals = Vec::with_capacity(remaining as usize + 1);
    vals.push(f64::from_bits(base_val_bits));

    let mut reader = BitReader::new(bits);
    let mut prev_bits = base_val_bits;
    let mut prev_leading = 64u8;
    let mut prev_trailing = 0u8;

    for _ in 0..remaining {
        let same = !reader.read_bit().ok_or(DecodeError::Decompress)?;
        if same {
            vals.push(f64::from_bits(prev_bits));
            continue;
        }

        let reuse = !reader.read_bit().ok_or(DecodeError::Decompress)?;
        let (trailing, significant) = if reuse {
            let significant = 64 - u32::from(prev_leading) - u32::from(prev_trailing);
            (prev_trailing, significant)
        } else {
            let leading = reader.read_bits(6).ok_or(DecodeError::Decompress)? as u8;
            let sig_minus1 = reader.read_bits(6).ok_or(DecodeError::Decompress)? as u8;
            let significant = u32::from(sig_minus1) + 1;
            let trailing = (64 - u32::from(leading) - significant) as u8;
            prev_leading = leading;
            prev_trailing = trailing;
            (trailing, significant)
        };

        let xor_bits = reader.read_bits(significant).ok_or(DecodeError::Decompress)?;
        let xor = xor_bits << trailing;
        let bits_val = prev_bits ^ xor;
        vals.push(f64::from_bits(bits_val));
        prev_bits = bits_val;
    }
    Ok(vals)
}

/// Decodes a block produced by [`TsStore::bytes`] back into its points,
/// in block (timestamp-ascending) order. An empty slice decodes to an
/// empty vec (an untouched series has no block yet).
pub fn decode_block(bytes: &[u8]) -> Result<Vec<Point>, DecodeError> {
    if bytes.is_empty() {
        return Ok(Vec::new());
    }

    let mut dec = Decoder::new(bytes);
    let base_ts = dec.unmarshal_u32();
    let base_val_bits = dec.unmarshal_u64();
    let count = dec.unmarshal_u64();
    let ts_bit_len = dec.unmarshal_u32();
    let ts_byte_len = dec.unmarshal_u32();
    let ts_bytes = dec.unmarshal_bytes(ts_byte_len as usize);
    let val_bit_len = dec.unmarshal_u32();
    let val_byte_len = dec.unmarshal_u32();
    let val_bytes = dec.unmarshal_bytes(val_byte_len as usize);

    if let Some(err) = dec.err() {
        return Err(err.clone());
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let ts_bits = BitSlice::<u8, Msb0>::from_slice(&ts_bytes).map_err(|_| DecodeError::Decompress)?;
    if ts_bit_len as usize > ts_bits.len() {
        return Err(DecodeError::Decompress);
    }
    let ts_bits = &ts_bits[..ts_bit_len as usize];

    let val_bits = BitSlice::<u8, Msb0>::from_slice(&val_bytes).map_err(|_| DecodeError::Decompress)?;
    if val_bit_len as usize > val_bits.len() {
        return Err(DecodeError::Decompress);
    }
    let val_bits = &val_bits[..val_bit_len as usize];

    let remaining = count - 1;
    let timestamps = decode_timestamps(base_ts, ts_bits, remaining)?;
    let values = decode_values(base_val_bits, val_bits, remaining)?;

    Ok(timestamps
        .into_iter()
        .zip(values)
        .map(|(timestamp, value)| Point { timestamp, value })
        .collect())
}

struct State {
    block: Option<Block>,
    max_timestamp: i64,
}

/// A monotonically-appended, Gorilla-compressed block of points for a
/// single series.
pub struct TsStore {
    state: RwLock<State>,
}

impl Default for TsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TsStore {
    /// Builds an empty store with no block yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State {
                block: None,
                max_timestamp: i64::MIN,
            }),
        }
    }

    /// Appends `point` if its timestamp strictly exceeds the store's
    /// current maximum. Otherwise returns it unchanged so the caller can
    /// route it to the outdated tree instead.
    pub fn append(&self, point: Point) -> Option<Point> {
        let mut state = self.state.write().expect("lock poisoned");
        if state.block.is_some() && point.timestamp <= state.max_timestamp {
            return Some(point);
        }

        let ts = point.timestamp as u32;
        match &mut state.block {
            None => state.block = Some(Block::anchor(ts, point.value)),
            Some(block) => block.push(ts, point.value),
        }
        state.max_timestamp = point.timestamp;
        None
    }

    /// The highest timestamp appended so far, or `i64::MIN` if empty.
    #[must_use]
    pub fn max_timestamp(&self) -> i64 {
        self.state.read().expect("lock poisoned").max_timestamp
    }

    /// Number of points appended so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.state
            .read()
            .expect("lock poisoned")
            .block
            .as_ref()
            .map_or(0, |b| b.count)
    }

    /// The current compressed block, in the wire format [`decode_block`]
    /// understands. Empty if no point has been appended.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        match &self.state.read().expect("lock poisoned").block {
            Some(block) => block.encode(),
            None => Vec::new(),
        }
    }

    /// Decodes the full block, in timestamp order.
    #[must_use]
    pub fn all(&self) -> Vec<Point> {
        decode_block(&self.bytes()).unwrap_or_default()
    }

    /// Decodes points with `start <= ts <= end`, breaking early once a
    /// decoded timestamp exceeds `end` (the block is time-ordered).
    #[must_use]
    pub fn get(&self, start: i64, end: i64) -> Vec<Point> {
        let mut out = Vec::new();
        for p in self.all() {
            if p.timestamp > end {
                break;
            }
            if p.timestamp >= start {
                out.push(p);
            }
        }
        out
    }

    /// Rebuilds a fresh, strictly monotonic store from this store's
    /// points merged with `outdated`, sorted by timestamp. If `outdated`
    /// is empty, equivalent to a plain copy. Used only at freeze time.
    #[must_use]
    pub fn merge_outdated(&self, outdated: Vec<Point>) -> TsStore {
        if outdated.is_empty() {
            return Self::from_sorted_points(&self.all());
        }
        let mut points = self.all();
        points.extend(outdated);
        points.sort_by_key(|p| p.timestamp);
        Self::from_sorted_points(&points)
    }

    fn from_sorted_points(points: &[Point]) -> TsStore {
        let store = TsStore::new();
        {
            let mut state = store.state.write().expect("lock poisoned");
            for p in points {
                let ts = p.timestamp as u32;
                match &mut state.block {
                    None => state.block = Some(Block::anchor(ts, p.value)),
                    Some(block) => block.push(ts, p.value),
                }
                state.max_timestamp = p.timestamp;
            }
        }
        store
    }
}

/// A series inside a memtable: its canonical labels plus its compressed
/// store.
pub struct MemSeries {
    /// Canonical (filtered, metric-tagged, sorted) labels.
    pub labels: LabelList,
    /// The series' compressed block.
    pub store: TsStore,
}

impl MemSeries {
    /// Builds a fresh, empty series for `labels`.
    #[must_use]
    pub fn new(labels: LabelList) -> Self {
        Self {
            labels,
            store: TsStore::new(),
        }
    }
}
