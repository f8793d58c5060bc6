//! Delta compression for snapshot buffers.
//!
//! A delta describes a target buffer as a patch against a base buffer the
//! decoder already holds. Layout (all integers are LEB128 varints):
//!
//! ```text
//! delta := target_len op*
//! op    := 0x01 len bytes[len]       insert literal bytes
//!        | 0x02 offset len           copy from base
//!        | 0x03 offset len           copy from output produced so far (may overlap)
//! ```
//!
//! The decoder cannot tell whether it was handed the same base the encoder
//! used; a mismatched base either fails a range check or yields garbage.

use std::collections::HashMap;
use thiserror::Error;

const OP_INSERT: u8 = 0x01;
const OP_COPY_BASE: u8 = 0x02;
const OP_COPY_SELF: u8 = 0x03;

/// Largest target a delta may declare (16 MiB).
pub const MAX_TARGET_LEN: usize = 16 * 1024 * 1024;

/// Shortest base match worth a copy op.
const MIN_MATCH: usize = 4;

/// Shortest repeated-byte run worth a self-copy op.
const MIN_RUN: usize = 8;

/// Errors raised while decoding a delta.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeltaError {
    /// The delta ended in the middle of an op.
    #[error("delta stream truncated at byte {0}")]
    Truncated(usize),

    /// An op tag outside the known set.
    #[error("unknown delta op 0x{op:02x} at byte {at}")]
    UnknownOp {
        /// Tag found.
        op: u8,
        /// Offset of the tag in the delta.
        at: usize,
    },

    /// A varint longer than 64 bits.
    #[error("varint overflow at byte {0}")]
    VarintOverflow(usize),

    /// A copy referenced bytes outside its source.
    #[error("copy of {len} bytes at offset {offset} exceeds source of {source_len} bytes")]
    CopyOutOfRange {
        /// Requested source offset.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Length of the source the copy reads from.
        source_len: usize,
    },

    /// The ops produced more or fewer bytes than declared.
    #[error("decoded {actual} bytes, delta declared {expected}")]
    LengthMismatch {
        /// Declared target length.
        expected: usize,
        /// Bytes actually produced.
        actual: usize,
    },

    /// Declared target length exceeds [`MAX_TARGET_LEN`].
    #[error("declared target of {0} bytes exceeds limit")]
    TargetTooLarge(usize),
}

/// Decoder with a reusable output buffer.
///
/// The slice returned by [`DeltaDecoder::decode`] borrows that buffer and is
/// overwritten by the next call; keep a copy if the result has to outlive it.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    out: Vec<u8>,
}

impl DeltaDecoder {
    /// Create a decoder with an empty scratch buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the target buffer from `base` and `delta`.
    pub fn decode(&mut self, base: &[u8], delta: &[u8]) -> Result<&[u8], DeltaError> {
        self.out.clear();
        let mut cursor = Cursor { data: delta, pos: 0 };

        let expected = cursor.varint()? as usize;
        if expected > MAX_TARGET_LEN {
            return Err(DeltaError::TargetTooLarge(expected));
        }
        self.out.reserve(expected);

        while !cursor.is_empty() {
            let at = cursor.pos;
            let op = cursor.byte()?;
            match op {
                OP_INSERT => {
                    let len = cursor.varint()? as usize;
                    self.check_growth(len, expected)?;
                    let bytes = cursor.take(len)?;
                    self.out.extend_from_slice(bytes);
                }
                OP_COPY_BASE => {
                    let offset = cursor.varint()? as usize;
                    let len = cursor.varint()? as usize;
                    self.check_growth(len, expected)?;
                    let end = offset
                        .checked_add(len)
                        .filter(|&end| end <= base.len())
                        .ok_or(DeltaError::CopyOutOfRange {
                            offset,
                            len,
                            source_len: base.len(),
                        })?;
                    self.out.extend_from_slice(&base[offset..end]);
                }
                OP_COPY_SELF => {
                    let offset = cursor.varint()? as usize;
                    let len = cursor.varint()? as usize;
                    self.check_growth(len, expected)?;
                    if offset >= self.out.len() {
                        return Err(DeltaError::CopyOutOfRange {
                            offset,
                            len,
                            source_len: self.out.len(),
                        });
                    }
                    // overlapping source: copy byte by byte
                    for i in 0..len {
                        let byte = self.out[offset + i];
                        self.out.push(byte);
                    }
                }
                op => return Err(DeltaError::UnknownOp { op, at }),
            }
        }

        if self.out.len() != expected {
            return Err(DeltaError::LengthMismatch {
                expected,
                actual: self.out.len(),
            });
        }
        Ok(&self.out)
    }

    /// Length of the most recent decode result.
    pub fn decoded_len(&self) -> usize {
        self.out.len()
    }

    fn check_growth(&self, len: usize, expected: usize) -> Result<(), DeltaError> {
        let actual = self.out.len().saturating_add(len);
        if actual > expected {
            return Err(DeltaError::LengthMismatch { expected, actual });
        }
        Ok(())
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn byte(&mut self) -> Result<u8, DeltaError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(DeltaError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DeltaError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DeltaError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self) -> Result<u64, DeltaError> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.byte()?;
            if shift >= 64 || (shift == 63 && b > 1) {
                return Err(DeltaError::VarintOverflow(start));
            }
            value |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Greedy delta encoder used on the sending side and by tests.
///
/// Indexes every 4-byte window of the base, then walks the target emitting
/// base copies for matches, self-copies for byte runs and literals otherwise.
#[derive(Debug, Default)]
pub struct DeltaEncoder;

impl DeltaEncoder {
    /// Create an encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encode `target` as a delta against `base`.
    pub fn encode(&self, base: &[u8], target: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(target.len() / 4 + 8);
        put_varint(&mut out, target.len() as u64);

        let index = index_windows(base);
        let mut literal_start = 0;
        let mut i = 0;

        while i < target.len() {
            let run = run_length(target, i);
            if i > 0 && run >= MIN_RUN && target[i - 1] == target[i] {
                flush_literal(&mut out, &target[literal_start..i]);
                out.push(OP_COPY_SELF);
                put_varint(&mut out, (i - 1) as u64);
                put_varint(&mut out, run as u64);
                i += run;
                literal_start = i;
                continue;
            }

            if let Some((offset, len)) = longest_match(&index, base, target, i) {
                flush_literal(&mut out, &target[literal_start..i]);
                out.push(OP_COPY_BASE);
                put_varint(&mut out, offset as u64);
                put_varint(&mut out, len as u64);
                i += len;
                literal_start = i;
                continue;
            }

            i += 1;
        }

        flush_literal(&mut out, &target[literal_start..]);
        out
    }
}

fn window_key(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn index_windows(base: &[u8]) -> HashMap<u32, usize> {
    let mut index = HashMap::new();
    if base.len() >= MIN_MATCH {
        for at in 0..=base.len() - MIN_MATCH {
            index.entry(window_key(base, at)).or_insert(at);
        }
    }
    index
}

fn longest_match(
    index: &HashMap<u32, usize>,
    base: &[u8],
    target: &[u8],
    at: usize,
) -> Option<(usize, usize)> {
    if at + MIN_MATCH > target.len() {
        return None;
    }
    let offset = *index.get(&window_key(target, at))?;
    let len = base[offset..]
        .iter()
        .zip(&target[at..])
        .take_while(|(a, b)| a == b)
        .count();
    (len >= MIN_MATCH).then_some((offset, len))
}

fn run_length(data: &[u8], at: usize) -> usize {
    let value = data[at];
    data[at..].iter().take_while(|&&b| b == value).count()
}

fn flush_literal(out: &mut Vec<u8>, literal: &[u8]) {
    if literal.is_empty() {
        return;
    }
    out.push(OP_INSERT);
    put_varint(out, literal.len() as u64);
    out.extend_from_slice(literal);
}
