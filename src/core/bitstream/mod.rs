//! Bit-level block/record stream
//!
//! Records are sequences of unsigned integers grouped into nested blocks.
//! Each record is written either unabbreviated (every field as VBR6) or
//! through an abbreviation that declares the width and encoding of every
//! field up front. Abbreviations shared by every instance of a block live
//! in the BLOCKINFO block at the start of the stream.
//!
//! Bits are packed LSB-first into little-endian 32-bit words. Blocks carry
//! their length in words so a reader can skip one without decoding it.

pub mod reader;
pub mod writer;

pub use reader::{BitCursor, Entry, Record};
pub use writer::BitWriter;

use std::collections::HashMap;
use std::sync::Arc;

/// Builtin abbreviation ids
pub const END_BLOCK: u32 = 0;
pub const ENTER_SUBBLOCK: u32 = 1;
pub const DEFINE_ABBREV: u32 = 2;
pub const UNABBREV_RECORD: u32 = 3;
/// First id handed out to application abbreviations
pub const FIRST_APPLICATION_ABBREV: u32 = 4;

pub const BLOCK_INFO_BLOCK_ID: u32 = 0;

/// Record codes inside the BLOCKINFO block
pub const BLOCKINFO_CODE_SETBID: u32 = 1;
pub const BLOCKINFO_CODE_BLOCKNAME: u32 = 2;
pub const BLOCKINFO_CODE_SETRECORDNAME: u32 = 3;

/// Abbreviation id width used inside the BLOCKINFO block.
pub const BLOCK_INFO_ABBREV_WIDTH: u32 = 2;

/// Widest abbreviation id width a reader accepts.
pub const MAX_ABBREV_WIDTH: u32 = 32;

/// One operand of an abbreviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbbrevOp {
    /// Constant value, not stored per record
    Literal(u64),
    /// Fixed number of bits
    Fixed(u32),
    /// Variable bit rate with the given chunk width
    Vbr(u32),
    /// VBR6 element count followed by elements encoded with the next op
    Array,
    /// 6-bit character from `[a-zA-Z0-9._]`
    Char6,
    /// VBR6 byte count, then 32-bit aligned raw bytes
    Blob,
}

impl AbbrevOp {
    pub(crate) const ENCODING_FIXED: u64 = 1;
    pub(crate) const ENCODING_VBR: u64 = 2;
    pub(crate) const ENCODING_ARRAY: u64 = 3;
    pub(crate) const ENCODING_CHAR6: u64 = 4;
    pub(crate) const ENCODING_BLOB: u64 = 5;

    pub fn is_literal(&self) -> bool {
        matches!(self, AbbrevOp::Literal(_))
    }
}

/// Declared layout of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Abbrev {
    ops: Vec<AbbrevOp>,
}

impl Abbrev {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an operand (builder style).
    pub fn add(mut self, op: AbbrevOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn push(&mut self, op: AbbrevOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[AbbrevOp] {
        &self.ops
    }
}

/// Abbreviations and names registered for one block id.
#[derive(Debug, Clone, Default)]
pub struct BlockInfoEntry {
    pub abbrevs: Vec<Arc<Abbrev>>,
    pub name: Option<String>,
    pub record_names: Vec<(u32, String)>,
}

/// Contents of a BLOCKINFO block, keyed by block id.
#[derive(Debug, Clone, Default)]
pub struct BlockInfo {
    entries: HashMap<u32, BlockInfoEntry>,
}

impl BlockInfo {
    pub fn get(&self, block_id: u32) -> Option<&BlockInfoEntry> {
        self.entries.get(&block_id)
    }

    pub fn entry(&mut self, block_id: u32) -> &mut BlockInfoEntry {
        self.entries.entry(block_id).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Name recorded for `code` in block `block_id`.
    pub fn record_name(&self, block_id: u32, code: u32) -> Option<&str> {
        self.get(block_id)?
            .record_names
            .iter()
            .find(|(id, _)| *id == code)
            .map(|(_, name)| name.as_str())
    }
}

const CHAR6_ALPHABET: &[u8; 64] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789._";

pub(crate) fn encode_char6(ch: u8) -> Option<u64> {
    CHAR6_ALPHABET
        .iter()
        .position(|&c| c == ch)
        .map(|pos| pos as u64)
}

pub(crate) fn decode_char6(value: u64) -> u8 {
    CHAR6_ALPHABET[(value & 63) as usize]
}
