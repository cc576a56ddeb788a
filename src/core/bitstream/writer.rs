//! Bitstream writer
//!
//! Output accumulates in memory. Block lengths are backpatched when a block
//! closes, so bytes can only be handed to a sink while no block is open;
//! [`BitWriter::take_bytes`] does that between top-level blocks.

use super::{
    encode_char6, Abbrev, AbbrevOp, BlockInfo, BLOCKINFO_CODE_BLOCKNAME, BLOCKINFO_CODE_SETBID,
    BLOCKINFO_CODE_SETRECORDNAME, BLOCK_INFO_ABBREV_WIDTH, BLOCK_INFO_BLOCK_ID, DEFINE_ABBREV,
    END_BLOCK, ENTER_SUBBLOCK, FIRST_APPLICATION_ABBREV, UNABBREV_RECORD,
};
use crate::error::{RemarkError, Result};
use std::sync::Arc;

struct BlockScope {
    prev_code_size: u32,
    prev_abbrevs: Vec<Arc<Abbrev>>,
    /// Word index just past the block length placeholder
    start_size_word: usize,
}

pub struct BitWriter {
    out: Vec<u8>,
    /// Bytes already handed out through `take_bytes`
    flushed: u64,
    cur_word: u32,
    cur_bit: u32,
    cur_code_size: u32,
    cur_abbrevs: Vec<Arc<Abbrev>>,
    block_scope: Vec<BlockScope>,
    block_info: BlockInfo,
    block_info_cur_bid: Option<u32>,
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter {
            out: Vec::new(),
            flushed: 0,
            cur_word: 0,
            cur_bit: 0,
            cur_code_size: 2,
            cur_abbrevs: Vec::new(),
            block_scope: Vec::new(),
            block_info: BlockInfo::default(),
            block_info_cur_bid: None,
        }
    }

    /// Absolute bit position, counting bytes already taken.
    pub fn bit_position(&self) -> u64 {
        (self.flushed + self.out.len() as u64) * 8 + self.cur_bit as u64
    }

    /// Bits written since the innermost open block's length word.
    pub fn current_block_bit_position(&self) -> u64 {
        let start = self
            .block_scope
            .last()
            .map_or(0, |scope| scope.start_size_word * 32);
        (self.out.len() * 8 + self.cur_bit as usize - start) as u64
    }

    pub fn in_block(&self) -> bool {
        !self.block_scope.is_empty()
    }

    /// Hand out every finished byte. Only valid between top-level blocks.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        debug_assert!(self.block_scope.is_empty(), "take_bytes inside a block");
        debug_assert_eq!(self.cur_bit, 0, "take_bytes at an unaligned position");
        let bytes = std::mem::take(&mut self.out);
        self.flushed += bytes.len() as u64;
        bytes
    }

    fn write_word(&mut self, word: u32) {
        self.out.extend_from_slice(&word.to_le_bytes());
    }

    /// Emit the low `width` bits of `value` (`width` <= 32).
    pub fn emit(&mut self, value: u64, width: u32) {
        debug_assert!(width <= 32, "emit width {} too large", width);
        if width == 0 {
            return;
        }
        let value = if width == 32 {
            value as u32
        } else {
            (value & ((1u64 << width) - 1)) as u32
        };
        self.cur_word |= value << self.cur_bit;
        if self.cur_bit + width < 32 {
            self.cur_bit += width;
            return;
        }
        let word = self.cur_word;
        self.write_word(word);
        self.cur_word = if self.cur_bit != 0 {
            value >> (32 - self.cur_bit)
        } else {
            0
        };
        self.cur_bit = (self.cur_bit + width) & 31;
    }

    /// Emit up to 64 bits as two chunks.
    pub fn emit64(&mut self, value: u64, width: u32) {
        if width <= 32 {
            self.emit(value, width);
        } else {
            self.emit(value & 0xffff_ffff, 32);
            self.emit(value >> 32, width - 32);
        }
    }

    pub fn emit_vbr(&mut self, mut value: u64, width: u32) {
        let threshold = 1u64 << (width - 1);
        while value >= threshold {
            self.emit((value & (threshold - 1)) | threshold, width);
            value >>= width - 1;
        }
        self.emit(value, width);
    }

    /// Pad with zeros to the next 32-bit boundary.
    pub fn flush_to_word(&mut self) {
        if self.cur_bit > 0 {
            let word = self.cur_word;
            self.write_word(word);
            self.cur_word = 0;
            self.cur_bit = 0;
        }
    }

    /// Raw bytes at the top level, such as a magic number.
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.emit(byte as u64, 8);
        }
    }

    pub fn enter_subblock(&mut self, block_id: u32, code_len: u32) {
        self.emit(ENTER_SUBBLOCK as u64, self.cur_code_size);
        self.emit_vbr(block_id as u64, 8);
        self.emit_vbr(code_len as u64, 4);
        self.flush_to_word();

        let placeholder = self.out.len() / 4;
        self.emit(0, 32);

        let abbrevs = self
            .block_info
            .get(block_id)
            .map(|entry| entry.abbrevs.clone())
            .unwrap_or_default();
        self.block_scope.push(BlockScope {
            prev_code_size: self.cur_code_size,
            prev_abbrevs: std::mem::replace(&mut self.cur_abbrevs, abbrevs),
            start_size_word: placeholder + 1,
        });
        self.cur_code_size = code_len;
    }

    /// Close the innermost block and backpatch its length.
    ///
    /// Fails with [`RemarkError::BlockTooLarge`] when the block outgrew the
    /// 32-bit length field.
    pub fn exit_block(&mut self) -> Result<()> {
        let Some(scope) = self.block_scope.pop() else {
            return Err(RemarkError::Bitstream(
                "END_BLOCK without an open block".to_string(),
            ));
        };
        self.emit(END_BLOCK as u64, self.cur_code_size);
        self.flush_to_word();

        let size_in_words = block_length(self.out.len() / 4 - scope.start_size_word)?;
        let at = (scope.start_size_word - 1) * 4;
        self.out[at..at + 4].copy_from_slice(&size_in_words.to_le_bytes());

        self.cur_code_size = scope.prev_code_size;
        self.cur_abbrevs = scope.prev_abbrevs;
        Ok(())
    }

    fn encode_abbrev(&mut self, abbrev: &Abbrev) {
        self.emit(DEFINE_ABBREV as u64, self.cur_code_size);
        self.emit_vbr(abbrev.ops().len() as u64, 5);
        for op in abbrev.ops() {
            match *op {
                AbbrevOp::Literal(value) => {
                    self.emit(1, 1);
                    self.emit_vbr(value, 8);
                }
                AbbrevOp::Fixed(width) => {
                    self.emit(0, 1);
                    self.emit(AbbrevOp::ENCODING_FIXED, 3);
                    self.emit_vbr(width as u64, 5);
                }
                AbbrevOp::Vbr(width) => {
                    self.emit(0, 1);
                    self.emit(AbbrevOp::ENCODING_VBR, 3);
                    self.emit_vbr(width as u64, 5);
                }
                AbbrevOp::Array => {
                    self.emit(0, 1);
                    self.emit(AbbrevOp::ENCODING_ARRAY, 3);
                }
                AbbrevOp::Char6 => {
                    self.emit(0, 1);
                    self.emit(AbbrevOp::ENCODING_CHAR6, 3);
                }
                AbbrevOp::Blob => {
                    self.emit(0, 1);
                    self.emit(AbbrevOp::ENCODING_BLOB, 3);
                }
            }
        }
    }

    /// Define an abbreviation local to the current block.
    pub fn emit_abbrev(&mut self, abbrev: Abbrev) -> u32 {
        self.encode_abbrev(&abbrev);
        self.cur_abbrevs.push(Arc::new(abbrev));
        self.cur_abbrevs.len() as u32 - 1 + FIRST_APPLICATION_ABBREV
    }

    /// Record with every operand written as VBR6.
    pub fn emit_record(&mut self, code: u32, values: &[u64]) {
        self.emit(UNABBREV_RECORD as u64, self.cur_code_size);
        self.emit_vbr(code as u64, 6);
        self.emit_vbr(values.len() as u64, 6);
        for &value in values {
            self.emit_vbr(value, 6);
        }
    }

    /// Record laid out by abbreviation `abbrev_id`. `values[0]` is the
    /// record code; a trailing blob operand takes its bytes from `blob`.
    /// Char6 operands are characters, not alphabet positions.
    pub fn emit_record_with_abbrev(&mut self, abbrev_id: u32, values: &[u64], blob: Option<&[u8]>) {
        let abbrev = abbrev_id
            .checked_sub(FIRST_APPLICATION_ABBREV)
            .and_then(|index| self.cur_abbrevs.get(index as usize));
        let Some(abbrev) = abbrev.map(Arc::clone) else {
            debug_assert!(false, "abbreviation {} is not defined here", abbrev_id);
            return;
        };
        self.emit(abbrev_id as u64, self.cur_code_size);

        let ops = abbrev.ops();
        let mut next = 0;
        let mut i = 0;
        while i < ops.len() {
            match ops[i] {
                AbbrevOp::Literal(value) => {
                    debug_assert_eq!(values.get(next).copied(), Some(value));
                    next += 1;
                }
                AbbrevOp::Fixed(width) => {
                    self.emit64(values[next], width);
                    next += 1;
                }
                AbbrevOp::Vbr(width) => {
                    self.emit_vbr(values[next], width);
                    next += 1;
                }
                AbbrevOp::Char6 => {
                    self.emit_char6(values[next]);
                    next += 1;
                }
                AbbrevOp::Array => {
                    let element = ops[i + 1];
                    let rest = &values[next..];
                    self.emit_vbr(rest.len() as u64, 6);
                    for &value in rest {
                        self.emit_scalar(element, value);
                    }
                    next = values.len();
                    i += 1;
                }
                AbbrevOp::Blob => {
                    let bytes = blob.unwrap_or_default();
                    self.emit_vbr(bytes.len() as u64, 6);
                    self.flush_to_word();
                    self.out.extend_from_slice(bytes);
                    while self.out.len() % 4 != 0 {
                        self.out.push(0);
                    }
                }
            }
            i += 1;
        }
    }

    fn emit_scalar(&mut self, op: AbbrevOp, value: u64) {
        match op {
            AbbrevOp::Fixed(width) => self.emit64(value, width),
            AbbrevOp::Vbr(width) => self.emit_vbr(value, width),
            AbbrevOp::Char6 => self.emit_char6(value),
            AbbrevOp::Literal(_) | AbbrevOp::Array | AbbrevOp::Blob => {
                debug_assert!(false, "invalid array element operand {:?}", op)
            }
        }
    }

    fn emit_char6(&mut self, ch: u64) {
        let code = u8::try_from(ch).ok().and_then(encode_char6);
        debug_assert!(code.is_some(), "{:#x} has no char6 encoding", ch);
        self.emit(code.unwrap_or_default(), 6);
    }

    pub fn enter_block_info_block(&mut self) {
        self.enter_subblock(BLOCK_INFO_BLOCK_ID, BLOCK_INFO_ABBREV_WIDTH);
        self.block_info_cur_bid = None;
    }

    fn switch_to_block_id(&mut self, block_id: u32) {
        if self.block_info_cur_bid == Some(block_id) {
            return;
        }
        self.emit_record(BLOCKINFO_CODE_SETBID, &[block_id as u64]);
        self.block_info_cur_bid = Some(block_id);
    }

    /// Register an abbreviation for every future instance of `block_id`.
    pub fn emit_block_info_abbrev(&mut self, block_id: u32, abbrev: Abbrev) -> u32 {
        self.switch_to_block_id(block_id);
        self.encode_abbrev(&abbrev);
        let entry = self.block_info.entry(block_id);
        entry.abbrevs.push(Arc::new(abbrev));
        entry.abbrevs.len() as u32 - 1 + FIRST_APPLICATION_ABBREV
    }

    pub fn emit_block_name(&mut self, block_id: u32, name: &str) {
        self.switch_to_block_id(block_id);
        let values: Vec<u64> = name.bytes().map(u64::from).collect();
        self.emit_record(BLOCKINFO_CODE_BLOCKNAME, &values);
        self.block_info.entry(block_id).name = Some(name.to_string());
    }

    pub fn emit_record_name(&mut self, block_id: u32, code: u32, name: &str) {
        self.switch_to_block_id(block_id);
        let mut values = Vec::with_capacity(name.len() + 1);
        values.push(code as u64);
        values.extend(name.bytes().map(u64::from));
        self.emit_record(BLOCKINFO_CODE_SETRECORDNAME, &values);
        self.block_info
            .entry(block_id)
            .record_names
            .push((code, name.to_string()));
    }
}

fn block_length(words: usize) -> Result<u32> {
    u32::try_from(words).map_err(|_| RemarkError::BlockTooLarge(words))
}
