//! Bitstream cursor
//!
//! Reads what [`super::BitWriter`] produces. Every read is bounds-checked so
//! truncated or corrupted input surfaces as an error rather than a panic.

use super::{
    decode_char6, Abbrev, AbbrevOp, BlockInfo, BLOCKINFO_CODE_BLOCKNAME, BLOCKINFO_CODE_SETBID,
    BLOCKINFO_CODE_SETRECORDNAME, BLOCK_INFO_BLOCK_ID, DEFINE_ABBREV, END_BLOCK, ENTER_SUBBLOCK,
    FIRST_APPLICATION_ABBREV, MAX_ABBREV_WIDTH, UNABBREV_RECORD,
};
use crate::error::{RemarkError, Result};
use bytes::Bytes;
use std::sync::Arc;

/// What the cursor found at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// END_BLOCK of the innermost block (already consumed)
    EndBlock,
    /// ENTER_SUBBLOCK with this block id; the rest of the header is unread
    SubBlock(u32),
    /// A record using this abbreviation id
    Record(u32),
    /// No more bits where an entry was expected
    EndOfStream,
}

/// A decoded record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub code: u32,
    pub fields: Vec<u64>,
    pub blob: Option<Bytes>,
}

struct Scope {
    prev_code_size: u32,
    prev_abbrevs: Vec<Arc<Abbrev>>,
    /// Bit position of the block's end
    end_bit: u64,
}

pub struct BitCursor {
    data: Bytes,
    bit_pos: u64,
    code_size: u32,
    cur_abbrevs: Vec<Arc<Abbrev>>,
    block_scope: Vec<Scope>,
    block_info: Option<Arc<BlockInfo>>,
}

fn malformed(message: impl Into<String>) -> RemarkError {
    RemarkError::Bitstream(message.into())
}

impl BitCursor {
    pub fn new(data: impl Into<Bytes>) -> Self {
        BitCursor {
            data: data.into(),
            bit_pos: 0,
            code_size: 2,
            cur_abbrevs: Vec::new(),
            block_scope: Vec::new(),
            block_info: None,
        }
    }

    pub fn bit_position(&self) -> u64 {
        self.bit_pos
    }

    fn bit_len(&self) -> u64 {
        self.data.len() as u64 * 8
    }

    pub fn at_end_of_stream(&self) -> bool {
        self.bit_pos >= self.bit_len()
    }

    /// Move to an absolute bit position at the top level.
    pub fn jump_to_bit(&mut self, bit: u64) -> Result<()> {
        if bit > self.bit_len() {
            return Err(malformed(format!("cannot jump to bit {}", bit)));
        }
        self.bit_pos = bit;
        Ok(())
    }

    pub fn set_block_info(&mut self, info: Arc<BlockInfo>) {
        self.block_info = Some(info);
    }

    pub fn block_info(&self) -> Option<&BlockInfo> {
        self.block_info.as_deref()
    }

    /// Read `width` (<= 64) bits.
    pub fn read(&mut self, width: u32) -> Result<u64> {
        debug_assert!(width <= 64);
        if self.bit_pos + width as u64 > self.bit_len() {
            return Err(RemarkError::UnexpectedEof);
        }
        let mut result = 0u64;
        let mut done = 0u32;
        while done < width {
            let byte = self.data[(self.bit_pos / 8) as usize] as u64;
            let offset = (self.bit_pos % 8) as u32;
            let take = (8 - offset).min(width - done);
            let bits = (byte >> offset) & ((1u64 << take) - 1);
            result |= bits << done;
            done += take;
            self.bit_pos += take as u64;
        }
        Ok(result)
    }

    pub fn read_vbr(&mut self, width: u32) -> Result<u64> {
        if width < 2 || width > 32 {
            return Err(malformed(format!("invalid VBR width {}", width)));
        }
        let hi = 1u64 << (width - 1);
        let mut piece = self.read(width)?;
        if piece & hi == 0 {
            return Ok(piece);
        }
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            result |= (piece & (hi - 1)) << shift;
            if piece & hi == 0 {
                return Ok(result);
            }
            shift += width - 1;
            if shift >= 64 {
                return Err(malformed("VBR value does not fit in 64 bits"));
            }
            piece = self.read(width)?;
        }
    }

    fn read_vbr_u32(&mut self, width: u32) -> Result<u32> {
        let value = self.read_vbr(width)?;
        u32::try_from(value).map_err(|_| malformed(format!("value {} does not fit in 32 bits", value)))
    }

    /// Skip to the next 32-bit boundary.
    pub fn skip_to_word_boundary(&mut self) {
        let rem = self.bit_pos % 32;
        if rem != 0 {
            self.bit_pos = (self.bit_pos + 32 - rem).min(self.bit_len());
        }
    }

    /// Read raw bytes at the top level, such as a magic number.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        (0..count).map(|_| self.read(8).map(|b| b as u8)).collect()
    }

    /// Advance to the next entry, absorbing DEFINE_ABBREV records.
    pub fn advance(&mut self) -> Result<Entry> {
        loop {
            if self.bit_pos + self.code_size as u64 > self.bit_len() {
                return Ok(Entry::EndOfStream);
            }
            let code = self.read(self.code_size)? as u32;
            match code {
                END_BLOCK => {
                    self.read_block_end()?;
                    return Ok(Entry::EndBlock);
                }
                ENTER_SUBBLOCK => {
                    let id = self.read_vbr_u32(8)?;
                    return Ok(Entry::SubBlock(id));
                }
                DEFINE_ABBREV => {
                    let abbrev = self.read_abbrev()?;
                    self.cur_abbrevs.push(Arc::new(abbrev));
                }
                abbrev_id => return Ok(Entry::Record(abbrev_id)),
            }
        }
    }

    fn read_block_end(&mut self) -> Result<()> {
        let scope = self
            .block_scope
            .pop()
            .ok_or_else(|| malformed("END_BLOCK at the top level"))?;
        self.skip_to_word_boundary();
        if self.bit_pos != scope.end_bit {
            return Err(malformed("block length does not match its END_BLOCK"));
        }
        self.code_size = scope.prev_code_size;
        self.cur_abbrevs = scope.prev_abbrevs;
        Ok(())
    }

    /// Read the rest of a block header: abbrev width and length.
    fn read_block_header(&mut self) -> Result<(u32, u64)> {
        let code_size = self.read_vbr_u32(4)?;
        if code_size == 0 || code_size > MAX_ABBREV_WIDTH {
            return Err(malformed(format!("invalid abbrev width {}", code_size)));
        }
        self.skip_to_word_boundary();
        let num_words = self.read(32)?;
        let end_bit = self.bit_pos + num_words * 32;
        if end_bit > self.bit_len() {
            return Err(malformed("block extends past the end of the buffer"));
        }
        Ok((code_size, end_bit))
    }

    /// Enter the block whose ENTER_SUBBLOCK id was just returned by
    /// [`BitCursor::advance`].
    pub fn enter_sub_block(&mut self, block_id: u32) -> Result<()> {
        let (code_size, end_bit) = self.read_block_header()?;
        let abbrevs = self
            .block_info
            .as_ref()
            .and_then(|info| info.get(block_id))
            .map(|entry| entry.abbrevs.clone())
            .unwrap_or_default();
        self.block_scope.push(Scope {
            prev_code_size: self.code_size,
            prev_abbrevs: std::mem::replace(&mut self.cur_abbrevs, abbrevs),
            end_bit,
        });
        self.code_size = code_size;
        Ok(())
    }

    /// Skip the block whose ENTER_SUBBLOCK id was just returned.
    pub fn skip_block(&mut self) -> Result<()> {
        let (_, end_bit) = self.read_block_header()?;
        self.bit_pos = end_bit;
        Ok(())
    }

    fn read_abbrev(&mut self) -> Result<Abbrev> {
        let num_ops = self.read_vbr(5)? as usize;
        let mut abbrev = Abbrev::new();
        let mut i = 0;
        while i < num_ops {
            let is_literal = self.read(1)? == 1;
            if is_literal {
                abbrev.push(AbbrevOp::Literal(self.read_vbr(8)?));
                i += 1;
                continue;
            }
            let encoding = self.read(3)?;
            let op = match encoding {
                AbbrevOp::ENCODING_FIXED | AbbrevOp::ENCODING_VBR => {
                    let width = self.read_vbr_u32(5)?;
                    if width > 64 {
                        return Err(malformed(format!("abbrev field width {} too large", width)));
                    }
                    match (encoding, width) {
                        // A zero-width field reads as the literal 0
                        (_, 0) => AbbrevOp::Literal(0),
                        (AbbrevOp::ENCODING_FIXED, _) => AbbrevOp::Fixed(width),
                        _ if width < 2 || width > 32 => {
                            return Err(malformed(format!("invalid VBR width {}", width)))
                        }
                        _ => AbbrevOp::Vbr(width),
                    }
                }
                AbbrevOp::ENCODING_ARRAY => AbbrevOp::Array,
                AbbrevOp::ENCODING_CHAR6 => AbbrevOp::Char6,
                AbbrevOp::ENCODING_BLOB => AbbrevOp::Blob,
                other => return Err(malformed(format!("unknown abbrev encoding {}", other))),
            };
            abbrev.push(op);
            i += 1;
        }
        if abbrev.ops().is_empty() {
            return Err(malformed("abbreviation with no operands"));
        }
        Ok(abbrev)
    }

    fn read_scalar(&mut self, op: AbbrevOp) -> Result<u64> {
        match op {
            AbbrevOp::Literal(value) => Ok(value),
            AbbrevOp::Fixed(width) => self.read(width),
            AbbrevOp::Vbr(width) => self.read_vbr(width),
            AbbrevOp::Char6 => Ok(decode_char6(self.read(6)?) as u64),
            AbbrevOp::Array | AbbrevOp::Blob => {
                Err(malformed("array or blob used as a scalar operand"))
            }
        }
    }

    /// Read the record introduced by `abbrev_id`.
    pub fn read_record(&mut self, abbrev_id: u32) -> Result<Record> {
        if abbrev_id == UNABBREV_RECORD {
            let code = self.read_vbr_u32(6)?;
            let count = self.read_vbr(6)?;
            // Every operand takes at least 6 bits.
            if count.saturating_mul(6) > self.bit_len() - self.bit_pos {
                return Err(malformed("record operand count exceeds the buffer"));
            }
            let fields = (0..count)
                .map(|_| self.read_vbr(6))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Record {
                code,
                fields,
                blob: None,
            });
        }

        let abbrev = abbrev_id
            .checked_sub(FIRST_APPLICATION_ABBREV)
            .and_then(|index| self.cur_abbrevs.get(index as usize))
            .cloned()
            .ok_or_else(|| malformed(format!("invalid abbrev id {}", abbrev_id)))?;
        let ops = abbrev.ops();

        let code = self.read_scalar(ops[0])?;
        let code = u32::try_from(code).map_err(|_| malformed("record code too large"))?;
        let mut record = Record {
            code,
            fields: Vec::new(),
            blob: None,
        };

        let mut i = 1;
        while i < ops.len() {
            match ops[i] {
                AbbrevOp::Array => {
                    let element = *ops
                        .get(i + 1)
                        .ok_or_else(|| malformed("array without an element type"))?;
                    let count = self.read_vbr(6)?;
                    if count > self.bit_len() - self.bit_pos {
                        return Err(malformed("array length exceeds the buffer"));
                    }
                    for _ in 0..count {
                        record.fields.push(self.read_scalar(element)?);
                    }
                    i += 2;
                }
                AbbrevOp::Blob => {
                    let len = self.read_vbr(6)?;
                    self.skip_to_word_boundary();
                    let start = self.bit_pos / 8;
                    let end = start
                        .checked_add(len)
                        .filter(|&end| end <= self.data.len() as u64)
                        .ok_or(RemarkError::UnexpectedEof)?;
                    record.blob = Some(self.data.slice(start as usize..end as usize));
                    self.bit_pos = end * 8;
                    self.skip_to_word_boundary();
                    i += 1;
                }
                op => {
                    record.fields.push(self.read_scalar(op)?);
                    i += 1;
                }
            }
        }
        Ok(record)
    }

    /// Read a BLOCKINFO block whose ENTER_SUBBLOCK id was just returned.
    pub fn read_block_info_block(&mut self) -> Result<BlockInfo> {
        self.enter_sub_block(BLOCK_INFO_BLOCK_ID)?;
        let mut info = BlockInfo::default();
        let mut cur_bid: Option<u32> = None;
        loop {
            if self.bit_pos + self.code_size as u64 > self.bit_len() {
                return Err(RemarkError::UnexpectedEof);
            }
            let code = self.read(self.code_size)? as u32;
            match code {
                END_BLOCK => {
                    self.read_block_end()?;
                    return Ok(info);
                }
                ENTER_SUBBLOCK => {
                    self.read_vbr(8)?;
                    self.skip_block()?;
                }
                DEFINE_ABBREV => {
                    let bid = cur_bid
                        .ok_or_else(|| malformed("abbreviation in BLOCKINFO before SETBID"))?;
                    let abbrev = self.read_abbrev()?;
                    info.entry(bid).abbrevs.push(Arc::new(abbrev));
                }
                abbrev_id => {
                    let record = self.read_record(abbrev_id)?;
                    match record.code {
                        BLOCKINFO_CODE_SETBID => {
                            let bid = record
                                .fields
                                .first()
                                .and_then(|&bid| u32::try_from(bid).ok())
                                .ok_or_else(|| malformed("invalid SETBID record"))?;
                            cur_bid = Some(bid);
                        }
                        BLOCKINFO_CODE_BLOCKNAME => {
                            if let Some(bid) = cur_bid {
                                info.entry(bid).name = Some(fields_to_string(&record.fields));
                            }
                        }
                        BLOCKINFO_CODE_SETRECORDNAME => {
                            if let (Some(bid), Some((&id, name))) =
                                (cur_bid, record.fields.split_first())
                            {
                                if let Ok(id) = u32::try_from(id) {
                                    info.entry(bid)
                                        .record_names
                                        .push((id, fields_to_string(name)));
                                }
                            }
                        }
                        // Unknown BLOCKINFO records are ignored.
                        _ => {}
                    }
                }
            }
        }
    }
}

fn fields_to_string(fields: &[u64]) -> String {
    fields.iter().map(|&c| (c as u8) as char).collect()
}
