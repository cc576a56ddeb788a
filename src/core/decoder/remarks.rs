//! REMARKS_BLOCK state machine
//!
//! A remark has no explicit end record: it runs until the next REMARK or
//! REMARK_HEADER record, or the end of the block. The parser therefore
//! reads one record past every remark and keeps it buffered for the next
//! call.

use crate::bitstream::{BitCursor, Entry, Record};
use crate::container::{RecordCode, REMARKS_BLOCK_ID, REMARKS_BLOCK_NAME};
use crate::error::{RemarkError, Result};
use crate::remark::{Argument, Remark, RemarkKind, RemarkLocation, STRING_KEY};
use crate::string_table::{ParsedStringTable, StringTable};
use crate::tag::{Tag, TagSet};
use bytes::Bytes;

/// Where `parse_next` resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    /// Block not entered yet
    Init,
    /// A REMARK_HEADER was read and is buffered
    BetweenRemarks,
    /// A REMARK record was read and is buffered
    InRemark,
    /// END_BLOCK was read
    EndOfBlock,
}

/// What a debug-location or tag record attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    None,
    Remark,
    Argument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawLocation {
    file: u64,
    line: u64,
    column: u64,
}

#[derive(Debug, Default)]
struct RawArgument {
    key: Option<u64>,
    value: Option<u64>,
    /// `value` is the integer itself, not a string index
    is_int: bool,
    loc: Option<RawLocation>,
    tag: Option<Tag>,
}

/// Records of one remark, as indices into the string table.
pub(crate) struct RemarksBlockParser {
    state: BlockState,
    scope: ScopeKind,
    record: Record,

    // Set by REMARK_HEADER; kept across remarks
    pass_name: Option<u64>,
    function_name: Option<u64>,

    kind: Option<u64>,
    remark_name: Option<u64>,
    hotness: Option<u64>,
    loc: Option<RawLocation>,
    blob: Option<Bytes>,
    args: Vec<RawArgument>,
    tags: Vec<Tag>,
}

impl Default for RemarksBlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RemarksBlockParser {
    pub(crate) fn new() -> Self {
        RemarksBlockParser {
            state: BlockState::Init,
            scope: ScopeKind::None,
            record: Record::default(),
            pass_name: None,
            function_name: None,
            kind: None,
            remark_name: None,
            hotness: None,
            loc: None,
            blob: None,
            args: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> BlockState {
        self.state
    }

    fn malformed(record: RecordCode) -> RemarkError {
        RemarkError::MalformedRecord {
            block: REMARKS_BLOCK_NAME,
            record: record.name(),
        }
    }

    fn unexpected(record: RecordCode) -> RemarkError {
        RemarkError::UnexpectedRecord {
            block: REMARKS_BLOCK_NAME,
            record: record.name(),
        }
    }

    /// Read the next remark's records. Returns `false` once the block has
    /// no more remarks.
    pub(crate) fn parse_next(&mut self, cursor: &mut BitCursor) -> Result<bool> {
        if self.state == BlockState::Init {
            cursor.enter_sub_block(REMARKS_BLOCK_ID)?;
            self.advance(cursor)?;
        }
        if self.state == BlockState::BetweenRemarks {
            self.handle_record()?;
            self.advance(cursor)?;
        }
        if self.state == BlockState::EndOfBlock {
            return Ok(false);
        }

        self.kind = None;
        self.remark_name = None;
        self.hotness = None;
        self.loc = None;
        self.blob = None;
        self.args.clear();
        self.tags.clear();
        self.scope = ScopeKind::None;

        self.handle_record()?;
        self.advance(cursor)?;
        Ok(true)
    }

    /// Read records until one that starts the next remark, or END_BLOCK.
    fn advance(&mut self, cursor: &mut BitCursor) -> Result<()> {
        loop {
            match cursor.advance()? {
                Entry::EndBlock => {
                    self.state = BlockState::EndOfBlock;
                    return Ok(());
                }
                Entry::EndOfStream => return Err(RemarkError::UnexpectedEof),
                Entry::SubBlock(id) => {
                    return Err(RemarkError::UnexpectedBlock {
                        block: REMARKS_BLOCK_NAME,
                        id,
                    })
                }
                Entry::Record(abbrev_id) => {
                    self.record = cursor.read_record(abbrev_id)?;
                    let code = RecordCode::from_raw(self.record.code);
                    if code == Some(RecordCode::Remark) {
                        self.state = BlockState::InRemark;
                        return Ok(());
                    }
                    if self.state == BlockState::InRemark
                        && code.is_some_and(RecordCode::is_remark_boundary)
                    {
                        self.state = BlockState::BetweenRemarks;
                        return Ok(());
                    }
                    self.handle_record()?;
                }
            }
        }
    }

    fn handle_record(&mut self) -> Result<()> {
        let Some(code) = RecordCode::from_raw(self.record.code) else {
            return Err(RemarkError::UnknownRecord {
                block: REMARKS_BLOCK_NAME,
                code: self.record.code,
            });
        };
        let fields = self.record.fields.as_slice();
        match code {
            RecordCode::RemarkHeader => {
                let &[pass, function] = fields else {
                    return Err(Self::malformed(code));
                };
                self.pass_name = Some(pass);
                self.function_name = Some(function);
            }
            RecordCode::Remark => {
                let &[kind, name] = fields else {
                    return Err(Self::malformed(code));
                };
                self.kind = Some(kind);
                self.remark_name = Some(name);
                self.scope = ScopeKind::Remark;
            }
            RecordCode::RemarkDebugLoc => {
                let &[file, line, column] = fields else {
                    return Err(Self::malformed(code));
                };
                let loc = RawLocation { file, line, column };
                match (self.scope, self.args.last_mut()) {
                    (ScopeKind::Remark, _) => self.loc = Some(loc),
                    (ScopeKind::Argument, Some(arg)) => arg.loc = Some(loc),
                    _ => return Err(Self::unexpected(code)),
                }
            }
            RecordCode::RemarkHotness => {
                let &[hotness] = fields else {
                    return Err(Self::malformed(code));
                };
                if self.scope != ScopeKind::Remark {
                    return Err(Self::unexpected(code));
                }
                self.hotness = Some(hotness);
            }
            RecordCode::RemarkArgKV | RecordCode::RemarkArgKVInt | RecordCode::RemarkArgV => {
                let arg = match (code, fields) {
                    (RecordCode::RemarkArgV, &[value]) => RawArgument {
                        value: Some(value),
                        ..Default::default()
                    },
                    (RecordCode::RemarkArgKV | RecordCode::RemarkArgKVInt, &[key, value]) => {
                        RawArgument {
                            key: Some(key),
                            value: Some(value),
                            is_int: code == RecordCode::RemarkArgKVInt,
                            ..Default::default()
                        }
                    }
                    _ => return Err(Self::malformed(code)),
                };
                if self.scope == ScopeKind::None {
                    return Err(Self::unexpected(code));
                }
                self.args.push(arg);
                self.scope = ScopeKind::Argument;
            }
            RecordCode::RemarkBlob => {
                if !fields.is_empty() {
                    return Err(Self::malformed(code));
                }
                if self.scope != ScopeKind::Remark {
                    return Err(Self::unexpected(code));
                }
                self.blob = Some(self.record.blob.clone().unwrap_or_default());
            }
            RecordCode::RemarkTag => {
                let &[raw] = fields else {
                    return Err(Self::malformed(code));
                };
                let tag = Tag::from_raw(raw);
                match (self.scope, self.args.last_mut()) {
                    (ScopeKind::Remark, _) => self.tags.push(tag),
                    (ScopeKind::Argument, Some(arg)) => arg.tag = Some(tag),
                    _ => return Err(Self::unexpected(code)),
                }
            }
            RecordCode::MetaContainerInfo
            | RecordCode::MetaRemarkVersion
            | RecordCode::MetaStrTab
            | RecordCode::MetaExternalFile => {
                return Err(RemarkError::UnknownRecord {
                    block: REMARKS_BLOCK_NAME,
                    code: self.record.code,
                })
            }
        }
        Ok(())
    }

    /// Resolve the parsed remark through `table`. Integer arguments are
    /// spelled out through `scratch`, which never reaches the container.
    pub(crate) fn build(
        &self,
        table: &ParsedStringTable,
        scratch: &mut StringTable,
    ) -> Result<Remark> {
        let raw_kind = self.kind.ok_or(RemarkError::MissingField("remark type"))?;
        let kind = RemarkKind::from_raw(raw_kind).ok_or(RemarkError::UnknownRemarkKind(raw_kind))?;
        let remark_name = self.remark_name.ok_or(RemarkError::MissingField("remark name"))?;
        let pass_name = self.pass_name.ok_or(RemarkError::MissingField("remark pass"))?;
        let function_name = self
            .function_name
            .ok_or(RemarkError::MissingField("remark function name"))?;

        let mut remark = Remark::new(
            kind,
            table.get(pass_name)?,
            table.get(remark_name)?,
            table.get(function_name)?,
        );
        remark.location = self.loc.map(|loc| resolve_location(loc, table)).transpose()?;
        remark.hotness = self.hotness;
        remark.blob = self.blob.as_ref().map(|blob| blob.to_vec());
        remark.tags = self.tags.iter().copied().collect::<TagSet>();

        for raw in &self.args {
            let value = raw
                .value
                .ok_or(RemarkError::MissingField("value in remark argument"))?;
            let key = match raw.key {
                Some(index) => table.get(index)?.to_string(),
                None => STRING_KEY.to_string(),
            };
            let val = if raw.is_int {
                let index = scratch.add(&value.to_string());
                scratch.get(index).map(str::to_owned).unwrap_or_default()
            } else {
                table.get(value)?.to_string()
            };
            remark.args.push(Argument {
                key,
                val,
                loc: raw.loc.map(|loc| resolve_location(loc, table)).transpose()?,
                tag: raw.tag,
            });
        }
        Ok(remark)
    }
}

fn resolve_location(loc: RawLocation, table: &ParsedStringTable) -> Result<RemarkLocation> {
    let out_of_range = || RemarkError::MalformedRecord {
        block: REMARKS_BLOCK_NAME,
        record: RecordCode::RemarkDebugLoc.name(),
    };
    Ok(RemarkLocation::new(
        table.get(loc.file)?,
        u32::try_from(loc.line).map_err(|_| out_of_range())?,
        u32::try_from(loc.column).map_err(|_| out_of_range())?,
    ))
}
