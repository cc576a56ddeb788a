//! Remark container decoder
//!
//! [`Decoder`] reads remarks lazily, one per call. Container metadata is
//! read on the first call; from then on each call resumes the REMARKS_BLOCK
//! state machine where the previous one stopped.
//!
//! ```text
//!   Unopened ──first call──► open buffer
//!                               │
//!                ┌──────────────┴───────────────┐
//!                ▼                              ▼
//!        RemarksFile: Direct          External: read pointed-to file
//!                │                              │
//!                │                   empty ──► end of data
//!                │                   RemarksFile ──► Redirected
//!                │                   External ──► error
//!                ▼                              ▼
//!          next remark ◄────────────────────────┘
//! ```
//!
//! Only one level of redirection exists: the pointed-to file must be a
//! remarks file itself.

mod meta;
mod remarks;


use crate::bitstream::{BitCursor, Entry};
use crate::container::REMARKS_BLOCK_ID;
use crate::error::{RemarkError, Result};
use crate::remark::Remark;
use crate::string_table::{ParsedStringTable, StringTable};
use bytes::Bytes;
use meta::{read_container_meta, ContainerMeta, EarlyMeta};
use remarks::RemarksBlockParser;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Cursor over the remarks of one remarks file.
struct RemarksStream {
    cursor: BitCursor,
    string_table: Option<ParsedStringTable>,
    block: RemarksBlockParser,
}

impl RemarksStream {
    fn next_remark(&mut self, scratch: &mut StringTable) -> Result<Option<Remark>> {
        loop {
            if self.block.parse_next(&mut self.cursor)? {
                let table = self
                    .string_table
                    .as_ref()
                    .ok_or(RemarkError::MissingStringTable)?;
                let remark = self.block.build(table, scratch)?;
                trace!(
                    "Decoded remark {}/{} in {}",
                    remark.pass_name,
                    remark.remark_name,
                    remark.function_name
                );
                return Ok(Some(remark));
            }

            // The block is done; a further remarks block continues the
            // stream, anything else ends it.
            match self.cursor.advance()? {
                Entry::SubBlock(REMARKS_BLOCK_ID) => {
                    debug!("Entering next remarks block");
                    self.block = RemarksBlockParser::new();
                }
                Entry::SubBlock(_) | Entry::EndOfStream => return Ok(None),
                Entry::Record(_) | Entry::EndBlock => {
                    return Err(RemarkError::Bitstream(
                        "expected a block at the top level".to_string(),
                    ))
                }
            }
        }
    }
}

/// An opened container.
enum Container {
    /// Remarks are in the buffer the decoder was given
    Direct(RemarksStream),
    /// The buffer pointed at `path`, which holds the remarks
    Redirected { path: PathBuf, stream: RemarksStream },
}

impl Container {
    fn stream_mut(&mut self) -> &mut RemarksStream {
        match self {
            Container::Direct(stream) => stream,
            Container::Redirected { stream, .. } => stream,
        }
    }
}

enum DecoderState {
    /// Metadata not read yet
    Unopened(Bytes),
    Open(Container),
    /// End of data reached, or a previous call failed
    Done,
}

/// Lazy decoder for a remarks container.
///
/// ```
/// use remarks_rs::{ContainerMode, Decoder, Encoder, Remark, RemarkKind};
///
/// let remark = Remark::new(RemarkKind::Passed, "inline", "Inlined", "main");
/// let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
/// encoder.emit(&remark).unwrap();
/// let bytes = encoder.into_inner().unwrap();
///
/// let decoded: Vec<Remark> = Decoder::new(bytes).collect::<Result<_, _>>().unwrap();
/// assert_eq!(decoded, vec![remark]);
/// ```
pub struct Decoder {
    state: DecoderState,
    external_prefix: Option<PathBuf>,
    /// Table supplied by the caller; wins over the container's own
    supplied_table: Option<ParsedStringTable>,
    /// Text of integer-valued arguments
    scratch: StringTable,
}

impl Decoder {
    pub fn new(buffer: impl Into<Bytes>) -> Self {
        Decoder {
            state: DecoderState::Unopened(buffer.into()),
            external_prefix: None,
            supplied_table: None,
            scratch: StringTable::new(),
        }
    }

    /// Decode with a string table kept outside the container.
    pub fn new_with_table(buffer: impl Into<Bytes>, table: ParsedStringTable) -> Self {
        let mut decoder = Decoder::new(buffer);
        decoder.supplied_table = Some(table);
        decoder
    }

    /// Resolve an external file path relative to `prefix`.
    pub fn with_external_prefix(buffer: impl Into<Bytes>, prefix: impl Into<PathBuf>) -> Self {
        let mut decoder = Decoder::new(buffer);
        decoder.external_prefix = Some(prefix.into());
        decoder
    }

    /// Resolved path of the remarks file, once a pointer file has been
    /// followed.
    pub fn external_path(&self) -> Option<&Path> {
        match &self.state {
            DecoderState::Open(Container::Redirected { path, .. }) => Some(path),
            _ => None,
        }
    }

    /// The next remark, `Ok(None)` at end of data.
    ///
    /// After an error or the end of data every further call returns
    /// `Ok(None)`. Remarks returned before an error stay valid.
    pub fn next_remark(&mut self) -> Result<Option<Remark>> {
        let result = self.step();
        if !matches!(result, Ok(Some(_))) {
            self.state = DecoderState::Done;
        }
        result
    }

    fn step(&mut self) -> Result<Option<Remark>> {
        loop {
            match &mut self.state {
                DecoderState::Done => return Ok(None),
                DecoderState::Unopened(buffer) => {
                    let buffer = std::mem::take(buffer);
                    self.state = match self.open(buffer)? {
                        Some(container) => DecoderState::Open(container),
                        None => DecoderState::Done,
                    };
                }
                DecoderState::Open(container) => {
                    return container.stream_mut().next_remark(&mut self.scratch);
                }
            }
        }
    }

    /// `None` when the container holds nothing at all.
    fn open(&mut self, buffer: Bytes) -> Result<Option<Container>> {
        if buffer.is_empty() {
            return Ok(None);
        }
        let (cursor, meta) = read_container_meta(buffer)?;
        let path = match meta.early.clone() {
            EarlyMeta::RemarksFile => {
                let stream = self.stream(cursor, meta)?;
                return Ok(Some(Container::Direct(stream)));
            }
            EarlyMeta::External { path } => match &self.external_prefix {
                Some(prefix) => prefix.join(path),
                None => path,
            },
        };

        debug!("Following external remarks file {}", path.display());
        let contents = std::fs::read(&path).map_err(|source| RemarkError::ExternalFile {
            path: path.clone(),
            source,
        })?;
        if contents.is_empty() {
            return Ok(None);
        }
        let (cursor, meta) = read_container_meta(Bytes::from(contents))?;
        if meta.early != EarlyMeta::RemarksFile {
            return Err(RemarkError::WrongExternalContainerType);
        }
        let stream = self.stream(cursor, meta)?;
        Ok(Some(Container::Redirected { path, stream }))
    }

    fn stream(&mut self, mut cursor: BitCursor, meta: ContainerMeta) -> Result<RemarksStream> {
        let first = meta
            .first_remarks_bit
            .ok_or(RemarkError::NoRemarksBlocks)?;
        cursor.jump_to_bit(first)?;

        let string_table = match self.supplied_table.take() {
            Some(table) => Some(table),
            None => meta.string_table.map(|raw| {
                let table = ParsedStringTable::new(raw);
                debug!("Found string table with {} entries", table.len());
                table
            }),
        };
        Ok(RemarksStream {
            cursor,
            string_table,
            block: RemarksBlockParser::new(),
        })
    }
}

impl Iterator for Decoder {
    type Item = Result<Remark>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_remark().transpose()
    }
}

impl FusedIterator for Decoder {}
