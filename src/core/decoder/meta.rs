//! META_BLOCK parsing and container discovery
//!
//! Discovery runs in three steps:
//!
//! 1. magic, BLOCKINFO and the early META_BLOCK (container info plus the
//!    remark version or the external file path)
//! 2. skip every REMARKS_BLOCK, remembering where the first one starts
//! 3. the late META_BLOCK with the string table, if there is one
//!
//! The caller then jumps back to the first remarks block.

use crate::bitstream::{BitCursor, Entry, Record, BLOCK_INFO_BLOCK_ID};
use crate::container::{
    validate_magic, ContainerType, RecordCode, CONTAINER_MAGIC, CURRENT_CONTAINER_VERSION,
    META_BLOCK_ID, META_BLOCK_NAME, REMARKS_BLOCK_ID,
};
use crate::error::{RemarkError, Result};
use crate::remark::CURRENT_REMARK_VERSION;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ContainerInfo {
    pub version: u64,
    pub container_type: ContainerType,
}

/// Everything one META_BLOCK contained.
#[derive(Debug, Default)]
pub(crate) struct MetaRecords {
    pub container: Option<ContainerInfo>,
    pub remark_version: Option<u64>,
    pub string_table: Option<Bytes>,
    pub external_file: Option<Bytes>,
}

fn malformed(record: RecordCode) -> RemarkError {
    RemarkError::MalformedRecord {
        block: META_BLOCK_NAME,
        record: record.name(),
    }
}

fn missing(what: &'static str) -> RemarkError {
    RemarkError::MissingMetadata {
        block: META_BLOCK_NAME,
        what,
    }
}

impl MetaRecords {
    /// Versions are checked as soon as their record is read, so a reader
    /// too old or too new reports that rather than a later parse failure.
    fn apply(&mut self, record: Record) -> Result<()> {
        let code = RecordCode::from_raw(record.code);
        match code {
            Some(RecordCode::MetaContainerInfo) => {
                let &[version, raw_type] = record.fields.as_slice() else {
                    return Err(malformed(RecordCode::MetaContainerInfo));
                };
                if version != CURRENT_CONTAINER_VERSION {
                    return Err(RemarkError::UnsupportedContainerVersion {
                        expected: CURRENT_CONTAINER_VERSION,
                        found: version,
                    });
                }
                self.container = Some(ContainerInfo {
                    version,
                    container_type: ContainerType::from_raw(raw_type)?,
                });
            }
            Some(RecordCode::MetaRemarkVersion) => {
                let &[version] = record.fields.as_slice() else {
                    return Err(malformed(RecordCode::MetaRemarkVersion));
                };
                if version != CURRENT_REMARK_VERSION {
                    return Err(RemarkError::UnsupportedRemarkVersion {
                        expected: CURRENT_REMARK_VERSION,
                        found: version,
                    });
                }
                self.remark_version = Some(version);
            }
            Some(RecordCode::MetaStrTab) => {
                if !record.fields.is_empty() {
                    return Err(malformed(RecordCode::MetaStrTab));
                }
                self.string_table = Some(record.blob.unwrap_or_default());
            }
            Some(RecordCode::MetaExternalFile) => {
                if !record.fields.is_empty() {
                    return Err(malformed(RecordCode::MetaExternalFile));
                }
                self.external_file = Some(record.blob.unwrap_or_default());
            }
            _ => {
                return Err(RemarkError::UnknownRecord {
                    block: META_BLOCK_NAME,
                    code: record.code,
                })
            }
        }
        Ok(())
    }
}

/// Parse a META_BLOCK whose ENTER_SUBBLOCK was just read.
pub(crate) fn parse_meta_block(cursor: &mut BitCursor) -> Result<MetaRecords> {
    cursor.enter_sub_block(META_BLOCK_ID)?;
    let mut records = MetaRecords::default();
    loop {
        match cursor.advance()? {
            Entry::EndBlock => return Ok(records),
            Entry::Record(abbrev_id) => {
                let record = cursor.read_record(abbrev_id)?;
                records.apply(record)?;
            }
            Entry::SubBlock(id) => {
                return Err(RemarkError::UnexpectedBlock {
                    block: META_BLOCK_NAME,
                    id,
                })
            }
            Entry::EndOfStream => return Err(RemarkError::UnexpectedEof),
        }
    }
}

/// What the early META_BLOCK says the container is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum EarlyMeta {
    /// Remarks follow in this buffer
    RemarksFile,
    /// Remarks live in the file at `path`
    External { path: PathBuf },
}

impl EarlyMeta {
    fn from_records(records: &MetaRecords) -> Result<Self> {
        let info = records.container.ok_or_else(|| missing("container info"))?;
        match info.container_type {
            ContainerType::RemarksFile => {
                records
                    .remark_version
                    .ok_or_else(|| missing("remark version"))?;
                Ok(EarlyMeta::RemarksFile)
            }
            ContainerType::External => {
                let raw = records
                    .external_file
                    .as_ref()
                    .ok_or_else(|| missing("external file path"))?;
                let path = std::str::from_utf8(raw).map_err(|_| {
                    RemarkError::Bitstream("external file path is not valid UTF-8".to_string())
                })?;
                Ok(EarlyMeta::External {
                    path: PathBuf::from(path),
                })
            }
        }
    }
}

/// Result of container discovery.
#[derive(Debug)]
pub(crate) struct ContainerMeta {
    pub early: EarlyMeta,
    /// Position just after the first REMARKS_BLOCK id
    pub first_remarks_bit: Option<u64>,
    pub string_table: Option<Bytes>,
}

/// Run discovery over `buffer`, returning a cursor with block-info loaded.
pub(crate) fn read_container_meta(buffer: Bytes) -> Result<(BitCursor, ContainerMeta)> {
    validate_magic(&buffer)?;
    let mut cursor = BitCursor::new(buffer);
    cursor.jump_to_bit(CONTAINER_MAGIC.len() as u64 * 8)?;

    if !matches!(cursor.advance(), Ok(Entry::SubBlock(BLOCK_INFO_BLOCK_ID))) {
        return Err(RemarkError::MissingBlockInfo);
    }
    let block_info = cursor.read_block_info_block()?;
    cursor.set_block_info(Arc::new(block_info));

    if cursor.advance()? != Entry::SubBlock(META_BLOCK_ID) {
        return Err(missing("META_BLOCK"));
    }
    let early_records = parse_meta_block(&mut cursor)?;
    let early = EarlyMeta::from_records(&early_records)?;
    if let Some(info) = early_records.container {
        debug!(
            "Container version {}, type {:?}",
            info.version, info.container_type
        );
    }

    let mut first_remarks_bit = None;
    let mut late_records = None;
    while !cursor.at_end_of_stream() {
        match cursor.advance()? {
            Entry::SubBlock(META_BLOCK_ID) => {
                late_records = Some(parse_meta_block(&mut cursor)?);
                break;
            }
            Entry::SubBlock(REMARKS_BLOCK_ID) => {
                first_remarks_bit.get_or_insert(cursor.bit_position());
                cursor.skip_block()?;
            }
            Entry::SubBlock(id) => return Err(RemarkError::UnexpectedBlockBetweenMeta(id)),
            Entry::EndOfStream => break,
            Entry::Record(_) | Entry::EndBlock => {
                return Err(RemarkError::Bitstream(
                    "expected a block at the top level".to_string(),
                ))
            }
        }
    }

    let string_table = late_records
        .and_then(|late| late.string_table)
        .or(early_records.string_table);

    Ok((
        cursor,
        ContainerMeta {
            early,
            first_remarks_bit,
            string_table,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::encoder::ContainerWriter;
    use crate::string_table::StringTable;

    #[test]
    fn test_discovers_remarks_and_string_table() {
        let mut container =
            ContainerWriter::new(ContainerType::RemarksFile, &EncoderConfig::default()).unwrap();
        container.emit_meta_block(CURRENT_CONTAINER_VERSION, CURRENT_REMARK_VERSION).unwrap();
        container.enter_remarks_block();
        container.exit_remarks_block().unwrap();
        container.enter_remarks_block();
        container.exit_remarks_block().unwrap();
        let table: StringTable = ["a", "b"].into_iter().collect();
        container.emit_late_meta_block(&table).unwrap();

        let (_, meta) = read_container_meta(Bytes::from(container.take_bytes())).unwrap();
        assert_eq!(meta.early, EarlyMeta::RemarksFile);
        assert!(meta.first_remarks_bit.is_some());
        assert_eq!(meta.string_table.as_deref(), Some(&b"a\0b\0"[..]));
    }

    #[test]
    fn test_external_pointer_meta() {
        let mut container =
            ContainerWriter::new(ContainerType::External, &EncoderConfig::default()).unwrap();
        container.emit_external_meta_block(CURRENT_CONTAINER_VERSION, "dir/remarks.bin").unwrap();

        let (cursor, meta) = read_container_meta(Bytes::from(container.take_bytes())).unwrap();
        assert_eq!(
            meta.early,
            EarlyMeta::External {
                path: PathBuf::from("dir/remarks.bin")
            }
        );
        assert!(meta.first_remarks_bit.is_none());
        assert!(cursor.at_end_of_stream());
    }

    #[test]
    fn test_missing_block_info() {
        let mut bytes = CONTAINER_MAGIC.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            read_container_meta(Bytes::from(bytes)),
            Err(RemarkError::MissingBlockInfo)
        ));
    }

    #[test]
    fn test_bad_magic() {
        assert!(matches!(
            read_container_meta(Bytes::from_static(b"RMRX\0\0\0\0")),
            Err(RemarkError::InvalidMagic { .. })
        ));
    }
}
