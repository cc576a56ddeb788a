//! Remark container layout: magic, versions, block ids and record codes
//!
//! ## Embedded container
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Magic: "RMRK"                                │
//! ├──────────────────────────────────────────────┤
//! │ BLOCKINFO_BLOCK                              │
//! │  - META_BLOCK abbreviations                  │
//! │  - REMARKS_BLOCK abbreviations               │
//! ├──────────────────────────────────────────────┤
//! │ META_BLOCK (early)                           │
//! │  - container version + type                  │
//! │  - remark version                            │
//! ├──────────────────────────────────────────────┤
//! │ REMARKS_BLOCK × N (each capped in size)      │
//! │  - header / remark / debug loc / args / ...  │
//! ├──────────────────────────────────────────────┤
//! │ META_BLOCK (late)                            │
//! │  - string table blob                         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## External pointer file
//!
//! Magic, a BLOCKINFO_BLOCK describing only the external-file record, and a
//! single META_BLOCK holding container version, type and the path of the
//! file that carries the remarks.

use crate::error::{RemarkError, Result};

pub const CONTAINER_MAGIC: [u8; 4] = *b"RMRK";

/// Version of the container layout this build reads and writes.
pub const CURRENT_CONTAINER_VERSION: u64 = 1;

/// First block id available to applications (0..=7 are reserved).
pub const META_BLOCK_ID: u32 = 8;
pub const REMARKS_BLOCK_ID: u32 = 9;

pub const META_BLOCK_NAME: &str = "META_BLOCK";
pub const REMARKS_BLOCK_NAME: &str = "REMARKS_BLOCK";
pub const BLOCK_INFO_BLOCK_NAME: &str = "BLOCKINFO_BLOCK";

/// Abbreviation id width of the meta block.
pub const META_BLOCK_ABBREV_WIDTH: u32 = 3;
/// Abbreviation id width of the remarks block. Nine remark abbreviations
/// plus the four builtin ids need 4 bits.
pub const REMARKS_BLOCK_ABBREV_WIDTH: u32 = 4;

/// What a container carries.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    /// Pointer to a separate file that holds the remarks
    External = 0,
    /// Remarks and string table in one container
    RemarksFile = 1,
}

impl ContainerType {
    pub const LAST: ContainerType = ContainerType::RemarksFile;

    pub fn from_raw(value: u64) -> Result<Self> {
        match value {
            0 => Ok(ContainerType::External),
            1 => Ok(ContainerType::RemarksFile),
            _ => Err(RemarkError::InvalidContainerType(value)),
        }
    }
}

/// Record codes used in META_BLOCK and REMARKS_BLOCK.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCode {
    MetaContainerInfo = 1,
    MetaRemarkVersion = 2,
    MetaStrTab = 3,
    MetaExternalFile = 4,
    RemarkHeader = 5,
    Remark = 6,
    RemarkDebugLoc = 7,
    RemarkHotness = 8,
    RemarkArgKV = 9,
    RemarkArgKVInt = 10,
    RemarkArgV = 11,
    RemarkBlob = 12,
    RemarkTag = 13,
}

impl RecordCode {
    pub fn from_raw(code: u32) -> Option<Self> {
        let record = match code {
            1 => RecordCode::MetaContainerInfo,
            2 => RecordCode::MetaRemarkVersion,
            3 => RecordCode::MetaStrTab,
            4 => RecordCode::MetaExternalFile,
            5 => RecordCode::RemarkHeader,
            6 => RecordCode::Remark,
            7 => RecordCode::RemarkDebugLoc,
            8 => RecordCode::RemarkHotness,
            9 => RecordCode::RemarkArgKV,
            10 => RecordCode::RemarkArgKVInt,
            11 => RecordCode::RemarkArgV,
            12 => RecordCode::RemarkBlob,
            13 => RecordCode::RemarkTag,
            _ => return None,
        };
        Some(record)
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Name written to the block-info block and used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            RecordCode::MetaContainerInfo => "Container info",
            RecordCode::MetaRemarkVersion => "Remark version",
            RecordCode::MetaStrTab => "String table",
            RecordCode::MetaExternalFile => "External File",
            RecordCode::RemarkHeader => "Remark header",
            RecordCode::Remark => "Remark",
            RecordCode::RemarkDebugLoc => "Remark debug location",
            RecordCode::RemarkHotness => "Remark hotness",
            RecordCode::RemarkArgKV => "Argument",
            RecordCode::RemarkArgKVInt => "Argument with integer value",
            RecordCode::RemarkArgV => "Argument without key",
            RecordCode::RemarkBlob => "Remark blob",
            RecordCode::RemarkTag => "Remark tag",
        }
    }

    /// Records that open a new remark when read inside a remarks block.
    pub const fn is_remark_boundary(self) -> bool {
        matches!(self, RecordCode::Remark | RecordCode::RemarkHeader)
    }
}

/// Check the leading magic bytes of a container.
pub fn validate_magic(bytes: &[u8]) -> Result<()> {
    if bytes.len() < CONTAINER_MAGIC.len() || bytes[..CONTAINER_MAGIC.len()] != CONTAINER_MAGIC {
        let found = bytes.iter().take(CONTAINER_MAGIC.len()).copied().collect();
        return Err(RemarkError::InvalidMagic {
            expected: CONTAINER_MAGIC,
            found,
        });
    }
    Ok(())
}
