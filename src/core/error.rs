use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RemarkError {
    #[error("Unknown magic number: expecting {expected:?}, got {found:?}")]
    InvalidMagic { expected: [u8; 4], found: Vec<u8> },

    #[error("Missing BLOCKINFO_BLOCK")]
    MissingBlockInfo,

    #[error("Error while parsing {block}: missing {what}")]
    MissingMetadata {
        block: &'static str,
        what: &'static str,
    },

    #[error(
        "Unsupported remark container version (expected: {expected}, read: {found}). \
         Please upgrade/downgrade your toolchain to read this container."
    )]
    UnsupportedContainerVersion { expected: u64, found: u64 },

    #[error(
        "Unsupported remark version in container (expected: {expected}, read: {found}). \
         Please upgrade/downgrade your toolchain to read this container."
    )]
    UnsupportedRemarkVersion { expected: u64, found: u64 },

    #[error("Error while parsing META_BLOCK: invalid container type ({0})")]
    InvalidContainerType(u64),

    #[error("Error while parsing {block}: malformed record entry ({record})")]
    MalformedRecord {
        block: &'static str,
        record: &'static str,
    },

    #[error("Error while parsing {block}: unexpected record entry ({record})")]
    UnexpectedRecord {
        block: &'static str,
        record: &'static str,
    },

    #[error("Error while parsing {block}: unknown record entry ({code})")]
    UnknownRecord { block: &'static str, code: u32 },

    #[error("Error while parsing {block}: unexpected block ({id})")]
    UnexpectedBlock { block: &'static str, id: u32 },

    #[error("Malformed bitstream: {0}")]
    Bitstream(String),

    #[error("Unexpected end of bitstream")]
    UnexpectedEof,

    #[error("String with index {index} is out of bounds (size = {len})")]
    StringIndexOutOfRange { index: u64, len: usize },

    #[error("String table entry {0} is not valid UTF-8")]
    InvalidUtf8(u64),

    #[error("Error while parsing REMARKS_BLOCK: missing string table")]
    MissingStringTable,

    #[error("Error while parsing REMARKS_BLOCK: missing {0}")]
    MissingField(&'static str),

    #[error("Error while parsing REMARKS_BLOCK: unknown remark type ({0})")]
    UnknownRemarkKind(u64),

    #[error("Unexpected block between meta blocks ({0})")]
    UnexpectedBlockBetweenMeta(u32),

    #[error("Container is non-empty, but does not contain any remarks blocks")]
    NoRemarksBlocks,

    #[error("Error while parsing external file's META_BLOCK: wrong container type")]
    WrongExternalContainerType,

    #[error("Encoder already finalized")]
    EncoderFinalized,

    #[error("Encoder is unusable after an earlier write to its sink failed")]
    EncoderPoisoned,

    #[error("Text {0:?} contains a NUL byte and cannot be interned")]
    InteriorNul(String),

    #[error("Block of {0} words does not fit its 32-bit length field")]
    BlockTooLarge(usize),

    #[error("No external file path available for the metadata pointer")]
    MissingExternalPath,

    #[error("External remarks file {path}: {source}")]
    ExternalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse grouping of [`RemarkError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The input is not a usable container: wrong magic, missing
    /// metadata, or a version this build cannot read.
    Format,
    /// The container is recognized but its records or blocks are corrupt.
    Structural,
    /// An external file or the output sink could not be accessed.
    Resource,
}

impl RemarkError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemarkError::InvalidMagic { .. }
            | RemarkError::MissingBlockInfo
            | RemarkError::MissingMetadata { .. }
            | RemarkError::UnsupportedContainerVersion { .. }
            | RemarkError::UnsupportedRemarkVersion { .. }
            | RemarkError::InvalidContainerType(_)
            | RemarkError::MissingExternalPath
            | RemarkError::InteriorNul(_) => ErrorClass::Format,
            RemarkError::ExternalFile { .. }
            | RemarkError::Io(_)
            | RemarkError::EncoderPoisoned => ErrorClass::Resource,
            _ => ErrorClass::Structural,
        }
    }

    /// True for container and remark-format version mismatches.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            RemarkError::UnsupportedContainerVersion { .. }
                | RemarkError::UnsupportedRemarkVersion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RemarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_errors_are_format_class() {
        let err = RemarkError::UnsupportedContainerVersion {
            expected: 1,
            found: 0,
        };
        assert!(err.is_version_mismatch());
        assert_eq!(err.class(), ErrorClass::Format);

        let msg = err.to_string();
        assert!(msg.contains("expected: 1, read: 0"));
        assert!(msg.contains("upgrade/downgrade"));
    }

    #[test]
    fn test_structural_and_resource_classes() {
        let malformed = RemarkError::MalformedRecord {
            block: "REMARKS_BLOCK",
            record: "Remark",
        };
        assert_eq!(malformed.class(), ErrorClass::Structural);
        assert!(!malformed.is_version_mismatch());

        let missing = RemarkError::ExternalFile {
            path: PathBuf::from("/nowhere/remarks.bin"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(missing.class(), ErrorClass::Resource);
        assert!(missing.to_string().contains("/nowhere/remarks.bin"));
    }

    #[test]
    fn test_encoder_side_classes() {
        assert_eq!(RemarkError::EncoderPoisoned.class(), ErrorClass::Resource);
        assert_eq!(
            RemarkError::InteriorNul("a\0b".to_string()).class(),
            ErrorClass::Format
        );
        assert_eq!(RemarkError::BlockTooLarge(usize::MAX).class(), ErrorClass::Structural);
    }
}
