use serde::{Deserialize, Serialize};

/// Default cap on the size of one remarks block: 16 MiB.
pub const DEFAULT_SECTION_SIZE_LIMIT: u64 = 1 << 24;

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Byte offset within an open remarks block past which the next
    /// remark starts a new block
    pub section_size_limit: u64,

    /// Write block and record names into BLOCKINFO
    pub emit_record_names: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            section_size_limit: DEFAULT_SECTION_SIZE_LIMIT,
            emit_record_names: true,
        }
    }
}

impl EncoderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_section_size_limit(mut self, limit: u64) -> Self {
        self.section_size_limit = limit;
        self
    }

    pub fn with_record_names(mut self, enabled: bool) -> Self {
        self.emit_record_names = enabled;
        self
    }
}
