//! Remark container encoder
//!
//! [`Encoder`] streams remarks into a sink. Nothing is written until the
//! first [`Encoder::emit`]; then the magic, block-info and early META_BLOCK
//! go out and a REMARKS_BLOCK is opened. Every remarks block is handed to
//! the sink as soon as it closes, so memory stays bounded by
//! [`EncoderConfig::section_size_limit`]. [`Encoder::finalize`] closes the
//! last block and appends the late META_BLOCK with the string table.
//!
//! In [`ContainerMode::External`] the sink still receives a complete
//! remarks file; a [`MetaEncoder`] writes the small pointer file that
//! refers to it.

mod container_writer;

pub(crate) use container_writer::ContainerWriter;

use crate::config::EncoderConfig;
use crate::container::{ContainerType, CURRENT_CONTAINER_VERSION};
use crate::error::{RemarkError, Result};
use crate::remark::{Remark, CURRENT_REMARK_VERSION};
use crate::string_table::StringTable;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// Where the remarks of a compilation end up.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ContainerMode {
    /// Remarks and string table in the sink, nothing else
    #[default]
    Embedded,
    /// Remarks in the sink, plus a pointer file naming this path (see
    /// [`Encoder::meta_encoder`])
    External(PathBuf),
}

/// Streaming encoder for one remarks container.
pub struct Encoder<W: Write> {
    sink: Option<W>,
    mode: ContainerMode,
    config: EncoderConfig,
    string_table: StringTable,
    /// Open container; `None` before the first remark and after finalize
    container: Option<ContainerWriter>,
    finalized: bool,
    /// Set when a write to the sink failed part way through a block
    poisoned: bool,
    remark_count: u64,
}

impl<W: Write> Encoder<W> {
    pub fn new(sink: W, mode: ContainerMode) -> Self {
        EncoderBuilder::new().mode(mode).build(sink)
    }

    /// Start from a pre-filled string table. Its entries keep their indices.
    pub fn with_string_table(sink: W, mode: ContainerMode, table: StringTable) -> Self {
        EncoderBuilder::new()
            .mode(mode)
            .string_table(table)
            .build(sink)
    }

    pub fn mode(&self) -> &ContainerMode {
        &self.mode
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Strings interned so far.
    pub fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    /// Number of remarks emitted.
    pub fn remark_count(&self) -> u64 {
        self.remark_count
    }

    fn write_pending(container: &mut ContainerWriter, sink: Option<&mut W>) -> Result<()> {
        let bytes = container.take_bytes();
        if let Some(sink) = sink {
            sink.write_all(&bytes)?;
        }
        Ok(())
    }

    fn setup(&mut self) -> Result<()> {
        if self.container.is_some() {
            return Ok(());
        }
        debug!(
            "Starting remarks container ({:?}, section limit {} bytes)",
            self.mode, self.config.section_size_limit
        );
        let mut container = ContainerWriter::new(ContainerType::RemarksFile, &self.config)?;
        container.emit_meta_block(CURRENT_CONTAINER_VERSION, CURRENT_REMARK_VERSION)?;
        Self::write_pending(&mut container, self.sink.as_mut())?;
        container.enter_remarks_block();
        self.container = Some(container);
        Ok(())
    }

    /// Append one remark.
    ///
    /// Text holding a NUL byte cannot be interned and is rejected before
    /// anything is written. Once a write to the sink fails, every later call
    /// returns [`RemarkError::EncoderPoisoned`].
    pub fn emit(&mut self, remark: &Remark) -> Result<()> {
        if self.poisoned {
            return Err(RemarkError::EncoderPoisoned);
        }
        if self.finalized {
            return Err(RemarkError::EncoderFinalized);
        }
        if let Some(text) = remark.text_fields().find(|text| text.contains('\0')) {
            return Err(RemarkError::InteriorNul(text.to_string()));
        }
        let result = self.emit_unchecked(remark);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn emit_unchecked(&mut self, remark: &Remark) -> Result<()> {
        let limit = self.config.section_size_limit;
        self.setup()?;
        let Some(container) = self.container.as_mut() else {
            return Err(RemarkError::EncoderFinalized);
        };

        if container.current_block_size() > limit {
            debug!(
                "Remarks block reached {} bytes, starting a new one",
                container.current_block_size()
            );
            container.exit_remarks_block()?;
            Self::write_pending(container, self.sink.as_mut())?;
            container.enter_remarks_block();
        }

        trace!(
            "Emitting remark {}/{} in {}",
            remark.pass_name,
            remark.remark_name,
            remark.function_name
        );
        container.emit_remark(remark, &mut self.string_table);
        self.remark_count += 1;
        Ok(())
    }

    /// Close the open remarks block and append the string table.
    ///
    /// Calling this again, or on an encoder that never emitted, writes
    /// nothing.
    pub fn finalize(&mut self) -> Result<()> {
        if self.poisoned {
            return Err(RemarkError::EncoderPoisoned);
        }
        self.finalized = true;
        let Some(container) = self.container.take() else {
            return Ok(());
        };
        let result = self.finish(container);
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    fn finish(&mut self, mut container: ContainerWriter) -> Result<()> {
        if container.in_block() {
            container.exit_remarks_block()?;
        }
        container.emit_late_meta_block(&self.string_table)?;
        Self::write_pending(&mut container, self.sink.as_mut())?;
        if let Some(sink) = self.sink.as_mut() {
            sink.flush()?;
        }
        debug!(
            "Finalized remarks container: {} remarks, {} strings",
            self.remark_count,
            self.string_table.len()
        );
        Ok(())
    }

    /// Finalize and hand back the sink.
    pub fn into_inner(mut self) -> Result<W> {
        self.finalize()?;
        self.sink.take().ok_or(RemarkError::EncoderFinalized)
    }

    /// Encoder for the pointer file of an external-mode compilation.
    ///
    /// `external_path` overrides the path given to
    /// [`ContainerMode::External`]; one of the two must be present.
    pub fn meta_encoder<M: Write>(
        &self,
        sink: M,
        external_path: Option<&Path>,
    ) -> Result<MetaEncoder<M>> {
        let path = match (external_path, &self.mode) {
            (Some(path), _) => path.to_path_buf(),
            (None, ContainerMode::External(path)) => path.clone(),
            (None, ContainerMode::Embedded) => return Err(RemarkError::MissingExternalPath),
        };
        Ok(MetaEncoder::new(sink, path, self.config.clone()))
    }
}

impl<W: Write> Drop for Encoder<W> {
    fn drop(&mut self) {
        if self.poisoned {
            return;
        }
        if let Err(err) = self.finalize() {
            warn!("Failed to finalize remarks container on drop: {}", err);
        }
    }
}

/// Writes the pointer file of an external-mode compilation: magic,
/// block-info and one META_BLOCK holding the path of the remarks file.
pub struct MetaEncoder<W: Write> {
    sink: W,
    path: PathBuf,
    config: EncoderConfig,
    emitted: bool,
}

impl<W: Write> MetaEncoder<W> {
    pub fn new(sink: W, path: impl Into<PathBuf>, config: EncoderConfig) -> Self {
        MetaEncoder {
            sink,
            path: path.into(),
            config,
            emitted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the pointer file. Only the first call writes anything.
    pub fn emit(&mut self) -> Result<()> {
        if self.emitted {
            warn!(
                "Pointer to {} already emitted, ignoring",
                self.path.display()
            );
            return Ok(());
        }
        let path = self.path.to_string_lossy();
        let mut container = ContainerWriter::new(ContainerType::External, &self.config)?;
        container.emit_external_meta_block(CURRENT_CONTAINER_VERSION, &path)?;
        self.sink.write_all(&container.take_bytes())?;
        self.sink.flush()?;
        self.emitted = true;
        debug!("Wrote pointer to external remarks file {}", path);
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

/// Builder for [`Encoder`].
///
/// ```
/// use remarks_rs::{ContainerMode, EncoderBuilder};
///
/// let encoder = EncoderBuilder::new()
///     .mode(ContainerMode::Embedded)
///     .section_size_limit(1 << 20)
///     .build(Vec::new());
/// assert_eq!(encoder.config().section_size_limit, 1 << 20);
/// ```
#[derive(Debug, Default)]
pub struct EncoderBuilder {
    mode: ContainerMode,
    config: EncoderConfig,
    string_table: Option<StringTable>,
}

impl EncoderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(mut self, mode: ContainerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(mut self, config: EncoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Byte size past which a remarks block is closed and a new one opened
    pub fn section_size_limit(mut self, limit: u64) -> Self {
        self.config.section_size_limit = limit;
        self
    }

    /// Pre-filled string table
    pub fn string_table(mut self, table: StringTable) -> Self {
        self.string_table = Some(table);
        self
    }

    pub fn build<W: Write>(self, sink: W) -> Encoder<W> {
        Encoder {
            sink: Some(sink),
            mode: self.mode,
            config: self.config,
            string_table: self.string_table.unwrap_or_default(),
            container: None,
            finalized: false,
            poisoned: false,
            remark_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::CONTAINER_MAGIC;
    use crate::remark::{Argument, RemarkKind, RemarkLocation};
    use std::io;

    fn sample() -> Remark {
        Remark::new(RemarkKind::Missed, "inline", "NoDefinition", "main")
    }

    /// Sink whose write number `fail_at` (counting from zero) errors.
    struct FailingSink {
        writes: usize,
        fail_at: usize,
    }

    impl FailingSink {
        fn new(fail_at: usize) -> Self {
            FailingSink { writes: 0, fail_at }
        }
    }

    impl Write for FailingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = self.writes;
            self.writes += 1;
            if n == self.fail_at {
                Err(io::Error::new(io::ErrorKind::Other, "disk full"))
            } else {
                Ok(buf.len())
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_encoder_writes_nothing() {
        let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
        encoder.finalize().unwrap();
        encoder.finalize().unwrap();
        assert!(encoder.into_inner().unwrap().is_empty());
    }

    #[test]
    fn test_emit_writes_container() {
        let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
        encoder.emit(&sample()).unwrap();
        assert_eq!(encoder.remark_count(), 1);
        assert_eq!(encoder.string_table().get(0), Some("inline"));
        let bytes = encoder.into_inner().unwrap();
        assert_eq!(&bytes[..4], &CONTAINER_MAGIC);
        assert_eq!(bytes.len() % 4, 0);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
        encoder.emit(&sample()).unwrap();
        encoder.finalize().unwrap();
        encoder.finalize().unwrap();
        let once = encoder.into_inner().unwrap();

        let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
        encoder.emit(&sample()).unwrap();
        assert_eq!(encoder.into_inner().unwrap(), once);
    }

    #[test]
    fn test_emit_after_finalize_fails() {
        let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
        encoder.emit(&sample()).unwrap();
        encoder.finalize().unwrap();
        assert!(matches!(
            encoder.emit(&sample()),
            Err(RemarkError::EncoderFinalized)
        ));
    }

    #[test]
    fn test_drop_finalizes() {
        let mut out = Vec::new();
        {
            let mut encoder = Encoder::new(&mut out, ContainerMode::Embedded);
            encoder.emit(&sample()).unwrap();
        }
        let explicit = {
            let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
            encoder.emit(&sample()).unwrap();
            encoder.into_inner().unwrap()
        };
        assert_eq!(out, explicit);
    }

    #[test]
    fn test_sink_failure_during_rotation_poisons_encoder() {
        // Zero limit rotates on every emit after the first; write 0 is setup,
        // write 1 is the first rotation.
        let mut encoder = EncoderBuilder::new()
            .section_size_limit(0)
            .build(FailingSink::new(1));
        encoder.emit(&sample()).unwrap();
        assert!(matches!(encoder.emit(&sample()), Err(RemarkError::Io(_))));
        assert!(matches!(
            encoder.emit(&sample()),
            Err(RemarkError::EncoderPoisoned)
        ));
        assert!(matches!(
            encoder.finalize(),
            Err(RemarkError::EncoderPoisoned)
        ));
        assert_eq!(encoder.remark_count(), 1);
        assert_eq!(
            encoder.emit(&sample()).unwrap_err().class(),
            crate::error::ErrorClass::Resource
        );
    }

    #[test]
    fn test_sink_failure_during_setup_poisons_encoder() {
        let mut encoder = Encoder::new(FailingSink::new(0), ContainerMode::Embedded);
        assert!(matches!(encoder.emit(&sample()), Err(RemarkError::Io(_))));
        assert!(matches!(
            encoder.emit(&sample()),
            Err(RemarkError::EncoderPoisoned)
        ));
        assert!(encoder.into_inner().is_err());
    }

    #[test]
    fn test_sink_failure_during_finalize_poisons_encoder() {
        let mut encoder = Encoder::new(FailingSink::new(1), ContainerMode::Embedded);
        encoder.emit(&sample()).unwrap();
        assert!(matches!(encoder.finalize(), Err(RemarkError::Io(_))));
        assert!(matches!(
            encoder.finalize(),
            Err(RemarkError::EncoderPoisoned)
        ));
    }

    #[test]
    fn test_interior_nul_is_rejected_before_writing() {
        let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
        let mut remark = sample();
        remark.args.push(Argument::new("Callee", "fo\0o"));
        assert!(matches!(
            encoder.emit(&remark),
            Err(RemarkError::InteriorNul(text)) if text == "fo\0o"
        ));

        let mut remark = sample();
        remark.location = Some(RemarkLocation::new("a\0.c", 1, 1));
        assert!(matches!(
            encoder.emit(&remark),
            Err(RemarkError::InteriorNul(_))
        ));

        // Rejection leaves the encoder untouched and usable.
        assert_eq!(encoder.remark_count(), 0);
        assert!(encoder.string_table().is_empty());
        encoder.emit(&sample()).unwrap();
        let bytes = encoder.into_inner().unwrap();
        let decoded: Vec<Remark> = crate::decoder::Decoder::new(bytes)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded, vec![sample()]);
    }

    #[test]
    fn test_pre_filled_table_keeps_indices() {
        let table: StringTable = ["zero", "one"].into_iter().collect();
        let mut encoder = Encoder::with_string_table(Vec::new(), ContainerMode::Embedded, table);
        encoder.emit(&sample()).unwrap();
        assert_eq!(encoder.string_table().get(0), Some("zero"));
        assert_eq!(encoder.string_table().get(1), Some("one"));
        assert_eq!(encoder.string_table().get(2), Some("inline"));
    }

    #[test]
    fn test_meta_encoder_needs_a_path() {
        let encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
        assert!(matches!(
            encoder.meta_encoder(Vec::new(), None),
            Err(RemarkError::MissingExternalPath)
        ));
        let meta = encoder
            .meta_encoder(Vec::new(), Some(Path::new("out.remarks")))
            .unwrap();
        assert_eq!(meta.path(), Path::new("out.remarks"));

        let encoder = Encoder::new(
            Vec::new(),
            ContainerMode::External(PathBuf::from("default.remarks")),
        );
        let meta = encoder.meta_encoder(Vec::new(), None).unwrap();
        assert_eq!(meta.path(), Path::new("default.remarks"));
    }

    #[test]
    fn test_meta_encoder_emits_once() {
        let mut meta = MetaEncoder::new(Vec::new(), "remarks.bin", EncoderConfig::default());
        meta.emit().unwrap();
        let len = meta.sink.len();
        assert!(len > 0);
        meta.emit().unwrap();
        assert_eq!(meta.into_inner().len(), len);
    }
}
