//! Block and record layout shared by [`super::Encoder`] and
//! [`super::MetaEncoder`].

use crate::bitstream::{Abbrev, AbbrevOp, BitWriter};
use crate::config::EncoderConfig;
use crate::container::{
    ContainerType, RecordCode, CONTAINER_MAGIC, META_BLOCK_ABBREV_WIDTH, META_BLOCK_ID,
    META_BLOCK_NAME, REMARKS_BLOCK_ABBREV_WIDTH, REMARKS_BLOCK_ID, REMARKS_BLOCK_NAME,
};
use crate::error::Result;
use crate::remark::{Remark, RemarkLocation};
use crate::string_table::StringTable;

/// Abbreviation ids of the META_BLOCK records.
#[derive(Debug, Default)]
struct MetaAbbrevs {
    container_info: u32,
    remark_version: Option<u32>,
    string_table: Option<u32>,
    external_file: Option<u32>,
}

/// Abbreviation ids of the REMARKS_BLOCK records.
#[derive(Debug)]
struct RemarkAbbrevs {
    remark: u32,
    header: u32,
    debug_loc: u32,
    hotness: u32,
    arg_kv: u32,
    arg_v: u32,
    arg_kv_int: u32,
    blob: u32,
    tag: u32,
}

/// Writes one container: magic, block-info, meta blocks and remarks
/// blocks, in the order the caller asks for them.
pub(crate) struct ContainerWriter {
    writer: BitWriter,
    container_type: ContainerType,
    emit_record_names: bool,
    meta: MetaAbbrevs,
    remarks: Option<RemarkAbbrevs>,
    /// (pass, function) indices of the last header in the open block
    last_header: Option<(u64, u64)>,
}

impl ContainerWriter {
    /// Start a container by writing the magic and the block-info block.
    pub(crate) fn new(container_type: ContainerType, config: &EncoderConfig) -> Result<Self> {
        let mut container = ContainerWriter {
            writer: BitWriter::new(),
            container_type,
            emit_record_names: config.emit_record_names,
            meta: MetaAbbrevs::default(),
            remarks: None,
            last_header: None,
        };
        container.writer.emit_bytes(&CONTAINER_MAGIC);
        container.setup_block_info()?;
        Ok(container)
    }

    fn setup_block_info(&mut self) -> Result<()> {
        self.writer.enter_block_info_block();

        if self.emit_record_names {
            self.writer.emit_block_name(META_BLOCK_ID, META_BLOCK_NAME);
        }
        self.meta.container_info = self.meta_abbrev(
            RecordCode::MetaContainerInfo,
            &[AbbrevOp::Fixed(32), AbbrevOp::Fixed(2)],
        );

        match self.container_type {
            ContainerType::External => {
                self.meta.external_file =
                    Some(self.meta_abbrev(RecordCode::MetaExternalFile, &[AbbrevOp::Blob]));
            }
            ContainerType::RemarksFile => {
                self.meta.remark_version =
                    Some(self.meta_abbrev(RecordCode::MetaRemarkVersion, &[AbbrevOp::Fixed(32)]));
                self.meta.string_table =
                    Some(self.meta_abbrev(RecordCode::MetaStrTab, &[AbbrevOp::Blob]));
                self.remarks = Some(self.setup_remarks_block_info());
            }
        }

        self.writer.exit_block()
    }

    fn abbrev(&mut self, block_id: u32, record: RecordCode, ops: &[AbbrevOp]) -> u32 {
        if self.emit_record_names {
            self.writer
                .emit_record_name(block_id, record.code(), record.name());
        }
        let mut abbrev = Abbrev::new().add(AbbrevOp::Literal(record.code() as u64));
        for &op in ops {
            abbrev.push(op);
        }
        self.writer.emit_block_info_abbrev(block_id, abbrev)
    }

    fn meta_abbrev(&mut self, record: RecordCode, ops: &[AbbrevOp]) -> u32 {
        self.abbrev(META_BLOCK_ID, record, ops)
    }

    fn setup_remarks_block_info(&mut self) -> RemarkAbbrevs {
        if self.emit_record_names {
            self.writer
                .emit_block_name(REMARKS_BLOCK_ID, REMARKS_BLOCK_NAME);
        }
        let mut add = |record, ops: &[AbbrevOp]| self.abbrev(REMARKS_BLOCK_ID, record, ops);
        RemarkAbbrevs {
            remark: add(RecordCode::Remark, &[AbbrevOp::Fixed(3), AbbrevOp::Vbr(6)]),
            header: add(RecordCode::RemarkHeader, &[AbbrevOp::Vbr(6), AbbrevOp::Vbr(8)]),
            debug_loc: add(
                RecordCode::RemarkDebugLoc,
                &[AbbrevOp::Vbr(7), AbbrevOp::Vbr(6), AbbrevOp::Vbr(6)],
            ),
            hotness: add(RecordCode::RemarkHotness, &[AbbrevOp::Vbr(8)]),
            arg_kv: add(RecordCode::RemarkArgKV, &[AbbrevOp::Vbr(7), AbbrevOp::Vbr(7)]),
            arg_v: add(RecordCode::RemarkArgV, &[AbbrevOp::Vbr(7)]),
            arg_kv_int: add(
                RecordCode::RemarkArgKVInt,
                &[AbbrevOp::Vbr(7), AbbrevOp::Vbr(7)],
            ),
            blob: add(RecordCode::RemarkBlob, &[AbbrevOp::Blob]),
            tag: add(RecordCode::RemarkTag, &[AbbrevOp::Vbr(6)]),
        }
    }

    fn emit_container_info(&mut self, container_version: u64) {
        self.writer.emit_record_with_abbrev(
            self.meta.container_info,
            &[
                RecordCode::MetaContainerInfo.code() as u64,
                container_version,
                self.container_type as u64,
            ],
            None,
        );
    }

    /// Early META_BLOCK of a remarks file.
    pub(crate) fn emit_meta_block(
        &mut self,
        container_version: u64,
        remark_version: u64,
    ) -> Result<()> {
        self.writer
            .enter_subblock(META_BLOCK_ID, META_BLOCK_ABBREV_WIDTH);
        self.emit_container_info(container_version);
        if let Some(abbrev) = self.meta.remark_version {
            self.writer.emit_record_with_abbrev(
                abbrev,
                &[RecordCode::MetaRemarkVersion.code() as u64, remark_version],
                None,
            );
        }
        self.writer.exit_block()
    }

    /// The only META_BLOCK of an external pointer file.
    pub(crate) fn emit_external_meta_block(
        &mut self,
        container_version: u64,
        path: &str,
    ) -> Result<()> {
        self.writer
            .enter_subblock(META_BLOCK_ID, META_BLOCK_ABBREV_WIDTH);
        self.emit_container_info(container_version);
        if let Some(abbrev) = self.meta.external_file {
            self.writer.emit_record_with_abbrev(
                abbrev,
                &[RecordCode::MetaExternalFile.code() as u64],
                Some(path.as_bytes()),
            );
        }
        self.writer.exit_block()
    }

    /// Late META_BLOCK carrying the string table.
    pub(crate) fn emit_late_meta_block(&mut self, table: &StringTable) -> Result<()> {
        self.writer
            .enter_subblock(META_BLOCK_ID, META_BLOCK_ABBREV_WIDTH);
        if let Some(abbrev) = self.meta.string_table {
            let blob = table.serialize();
            self.writer.emit_record_with_abbrev(
                abbrev,
                &[RecordCode::MetaStrTab.code() as u64],
                Some(blob.as_slice()),
            );
        }
        self.writer.exit_block()
    }

    pub(crate) fn enter_remarks_block(&mut self) {
        self.writer
            .enter_subblock(REMARKS_BLOCK_ID, REMARKS_BLOCK_ABBREV_WIDTH);
        self.last_header = None;
    }

    pub(crate) fn exit_remarks_block(&mut self) -> Result<()> {
        self.writer.exit_block()
    }

    pub(crate) fn in_block(&self) -> bool {
        self.writer.in_block()
    }

    /// Bytes written since the open block started.
    pub(crate) fn current_block_size(&self) -> u64 {
        self.writer.current_block_bit_position() / 8
    }

    /// Raw access for tests that hand-craft records.
    #[cfg(test)]
    pub(crate) fn writer_mut(&mut self) -> &mut BitWriter {
        &mut self.writer
    }

    /// Finished bytes; only valid between top-level blocks.
    pub(crate) fn take_bytes(&mut self) -> Vec<u8> {
        self.writer.take_bytes()
    }

    /// Write one remark into the open remarks block, interning its strings.
    pub(crate) fn emit_remark(&mut self, remark: &Remark, table: &mut StringTable) {
        let Some(abbrevs) = self.remarks.as_ref() else {
            debug_assert!(false, "remarks emitted into an external pointer container");
            return;
        };
        let writer = &mut self.writer;

        let header = (table.add(&remark.pass_name), table.add(&remark.function_name));
        if self.last_header != Some(header) {
            writer.emit_record_with_abbrev(
                abbrevs.header,
                &[RecordCode::RemarkHeader.code() as u64, header.0, header.1],
                None,
            );
            self.last_header = Some(header);
        }

        writer.emit_record_with_abbrev(
            abbrevs.remark,
            &[
                RecordCode::Remark.code() as u64,
                remark.kind as u64,
                table.add(&remark.remark_name),
            ],
            None,
        );

        if let Some(loc) = &remark.location {
            emit_debug_loc(writer, abbrevs, loc, table);
        }
        for tag in remark.tags.iter() {
            writer.emit_record_with_abbrev(
                abbrevs.tag,
                &[RecordCode::RemarkTag.code() as u64, tag.raw()],
                None,
            );
        }
        if let Some(hotness) = remark.hotness {
            writer.emit_record_with_abbrev(
                abbrevs.hotness,
                &[RecordCode::RemarkHotness.code() as u64, hotness],
                None,
            );
        }
        if let Some(blob) = &remark.blob {
            writer.emit_record_with_abbrev(
                abbrevs.blob,
                &[RecordCode::RemarkBlob.code() as u64],
                Some(blob.as_slice()),
            );
        }

        for arg in &remark.args {
            if arg.is_string() {
                writer.emit_record_with_abbrev(
                    abbrevs.arg_v,
                    &[RecordCode::RemarkArgV.code() as u64, table.add(&arg.val)],
                    None,
                );
            } else if let Some(value) = arg.val_as_canonical_uint() {
                writer.emit_record_with_abbrev(
                    abbrevs.arg_kv_int,
                    &[
                        RecordCode::RemarkArgKVInt.code() as u64,
                        table.add(&arg.key),
                        value,
                    ],
                    None,
                );
            } else {
                let key = table.add(&arg.key);
                let val = table.add(&arg.val);
                writer.emit_record_with_abbrev(
                    abbrevs.arg_kv,
                    &[RecordCode::RemarkArgKV.code() as u64, key, val],
                    None,
                );
            }
            if let Some(loc) = &arg.loc {
                emit_debug_loc(writer, abbrevs, loc, table);
            }
            if let Some(tag) = arg.tag {
                writer.emit_record_with_abbrev(
                    abbrevs.tag,
                    &[RecordCode::RemarkTag.code() as u64, tag.raw()],
                    None,
                );
            }
        }
    }
}

fn emit_debug_loc(
    writer: &mut BitWriter,
    abbrevs: &RemarkAbbrevs,
    loc: &RemarkLocation,
    table: &mut StringTable,
) {
    writer.emit_record_with_abbrev(
        abbrevs.debug_loc,
        &[
            RecordCode::RemarkDebugLoc.code() as u64,
            table.add(&loc.source_file_path),
            loc.source_line as u64,
            loc.source_column as u64,
        ],
        None,
    );
}
