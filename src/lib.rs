//! # Remarks - Binary Container for Optimization Remarks
//!
//! `remarks-rs` encodes and decodes structured compiler remarks (inlining
//! decisions, missed vectorizations, analysis notes) in a compact,
//! self-describing bitstream container.
//!
//! - **Streaming encoder** writing size-capped remarks sections to any sink
//! - **Lazy decoder** that yields one remark per call and rejects corrupt input
//! - **String interning** with the table appended after the payload
//! - **External mode**: a small pointer file referring to the bulk remarks file
//!
//! ## Quick Start
//!
//! ```rust
//! use remarks_rs::{Argument, ContainerMode, Decoder, Encoder, Remark, RemarkKind, Result};
//!
//! # fn main() -> Result<()> {
//! let mut remark = Remark::new(RemarkKind::Missed, "inline", "NoDefinition", "main");
//! remark.hotness = Some(12);
//! remark.args.push(Argument::new("Callee", "foo"));
//! remark.args.push(Argument::string(" will not be inlined"));
//!
//! let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
//! encoder.emit(&remark)?;
//! let bytes = encoder.into_inner()?;
//!
//! for decoded in Decoder::new(bytes) {
//!     assert_eq!(decoded?, remark);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## External Mode
//!
//! ```rust,no_run
//! use remarks_rs::{ContainerMode, Decoder, Encoder, Remark, RemarkKind, Result};
//! use std::fs::File;
//!
//! # fn main() -> Result<()> {
//! let bulk = File::create("out/main.remarks")?;
//! let mut encoder = Encoder::new(bulk, ContainerMode::External("main.remarks".into()));
//! encoder.emit(&Remark::new(RemarkKind::Passed, "licm", "Hoisted", "main"))?;
//!
//! // The object file only carries a pointer to the bulk file
//! let mut pointer = encoder.meta_encoder(Vec::new(), None)?;
//! pointer.emit()?;
//! encoder.finalize()?;
//!
//! let mut decoder = Decoder::with_external_prefix(pointer.into_inner(), "out");
//! while let Some(remark) = decoder.next_remark()? {
//!     println!("{}", remark);
//! }
//! # Ok(())
//! # }
//! ```

pub mod core;

#[allow(unused_imports)]
pub(crate) use crate::core::{
    bitstream, config, container, decoder, encoder, error, remark, string_table, tag,
};

pub use crate::core::{
    config::{EncoderConfig, DEFAULT_SECTION_SIZE_LIMIT},
    container::{ContainerType, CONTAINER_MAGIC, CURRENT_CONTAINER_VERSION},
    decoder::Decoder,
    encoder::{ContainerMode, Encoder, EncoderBuilder, MetaEncoder},
    error::{ErrorClass, RemarkError, Result},
    remark::{Argument, Remark, RemarkKind, RemarkLocation, CURRENT_REMARK_VERSION, STRING_KEY},
    string_table::{ParsedStringTable, StringTable},
    tag::{Tag, TagKind, TagSet},
};
