//! Remark model and bitstream container codec

pub mod bitstream;
pub mod config;
pub mod container;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod remark;
pub mod string_table;
pub mod tag;
