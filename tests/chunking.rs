//! Remarks block rotation tests
//!
//! Once a remarks block grows past the configured section size, the
//! encoder closes it and opens a new one, re-emitting the header record.

use remarks_rs::core::bitstream::{BitCursor, Entry};
use remarks_rs::core::container::{RecordCode, META_BLOCK_ID, REMARKS_BLOCK_ID};
use remarks_rs::{
    ContainerMode, Decoder, Encoder, EncoderBuilder, Remark, RemarkKind, CONTAINER_MAGIC,
};
use std::sync::Arc;

#[derive(Debug, Default, PartialEq, Eq)]
struct Layout {
    remarks_blocks: usize,
    headers: usize,
    remarks: usize,
    meta_blocks: usize,
}

/// Walk the top-level blocks of a container, counting what is inside.
fn layout(bytes: &[u8]) -> Layout {
    let mut cursor = BitCursor::new(bytes.to_vec());
    cursor.jump_to_bit(CONTAINER_MAGIC.len() as u64 * 8).unwrap();
    assert_eq!(cursor.advance().unwrap(), Entry::SubBlock(0));
    let info = cursor.read_block_info_block().unwrap();
    cursor.set_block_info(Arc::new(info));

    let mut layout = Layout::default();
    loop {
        match cursor.advance().unwrap() {
            Entry::SubBlock(REMARKS_BLOCK_ID) => {
                layout.remarks_blocks += 1;
                cursor.enter_sub_block(REMARKS_BLOCK_ID).unwrap();
                loop {
                    match cursor.advance().unwrap() {
                        Entry::EndBlock => break,
                        Entry::Record(abbrev_id) => {
                            let record = cursor.read_record(abbrev_id).unwrap();
                            if record.code == RecordCode::RemarkHeader.code() {
                                layout.headers += 1;
                            } else if record.code == RecordCode::Remark.code() {
                                layout.remarks += 1;
                            }
                        }
                        other => panic!("unexpected entry {:?}", other),
                    }
                }
            }
            Entry::SubBlock(META_BLOCK_ID) => {
                layout.meta_blocks += 1;
                cursor.skip_block().unwrap();
            }
            Entry::EndOfStream => return layout,
            other => panic!("unexpected top-level entry {:?}", other),
        }
    }
}

fn encode_with_limit(limit: u64, remarks: &[Remark]) -> Vec<u8> {
    let mut encoder = EncoderBuilder::new()
        .mode(ContainerMode::Embedded)
        .section_size_limit(limit)
        .build(Vec::new());
    for remark in remarks {
        encoder.emit(remark).unwrap();
    }
    encoder.into_inner().unwrap()
}

fn decode(bytes: Vec<u8>) -> Vec<Remark> {
    Decoder::new(bytes)
        .collect::<remarks_rs::Result<_>>()
        .unwrap()
}

#[test]
fn test_single_block_under_limit() {
    let remarks: Vec<Remark> = (0..100)
        .map(|i| Remark::new(RemarkKind::Passed, "inline", format!("r{}", i), "main"))
        .collect();
    let bytes = encode_with_limit(1 << 20, &remarks);
    assert_eq!(
        layout(&bytes),
        Layout {
            remarks_blocks: 1,
            headers: 1,
            remarks: 100,
            meta_blocks: 2,
        }
    );
}

#[test]
fn test_small_limit_rotates_and_repeats_header() {
    let remarks: Vec<Remark> = (0..200)
        .map(|i| Remark::new(RemarkKind::Missed, "inline", format!("r{}", i), "main"))
        .collect();
    let bytes = encode_with_limit(64, &remarks);

    let layout = layout(&bytes);
    assert!(layout.remarks_blocks > 1);
    // Pass and function never change, so each block carries exactly one header.
    assert_eq!(layout.headers, layout.remarks_blocks);
    assert_eq!(layout.remarks, remarks.len());
    assert_eq!(decode(bytes), remarks);
}

#[test]
fn test_zero_limit_gives_one_block_per_remark() {
    let remarks: Vec<Remark> = (0..10)
        .map(|i| Remark::new(RemarkKind::Analysis, "pass", format!("r{}", i), "f"))
        .collect();
    let bytes = encode_with_limit(0, &remarks);

    let layout = layout(&bytes);
    assert_eq!(layout.remarks_blocks, 10);
    assert_eq!(layout.headers, 10);
    assert_eq!(decode(bytes), remarks);
}

#[test]
fn test_default_limit_with_large_payloads() {
    let payload = vec![0x5Au8; 9 << 20];
    let remarks: Vec<Remark> = (0..3)
        .map(|i| {
            let mut remark = Remark::new(RemarkKind::Analysis, "dump", format!("ir{}", i), "f");
            remark.blob = Some(payload.clone());
            remark
        })
        .collect();

    let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
    assert_eq!(encoder.config().section_size_limit, 16 << 20);
    for remark in &remarks {
        encoder.emit(remark).unwrap();
    }
    let bytes = encoder.into_inner().unwrap();

    let layout = layout(&bytes);
    assert_eq!(layout.remarks_blocks, 2);
    assert_eq!(layout.headers, 2);
    assert_eq!(decode(bytes), remarks);
}
