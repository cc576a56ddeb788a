//! Corrupted container tests
//!
//! Truncated, bit-flipped and garbage input must produce an error or a
//! clean end of data, never a panic.

use remarks_rs::{
    Argument, ContainerMode, Decoder, Encoder, ErrorClass, Remark, RemarkError, RemarkKind,
    RemarkLocation, CONTAINER_MAGIC,
};

fn sample_container() -> (Vec<Remark>, Vec<u8>) {
    let remarks: Vec<Remark> = (0..20u32)
        .map(|i| {
            let mut remark = Remark::new(RemarkKind::Missed, "inline", format!("r{}", i), "f");
            remark.location = Some(RemarkLocation::new("a.c", i + 1, 2));
            remark.args.push(Argument::new("N", i.to_string()));
            remark.args.push(Argument::string("text"));
            remark
        })
        .collect();
    let mut encoder = Encoder::new(Vec::new(), ContainerMode::Embedded);
    for remark in &remarks {
        encoder.emit(remark).unwrap();
    }
    (remarks, encoder.into_inner().unwrap())
}

/// Decode everything, returning the good prefix and the error, if any.
fn decode_lossy(bytes: Vec<u8>) -> (Vec<Remark>, Option<RemarkError>) {
    let mut decoder = Decoder::new(bytes);
    let mut remarks = Vec::new();
    loop {
        match decoder.next_remark() {
            Ok(Some(remark)) => remarks.push(remark),
            Ok(None) => return (remarks, None),
            Err(err) => return (remarks, Some(err)),
        }
    }
}

#[test]
fn test_bad_magic() {
    let (_, mut bytes) = sample_container();
    bytes[0] = b'X';
    let (remarks, err) = decode_lossy(bytes);
    assert!(remarks.is_empty());
    let err = err.unwrap();
    assert_eq!(err.class(), ErrorClass::Format);
    assert!(matches!(err, RemarkError::InvalidMagic { .. }));
}

#[test]
fn test_magic_only() {
    let (remarks, err) = decode_lossy(CONTAINER_MAGIC.to_vec());
    assert!(remarks.is_empty());
    assert!(matches!(err, Some(RemarkError::MissingBlockInfo)));
}

#[test]
fn test_short_buffer() {
    let (remarks, err) = decode_lossy(b"RM".to_vec());
    assert!(remarks.is_empty());
    assert!(matches!(err, Some(RemarkError::InvalidMagic { .. })));
}

#[test]
fn test_every_truncation_fails_cleanly() {
    let (original, bytes) = sample_container();
    for len in 1..bytes.len() {
        let (remarks, err) = decode_lossy(bytes[..len].to_vec());
        // Without the trailing string table nothing can be resolved.
        assert!(err.is_some(), "truncation to {} bytes went unnoticed", len);
        assert!(remarks.len() <= original.len());
    }
}

#[test]
fn test_every_byte_flip_is_handled() {
    let (_, bytes) = sample_container();
    for pos in 0..bytes.len() {
        for mask in [0x01u8, 0x80, 0xFF] {
            let mut corrupted = bytes.clone();
            corrupted[pos] ^= mask;
            if let (_, Some(err)) = decode_lossy(corrupted) {
                assert!(!err.to_string().is_empty());
            }
        }
    }
}

#[test]
fn test_garbage_after_magic() {
    let mut bytes = CONTAINER_MAGIC.to_vec();
    let mut state = 0x2545_F491_4F6C_DD1Du64;
    for _ in 0..4096 {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        bytes.push(state as u8);
    }
    let (remarks, err) = decode_lossy(bytes);
    assert!(remarks.is_empty() || err.is_some());
}

#[test]
fn test_decoder_stays_fused_after_error() {
    let (_, bytes) = sample_container();
    let mut decoder = Decoder::new(bytes[..bytes.len() / 2].to_vec());
    let mut saw_error = false;
    for item in decoder.by_ref() {
        if item.is_err() {
            saw_error = true;
        }
    }
    assert!(saw_error);
    assert!(decoder.next().is_none());
}
