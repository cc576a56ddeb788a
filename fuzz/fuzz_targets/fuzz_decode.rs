#![no_main]
use libfuzzer_sys::fuzz_target;
use remarks_rs::{Decoder, CONTAINER_MAGIC};

// Arbitrary bytes, with and without a valid magic, must never panic.
fuzz_target!(|data: &[u8]| {
    for _ in Decoder::new(data.to_vec()).take(10_000) {}

    let mut prefixed = CONTAINER_MAGIC.to_vec();
    prefixed.extend_from_slice(data);
    for _ in Decoder::new(prefixed).take(10_000) {}
});
