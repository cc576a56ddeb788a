#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use remarks_rs::{
    Argument, ContainerMode, Decoder, EncoderBuilder, Remark, RemarkKind, RemarkLocation, Tag,
};

#[derive(Debug, Arbitrary)]
struct FuzzArgument {
    key: Option<String>,
    val: String,
    int_val: Option<u64>,
    loc: Option<(String, u32, u32)>,
    tag: Option<u8>,
}

#[derive(Debug, Arbitrary)]
struct FuzzRemark {
    kind: u8,
    pass: String,
    name: String,
    function: String,
    loc: Option<(String, u32, u32)>,
    hotness: Option<u64>,
    args: Vec<FuzzArgument>,
    tags: Vec<u8>,
    blob: Option<Vec<u8>>,
}

#[derive(Debug, Arbitrary)]
struct Input {
    section_size_limit: u16,
    remarks: Vec<FuzzRemark>,
}

// The encoder rejects NUL in interned text; the string table is NUL-separated.
fn clean(text: String) -> String {
    text.replace('\0', "")
}

fn location((path, line, col): (String, u32, u32)) -> RemarkLocation {
    RemarkLocation::new(clean(path), line, col)
}

impl From<FuzzRemark> for Remark {
    fn from(input: FuzzRemark) -> Self {
        let kind = RemarkKind::from_raw(u64::from(input.kind % 7)).unwrap_or_default();
        let mut remark = Remark::new(
            kind,
            clean(input.pass),
            clean(input.name),
            clean(input.function),
        );
        remark.location = input.loc.map(location);
        remark.hotness = input.hotness;
        remark.blob = input.blob;
        remark.tags = input.tags.into_iter().map(|t| Tag::from_raw(u64::from(t))).collect();
        remark.args = input
            .args
            .into_iter()
            .map(|arg| {
                let val = match arg.int_val {
                    Some(n) => n.to_string(),
                    None => clean(arg.val),
                };
                let mut out = match arg.key {
                    Some(key) => Argument::new(clean(key), val),
                    None => Argument::string(val),
                };
                out.loc = arg.loc.map(location);
                out.tag = arg.tag.map(|t| Tag::from_raw(u64::from(t)));
                out
            })
            .collect();
        remark
    }
}

fuzz_target!(|input: Input| {
    let remarks: Vec<Remark> = input.remarks.into_iter().map(Remark::from).collect();

    let mut encoder = EncoderBuilder::new()
        .mode(ContainerMode::Embedded)
        .section_size_limit(u64::from(input.section_size_limit))
        .build(Vec::new());
    for remark in &remarks {
        encoder.emit(remark).unwrap();
    }
    let bytes = encoder.into_inner().unwrap();

    let decoded: Vec<Remark> = Decoder::new(bytes)
        .collect::<remarks_rs::Result<_>>()
        .unwrap();
    assert_eq!(decoded, remarks);
});
