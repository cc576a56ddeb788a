//! The remark value model
//!
//! A [`Remark`] owns all of its text. Values are constructed fresh for every
//! encoded or decoded event and are never implicitly copied: `Remark` is not
//! `Copy`, so duplicating one (and its argument list) takes an explicit
//! `clone()`.
//!
//! Ordering is structural and field-wise. Optional fields order "absent"
//! before any present value, so remarks without a location sort first.

use crate::tag::{Tag, TagSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current version of the remark entry format.
pub const CURRENT_REMARK_VERSION: u64 = 1;

/// Argument key meaning "plain text fragment, no distinct key".
pub const STRING_KEY: &str = "String";

/// Source position a remark or argument refers to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemarkLocation {
    /// Absolute path of the source file
    pub source_file_path: String,
    /// 1-based line
    pub source_line: u32,
    /// 1-based column
    pub source_column: u32,
}

impl RemarkLocation {
    pub fn new(source_file_path: impl Into<String>, source_line: u32, source_column: u32) -> Self {
        RemarkLocation {
            source_file_path: source_file_path.into(),
            source_line,
            source_column,
        }
    }
}

impl fmt::Display for RemarkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.source_file_path, self.source_line, self.source_column
        )
    }
}

/// Kind of a remark
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RemarkKind {
    #[default]
    Unknown = 0,
    Passed = 1,
    Missed = 2,
    Analysis = 3,
    AnalysisFPCommute = 4,
    AnalysisAliasing = 5,
    Failure = 6,
}

impl RemarkKind {
    pub const LAST: RemarkKind = RemarkKind::Failure;

    /// Parse a kind from its container code.
    ///
    /// Returns `None` for codes past [`RemarkKind::LAST`].
    pub fn from_raw(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Passed),
            2 => Some(Self::Missed),
            3 => Some(Self::Analysis),
            4 => Some(Self::AnalysisFPCommute),
            5 => Some(Self::AnalysisAliasing),
            6 => Some(Self::Failure),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RemarkKind::Unknown => "Unknown",
            RemarkKind::Passed => "Passed",
            RemarkKind::Missed => "Missed",
            RemarkKind::Analysis => "Analysis",
            RemarkKind::AnalysisFPCommute => "AnalysisFPCommute",
            RemarkKind::AnalysisAliasing => "AnalysisAliasing",
            RemarkKind::Failure => "Failure",
        }
    }
}

impl fmt::Display for RemarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key/value annotation attached to a remark.
///
/// The value is always text. Producers may put small non-negative integers
/// in it; the container stores those compactly, and decoding hands back
/// their canonical decimal form.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Argument {
    pub key: String,
    pub val: String,
    /// Debug location of the value, if any
    pub loc: Option<RemarkLocation>,
    pub tag: Option<Tag>,
}

impl Argument {
    pub fn new(key: impl Into<String>, val: impl Into<String>) -> Self {
        Argument {
            key: key.into(),
            val: val.into(),
            loc: None,
            tag: None,
        }
    }

    /// Free-form message fragment keyed by [`STRING_KEY`].
    pub fn string(val: impl Into<String>) -> Self {
        Argument::new(STRING_KEY, val)
    }

    pub fn with_loc(mut self, loc: RemarkLocation) -> Self {
        self.loc = Some(loc);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn is_string(&self) -> bool {
        self.key == STRING_KEY
    }

    /// Value parsed as a signed integer.
    pub fn val_as_int(&self) -> Option<i64> {
        self.val.parse().ok()
    }

    pub fn is_val_int(&self) -> bool {
        self.val_as_int().is_some()
    }

    /// Value as a non-negative integer, only when the text is exactly its
    /// canonical decimal spelling.
    pub(crate) fn val_as_canonical_uint(&self) -> Option<u64> {
        let value: u64 = self.val.parse().ok()?;
        (value.to_string() == self.val).then_some(value)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.val)?;
        if let Some(loc) = &self.loc {
            write!(f, " ({})", loc)?;
        }
        Ok(())
    }
}

/// One diagnostic event.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Remark {
    pub kind: RemarkKind,
    /// Name of the pass that emitted the remark
    pub pass_name: String,
    /// Single-word identifier of the remark
    pub remark_name: String,
    /// Mangled name of the function the remark is about
    pub function_name: String,
    pub location: Option<RemarkLocation>,
    /// Execution count from profile data, if available
    pub hotness: Option<u64>,
    pub args: Vec<Argument>,
    pub tags: TagSet,
    /// Opaque payload such as embedded IR or bitcode
    pub blob: Option<Vec<u8>>,
}

impl Remark {
    pub fn new(
        kind: RemarkKind,
        pass_name: impl Into<String>,
        remark_name: impl Into<String>,
        function_name: impl Into<String>,
    ) -> Self {
        Remark {
            kind,
            pass_name: pass_name.into(),
            remark_name: remark_name.into(),
            function_name: function_name.into(),
            ..Default::default()
        }
    }

    /// Concatenation of every argument value, in order.
    pub fn args_as_msg(&self) -> String {
        self.args.iter().map(|arg| arg.val.as_str()).collect()
    }

    /// First argument with the given key.
    pub fn arg_by_key(&self, key: &str) -> Option<&Argument> {
        self.args.iter().find(|arg| arg.key == key)
    }

    pub fn arg_by_key_mut(&mut self, key: &str) -> Option<&mut Argument> {
        self.args.iter_mut().find(|arg| arg.key == key)
    }

    /// Every piece of text that may end up in the string table.
    pub(crate) fn text_fields(&self) -> impl Iterator<Item = &str> + '_ {
        let paths = self
            .location
            .iter()
            .chain(self.args.iter().filter_map(|arg| arg.loc.as_ref()))
            .map(|loc| loc.source_file_path.as_str());
        [
            self.pass_name.as_str(),
            self.remark_name.as_str(),
            self.function_name.as_str(),
        ]
        .into_iter()
        .chain(
            self.args
                .iter()
                .flat_map(|arg| [arg.key.as_str(), arg.val.as_str()]),
        )
        .chain(paths)
    }
}

impl fmt::Display for Remark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.remark_name)?;
        writeln!(f, "Type: {}", self.kind)?;
        writeln!(f, "Pass: {}", self.pass_name)?;
        writeln!(f, "Function: {}", self.function_name)?;
        if let Some(loc) = &self.location {
            writeln!(f, "Location: {}", loc)?;
        }
        if let Some(hotness) = self.hotness {
            writeln!(f, "Hotness: {}", hotness)?;
        }
        if !self.tags.is_empty() {
            let names: Vec<String> = self.tags.iter().map(|tag| tag.to_string()).collect();
            writeln!(f, "Tags: {}", names.join(", "))?;
        }
        if !self.args.is_empty() {
            writeln!(f, "Args:")?;
            for arg in &self.args {
                writeln!(f, "  {}", arg)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagKind;

    fn sample() -> Remark {
        let mut remark = Remark::new(RemarkKind::Missed, "inline", "NoDefinition", "main");
        remark.args.push(Argument::new("Callee", "foo"));
        remark.args.push(Argument::string(" will not be inlined into "));
        remark.args.push(Argument::new("Caller", "main"));
        remark
    }

    #[test]
    fn test_args_as_msg() {
        assert_eq!(sample().args_as_msg(), "foo will not be inlined into main");
    }

    #[test]
    fn test_arg_by_key() {
        let mut remark = sample();
        assert_eq!(remark.arg_by_key("Caller").map(|a| a.val.as_str()), Some("main"));
        assert!(remark.arg_by_key("Missing").is_none());

        remark.arg_by_key_mut("Callee").unwrap().val = "bar".to_string();
        assert_eq!(remark.arg_by_key("Callee").unwrap().val, "bar");
    }

    #[test]
    fn test_text_fields_cover_locations() {
        let mut remark = sample();
        remark.location = Some(RemarkLocation::new("top.c", 1, 1));
        remark.args[0].loc = Some(RemarkLocation::new("callee.c", 2, 2));
        let fields: Vec<&str> = remark.text_fields().collect();
        for expected in ["inline", "NoDefinition", "main", "Callee", "foo", "top.c", "callee.c"] {
            assert!(fields.contains(&expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_int_values() {
        assert_eq!(Argument::new("Cost", "42").val_as_int(), Some(42));
        assert_eq!(Argument::new("Delta", "-3").val_as_int(), Some(-3));
        assert!(!Argument::new("Callee", "foo").is_val_int());

        assert_eq!(Argument::new("Cost", "42").val_as_canonical_uint(), Some(42));
        assert_eq!(Argument::new("Cost", "042").val_as_canonical_uint(), None);
        assert_eq!(Argument::new("Cost", "+42").val_as_canonical_uint(), None);
        assert_eq!(Argument::new("Delta", "-3").val_as_canonical_uint(), None);
    }

    #[test]
    fn test_absent_optionals_sort_first() {
        let without = sample();
        let mut with = sample();
        with.location = Some(RemarkLocation::new("a.c", 1, 1));
        assert!(without < with);

        let mut hot = sample();
        hot.hotness = Some(0);
        assert!(without < hot);
    }

    #[test]
    fn test_location_ordering() {
        let a = RemarkLocation::new("a.c", 10, 5);
        let b = RemarkLocation::new("a.c", 10, 6);
        let c = RemarkLocation::new("b.c", 1, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_clone_is_structurally_equal() {
        let mut remark = sample();
        remark.tags.insert(TagKind::Missed);
        remark.blob = Some(vec![1, 2, 3]);
        let copy = remark.clone();
        assert_eq!(copy, remark);
    }

    #[test]
    fn test_kind_codes() {
        for code in 0..=6 {
            let kind = RemarkKind::from_raw(code).unwrap();
            assert_eq!(kind as u64, code);
        }
        assert_eq!(RemarkKind::from_raw(7), None);
        assert_eq!(RemarkKind::AnalysisFPCommute.to_string(), "AnalysisFPCommute");
    }

    #[test]
    fn test_display() {
        let mut remark = sample();
        remark.location = Some(RemarkLocation::new("file.c", 3, 4));
        let text = remark.to_string();
        assert!(text.contains("Name: NoDefinition"));
        assert!(text.contains("Location: file.c:3:4"));
        assert!(text.contains("  Callee: foo"));
    }

    #[test]
    fn test_serde_json_shape() {
        let remark = sample();
        let json = serde_json::to_string(&remark).unwrap();
        let back: Remark = serde_json::from_str(&json).unwrap();
        assert_eq!(back, remark);
    }
}
