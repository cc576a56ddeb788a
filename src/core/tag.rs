//! Remark classification tags
//!
//! Built-in tags occupy the small codes below [`TagKind::Custom`]; any raw
//! value at or above that boundary is a custom tag whose offset from the
//! boundary is an index into a string table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Built-in tag codes
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TagKind {
    Passed = 0,
    Missed = 1,
    Failure = 2,
    Statistics = 3,
    GenericBinaryBlob = 4,
    BitCodeBlob = 5,
    IRBlob = 6,
    FPCommute = 7,
    Aliasing = 8,
    /// Boundary: every raw value from here on is a custom tag
    Custom = 9,
}

impl TagKind {
    const BUILTINS: [TagKind; 9] = [
        TagKind::Passed,
        TagKind::Missed,
        TagKind::Failure,
        TagKind::Statistics,
        TagKind::GenericBinaryBlob,
        TagKind::BitCodeBlob,
        TagKind::IRBlob,
        TagKind::FPCommute,
        TagKind::Aliasing,
    ];

    const LAST_BUILTIN: u64 = TagKind::Custom as u64 - 1;
}

/// A classification label attached to a remark or an argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(u64);

impl Tag {
    /// Wrap a raw code as read from a container.
    pub const fn from_raw(raw: u64) -> Self {
        Tag(raw)
    }

    /// Custom tag referring to entry `index` of a string table.
    pub const fn from_string_table_index(index: u64) -> Self {
        Tag(TagKind::Custom as u64 + index)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn kind(self) -> TagKind {
        if self.0 <= TagKind::LAST_BUILTIN {
            TagKind::BUILTINS[self.0 as usize]
        } else {
            TagKind::Custom
        }
    }

    pub const fn is_builtin(self) -> bool {
        self.0 <= TagKind::LAST_BUILTIN
    }

    /// String table index of a custom tag.
    pub const fn string_table_index(self) -> Option<u64> {
        if self.is_builtin() {
            None
        } else {
            Some(self.0 - TagKind::Custom as u64)
        }
    }

    pub fn is_binary_blob(self) -> bool {
        matches!(self.kind(), TagKind::GenericBinaryBlob | TagKind::BitCodeBlob)
    }

    /// Display name of a built-in tag; `None` for custom tags.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.kind() {
            TagKind::Passed => "Passed",
            TagKind::Missed => "Missed",
            TagKind::Failure => "Failure",
            TagKind::Statistics => "Stats",
            TagKind::GenericBinaryBlob => "GenericBinaryBlob",
            TagKind::BitCodeBlob => "BitCodeBlob",
            TagKind::IRBlob => "IRBlob",
            TagKind::FPCommute => "FPCommute",
            TagKind::Aliasing => "Aliasing",
            TagKind::Custom => return None,
        };
        Some(name)
    }
}

impl From<TagKind> for Tag {
    fn from(kind: TagKind) -> Self {
        Tag(kind as u64)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Custom({})", self.0 - TagKind::Custom as u64),
        }
    }
}

/// Set of tags: built-ins in a bitmask, custom tags in an ordered set.
///
/// Iteration yields built-in tags in ascending code order, then custom
/// tags in ascending raw order.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagSet {
    builtin: u64,
    custom: BTreeSet<Tag>,
}

// Every built-in code needs its own bit in `builtin`.
const _: () = assert!(TagKind::LAST_BUILTIN < u64::BITS as u64);

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tag. Returns `false` if it was already present.
    pub fn insert(&mut self, tag: impl Into<Tag>) -> bool {
        let tag = tag.into();
        if tag.is_builtin() {
            let bit = 1u64 << tag.raw();
            let fresh = self.builtin & bit == 0;
            self.builtin |= bit;
            return fresh;
        }
        self.custom.insert(tag)
    }

    /// Remove a tag. Returns `true` if it was present.
    pub fn remove(&mut self, tag: impl Into<Tag>) -> bool {
        let tag = tag.into();
        if tag.is_builtin() {
            let bit = 1u64 << tag.raw();
            let present = self.builtin & bit != 0;
            self.builtin &= !bit;
            return present;
        }
        self.custom.remove(&tag)
    }

    pub fn contains(&self, tag: impl Into<Tag>) -> bool {
        let tag = tag.into();
        if tag.is_builtin() {
            return self.builtin & (1u64 << tag.raw()) != 0;
        }
        self.custom.contains(&tag)
    }

    /// First tag of `tags` (in argument order) present in the set.
    pub fn contains_any_of(&self, tags: &[Tag]) -> Option<Tag> {
        tags.iter().copied().find(|tag| self.contains(*tag))
    }

    pub fn contains_all_of(&self, tags: &[Tag]) -> bool {
        tags.iter().all(|tag| self.contains(*tag))
    }

    pub fn len(&self) -> usize {
        self.builtin.count_ones() as usize + self.custom.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builtin == 0 && self.custom.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        let builtin = self.builtin;
        (0..=TagKind::LAST_BUILTIN)
            .filter(move |code| builtin & (1u64 << code) != 0)
            .map(Tag::from_raw)
            .chain(self.custom.iter().copied())
    }
}

impl<T: Into<Tag>> FromIterator<T> for TagSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = TagSet::new();
        set.extend(iter);
        set
    }
}

impl<T: Into<Tag>> Extend<T> for TagSet {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for tag in iter {
            self.insert(tag);
        }
    }
}
