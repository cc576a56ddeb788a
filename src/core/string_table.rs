//! String interning for remark containers
//!
//! The encoder interns every string it writes into a [`StringTable`] and
//! stores the whole table as a single blob once all remarks are out. The
//! decoder wraps that blob in a [`ParsedStringTable`] and resolves indices
//! through it.
//!
//! ## Serialized layout
//!
//! ```text
//! ┌────────────┬────┬────────────┬────┬─────┐
//! │ entry 0    │ \0 │ entry 1    │ \0 │ ... │
//! └────────────┴────┴────────────┴────┴─────┘
//! ```
//!
//! Entries therefore never contain NUL themselves.

use crate::error::{RemarkError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Insertion-ordered, deduplicating string store with dense indices.
#[derive(Debug, Clone, Default)]
pub struct StringTable {
    /// Index of every interned string
    map: HashMap<Arc<str>, u64>,
    /// Entries in insertion order
    entries: Vec<Arc<str>>,
    /// Bytes `serialize` will produce
    serialized_size: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `text`, returning its index. Adding a string twice returns
    /// the index it got the first time.
    ///
    /// `text` must not contain NUL: entries are NUL-terminated once
    /// serialized, so an interior NUL splits the entry and shifts every
    /// later index. [`crate::Encoder::emit`] rejects such remarks.
    pub fn add(&mut self, text: &str) -> u64 {
        if let Some(&index) = self.map.get(text) {
            return index;
        }
        let index = self.entries.len() as u64;
        let entry: Arc<str> = Arc::from(text);
        self.map.insert(Arc::clone(&entry), index);
        self.entries.push(entry);
        self.serialized_size += text.len() + 1;
        index
    }

    pub fn get(&self, index: u64) -> Option<&str> {
        let index = usize::try_from(index).ok()?;
        self.entries.get(index).map(|entry| &**entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|entry| &**entry)
    }

    pub fn serialized_size(&self) -> usize {
        self.serialized_size
    }

    /// Concatenate every entry, NUL-terminated, in insertion order.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size);
        for entry in &self.entries {
            out.extend_from_slice(entry.as_bytes());
            out.push(0);
        }
        out
    }
}

impl<'a> FromIterator<&'a str> for StringTable {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut table = StringTable::new();
        for text in iter {
            table.add(text);
        }
        table
    }
}

/// Read-only view of a serialized string table.
#[derive(Debug, Clone, Default)]
pub struct ParsedStringTable {
    buffer: Bytes,
    /// Start offset of every entry in `buffer`
    offsets: Vec<usize>,
}

impl ParsedStringTable {
    /// Index the entries of a serialized table.
    ///
    /// A trailing entry without its NUL terminator is still accepted and
    /// runs to the end of the buffer.
    pub fn new(buffer: impl Into<Bytes>) -> Self {
        let buffer = buffer.into();
        let mut offsets = Vec::new();
        let mut start = 0;
        while start < buffer.len() {
            offsets.push(start);
            match buffer[start..].iter().position(|&b| b == 0) {
                Some(len) => start += len + 1,
                None => break,
            }
        }
        ParsedStringTable { buffer, offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Entry `index`, or an out-of-range error for any index the table
    /// does not hold.
    pub fn get(&self, index: u64) -> Result<&str> {
        let out_of_range = || RemarkError::StringIndexOutOfRange {
            index,
            len: self.offsets.len(),
        };
        let slot = usize::try_from(index).map_err(|_| out_of_range())?;
        let start = *self.offsets.get(slot).ok_or_else(out_of_range)?;
        let end = match self.offsets.get(slot + 1) {
            Some(&next) => next - 1,
            None => self.buffer[start..]
                .iter()
                .position(|&b| b == 0)
                .map_or(self.buffer.len(), |len| start + len),
        };
        std::str::from_utf8(&self.buffer[start..end]).map_err(|_| RemarkError::InvalidUtf8(index))
    }
}

impl From<&StringTable> for ParsedStringTable {
    fn from(table: &StringTable) -> Self {
        ParsedStringTable::new(table.serialize())
    }
}
