//! String interner for way names
//!
//! Deduplicates repeated text into dense `u32` ids. The empty string is
//! always id 0, so unnamed ways share one entry.

use rustc_hash::FxHashMap;

/// Dense identifier of an interned string
pub type StringId = u32;

/// Id reserved for the empty string
pub const EMPTY_STRING_ID: StringId = 0;

/// Append-only string table with reverse lookup
#[derive(Debug)]
pub struct StringTable {
    ids: FxHashMap<String, StringId>,
    strings: Vec<String>,
}

impl StringTable {
    pub fn new() -> Self {
        let mut table = Self {
            ids: FxHashMap::default(),
            strings: Vec::new(),
        };
        table.intern("");
        table
    }

    /// Return the id of `s`, inserting it if unseen
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.ids.get(s) {
            return id;
        }
        let id = self.strings.len() as StringId;
        self.strings.push(s.to_string());
        self.ids.insert(s.to_string(), id);
        id
    }

    pub fn get(&self, id: StringId) -> Option<&str> {
        self.strings.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Never true: the empty string is always present
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Bytes held by the table, used for the memory budget estimate
    pub fn heap_bytes(&self) -> usize {
        self.strings.iter().map(|s| 2 * s.len() + 48).sum()
    }

    /// Strings in id order
    pub fn into_strings(self) -> Vec<String> {
        self.strings
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}
