//! The HPACK dynamic table (RFC 7541 §2.3.2, §4).

use std::collections::VecDeque;

/// Per-entry overhead added to `name.len() + value.len()` when computing an entry's size
/// contribution, per RFC 7541 §4.1.
const ENTRY_OVERHEAD: usize = 32;

#[derive(Debug, Clone)]
struct Entry {
    name: String,
    value: String,
}

impl Entry {
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + ENTRY_OVERHEAD
    }
}

/// A bounded FIFO of recently-seen header fields, shared between encoder and decoder and kept in
/// sync by mirroring the same insertions and evictions on both sides.
///
/// Invariant: `self.used <= self.max_size` always holds after any public method returns.
#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<Entry>,
    max_size: usize,
    used: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
            used: 0,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Changes the capacity, evicting oldest-first entries until `used <= new_max_size`. A
    /// shrink never fails; it just evicts. This is how both HPACK's own
    /// `Dynamic Table Size Update` instruction and a locally-configured cap are applied.
    pub fn set_max_size(&mut self, new_max_size: usize) {
        self.max_size = new_max_size;
        self.evict_to_fit();
    }

    /// Inserts a new entry at the front (most-recently-added = index 1), evicting oldest entries
    /// first to make room. If the entry alone is larger than `max_size`, the table ends up empty
    /// and the entry is not stored, per RFC 7541 §4.4.
    pub fn insert(&mut self, name: String, value: String) {
        let entry = Entry { name, value };
        let size = entry.size();

        if size > self.max_size {
            self.entries.clear();
            self.used = 0;
            return;
        }

        self.entries.push_front(entry);
        self.used += size;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.used > self.max_size {
            let Some(evicted) = self.entries.pop_back() else {
                break;
            };
            self.used -= evicted.size();
        }
    }

    /// Looks up a dynamic-table entry by its 1-based position *within the dynamic table*
    /// (callers offset by the static table's 61 entries before calling this).
    pub fn get(&self, dynamic_index: usize) -> Option<(&str, &str)> {
        if dynamic_index == 0 {
            return None;
        }
        self.entries
            .get(dynamic_index - 1)
            .map(|e| (e.name.as_str(), e.value.as_str()))
    }

    /// Finds the lowest dynamic index (1-based) with an exact name+value match.
    pub fn find_name_value(&self, name: &str, value: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name && e.value == value)
            .map(|i| i + 1)
    }

    /// Finds the lowest dynamic index (1-based) with a name-only match.
    pub fn find_name(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name == name)
            .map(|i| i + 1)
    }
}
