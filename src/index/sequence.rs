//! Per-prefix numeric sequences built from a [`FileIndex`].
//! Entries are sorted by numeric value, so width changes (`P999999` -> `P1000000`) don't
//! break ordering. Built once, then queried many times with binary search.

use std::collections::BTreeMap;

use super::FileIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqEntry {
    pub number: u64,
    pub stem: String,
}

#[derive(Debug, Default)]
pub struct SequenceIndex {
    by_prefix: BTreeMap<String, Vec<SeqEntry>>,
}

impl SequenceIndex {
    pub fn build(index: &FileIndex) -> Self {
        let mut by_prefix: BTreeMap<String, Vec<SeqEntry>> = BTreeMap::new();
        for rec in index.records() {
            if let Some(id) = &rec.numeric_identity {
                by_prefix.entry(id.prefix.clone()).or_default().push(SeqEntry {
                    number: id.number,
                    stem: rec.stem.clone(),
                });
            }
        }
        for entries in by_prefix.values_mut() {
            entries.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.stem.cmp(&b.stem)));
        }
        Self { by_prefix }
    }

    /// Prefixes in sorted order.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.by_prefix.keys().map(String::as_str)
    }

    /// Ascending entries for `prefix` (empty if unknown).
    pub fn entries(&self, prefix: &str) -> &[SeqEntry] {
        self.by_prefix.get(prefix).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Index of the greatest entry strictly below `number`, or None.
    pub fn predecessor_position(&self, prefix: &str, number: u64) -> Option<usize> {
        let entries = self.entries(prefix);
        let below = entries.partition_point(|e| e.number < number);
        below.checked_sub(1)
    }
}
