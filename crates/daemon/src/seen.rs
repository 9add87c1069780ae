//! Dedup ledger of input files already dispatched during this process.

use std::collections::HashSet;

/// Append-only set of file names handed to processing.
///
/// Owned by the ingestion loop alone; nothing else mutates it, so it needs
/// no lock. Entries are never removed, which is what guarantees a file is
/// dispatched at most once per process lifetime.
#[derive(Debug, Default)]
pub struct SeenSet {
    names: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `filename`; returns `true` only the first time it is seen.
    pub fn mark_seen(&mut self, filename: &str) -> bool {
        if self.names.contains(filename) {
            return false;
        }
        self.names.insert(filename.to_string())
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.names.contains(filename)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
