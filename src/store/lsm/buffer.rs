//! Write buffer of the LSM store.
//!
//! A skip list of pending writes, tombstones included, waiting to be written
//! out as a level 0 table.

use super::table::{Entry, TableSummary, TableWriter};
use crate::error::Result;

use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::path::Path;

#[derive(Debug, Default)]
pub struct WriteBuffer {
    data: SkipMap<Vec<u8>, Option<Vec<u8>>>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, or a tombstone when `value` is `None`.
    pub fn put(&self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.data.insert(key, value);
    }

    /// Forgets any pending write for `key`.
    pub fn remove(&self, key: &[u8]) {
        self.data.remove(key);
    }

    /// `Some(None)` is a buffered tombstone, `None` means nothing buffered.
    pub fn get(&self, key: &[u8]) -> Option<Option<Vec<u8>>> {
        self.data.get(key).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn range(&self, min: Option<&[u8]>, max: Option<&[u8]>) -> Vec<Entry> {
        let lower = min.map_or(Bound::Unbounded, Bound::Included);
        let upper = max.map_or(Bound::Unbounded, Bound::Included);
        self.data
            .range::<[u8], _>((lower, upper))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Writes every buffered entry to a new table at `path` and clears the
    /// buffer. Returns `None` if the buffer was empty.
    pub fn flush_to(&self, path: &Path) -> Result<Option<TableSummary>> {
        if self.data.is_empty() {
            return Ok(None);
        }

        let mut writer = TableWriter::create(path)?;
        for entry in self.data.iter() {
            writer.add(entry.key(), entry.value().as_deref())?;
        }
        let summary = writer.finish()?;

        self.data.clear();
        Ok(Some(summary))
    }
}
