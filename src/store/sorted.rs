//! In-memory sorted-map store on a concurrent skip list.
//!
//! Readers never block each other. Used as the RAM buffer of the adaptive
//! log, where records wait until a flush writes them into a log segment.

use super::OrderedStore;
use crate::error::Result;
use crate::record::Record;

use crossbeam_skiplist::SkipMap;
use std::ops::Bound;

#[derive(Debug, Default)]
pub struct SortedMapStore {
    data: SkipMap<Vec<u8>, Record>,
}

impl SortedMapStore {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.data.clear();
    }
}

impl OrderedStore for SortedMapStore {
    fn insert(&self, record: Record) -> Result<()> {
        self.data.insert(record.key().to_vec(), record);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn psearch(&self, key: &[u8]) -> Result<Vec<Record>> {
        Ok(self
            .data
            .get(key)
            .map(|e| vec![e.value().clone()])
            .unwrap_or_default())
    }

    fn rsearch(&self, min_key: &[u8], max_key: &[u8]) -> Result<Vec<Record>> {
        if min_key > max_key {
            return Ok(Vec::new());
        }

        let range = (Bound::Included(min_key), Bound::Included(max_key));
        Ok(self
            .data
            .range::<[u8], _>(range)
            .map(|e| e.value().clone())
            .collect())
    }

    fn all_records(&self) -> Result<Vec<Record>> {
        Ok(self.data.iter().map(|e| e.value().clone()).collect())
    }

    fn count(&self) -> usize {
        self.data.len()
    }

    fn location(&self) -> String {
        String::new()
    }
}
