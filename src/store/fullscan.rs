//! Baseline secondary-key access: every lookup scans the whole primary store.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{LsmStore, OrderedStore};
use crate::error::Result;
use crate::record::{Record, SECONDARY_KEY_LEN};

/// Answers secondary-key queries against an unindexed primary store.
///
/// Keys passed to `psearch`, `rsearch` and `delete` are secondary keys;
/// returned records are primary records.
pub struct FullScanIndex {
    lock: Mutex<()>,
    primary: Arc<LsmStore>,
}

impl FullScanIndex {
    pub fn new(primary: Arc<LsmStore>) -> Self {
        Self {
            lock: Mutex::new(()),
            primary,
        }
    }

    pub fn primary(&self) -> &Arc<LsmStore> {
        &self.primary
    }
}

fn secondary_of(record: &Record) -> Option<&[u8]> {
    record.value().get(..SECONDARY_KEY_LEN)
}

impl OrderedStore for FullScanIndex {
    fn insert(&self, record: Record) -> Result<()> {
        let _guard = self.lock.lock();
        self.primary.insert(record)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let _guard = self.lock.lock();
        let found = self
            .primary
            .all_records()?
            .into_iter()
            .find(|r| secondary_of(r) == Some(key));

        if let Some(record) = found {
            self.primary.delete(record.key())?;
        }
        Ok(())
    }

    fn psearch(&self, key: &[u8]) -> Result<Vec<Record>> {
        let _guard = self.lock.lock();
        Ok(self
            .primary
            .all_records()?
            .into_iter()
            .find(|r| secondary_of(r) == Some(key))
            .into_iter()
            .collect())
    }

    fn rsearch(&self, min_key: &[u8], max_key: &[u8]) -> Result<Vec<Record>> {
        if max_key < min_key {
            return Ok(Vec::new());
        }

        let _guard = self.lock.lock();
        Ok(self
            .primary
            .all_records()?
            .into_iter()
            .filter(|r| secondary_of(r).is_some_and(|sk| sk >= min_key && sk <= max_key))
            .collect())
    }

    fn all_records(&self) -> Result<Vec<Record>> {
        let _guard = self.lock.lock();
        self.primary.all_records()
    }

    fn count(&self) -> usize {
        self.primary.count()
    }

    fn location(&self) -> String {
        self.primary.location()
    }
}
