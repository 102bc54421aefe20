//! Access to the persisted tables of a store, used once to bootstrap an
//! adaptive log.

use std::path::PathBuf;

use crate::error::Result;
use crate::record::Record;
use crate::store::lsm::{LsmStore, TableReader};

/// Identifier of one persisted table.
pub type SegmentId = PathBuf;

pub trait SegmentDumper: Sync {
    /// Persisted tables grouped by level, `[level][table]`.
    fn segments(&self) -> Vec<Vec<SegmentId>>;

    /// Live records of one table, in key order. Dumping reads the table file
    /// directly and may run for several tables in parallel. Newer tables are
    /// not consulted, so the dumps add up to the store's content only when
    /// tables are disjoint and free of tombstones, as after a compaction.
    fn dump(&self, segment: &SegmentId) -> Result<Vec<Record>>;
}

impl SegmentDumper for LsmStore {
    fn segments(&self) -> Vec<Vec<SegmentId>> {
        self.table_paths_by_level()
    }

    fn dump(&self, segment: &SegmentId) -> Result<Vec<Record>> {
        let reader = TableReader::open(segment)?;
        let records: Vec<Record> = reader
            .entries()?
            .into_iter()
            .filter_map(|(key, value)| value.map(|v| Record::new(key, v)))
            .collect();

        tracing::trace!(
            table = %segment.display(),
            records = records.len(),
            "dumped table"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LsmConfig;
    use crate::store::OrderedStore;

    #[test]
    fn test_segments_grouped_by_level() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LsmConfig::new(dir.path().join("prim"))
            .buffer_capacity(5)
            .level0_compaction_threshold(100);
        let store = LsmStore::open_with_config(config)?;

        for i in 0..12 {
            store.insert(Record::new(format!("k{:02}", i), format!("v{:02}", i)))?;
        }
        store.delete(b"k01")?;
        store.flush()?;

        let segments = store.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 3);

        // Tombstones are not dumped
        let dumped: Vec<Vec<Record>> = segments[0]
            .iter()
            .map(|s| store.dump(s))
            .collect::<Result<_>>()?;
        assert_eq!(dumped[0].len(), 5);
        assert_eq!(dumped[1].len(), 5);
        assert_eq!(dumped[2].len(), 2);
        assert!(dumped[0].windows(2).all(|w| w[0] < w[1]));
        Ok(())
    }

    #[test]
    fn test_segments_after_compaction() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = LsmConfig::new(dir.path().join("prim"))
            .buffer_capacity(5)
            .max_table_entries(4);
        let store = LsmStore::open_with_config(config)?;

        for i in 0..12 {
            store.insert(Record::new(format!("k{:02}", i), format!("v{:02}", i)))?;
        }
        store.compact()?;

        let segments = store.segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 3);

        let total: usize = segments[0]
            .iter()
            .map(|s| store.dump(s).map(|r| r.len()))
            .sum::<Result<usize>>()?;
        assert_eq!(total, 12);
        Ok(())
    }
}
