use std::sync::Arc;

use parking_lot::Mutex;

use super::log::AdaptiveLog;
use crate::config::{IndexConfig, LsmConfig};
use crate::error::Result;
use crate::record::Record;
use crate::scheduler::Scheduler;
use crate::store::{LsmStore, OrderedStore};
use crate::Error;

/// Secondary index that is built lazily by the queries it serves.
///
/// Keys are secondary keys. A record is answered from the adaptive log the
/// first time a query touches it and from the secondary store afterwards.
/// The log lock is held for the whole of every operation.
pub struct AdaptiveMergingIndex {
    primary: Arc<LsmStore>,
    secondary: LsmStore,
    log: Mutex<AdaptiveLog>,
    scheduler: Arc<Scheduler>,
}

impl AdaptiveMergingIndex {
    /// Compacts `primary`, then builds an empty secondary store and an
    /// adaptive log holding every primary record.
    pub fn open(
        primary: Arc<LsmStore>,
        config: &IndexConfig,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self> {
        let location = primary.location();
        let secondary_dir = config.resolve_secondary_dir(&location);
        let log_dir = config.resolve_log_dir(&location);

        let primary_dir = primary.config().dir.as_path();
        if secondary_dir == primary_dir || log_dir == primary_dir || secondary_dir == log_dir {
            return Err(Error::InvalidState(format!(
                "index directories must differ from each other and from {}",
                location
            )));
        }

        // Merged disjoint tables without tombstones, so every table can be
        // dumped on its own
        primary.compact()?;

        let secondary = LsmStore::create_with_config(
            LsmConfig::new(secondary_dir).buffer_capacity(config.secondary_buffer_capacity),
        )?;
        let log = AdaptiveLog::open(
            primary.as_ref(),
            log_dir,
            config.al_buffer_capacity,
            scheduler.clone(),
        )?;

        tracing::info!(
            primary = %location,
            secondary = %secondary.location(),
            log = %log.dir().display(),
            records = log.live_records(),
            "Adaptive merging index opened"
        );

        Ok(Self {
            primary,
            secondary,
            log: Mutex::new(log),
            scheduler,
        })
    }

    pub fn primary(&self) -> &Arc<LsmStore> {
        &self.primary
    }

    pub fn secondary(&self) -> &LsmStore {
        &self.secondary
    }

    /// Runs `f` against the adaptive log under the index lock.
    pub fn with_log<R>(&self, f: impl FnOnce(&AdaptiveLog) -> R) -> R {
        f(&self.log.lock())
    }

    /// Combines both halves of a search. Records taken from the log are
    /// migrated even if the secondary store failed, since the log no longer
    /// returns them.
    fn settle(
        &self,
        merged: Result<Vec<Record>>,
        fresh: Result<Vec<Record>>,
    ) -> Result<Vec<Record>> {
        let fresh = fresh?;
        self.migrate(&fresh)?;
        Ok(fresh.into_iter().chain(merged?).collect())
    }

    /// Moves records found in the log into the secondary store.
    fn migrate(&self, records: &[Record]) -> Result<()> {
        for record in records {
            self.secondary.insert(record.clone())?;
        }
        if !records.is_empty() {
            tracing::debug!(records = records.len(), "migrated records to secondary store");
        }
        Ok(())
    }
}

impl OrderedStore for AdaptiveMergingIndex {
    fn insert(&self, record: Record) -> Result<()> {
        self.log.lock().insert(record)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut log = self.log.lock();
        let (from_secondary, from_log) = self
            .scheduler
            .fork(|| self.secondary.delete(key), || log.delete(key))?;
        from_secondary?;
        from_log
    }

    fn psearch(&self, key: &[u8]) -> Result<Vec<Record>> {
        let mut log = self.log.lock();
        let (merged, fresh) = self
            .scheduler
            .fork(|| self.secondary.psearch(key), || log.psearch(key))?;
        self.settle(merged, fresh)
    }

    fn rsearch(&self, min_key: &[u8], max_key: &[u8]) -> Result<Vec<Record>> {
        if min_key > max_key {
            return Ok(Vec::new());
        }

        let mut log = self.log.lock();
        let (merged, fresh) = self.scheduler.fork(
            || self.secondary.rsearch(min_key, max_key),
            || log.rsearch(min_key, max_key),
        )?;
        self.settle(merged, fresh)
    }

    fn all_records(&self) -> Result<Vec<Record>> {
        let log = self.log.lock();
        let (merged, fresh) = self
            .scheduler
            .fork(|| self.secondary.all_records(), || log.all_records())?;

        let mut records = fresh?;
        records.extend(merged?);
        Ok(records)
    }

    fn count(&self) -> usize {
        let log = self.log.lock();
        self.secondary.count() + log.live_records()
    }

    fn location(&self) -> String {
        self.primary.location()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;

    fn open_index(dir: &tempfile::TempDir, records: usize, al_capacity: usize) -> AdaptiveMergingIndex {
        let config = LsmConfig::new(dir.path().join("prim"))
            .buffer_capacity(8)
            .max_table_entries(8);
        let primary = LsmStore::open_with_config(config).unwrap();
        for i in 0..records {
            primary
                .insert(Record::new(
                    format!("pk{:06}", i),
                    format!("sk{:06}v{}", 500 - i, i),
                ))
                .unwrap();
        }

        let scheduler = Arc::new(Scheduler::new(&SchedulerConfig::default().threads(4)).unwrap());
        let config = IndexConfig::new()
            .secondary_buffer_capacity(4)
            .al_buffer_capacity(al_capacity);
        AdaptiveMergingIndex::open(Arc::new(primary), &config, scheduler).unwrap()
    }

    #[test]
    fn test_open_copies_primary_into_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = open_index(&dir, 20, 4);

        assert_eq!(index.count(), 20);
        assert_eq!(index.secondary().count(), 0);
        assert_eq!(index.with_log(|log| log.segments().len()), 3);
        assert_eq!(index.location(), index.primary().location());
        assert!(dir.path().join("prim_secIndex").is_dir());
        assert!(dir.path().join("prim_al").is_dir());
        Ok(())
    }

    #[test]
    fn test_psearch_migrates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = open_index(&dir, 20, 4);

        let found = index.psearch(b"sk000490")?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value(), b"pk000010v10");
        assert_eq!(index.secondary().count(), 1);
        assert_eq!(index.count(), 20);

        // served by the secondary store the second time
        let again = index.psearch(b"sk000490")?;
        assert_eq!(again, found);
        assert_eq!(again[0].value(), found[0].value());
        assert_eq!(index.count(), 20);
        Ok(())
    }

    #[test]
    fn test_rsearch_then_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = open_index(&dir, 20, 4);

        assert_eq!(index.rsearch(b"sk000485", b"sk000489")?.len(), 5);
        assert_eq!(index.secondary().count(), 5);
        assert_eq!(index.rsearch(b"sk000485", b"sk000489")?.len(), 5);
        assert!(index.rsearch(b"sk000489", b"sk000485")?.is_empty());

        // one key migrated, one still in the log
        index.delete(b"sk000487")?;
        index.delete(b"sk000499")?;
        assert_eq!(index.count(), 18);
        assert!(index.psearch(b"sk000487")?.is_empty());
        assert!(index.psearch(b"sk000499")?.is_empty());
        assert_eq!(index.all_records()?.len(), 18);
        Ok(())
    }

    #[test]
    fn test_insert_goes_to_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let index = open_index(&dir, 4, 4);

        index.insert(Record::new("sk999999", "pk999999new"))?;
        assert_eq!(index.count(), 5);
        assert_eq!(index.secondary().count(), 0);
        assert_eq!(index.primary().count(), 4);

        let found = index.psearch(b"sk999999")?;
        assert_eq!(found[0].value(), b"pk999999new");
        Ok(())
    }

    #[test]
    fn test_rejects_shared_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let primary = Arc::new(LsmStore::open(dir.path().join("prim"))?);
        let scheduler = Arc::new(Scheduler::new(&SchedulerConfig::default().threads(2))?);
        let config = IndexConfig::new().secondary_dir(dir.path().join("prim"));

        assert!(matches!(
            AdaptiveMergingIndex::open(primary, &config, scheduler),
            Err(Error::InvalidState(_))
        ));
        Ok(())
    }
}
