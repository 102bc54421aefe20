use super::{
    buffer::WriteBuffer,
    compaction,
    level::{table_path, Level, SsTable},
    manifest::{Manifest, TableMeta, MANIFEST_FILE},
};
use crate::{
    config::LsmConfig,
    error::Result,
    flock::FileLock,
    record::Record,
    store::OrderedStore,
    Error,
};

use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

const LOCK_FILE: &str = "adamerge.lock";

/// Mutable part of the store, guarded by one lock.
pub struct LsmState {
    pub(crate) buffer: WriteBuffer,
    /// Always `[L0, L1]`.
    pub(crate) levels: Vec<Level>,
    pub(crate) next_table_id: u64,
    /// Number of live (non-deleted) keys.
    pub(crate) live: usize,
}

impl LsmState {
    pub(crate) fn manifest(&self) -> Manifest {
        Manifest {
            next_table_id: self.next_table_id,
            levels: self.levels.iter().map(|l| l.meta()).collect(),
        }
    }

    fn lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.buffer.get(key) {
            Some(value) => Ok(value),
            None => self.disk_lookup(key),
        }
    }

    fn disk_lookup(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for level in &self.levels {
            if let Some(value) = level.get(key)? {
                return Ok(value);
            }
        }
        Ok(None)
    }

    fn scan(&self, min: Option<&[u8]>, max: Option<&[u8]>) -> Result<Vec<Record>> {
        let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();

        // Deepest level first, each level oldest table first
        for level in self.levels.iter().rev() {
            for table in level.tables.iter().filter(|t| t.overlaps(min, max)) {
                merged.extend(table.reader.scan(min, max)?);
            }
        }
        merged.extend(self.buffer.range(min, max));

        Ok(merged
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| Record::new(k, v)))
            .collect())
    }
}

/// Buffered LSM store: a write buffer in front of levelled tables on disk.
pub struct LsmStore {
    config: LsmConfig,
    _lock: FileLock,
    state: RwLock<LsmState>,
}

impl LsmStore {
    /// Open store with default configuration
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(LsmConfig::new(dir))
    }

    /// Open store with custom configuration
    pub fn open_with_config(config: LsmConfig) -> Result<Self> {
        Self::open_inner(config, false)
    }

    /// Open an empty store, discarding tables and manifest left in the
    /// directory by an earlier run.
    pub fn create_with_config(config: LsmConfig) -> Result<Self> {
        Self::open_inner(config, true)
    }

    fn open_inner(config: LsmConfig, discard: bool) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let lock = FileLock::lock(config.dir.join(LOCK_FILE)).map_err(Error::LockError)?;

        if discard {
            discard_tables(&config.dir)?;
        }

        let manifest = Manifest::load(&config.dir)?.unwrap_or_default();
        let mut levels = vec![Level::new(0), Level::new(1)];
        for level_meta in manifest.levels {
            let slot = levels.get_mut(level_meta.level as usize).ok_or_else(|| {
                Error::InvalidState(format!("manifest names unknown level {}", level_meta.level))
            })?;
            for table_meta in level_meta.tables {
                slot.add(SsTable::open(&config.dir, table_meta)?);
            }
        }

        let mut state = LsmState {
            buffer: WriteBuffer::new(),
            levels,
            next_table_id: manifest.next_table_id,
            live: 0,
        };
        state.live = state.scan(None, None)?.len();

        tracing::debug!(
            dir = %config.dir.display(),
            buffer_capacity = config.buffer_capacity,
            records = state.live,
            "LSM store opened"
        );

        Ok(Self {
            config,
            _lock: lock,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &LsmConfig {
        &self.config
    }

    /// Writes the buffer out as a level 0 table.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.write();
        self.flush_locked(&mut state)
    }

    /// Merges L0 and L1 regardless of the threshold.
    pub fn compact(&self) -> Result<()> {
        let mut state = self.state.write();
        self.flush_locked(&mut state)?;
        compaction::compact(&self.config.dir, &mut state, &self.config)
    }

    /// Paths of the persisted tables, grouped by level. Empty levels are
    /// skipped; level 0 tables are listed oldest first.
    pub fn table_paths_by_level(&self) -> Vec<Vec<PathBuf>> {
        let state = self.state.read();
        state
            .levels
            .iter()
            .filter(|l| !l.is_empty())
            .map(|l| l.tables.iter().map(|t| t.path().to_path_buf()).collect())
            .collect()
    }

    /// Table count per level, `[L0, L1]`.
    pub fn level_table_counts(&self) -> Vec<usize> {
        self.state.read().levels.iter().map(|l| l.len()).collect()
    }

    /// Records waiting in the write buffer.
    pub fn buffered(&self) -> usize {
        self.state.read().buffer.len()
    }

    fn maybe_flush(&self, state: &mut LsmState) -> Result<()> {
        if state.buffer.len() >= self.config.buffer_capacity.max(1) {
            self.flush_locked(state)?;
        }
        Ok(())
    }

    fn flush_locked(&self, state: &mut LsmState) -> Result<()> {
        if state.buffer.is_empty() {
            return Ok(());
        }

        let id = state.next_table_id;
        let path = table_path(&self.config.dir, id);
        let Some(summary) = state.buffer.flush_to(&path)? else {
            return Ok(());
        };
        state.next_table_id += 1;

        let meta = TableMeta {
            id,
            level: 0,
            size: summary.size,
            entry_count: summary.entry_count,
            min_key: summary.min_key,
            max_key: summary.max_key,
        };
        state.levels[0].add(SsTable::open(&self.config.dir, meta)?);
        state.manifest().store(&self.config.dir)?;

        tracing::debug!(
            table = id,
            entries = summary.entry_count,
            "Flushed write buffer to level 0"
        );

        compaction::maybe_compact(&self.config.dir, state, &self.config)?;
        Ok(())
    }
}

fn discard_tables(dir: &Path) -> Result<()> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_table = path.extension().is_some_and(|ext| ext == "sst");
        let is_manifest = path.file_name().is_some_and(|n| n == MANIFEST_FILE);
        if is_table || is_manifest {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::debug!(dir = %dir.display(), files = removed, "Discarded previous store files");
    }
    Ok(())
}

impl Drop for LsmStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(dir = %self.config.dir.display(), error = %e, "Failed to flush LSM store on close");
        }
    }
}

impl OrderedStore for LsmStore {
    fn insert(&self, record: Record) -> Result<()> {
        let (key, value) = record.into_parts();
        let mut state = self.state.write();

        if state.lookup(&key)?.is_none() {
            state.live += 1;
        }
        state.buffer.put(key, Some(value));
        self.maybe_flush(&mut state)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut state = self.state.write();

        if state.lookup(key)?.is_none() {
            return Ok(());
        }

        // A tombstone is only needed if an older table still holds the key
        if state.disk_lookup(key)?.is_some() {
            state.buffer.put(key.to_vec(), None);
        } else {
            state.buffer.remove(key);
        }
        state.live -= 1;
        self.maybe_flush(&mut state)
    }

    fn psearch(&self, key: &[u8]) -> Result<Vec<Record>> {
        let state = self.state.read();
        Ok(state
            .lookup(key)?
            .map(|value| vec![Record::new(key.to_vec(), value)])
            .unwrap_or_default())
    }

    fn rsearch(&self, min_key: &[u8], max_key: &[u8]) -> Result<Vec<Record>> {
        if min_key > max_key {
            return Ok(Vec::new());
        }
        self.state.read().scan(Some(min_key), Some(max_key))
    }

    fn all_records(&self) -> Result<Vec<Record>> {
        self.state.read().scan(None, None)
    }

    fn count(&self) -> usize {
        self.state.read().live
    }

    fn location(&self) -> String {
        self.config.dir.to_string_lossy().into_owned()
    }
}
