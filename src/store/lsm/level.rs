use std::path::{Path, PathBuf};

use super::manifest::{LevelMeta, TableMeta};
use super::table::TableReader;
use crate::error::Result;

pub fn table_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", id))
}

/// A persisted table with its manifest metadata.
#[derive(Debug)]
pub struct SsTable {
    pub meta: TableMeta,
    pub reader: TableReader,
}

impl SsTable {
    pub fn open(dir: &Path, meta: TableMeta) -> Result<Self> {
        let reader = TableReader::open(table_path(dir, meta.id))?;
        Ok(Self { meta, reader })
    }

    pub fn path(&self) -> &Path {
        self.reader.path()
    }

    /// True if the table's key range intersects `[min, max]`.
    pub fn overlaps(&self, min: Option<&[u8]>, max: Option<&[u8]>) -> bool {
        let below = max.is_some_and(|m| m < self.meta.min_key.as_slice());
        let above = min.is_some_and(|m| m > self.meta.max_key.as_slice());
        !below && !above
    }
}

/// Tables of one level. Level 0 tables are kept in flush order (oldest
/// first) and may overlap; deeper levels hold disjoint ranges.
#[derive(Debug)]
pub struct Level {
    pub level_num: u32,
    pub tables: Vec<SsTable>,
}

impl Level {
    pub fn new(level_num: u32) -> Self {
        Self {
            level_num,
            tables: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn add(&mut self, table: SsTable) {
        self.tables.push(table);
    }

    /// Newest matching entry for `key` in this level.
    pub fn get(&self, key: &[u8]) -> Result<Option<Option<Vec<u8>>>> {
        for table in self.tables.iter().rev() {
            if !table.overlaps(Some(key), Some(key)) {
                continue;
            }
            if let Some(value) = table.reader.get(key)? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    pub fn meta(&self) -> LevelMeta {
        LevelMeta {
            level: self.level_num,
            tables: self.tables.iter().map(|t| t.meta.clone()).collect(),
        }
    }
}
