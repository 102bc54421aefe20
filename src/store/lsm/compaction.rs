//! Level 0 to level 1 compaction.
//!
//! Level 0 tables come straight from buffer flushes and may overlap. Once
//! their number exceeds `level0_compaction_threshold`, every L0 table is
//! merged with all of L1 into a fresh set of disjoint L1 tables of at most
//! `max_table_entries` entries. L1 is the bottom level, so tombstones are
//! dropped on the way.

use std::collections::BTreeMap;
use std::path::Path;

use super::level::{table_path, Level, SsTable};
use super::manifest::TableMeta;
use super::store::LsmState;
use super::table::TableWriter;
use crate::{config::LsmConfig, error::Result};

pub fn needs_compaction(state: &LsmState, config: &LsmConfig) -> bool {
    state
        .levels
        .first()
        .is_some_and(|l0| l0.len() > config.level0_compaction_threshold)
}

/// Compacts if needed. Returns whether a compaction ran.
pub fn maybe_compact(dir: &Path, state: &mut LsmState, config: &LsmConfig) -> Result<bool> {
    if !needs_compaction(state, config) {
        return Ok(false);
    }
    compact(dir, state, config)?;
    Ok(true)
}

/// Merges all of L0 and L1 into new L1 tables.
pub fn compact(dir: &Path, state: &mut LsmState, config: &LsmConfig) -> Result<()> {
    let input_tables: usize = state.levels.iter().map(|l| l.len()).sum();
    if input_tables == 0 {
        return Ok(());
    }

    // Oldest data first so newer entries overwrite older ones
    let mut merged: BTreeMap<Vec<u8>, Option<Vec<u8>>> = BTreeMap::new();
    for level in state.levels.iter().rev() {
        for table in &level.tables {
            for (key, value) in table.reader.entries()? {
                merged.insert(key, value);
            }
        }
    }

    let mut output = Level::new(1);
    let mut writer: Option<(u64, TableWriter)> = None;
    for (key, value) in merged.into_iter() {
        let Some(value) = value else { continue };

        if writer.is_none() {
            let id = state.next_table_id;
            state.next_table_id += 1;
            writer = Some((id, TableWriter::create(table_path(dir, id))?));
        }
        if let Some((_, w)) = writer.as_mut() {
            w.add(&key, Some(&value))?;
            if w.entry_count() as usize >= config.max_table_entries {
                if let Some((id, w)) = writer.take() {
                    output.add(finish_table(dir, id, w)?);
                }
            }
        }
    }
    if let Some((id, w)) = writer.take() {
        output.add(finish_table(dir, id, w)?);
    }

    let obsolete: Vec<SsTable> = state
        .levels
        .iter_mut()
        .flat_map(|l| l.tables.drain(..))
        .collect();
    state.levels = vec![Level::new(0), output];
    state.manifest().store(dir)?;

    for table in &obsolete {
        if let Err(e) = std::fs::remove_file(table.path()) {
            tracing::warn!(table = table.meta.id, error = %e, "Failed to delete compacted table");
        }
    }

    tracing::info!(
        input_tables = input_tables,
        output_tables = state.levels[1].len(),
        "Compacted level 0 into level 1"
    );
    Ok(())
}

fn finish_table(dir: &Path, id: u64, writer: TableWriter) -> Result<SsTable> {
    let summary = writer.finish()?;
    let meta = TableMeta {
        id,
        level: 1,
        size: summary.size,
        entry_count: summary.entry_count,
        min_key: summary.min_key,
        max_key: summary.max_key,
    };
    SsTable::open(dir, meta)
}
