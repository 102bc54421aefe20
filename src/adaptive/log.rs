use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::journal::QueryJournal;
use super::segment::{self, segment_path, LogSegment};
use crate::dumper::SegmentDumper;
use crate::error::Result;
use crate::flock::FileLock;
use crate::record::Record;
use crate::scheduler::Scheduler;
use crate::store::{OrderedStore, SortedMapStore};
use crate::Error;

const LOCK_FILE: &str = "adamerge.lock";

/// Unindexed, secondary-keyed copy of a primary store.
///
/// Records live in immutable segment files until a search or delete touches
/// them; touched records are never returned again. New records go to a RAM
/// buffer that is written out as a segment when full.
pub struct AdaptiveLog {
    dir: PathBuf,
    _lock: FileLock,
    scheduler: Arc<Scheduler>,
    ram_buffer: SortedMapStore,
    ram_capacity: usize,
    segments: Vec<LogSegment>,
    next_segment_id: u64,
    journal: QueryJournal,
}

impl AdaptiveLog {
    /// Builds the log in `dir` from every persisted table of `primary`, one
    /// segment per table, re-keyed by secondary key. Tables are dumped in
    /// parallel.
    pub fn open<D>(
        primary: &D,
        dir: impl Into<PathBuf>,
        ram_capacity: usize,
        scheduler: Arc<Scheduler>,
    ) -> Result<Self>
    where
        D: SegmentDumper + ?Sized,
    {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let lock = FileLock::lock(dir.join(LOCK_FILE)).map_err(Error::LockError)?;

        let mut log = Self {
            dir,
            _lock: lock,
            scheduler,
            ram_buffer: SortedMapStore::new(),
            ram_capacity: ram_capacity.max(1),
            segments: Vec::new(),
            next_segment_id: 0,
            journal: QueryJournal::new(),
        };
        log.bootstrap(primary)?;
        Ok(log)
    }

    fn bootstrap<D>(&mut self, primary: &D) -> Result<()>
    where
        D: SegmentDumper + ?Sized,
    {
        let tables: Vec<_> = primary.segments().into_iter().flatten().collect();
        let first_id = self.next_segment_id;
        self.next_segment_id += tables.len() as u64;

        let dir = self.dir.as_path();
        let built = self.scheduler.scatter(
            "al-bootstrap",
            tables.iter().enumerate(),
            |(slot, table)| {
                let mut records = primary
                    .dump(table)?
                    .iter()
                    .map(Record::swap_secondary)
                    .collect::<Result<Vec<_>>>()?;
                if records.is_empty() {
                    return Ok(None);
                }
                records.sort();

                let id = first_id + slot as u64;
                LogSegment::create(id, segment_path(dir, id), &records).map(Some)
            },
        )?;
        self.segments = built.into_iter().flatten().collect();

        tracing::info!(
            dir = %self.dir.display(),
            tables = tables.len(),
            segments = self.segments.len(),
            records = self.live_records(),
            "Adaptive log bootstrapped"
        );
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segments(&self) -> &[LogSegment] {
        &self.segments
    }

    pub fn journal(&self) -> &QueryJournal {
        &self.journal
    }

    pub fn buffered(&self) -> usize {
        self.ram_buffer.count()
    }

    /// Records not yet migrated or deleted, RAM buffer included.
    pub fn live_records(&self) -> usize {
        self.ram_buffer.count() + self.segments.iter().map(|s| s.untouched()).sum::<usize>()
    }

    /// Adds a secondary-keyed record. A full RAM buffer is written out as a
    /// segment before the record is accepted.
    pub fn insert(&mut self, record: Record) -> Result<()> {
        segment::validate(&record)?;

        let is_new = self.ram_buffer.psearch(record.key())?.is_empty();
        if is_new && self.ram_buffer.count() >= self.ram_capacity {
            self.flush()?;
        }

        let dropped = self.journal.invalidate(record.key());
        if dropped > 0 {
            tracing::trace!(ranges = dropped, "journal ranges invalidated by insert");
        }
        self.ram_buffer.insert(record)
    }

    /// Writes the RAM buffer out as a new segment.
    pub fn flush(&mut self) -> Result<()> {
        if self.ram_buffer.is_empty() {
            return Ok(());
        }
        let records = self.ram_buffer.all_records()?;

        let id = self.next_segment_id;
        let segment = LogSegment::create(id, segment_path(&self.dir, id), &records)?;
        self.next_segment_id += 1;
        self.segments.push(segment);
        self.ram_buffer.clear();
        Ok(())
    }

    /// Removes the first untouched occurrence of `key` from every segment
    /// that may hold it, and from the RAM buffer.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        if self.journal.covers(key, key) {
            tracing::trace!("delete already covered by journal");
            return Ok(());
        }

        self.ram_buffer.delete(key)?;

        let targets = self.segments.iter_mut().filter(|s| s.overlaps(key, key));
        let hits = self
            .scheduler
            .scatter("al-delete", targets, |segment| segment.touch_key(key))?;

        tracing::debug!(
            segments = hits.len(),
            deleted = hits.iter().filter(|hit| **hit).count(),
            "adaptive log delete"
        );

        self.journal.record(key, key);
        Ok(())
    }

    /// Returns the untouched records for `key` and marks them consumed.
    pub fn psearch(&mut self, key: &[u8]) -> Result<Vec<Record>> {
        self.rsearch(key, key)
    }

    /// Returns every untouched record in `[min_key, max_key]` and marks them
    /// consumed. Matching RAM buffer records leave the buffer. A failed
    /// segment read leaves the log unchanged.
    pub fn rsearch(&mut self, min_key: &[u8], max_key: &[u8]) -> Result<Vec<Record>> {
        if min_key > max_key {
            return Ok(Vec::new());
        }
        if self.journal.covers(min_key, max_key) {
            tracing::trace!("range already covered by journal");
            return Ok(Vec::new());
        }

        let mut found = self.ram_buffer.rsearch(min_key, max_key)?;
        let from_buffer = found.len();

        // Nothing is marked until every overlapping segment has been read
        let targets = self
            .segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.overlaps(min_key, max_key));
        let scans = self.scheduler.scatter("al-rsearch", targets, |(i, segment)| {
            segment.scan_range(min_key, max_key).map(|scan| (i, scan))
        })?;
        let scanned = scans.len();

        for record in &found {
            self.ram_buffer.delete(record.key())?;
        }
        for (i, scan) in scans.into_iter().filter(|(_, scan)| !scan.is_empty()) {
            found.extend(self.segments[i].take(scan));
        }

        tracing::debug!(
            segments = scanned,
            from_buffer,
            found = found.len(),
            "adaptive log range search"
        );

        self.journal.record(min_key, max_key);
        Ok(found)
    }

    /// Every untouched record. Nothing is marked.
    pub fn all_records(&self) -> Result<Vec<Record>> {
        let mut records = self.ram_buffer.all_records()?;
        let live = self.segments.iter().filter(|s| !s.is_pending_deletion());
        let per_segment = self
            .scheduler
            .scatter("al-all-records", live, |segment| segment.untouched_records())?;
        records.extend(per_segment.into_iter().flatten());
        Ok(records)
    }
}

impl Drop for AdaptiveLog {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(dir = %self.dir.display(), error = %e, "Failed to flush adaptive log on close");
        }
    }
}
