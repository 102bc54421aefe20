//! Log segments: immutable record files with mutable in-memory metadata.
//!
//! ## File Format
//!
//! One line per record, ascending key order:
//!
//! ```text
//! <key> <value>\n
//! ```
//!
//! Keys may not contain a space or a newline, values may not contain a
//! newline. The file is never rewritten; consumption is tracked by the
//! `touched` bits. Bounds only ever shrink to the untouched subset.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::record::Record;
use crate::Error;

pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}.alf", id))
}

/// Rejects records that cannot be stored in the line format.
pub fn validate(record: &Record) -> Result<()> {
    if record.key().iter().any(|b| *b == b' ' || *b == b'\n') {
        return Err(Error::InvalidRecord(format!(
            "key {:?} contains a space or newline",
            String::from_utf8_lossy(record.key())
        )));
    }
    if record.value().contains(&b'\n') {
        return Err(Error::InvalidRecord(format!(
            "value of key {:?} contains a newline",
            String::from_utf8_lossy(record.key())
        )));
    }
    Ok(())
}

/// Untouched records of one segment matching a range, read but not yet
/// marked.
#[derive(Debug, Default)]
pub struct RangeScan {
    hits: Vec<usize>,
    taken: Vec<Record>,
    /// Bounds of the untouched records outside the range.
    remaining: Option<(Vec<u8>, Vec<u8>)>,
}

impl RangeScan {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Debug)]
pub struct LogSegment {
    id: u64,
    path: PathBuf,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    record_count: usize,
    touched: Vec<bool>,
    untouched: usize,
    pending_deletion: bool,
}

impl LogSegment {
    /// Writes `records` (sorted by key) to `path` and returns the fully
    /// untouched segment.
    pub fn create(id: u64, path: PathBuf, records: &[Record]) -> Result<Self> {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Err(Error::InvalidState(format!(
                "segment {} would be empty",
                id
            )));
        };

        let mut writer = BufWriter::new(File::create(&path)?);
        for record in records {
            validate(record)?;
            writer.write_all(record.key())?;
            writer.write_all(b" ")?;
            writer.write_all(record.value())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        tracing::debug!(
            segment = id,
            path = %path.display(),
            records = records.len(),
            "log segment created"
        );

        Ok(Self {
            id,
            path,
            min_key: first.key().to_vec(),
            max_key: last.key().to_vec(),
            record_count: records.len(),
            touched: vec![false; records.len()],
            untouched: records.len(),
            pending_deletion: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Records not yet migrated or deleted.
    pub fn untouched(&self) -> usize {
        self.untouched
    }

    pub fn is_touched(&self, i: usize) -> bool {
        self.touched.get(i).copied().unwrap_or(true)
    }

    pub fn is_pending_deletion(&self) -> bool {
        self.pending_deletion
    }

    /// True if the segment is still live and its bounds intersect `[min, max]`.
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        !self.pending_deletion && min <= self.max_key.as_slice() && max >= self.min_key.as_slice()
    }

    /// Reads the untouched records in `[min, max]` without marking them.
    /// The result is applied with [`LogSegment::take`].
    pub fn scan_range(&self, min: &[u8], max: &[u8]) -> Result<RangeScan> {
        let mut scan = RangeScan::default();

        for (i, record) in self.read_records()?.into_iter().enumerate() {
            if self.touched[i] {
                continue;
            }
            if record.key() >= min && record.key() <= max {
                scan.hits.push(i);
                scan.taken.push(record);
            } else if let Some((lo, hi)) = scan.remaining.as_mut() {
                if record.key() < lo.as_slice() {
                    *lo = record.key().to_vec();
                }
                if record.key() > hi.as_slice() {
                    *hi = record.key().to_vec();
                }
            } else {
                scan.remaining = Some((record.key().to_vec(), record.key().to_vec()));
            }
        }

        tracing::trace!(
            segment = self.id,
            taken = scan.len(),
            "range scanned segment"
        );
        Ok(scan)
    }

    /// Marks the records of `scan` touched, shrinks the bounds to the rest and
    /// returns the taken records.
    pub fn take(&mut self, scan: RangeScan) -> Vec<Record> {
        for i in &scan.hits {
            self.touched[*i] = true;
        }
        self.untouched -= scan.hits.len();

        match scan.remaining {
            Some((min, max)) => {
                self.min_key = min;
                self.max_key = max;
            }
            None => {
                self.pending_deletion = true;
                tracing::debug!(segment = self.id, "log segment fully consumed");
            }
        }
        scan.taken
    }

    /// Returns and touches every untouched record in `[min, max]`.
    pub fn take_range(&mut self, min: &[u8], max: &[u8]) -> Result<Vec<Record>> {
        let scan = self.scan_range(min, max)?;
        Ok(self.take(scan))
    }

    /// Touches the first untouched record equal to `key`. Returns whether
    /// one was found.
    pub fn touch_key(&mut self, key: &[u8]) -> Result<bool> {
        let records = self.read_records()?;

        let hit = records
            .iter()
            .enumerate()
            .find(|(i, r)| !self.touched[*i] && r.key() == key)
            .map(|(i, _)| i);

        if let Some(i) = hit {
            tracing::trace!(segment = self.id, position = i, "deleted record in segment");
            self.touched[i] = true;
            self.untouched -= 1;
        }
        self.recompute_bounds(&records);
        Ok(hit.is_some())
    }

    /// Every untouched record, in file order.
    pub fn untouched_records(&self) -> Result<Vec<Record>> {
        Ok(self
            .read_records()?
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !self.touched[*i])
            .map(|(_, r)| r)
            .collect())
    }

    fn recompute_bounds(&mut self, records: &[Record]) {
        let mut remaining = records
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.touched[*i])
            .map(|(_, r)| r.key());

        let Some(first) = remaining.next() else {
            self.pending_deletion = true;
            tracing::debug!(segment = self.id, "log segment fully consumed");
            return;
        };

        let (min, max) = remaining.fold((first, first), |(lo, hi), k| (lo.min(k), hi.max(k)));
        self.min_key = min.to_vec();
        self.max_key = max.to_vec();
    }

    fn read_records(&self) -> Result<Vec<Record>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::with_capacity(self.record_count);

        for line in reader.split(b'\n').take(self.record_count) {
            let line = line?;
            let Some(space) = line.iter().position(|b| *b == b' ') else {
                return Err(Error::CorruptedSegment(format!(
                    "{}: line {} has no separator",
                    self.path.display(),
                    records.len()
                )));
            };
            records.push(Record::new(&line[..space], &line[space + 1..]));
        }

        if records.len() != self.record_count {
            return Err(Error::CorruptedSegment(format!(
                "{}: expected {} records, found {}",
                self.path.display(),
                self.record_count,
                records.len()
            )));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(keys: &[&str]) -> Vec<Record> {
        keys.iter()
            .map(|k| Record::new(*k, format!("pk_{} payload", k)))
            .collect()
    }

    fn create(dir: &Path, keys: &[&str]) -> LogSegment {
        LogSegment::create(0, segment_path(dir, 0), &records(keys)).unwrap()
    }

    #[test]
    fn test_create_writes_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let segment = create(dir.path(), &["10", "20", "30"]);

        let content = std::fs::read_to_string(segment.path())?;
        assert_eq!(content, "10 pk_10 payload\n20 pk_20 payload\n30 pk_30 payload\n");
        assert_eq!(segment.min_key(), b"10");
        assert_eq!(segment.max_key(), b"30");
        assert_eq!(segment.untouched(), 3);
        assert!(!segment.is_pending_deletion());
        Ok(())
    }

    #[test]
    fn test_take_range_shrinks_bounds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut segment = create(dir.path(), &["10", "20", "30", "40"]);

        let taken = segment.take_range(b"25", b"45")?;
        let keys: Vec<_> = taken.iter().map(|r| r.key().to_vec()).collect();
        assert_eq!(keys, vec![b"30".to_vec(), b"40".to_vec()]);
        assert_eq!(taken[0].value(), b"pk_30 payload");

        assert_eq!(segment.min_key(), b"10");
        assert_eq!(segment.max_key(), b"20");
        assert_eq!(segment.untouched(), 2);
        assert!(segment.is_touched(2) && segment.is_touched(3));

        // touched records are never returned again
        assert!(segment.take_range(b"25", b"45")?.is_empty());

        let rest = segment.take_range(b"00", b"99")?;
        assert_eq!(rest.len(), 2);
        assert!(segment.is_pending_deletion());
        assert!(!segment.overlaps(b"00", b"99"));
        Ok(())
    }

    #[test]
    fn test_scan_range_leaves_segment_untouched_until_taken() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut segment = create(dir.path(), &["10", "20", "30"]);

        let scan = segment.scan_range(b"15", b"35")?;
        assert_eq!(scan.len(), 2);
        assert_eq!(segment.untouched(), 3);
        assert_eq!(segment.max_key(), b"30");

        // a dropped scan changes nothing
        drop(scan);
        assert_eq!(segment.take_range(b"15", b"35")?.len(), 2);
        assert_eq!(segment.min_key(), b"10");
        assert_eq!(segment.max_key(), b"10");
        assert!(segment.scan_range(b"15", b"35")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_touch_key() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut segment = create(dir.path(), &["10", "20", "30"]);

        assert!(segment.touch_key(b"10")?);
        assert!(!segment.touch_key(b"10")?);
        assert!(!segment.touch_key(b"15")?);
        assert_eq!(segment.min_key(), b"20");
        assert_eq!(segment.untouched_records()?.len(), 2);

        segment.touch_key(b"20")?;
        segment.touch_key(b"30")?;
        assert!(segment.is_pending_deletion());
        assert_eq!(segment.untouched(), 0);
        Ok(())
    }

    #[test]
    fn test_overlap_rule() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let segment = create(dir.path(), &["20", "40"]);

        assert!(segment.overlaps(b"10", b"20"));
        assert!(segment.overlaps(b"40", b"50"));
        assert!(segment.overlaps(b"25", b"35"));
        assert!(!segment.overlaps(b"41", b"50"));
        assert!(!segment.overlaps(b"00", b"19"));
        Ok(())
    }

    #[test]
    fn test_invalid_records() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let bad_key = vec![Record::new("a b", "12345678")];
        assert!(matches!(
            LogSegment::create(1, segment_path(dir.path(), 1), &bad_key),
            Err(Error::InvalidRecord(_))
        ));

        assert!(matches!(
            LogSegment::create(2, segment_path(dir.path(), 2), &[]),
            Err(Error::InvalidState(_))
        ));
        Ok(())
    }

    #[test]
    fn test_truncated_file_is_corrupt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut segment = create(dir.path(), &["10", "20", "30"]);
        std::fs::write(segment.path(), "10 pk_10\n")?;

        assert!(matches!(
            segment.take_range(b"00", b"99"),
            Err(Error::CorruptedSegment(_))
        ));
        Ok(())
    }
}
