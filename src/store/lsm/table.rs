//! Sorted string table files.
//!
//! ## File Layout
//!
//! ```text
//! +-------------------------------------------+
//! | Entry 1 | Entry 2 | ... | Entry N         |  data section
//! +-------------------------------------------+
//! | Sparse index                              |
//! +-------------------------------------------+
//! | Index offset (u64) | Entry count (u64)    |
//! | CRC-32 of the data section (u32)          |  footer
//! +-------------------------------------------+
//! ```
//!
//! An entry is `[flag u8][key len u32][value len u32][key][value]`, all
//! integers big-endian. Flag `1` marks a tombstone with an empty value. The
//! sparse index holds every `INDEX_INTERVAL`-th key with its data offset.

use crate::error::Result;
use crate::Error;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const INDEX_INTERVAL: usize = 64;

const FOOTER_SIZE: u64 = 8 + 8 + 4;
const FLAG_VALUE: u8 = 0;
const FLAG_TOMBSTONE: u8 = 1;

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// A key with its value, or `None` for a tombstone.
pub type Entry = (Vec<u8>, Option<Vec<u8>>);

/// Summary of a finished table.
#[derive(Debug, Clone)]
pub struct TableSummary {
    pub size: u64,
    pub entry_count: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

/// Streams ascending entries into a new table file.
pub struct TableWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    index: Vec<(Vec<u8>, u64)>,
    offset: u64,
    entry_count: u64,
    digest: crc::Digest<'static, u32>,
    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
}

impl TableWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            index: Vec::new(),
            offset: 0,
            entry_count: 0,
            digest: CRC32.digest(),
            min_key: None,
            last_key: None,
        })
    }

    /// Appends one entry. Keys must be strictly ascending.
    pub fn add(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        if let Some(last) = &self.last_key {
            if key <= last.as_slice() {
                return Err(Error::InvalidState(format!(
                    "table {} keys out of order",
                    self.path.display()
                )));
            }
        }

        if self.entry_count as usize % INDEX_INTERVAL == 0 {
            self.index.push((key.to_vec(), self.offset));
        }

        let mut buf = Vec::with_capacity(9 + key.len() + value.map_or(0, |v| v.len()));
        encode_entry(&mut buf, key, value).map_err(|e| Error::Encode("table entry", e))?;

        self.writer.write_all(&buf)?;
        self.digest.update(&buf);
        self.offset += buf.len() as u64;
        self.entry_count += 1;

        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.last_key = Some(key.to_vec());
        Ok(())
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Writes the index and footer and syncs the file.
    pub fn finish(mut self) -> Result<TableSummary> {
        let index_offset = self.offset;

        let mut index_buf = Vec::new();
        encode_index(&mut index_buf, &self.index).map_err(|e| Error::Encode("table index", e))?;
        self.writer.write_all(&index_buf)?;

        self.writer.write_u64::<BigEndian>(index_offset)?;
        self.writer.write_u64::<BigEndian>(self.entry_count)?;
        self.writer.write_u32::<BigEndian>(self.digest.finalize())?;

        let file = self
            .writer
            .into_inner()
            .map_err(|e| Error::IoError(e.into_error()))?;
        file.sync_all()?;

        Ok(TableSummary {
            size: file.metadata()?.len(),
            entry_count: self.entry_count,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.last_key.unwrap_or_default(),
        })
    }
}

/// Read handle for a finished table. Holds the sparse index in memory and
/// opens the file per read, so it can be shared between threads.
#[derive(Debug)]
pub struct TableReader {
    path: PathBuf,
    index: Vec<(Vec<u8>, u64)>,
    index_offset: u64,
    entry_count: u64,
    checksum: u32,
}

impl TableReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        if file_size < FOOTER_SIZE {
            return Err(Error::Decode(
                "table footer",
                io::Error::new(io::ErrorKind::UnexpectedEof, "file too short"),
            ));
        }

        file.seek(SeekFrom::Start(file_size - FOOTER_SIZE))?;
        let index_offset = file.read_u64::<BigEndian>()?;
        let entry_count = file.read_u64::<BigEndian>()?;
        let checksum = file.read_u32::<BigEndian>()?;

        if index_offset > file_size - FOOTER_SIZE {
            return Err(Error::Decode(
                "table footer",
                io::Error::new(io::ErrorKind::InvalidData, "index offset out of bounds"),
            ));
        }

        let mut index_data = vec![0u8; (file_size - FOOTER_SIZE - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index_data)?;
        let index =
            decode_index(&mut Cursor::new(index_data.as_slice())).map_err(|e| Error::Decode("table index", e))?;

        Ok(Self {
            path,
            index,
            index_offset,
            entry_count,
            checksum,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Finds `key`. `Some(None)` means the table holds a tombstone for it.
    pub fn get(&self, key: &[u8]) -> Result<Option<Option<Vec<u8>>>> {
        let mut entries = self.entries_from(self.seek_offset(key))?;
        while let Some((k, v)) = entries.next_entry()? {
            match k.as_slice().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(v)),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Entries with `min <= key <= max`; `None` leaves that side unbounded.
    pub fn scan(&self, min: Option<&[u8]>, max: Option<&[u8]>) -> Result<Vec<Entry>> {
        let start = min.map_or(0, |k| self.seek_offset(k));
        let mut entries = self.entries_from(start)?;

        let mut out = Vec::new();
        while let Some((k, v)) = entries.next_entry()? {
            if min.is_some_and(|m| k.as_slice() < m) {
                continue;
            }
            if max.is_some_and(|m| k.as_slice() > m) {
                break;
            }
            out.push((k, v));
        }
        Ok(out)
    }

    /// Reads the whole data section and verifies its checksum.
    pub fn entries(&self) -> Result<Vec<Entry>> {
        let mut file = File::open(&self.path)?;
        let mut data = vec![0u8; self.index_offset as usize];
        file.read_exact(&mut data)?;

        if CRC32.checksum(&data) != self.checksum {
            return Err(Error::ChecksumMismatch);
        }

        let mut cursor = Cursor::new(data.as_slice());
        let mut out = Vec::with_capacity(self.entry_count as usize);
        while cursor.position() < self.index_offset {
            out.push(decode_entry(&mut cursor).map_err(|e| Error::Decode("table entry", e))?);
        }
        Ok(out)
    }

    fn seek_offset(&self, key: &[u8]) -> u64 {
        let pos = self.index.partition_point(|(k, _)| k.as_slice() <= key);
        if pos == 0 {
            0
        } else {
            self.index[pos - 1].1
        }
    }

    fn entries_from(&self, offset: u64) -> Result<EntryReader> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(EntryReader {
            reader: BufReader::new(file),
            position: offset,
            end: self.index_offset,
        })
    }
}

struct EntryReader {
    reader: BufReader<File>,
    position: u64,
    end: u64,
}

impl EntryReader {
    fn next_entry(&mut self) -> Result<Option<Entry>> {
        if self.position >= self.end {
            return Ok(None);
        }
        let entry = decode_entry(&mut self.reader).map_err(|e| Error::Decode("table entry", e))?;
        self.position += encoded_len(&entry) as u64;
        Ok(Some(entry))
    }
}

fn encoded_len(entry: &Entry) -> usize {
    9 + entry.0.len() + entry.1.as_ref().map_or(0, |v| v.len())
}

fn encode_entry<W: Write>(w: &mut W, key: &[u8], value: Option<&[u8]>) -> io::Result<()> {
    let (flag, value) = match value {
        Some(v) => (FLAG_VALUE, v),
        None => (FLAG_TOMBSTONE, &[][..]),
    };
    w.write_u8(flag)?;
    w.write_u32::<BigEndian>(key.len() as u32)?;
    w.write_u32::<BigEndian>(value.len() as u32)?;
    w.write_all(key)?;
    w.write_all(value)
}

fn decode_entry<R: Read>(r: &mut R) -> io::Result<Entry> {
    let flag = r.read_u8()?;
    let key_len = r.read_u32::<BigEndian>()? as usize;
    let value_len = r.read_u32::<BigEndian>()? as usize;

    let mut key = vec![0u8; key_len];
    r.read_exact(&mut key)?;
    let mut value = vec![0u8; value_len];
    r.read_exact(&mut value)?;

    match flag {
        FLAG_VALUE => Ok((key, Some(value))),
        FLAG_TOMBSTONE => Ok((key, None)),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown entry flag {}", other),
        )),
    }
}

fn encode_index<W: Write>(w: &mut W, index: &[(Vec<u8>, u64)]) -> io::Result<()> {
    w.write_u32::<BigEndian>(index.len() as u32)?;
    for (key, offset) in index {
        w.write_u32::<BigEndian>(key.len() as u32)?;
        w.write_all(key)?;
        w.write_u64::<BigEndian>(*offset)?;
    }
    Ok(())
}

fn decode_index(cursor: &mut Cursor<&[u8]>) -> io::Result<Vec<(Vec<u8>, u64)>> {
    let count = cursor.read_u32::<BigEndian>()? as usize;
    let mut index = Vec::with_capacity(count);
    for _ in 0..count {
        let key_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut key = vec![0u8; key_len];
        cursor.read_exact(&mut key)?;
        let offset = cursor.read_u64::<BigEndian>()?;
        index.push((key, offset));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_table(path: &Path, entries: &[Entry]) -> TableSummary {
        let mut writer = TableWriter::create(path).expect("Failed to create table");
        for (key, value) in entries {
            writer.add(key, value.as_deref()).expect("Failed to add entry");
        }
        writer.finish().expect("Failed to finish table")
    }

    fn sample(n: usize) -> Vec<Entry> {
        (0..n)
            .map(|i| {
                let key = format!("key_{:03}", i).into_bytes();
                let value = if i % 10 == 7 {
                    None
                } else {
                    Some(format!("value_{:03}", i).into_bytes())
                };
                (key, value)
            })
            .collect()
    }

    #[test]
    fn test_write_and_get() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000001.sst");
        let entries = sample(200);

        let summary = write_table(&path, &entries);
        assert_eq!(summary.entry_count, 200);
        assert_eq!(summary.min_key, b"key_000");
        assert_eq!(summary.max_key, b"key_199");

        let reader = TableReader::open(&path)?;
        assert_eq!(reader.entry_count(), 200);
        for (key, value) in &entries {
            assert_eq!(reader.get(key)?, Some(value.clone()), "key {:?}", key);
        }
        assert_eq!(reader.get(b"key_0005")?, None);
        assert_eq!(reader.get(b"a")?, None);
        assert_eq!(reader.get(b"zzz")?, None);
        Ok(())
    }

    #[test]
    fn test_scan_bounds() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000002.sst");
        let entries = sample(150);
        write_table(&path, &entries);

        let reader = TableReader::open(&path)?;

        let range = reader.scan(Some(&b"key_060"[..]), Some(&b"key_070"[..]))?;
        assert_eq!(range, entries[60..=70].to_vec());

        let head = reader.scan(None, Some(&b"key_002"[..]))?;
        assert_eq!(head, entries[..=2].to_vec());

        let tail = reader.scan(Some(&b"key_148"[..]), None)?;
        assert_eq!(tail, entries[148..].to_vec());

        assert!(reader.scan(Some(&b"x"[..]), None)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_entries_checksum() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("000003.sst");
        let entries = sample(20);
        write_table(&path, &entries);

        let reader = TableReader::open(&path)?;
        assert_eq!(reader.entries()?, entries);

        // Flip one byte in the data section
        let mut bytes = std::fs::read(&path)?;
        bytes[12] ^= 0xff;
        std::fs::write(&path, &bytes)?;

        let reader = TableReader::open(&path)?;
        assert!(matches!(reader.entries(), Err(Error::ChecksumMismatch)));
        Ok(())
    }

    #[test]
    fn test_out_of_order_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut writer = TableWriter::create(dir.path().join("bad.sst"))?;
        writer.add(b"b", Some(&b"1"[..]))?;
        assert!(matches!(
            writer.add(b"a", Some(&b"2"[..])),
            Err(Error::InvalidState(_))
        ));
        Ok(())
    }

    #[test]
    fn test_empty_table() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.sst");
        let summary = write_table(&path, &[]);
        assert_eq!(summary.entry_count, 0);

        let reader = TableReader::open(&path)?;
        assert!(reader.entries()?.is_empty());
        assert_eq!(reader.get(b"any")?, None);
        Ok(())
    }
}
