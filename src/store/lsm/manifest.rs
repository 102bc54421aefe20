//! Level/table metadata of an LSM store, persisted as one `MANIFEST` file.
//!
//! The file is rewritten whole on every change: written to `MANIFEST.tmp`,
//! synced, then renamed over the old manifest.
//!
//! ```text
//! [magic u32][payload len u32][payload][crc32 u32]
//! payload = [next table id u64][level count u32] LevelMeta*
//! ```

use crate::error::Result;
use crate::Error;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP: &str = "MANIFEST.tmp";
const MAGIC: u32 = 0x414d_4d46;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub id: u64,
    pub level: u32,
    pub size: u64,
    pub entry_count: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

impl TableMeta {
    pub fn encode_into<W: Write>(&self, buf: &mut W) -> io::Result<()> {
        buf.write_u64::<BigEndian>(self.id)?;
        buf.write_u32::<BigEndian>(self.level)?;
        buf.write_u64::<BigEndian>(self.size)?;
        buf.write_u64::<BigEndian>(self.entry_count)?;

        buf.write_u32::<BigEndian>(self.min_key.len() as u32)?;
        buf.write_all(&self.min_key)?;

        buf.write_u32::<BigEndian>(self.max_key.len() as u32)?;
        buf.write_all(&self.max_key)
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let id = cursor.read_u64::<BigEndian>()?;
        let level = cursor.read_u32::<BigEndian>()?;
        let size = cursor.read_u64::<BigEndian>()?;
        let entry_count = cursor.read_u64::<BigEndian>()?;

        let min_key_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut min_key = vec![0u8; min_key_len];
        cursor.read_exact(&mut min_key)?;

        let max_key_len = cursor.read_u32::<BigEndian>()? as usize;
        let mut max_key = vec![0u8; max_key_len];
        cursor.read_exact(&mut max_key)?;

        Ok(TableMeta {
            id,
            level,
            size,
            entry_count,
            min_key,
            max_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LevelMeta {
    pub level: u32,
    pub tables: Vec<TableMeta>,
}

impl LevelMeta {
    pub fn encode_into<W: Write>(&self, buf: &mut W) -> io::Result<()> {
        buf.write_u32::<BigEndian>(self.level)?;
        buf.write_u32::<BigEndian>(self.tables.len() as u32)?;
        for table in &self.tables {
            table.encode_into(buf)?;
        }
        Ok(())
    }

    pub fn decode_from(cursor: &mut Cursor<&[u8]>) -> io::Result<Self> {
        let level = cursor.read_u32::<BigEndian>()?;
        let table_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut tables = Vec::with_capacity(table_count);
        for _ in 0..table_count {
            tables.push(TableMeta::decode_from(cursor)?);
        }
        Ok(LevelMeta { level, tables })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub next_table_id: u64,
    pub levels: Vec<LevelMeta>,
}

impl Manifest {
    /// Loads the manifest of `dir`, or `None` for a fresh directory.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let magic = file
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("manifest magic", e))?;
        if magic != MAGIC {
            return Err(Error::Decode(
                "manifest magic",
                io::Error::new(io::ErrorKind::InvalidData, "bad magic"),
            ));
        }

        let len = file
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("manifest length", e))? as usize;
        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .map_err(|e| Error::Decode("manifest payload", e))?;
        let checksum = file
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("manifest checksum", e))?;

        if CRC32.checksum(&payload) != checksum {
            return Err(Error::ChecksumMismatch);
        }

        Self::decode(&payload)
            .map(Some)
            .map_err(|e| Error::Decode("manifest payload", e))
    }

    /// Atomically replaces the manifest of `dir`.
    pub fn store(&self, dir: &Path) -> Result<()> {
        let mut payload = Vec::new();
        self.encode_into(&mut payload)
            .map_err(|e| Error::Encode("manifest", e))?;

        let tmp = dir.join(MANIFEST_TMP);
        {
            let mut file = File::create(&tmp)?;
            file.write_u32::<BigEndian>(MAGIC)?;
            file.write_u32::<BigEndian>(payload.len() as u32)?;
            file.write_all(&payload)?;
            file.write_u32::<BigEndian>(CRC32.checksum(&payload))?;
            file.sync_all()?;
        }
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    fn encode_into<W: Write>(&self, buf: &mut W) -> io::Result<()> {
        buf.write_u64::<BigEndian>(self.next_table_id)?;
        buf.write_u32::<BigEndian>(self.levels.len() as u32)?;
        for level in &self.levels {
            level.encode_into(buf)?;
        }
        Ok(())
    }

    fn decode(payload: &[u8]) -> io::Result<Self> {
        let mut cursor = Cursor::new(payload);
        let next_table_id = cursor.read_u64::<BigEndian>()?;
        let level_count = cursor.read_u32::<BigEndian>()? as usize;
        let mut levels = Vec::with_capacity(level_count);
        for _ in 0..level_count {
            levels.push(LevelMeta::decode_from(&mut cursor)?);
        }
        Ok(Self {
            next_table_id,
            levels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table_meta(id: u64, level: u32) -> TableMeta {
        TableMeta {
            id,
            level,
            size: 1024,
            entry_count: 100,
            min_key: vec![1, 2, 3],
            max_key: vec![9, 8, 7],
        }
    }

    #[test]
    fn test_table_meta_roundtrip() {
        let original = create_test_table_meta(42, 0);
        let mut buf = Vec::new();
        original.encode_into(&mut buf).unwrap();

        let mut cursor = Cursor::new(buf.as_slice());
        let decoded = TableMeta::decode_from(&mut cursor).expect("Failed to decode");
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_missing_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert_eq!(Manifest::load(dir.path())?, None);
        Ok(())
    }

    #[test]
    fn test_store_and_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = Manifest {
            next_table_id: 7,
            levels: vec![
                LevelMeta {
                    level: 0,
                    tables: vec![create_test_table_meta(5, 0), create_test_table_meta(6, 0)],
                },
                LevelMeta {
                    level: 1,
                    tables: vec![create_test_table_meta(4, 1)],
                },
            ],
        };

        manifest.store(dir.path())?;
        assert!(!dir.path().join(MANIFEST_TMP).exists());
        assert_eq!(Manifest::load(dir.path())?, Some(manifest));
        Ok(())
    }

    #[test]
    fn test_corrupted_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manifest = Manifest {
            next_table_id: 3,
            levels: vec![LevelMeta {
                level: 0,
                tables: vec![create_test_table_meta(1, 0)],
            }],
        };
        manifest.store(dir.path())?;

        let path = dir.path().join(MANIFEST_FILE);
        let mut bytes = fs::read(&path)?;
        bytes[10] ^= 0x01;
        fs::write(&path, &bytes)?;

        assert!(matches!(
            Manifest::load(dir.path()),
            Err(Error::ChecksumMismatch)
        ));
        Ok(())
    }
}
