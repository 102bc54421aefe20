pub mod fullscan;
pub mod lsm;
pub mod sorted;

pub use fullscan::FullScanIndex;
pub use lsm::LsmStore;
pub use sorted::SortedMapStore;

use crate::error::Result;
use crate::record::Record;

/// Ordered key/value store with byte-wise key order.
///
/// Every store guards its own state, so all operations take `&self`.
pub trait OrderedStore: Send + Sync {
    /// Inserts or replaces the record stored under `record.key()`.
    fn insert(&self, record: Record) -> Result<()>;

    /// Removes the record for `key`, if any.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Looks up a single key. Returns zero or one record.
    fn psearch(&self, key: &[u8]) -> Result<Vec<Record>>;

    /// Returns every record with `min_key <= key <= max_key`. Empty if
    /// `min_key > max_key`.
    fn rsearch(&self, min_key: &[u8], max_key: &[u8]) -> Result<Vec<Record>>;

    /// Returns every live record.
    fn all_records(&self) -> Result<Vec<Record>>;

    /// Number of live records.
    fn count(&self) -> usize;

    /// Root directory of the store, empty for purely in-memory stores.
    fn location(&self) -> String;
}
