//! Buffered LSM store.
//!
//! ```text
//! ┌─────────────────┐
//! │  Write Buffer   │  records + tombstones (SkipList)
//! └─────────────────┘
//!          │ flush at buffer_capacity
//!          ▼
//!   ┌─────────────┐
//!   │  Level 0    │  one table per flush, ranges may overlap
//!   └─────────────┘
//!          │ compaction above level0_compaction_threshold
//!          ▼
//!   ┌─────────────┐
//!   │  Level 1    │  disjoint tables, no tombstones
//!   └─────────────┘
//! ```
//!
//! ## Read Path
//! 1. Write buffer
//! 2. Level 0 tables, newest to oldest
//! 3. Level 1 tables
//!
//! The set of tables is recorded in a `MANIFEST` that is rewritten atomically
//! after every flush and compaction, so a reopened store sees every persisted
//! table. Records still in the write buffer at a crash are lost; there is no
//! WAL.

pub mod buffer;
pub mod compaction;
pub mod level;
pub mod manifest;
pub mod store;
pub mod table;

pub use level::{Level, SsTable};
pub use store::{LsmState, LsmStore};
pub use table::{Entry, TableReader, TableWriter};
