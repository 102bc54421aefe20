//! Adaptive merging: a secondary index that builds itself from queries.
//!
//! ```text
//!            insert                 psearch / rsearch / delete
//!              │                          │
//!              ▼                 ┌────────┴─────────┐
//!   ┌─────────────────────┐      ▼ (caller thread)  ▼ (worker)
//!   │    Adaptive Log     │  touch + return     Secondary Store
//!   │  RAM buffer         │  matching records   (LSM, secondary-keyed)
//!   │  segments [0..n]    │ ─────── migrate ──────────▲
//!   │  journal            │
//!   └─────────────────────┘
//!              ▲
//!              │ bootstrap: one segment per primary table
//!       Primary Store
//! ```
//!
//! The log starts as a re-keyed copy of every primary record. Each query
//! moves the records it finds into the secondary store, so every record is
//! read from the log at most once. In-memory segment bounds shrink as records
//! are touched, letting later queries skip segments without reading them.

pub mod index;
pub mod journal;
pub mod log;
pub mod segment;

pub use index::AdaptiveMergingIndex;
pub use journal::QueryJournal;
pub use log::AdaptiveLog;
pub use segment::LogSegment;
