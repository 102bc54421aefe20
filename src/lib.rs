pub mod adaptive;
pub mod config;
pub mod dumper;
pub mod error;
pub mod flock;
pub mod record;
pub mod scheduler;
pub mod store;

pub use adaptive::{AdaptiveLog, AdaptiveMergingIndex};
pub use config::{IndexConfig, LsmConfig, SchedulerConfig};
pub use dumper::{SegmentDumper, SegmentId};
pub use error::{Error, Result};
pub use record::Record;
pub use scheduler::Scheduler;
pub use store::{FullScanIndex, LsmStore, OrderedStore, SortedMapStore};
