use std::path::PathBuf;

/// Configuration for the buffered LSM store
#[derive(Debug, Clone)]
pub struct LsmConfig {
    /// Directory path for the store
    pub dir: PathBuf,

    /// Records held in the write buffer before it is written as an L0 table
    /// (default: 100_000). Zero disables buffering.
    pub buffer_capacity: usize,

    /// Level 0 table count above which L0 is merged into L1 (default: 4)
    pub level0_compaction_threshold: usize,

    /// Maximum entries per table produced by compaction (default: 64K)
    pub max_table_entries: usize,
}

impl Default for LsmConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./adamerge"),
            buffer_capacity: 100 * 1000,
            level0_compaction_threshold: 4,
            max_table_entries: 64 * 1024,
        }
    }
}

impl LsmConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set write buffer capacity
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set level 0 compaction threshold
    pub fn level0_compaction_threshold(mut self, threshold: usize) -> Self {
        self.level0_compaction_threshold = threshold;
        self
    }

    /// Set maximum entries per compacted table
    pub fn max_table_entries(mut self, entries: usize) -> Self {
        self.max_table_entries = entries.max(1);
        self
    }
}

/// Configuration for an adaptive merging index
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Secondary store directory (default: `<primary>_secIndex`)
    pub secondary_dir: Option<PathBuf>,

    /// Adaptive log directory (default: `<primary>_al`)
    pub log_dir: Option<PathBuf>,

    /// Write buffer capacity of the secondary store (default: 100_000)
    pub secondary_buffer_capacity: usize,

    /// RAM buffer capacity of the adaptive log (default: 1_000)
    pub al_buffer_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            secondary_dir: None,
            log_dir: None,
            secondary_buffer_capacity: 100 * 1000,
            al_buffer_capacity: 1000,
        }
    }
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secondary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.secondary_dir = Some(dir.into());
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn secondary_buffer_capacity(mut self, capacity: usize) -> Self {
        self.secondary_buffer_capacity = capacity;
        self
    }

    /// Set the adaptive log RAM buffer capacity. Values below 1 are raised to 1.
    pub fn al_buffer_capacity(mut self, capacity: usize) -> Self {
        self.al_buffer_capacity = capacity.max(1);
        self
    }

    /// Resolves the secondary store directory against the primary store location.
    pub fn resolve_secondary_dir(&self, primary: &str) -> PathBuf {
        self.secondary_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}_secIndex", primary)))
    }

    /// Resolves the adaptive log directory against the primary store location.
    pub fn resolve_log_dir(&self, primary: &str) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}_al", primary)))
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker threads (default: available hardware concurrency)
    pub threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
        }
    }
}

impl SchedulerConfig {
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }
}
