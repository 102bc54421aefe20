//! Key ranges already fully processed by the adaptive log.

/// Inclusive `[min, max]` ranges, kept sorted by `min`.
///
/// A range enters the journal once every matching log record has been
/// touched. An insert drops every range that contains the new key, so a
/// covered query never has anything left to find.
#[derive(Debug, Default, Clone)]
pub struct QueryJournal {
    ranges: Vec<(Vec<u8>, Vec<u8>)>,
}

impl QueryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a single journaled range contains all of `[min, max]`.
    pub fn covers(&self, min: &[u8], max: &[u8]) -> bool {
        self.ranges
            .iter()
            .take_while(|(start, _)| start.as_slice() <= min)
            .any(|(_, end)| end.as_slice() >= max)
    }

    pub fn record(&mut self, min: &[u8], max: &[u8]) {
        let pos = self.ranges.partition_point(|(start, _)| start.as_slice() <= min);
        self.ranges.insert(pos, (min.to_vec(), max.to_vec()));
    }

    /// Forgets every range containing `key`. Returns how many were dropped.
    pub fn invalidate(&mut self, key: &[u8]) -> usize {
        let before = self.ranges.len();
        self.ranges
            .retain(|(start, end)| key < start.as_slice() || key > end.as_slice());
        before - self.ranges.len()
    }

    pub fn ranges(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
