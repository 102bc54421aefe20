//! Key/value records and the secondary key convention.
//!
//! Every value stored in a primary store starts with an 8 byte secondary key.
//! [`Record::swap_secondary`] re-keys a primary record by that prefix; the old
//! primary key moves into the value in front of the remaining payload.
//!
//! ```text
//! primary:    key = pk                value = sk[0..8] | payload
//! secondary:  key = sk[0..8]          value = pk | payload
//! ```

use crate::error::Result;
use crate::Error;

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// Length of the secondary key prefix carried in every value.
pub const SECONDARY_KEY_LEN: usize = 8;

/// An immutable key/value pair. Equality, ordering and hashing use the key only.
#[derive(Debug, Clone)]
pub struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Returns the secondary key carried in the first bytes of the value.
    pub fn secondary_key(&self) -> Result<&[u8]> {
        if self.value.len() < SECONDARY_KEY_LEN {
            return Err(Error::InvalidRecord(format!(
                "value of {} bytes is shorter than the {} byte secondary key",
                self.value.len(),
                SECONDARY_KEY_LEN
            )));
        }
        Ok(&self.value[..SECONDARY_KEY_LEN])
    }

    /// Derives the record keyed by secondary key: `(sk, pk | payload)`.
    pub fn swap_secondary(&self) -> Result<Record> {
        let secondary = self.secondary_key()?.to_vec();

        let mut value = Vec::with_capacity(self.key.len() + self.value.len() - SECONDARY_KEY_LEN);
        value.extend_from_slice(&self.key);
        value.extend_from_slice(&self.value[SECONDARY_KEY_LEN..]);

        tracing::trace!(
            key = %String::from_utf8_lossy(&self.key),
            secondary = %String::from_utf8_lossy(&secondary),
            "swapped record"
        );

        Ok(Record::new(secondary, value))
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Record {}

impl PartialOrd for Record {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Record {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_secondary() {
        let record = Record::new("pk000001", "sk000042payload");
        let swapped = record.swap_secondary().unwrap();

        assert_eq!(swapped.key(), b"sk000042");
        assert_eq!(swapped.value(), b"pk000001payload");
    }

    #[test]
    fn test_swap_secondary_exact_length() {
        let record = Record::new("pk", "12345678");
        let swapped = record.swap_secondary().unwrap();

        assert_eq!(swapped.key(), b"12345678");
        assert_eq!(swapped.value(), b"pk");
    }

    #[test]
    fn test_swap_short_value_rejected() {
        let record = Record::new("pk", "short");
        assert!(matches!(
            record.swap_secondary(),
            Err(Error::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_ordering_by_key_only() {
        let a = Record::new("a", "zzzzzzzz");
        let b = Record::new("b", "aaaaaaaa");
        assert!(a < b);
        assert_eq!(Record::new("a", "1"), Record::new("a", "2"));

        let mut records = vec![Record::new("c", "x"), a.clone(), b.clone()];
        records.sort();
        assert_eq!(records[0].key(), b"a");
        assert_eq!(records[2].key(), b"c");
    }
}
