//! World-state access
//!
//! Two seams:
//!
//! - [`WorldState`] is what contract code sees while a transaction executes.
//!   Reads hit committed state, writes are buffered.
//! - [`StateStore`] is the committed key/value store owned by a peer. It is
//!   only mutated by applying a whole [`WriteSet`] at commit time.

use crate::{scan::RangeScan, Result};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Raw key/value pair as stored
pub type KeyValue = (String, Vec<u8>);

/// Contract-facing state stub
pub trait WorldState {
    /// Read the value stored at `key`
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write `value` at `key`
    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`
    fn delete_state(&mut self, key: &str) -> Result<()>;

    /// Scan `[start, end)`; an empty bound is open-ended
    fn get_state_by_range(&self, start: &str, end: &str) -> Result<RangeScan<'_>>;
}

/// Committed key/value store
pub trait StateStore: Send + Sync {
    /// Read a committed value
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Lazy scan over `[start, end)` in key order
    fn scan(&self, start: &str, end: &str) -> Result<RangeScan<'_>>;

    /// Apply a write set atomically
    fn apply(&self, writes: &WriteSet) -> Result<()>;
}

/// Buffered mutations of one or more transactions, keyed for determinism
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    /// `None` marks a delete
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl WriteSet {
    /// Empty write set
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a put
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.writes.insert(key.into(), Some(value));
    }

    /// Record a delete
    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.insert(key.into(), None);
    }

    /// Pending write for `key`: `Some(None)` is a pending delete
    pub fn get(&self, key: &str) -> Option<Option<&[u8]>> {
        self.writes.get(key).map(|v| v.as_deref())
    }

    /// Fold `other` on top of this set; later writes win
    pub fn merge(&mut self, other: &WriteSet) {
        for (key, value) in &other.writes {
            self.writes.insert(key.clone(), value.clone());
        }
    }

    /// Iterate writes in key order
    pub fn iter(&self) -> btree_map::Iter<'_, String, Option<Vec<u8>>> {
        self.writes.iter()
    }

    /// Number of keys touched
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

impl<'a> IntoIterator for &'a WriteSet {
    type Item = (&'a String, &'a Option<Vec<u8>>);
    type IntoIter = btree_map::Iter<'a, String, Option<Vec<u8>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Whether `key` falls inside `[start, end)` with empty bounds open
pub fn in_range(key: &str, start: &str, end: &str) -> bool {
    (start.is_empty() || key >= start) && (end.is_empty() || key < end)
}
