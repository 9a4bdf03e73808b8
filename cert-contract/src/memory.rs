//! In-memory state store
//!
//! Used by tests and by the development network when no data directory is
//! configured. The map sits behind an `Arc` and writers copy on write, so a
//! scan walks the snapshot it started from without holding the lock and
//! never observes a half-applied write set.

use crate::{
    scan::RangeScan,
    state::{in_range, KeyValue, StateStore, WriteSet},
    Result,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

type Entries = BTreeMap<String, Vec<u8>>;

/// BTreeMap-backed committed state
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Arc<Entries>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn snapshot(&self) -> Arc<Entries> {
        Arc::clone(&self.entries.read())
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn scan(&self, start: &str, end: &str) -> Result<RangeScan<'_>> {
        let next = if start.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(start.to_string())
        };

        Ok(RangeScan::new(SnapshotCursor {
            snapshot: self.snapshot(),
            next,
            end: end.to_string(),
            done: false,
        }))
    }

    fn apply(&self, writes: &WriteSet) -> Result<()> {
        let mut guard = self.entries.write();
        // Clones the map only while a scan still holds the old snapshot
        let entries = Arc::make_mut(&mut guard);
        for (key, value) in writes {
            match value {
                Some(bytes) => {
                    entries.insert(key.clone(), bytes.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        Ok(())
    }
}

/// Forward cursor over a frozen map; each step is one tree lookup
struct SnapshotCursor {
    snapshot: Arc<Entries>,
    next: Bound<String>,
    end: String,
    done: bool,
}

impl Iterator for SnapshotCursor {
    type Item = Result<KeyValue>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let lower = std::mem::replace(&mut self.next, Bound::Unbounded);
        let entry = self
            .snapshot
            .range::<String, _>((lower, Bound::Unbounded))
            .next();

        match entry {
            Some((key, value)) if in_range(key, "", &self.end) => {
                self.next = Bound::Excluded(key.clone());
                Some(Ok((key.clone(), value.clone())))
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let mut writes = WriteSet::new();
        for key in ["a", "b", "c", "d"] {
            writes.put(key, key.as_bytes().to_vec());
        }
        store.apply(&writes).unwrap();
        store
    }

    fn keys(store: &MemoryStore, start: &str, end: &str) -> Vec<String> {
        store
            .scan(start, end)
            .unwrap()
            .map(|entry| entry.unwrap().key)
            .collect()
    }

    #[test]
    fn test_scan_bounds() {
        let store = seeded();
        assert_eq!(keys(&store, "", ""), vec!["a", "b", "c", "d"]);
        assert_eq!(keys(&store, "b", ""), vec!["b", "c", "d"]);
        assert_eq!(keys(&store, "", "c"), vec!["a", "b"]);
        assert_eq!(keys(&store, "b", "d"), vec!["b", "c"]);
    }

    #[test]
    fn test_scan_is_isolated_from_later_writes() {
        let store = seeded();
        let mut scan = store.scan("", "").unwrap();
        assert_eq!(scan.next().unwrap().unwrap().key, "a");

        let mut writes = WriteSet::new();
        writes.delete("b");
        writes.put("bb", b"new".to_vec());
        store.apply(&writes).unwrap();

        let rest: Vec<String> = scan.map(|entry| entry.unwrap().key).collect();
        assert_eq!(rest, vec!["b", "c", "d"]);
        assert_eq!(keys(&store, "", ""), vec!["a", "bb", "c", "d"]);
    }

    #[test]
    fn test_scan_stops_at_end() {
        let store = seeded();
        let mut scan = store.scan("b", "c").unwrap();
        assert_eq!(scan.next().unwrap().unwrap().key, "b");
        assert!(scan.next().is_none());
        assert!(scan.next().is_none());
    }

    #[test]
    fn test_apply_deletes() {
        let store = seeded();
        let mut writes = WriteSet::new();
        writes.delete("b");
        writes.delete("missing");
        store.apply(&writes).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get("b").unwrap(), None);
    }
}
