//! Transaction simulation
//!
//! Executes contract code against committed state without touching it. Point
//! reads see the transaction's own pending writes; range scans read committed
//! state only. The resulting [`WriteSet`] is what endorsement signs and what
//! the orderer eventually applies.
//!
//! Point reads that find nothing are remembered. A transaction that relied on
//! a key being absent (Create) must be rejected at commit if that key was
//! written in the meantime.

use crate::{
    scan::RangeScan,
    state::{StateStore, WorldState, WriteSet},
    Error, Result,
};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;

/// Buffers writes on top of a committed store
pub struct TxSimulator<'a> {
    store: &'a dyn StateStore,
    writes: WriteSet,
    absent_reads: RefCell<BTreeSet<String>>,
}

impl<'a> TxSimulator<'a> {
    /// Start a simulation over `store`
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self {
            store,
            writes: WriteSet::new(),
            absent_reads: RefCell::new(BTreeSet::new()),
        }
    }

    /// Writes recorded so far
    pub fn write_set(&self) -> &WriteSet {
        &self.writes
    }

    /// Committed keys read while absent (or empty)
    pub fn absent_reads(&self) -> BTreeSet<String> {
        self.absent_reads.borrow().clone()
    }

    /// Finish the simulation
    pub fn into_write_set(self) -> WriteSet {
        self.writes
    }

    /// Finish the simulation, keeping the absent-key reads
    pub fn into_parts(self) -> (BTreeSet<String>, WriteSet) {
        (self.absent_reads.into_inner(), self.writes)
    }
}

impl WorldState for TxSimulator<'_> {
    fn get_state(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.map(<[u8]>::to_vec)),
            None => {
                let value = self.store.get(key)?;
                if value.as_ref().map_or(true, Vec::is_empty) {
                    self.absent_reads.borrow_mut().insert(key.to_string());
                }
                Ok(value)
            }
        }
    }

    fn put_state(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Validation("key must not be empty".to_string()));
        }
        self.writes.put(key, value);
        Ok(())
    }

    fn delete_state(&mut self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(Error::Validation("key must not be empty".to_string()));
        }
        self.writes.delete(key);
        Ok(())
    }

    fn get_state_by_range(&self, start: &str, end: &str) -> Result<RangeScan<'_>> {
        self.store.scan(start, end)
    }
}

impl fmt::Debug for TxSimulator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxSimulator")
            .field("pending_writes", &self.writes.len())
            .field("absent_reads", &self.absent_reads.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_reads_own_writes() {
        let store = MemoryStore::new();
        let mut seed = WriteSet::new();
        seed.put("a", b"committed".to_vec());
        store.apply(&seed).unwrap();

        let mut sim = TxSimulator::new(&store);
        assert_eq!(sim.get_state("a").unwrap(), Some(b"committed".to_vec()));

        sim.put_state("a", b"pending".to_vec()).unwrap();
        assert_eq!(sim.get_state("a").unwrap(), Some(b"pending".to_vec()));

        sim.delete_state("a").unwrap();
        assert_eq!(sim.get_state("a").unwrap(), None);

        // Committed state untouched until applied
        assert_eq!(store.get("a").unwrap(), Some(b"committed".to_vec()));
    }

    #[test]
    fn test_absent_reads_recorded() {
        let store = MemoryStore::new();
        let mut seed = WriteSet::new();
        seed.put("live", b"1".to_vec());
        seed.put("blank", Vec::new());
        store.apply(&seed).unwrap();

        let mut sim = TxSimulator::new(&store);
        sim.get_state("live").unwrap();
        sim.get_state("blank").unwrap();
        sim.get_state("missing").unwrap();

        // Reads of the transaction's own writes never reach committed state
        sim.put_state("own", b"x".to_vec()).unwrap();
        sim.get_state("own").unwrap();

        let (absent, writes) = sim.into_parts();
        assert_eq!(
            absent.into_iter().collect::<Vec<_>>(),
            vec!["blank".to_string(), "missing".to_string()]
        );
        assert_eq!(writes.len(), 1);
    }

    #[test]
    fn test_range_scan_reads_committed_only() {
        let store = MemoryStore::new();
        let mut sim = TxSimulator::new(&store);
        sim.put_state("x", b"1".to_vec()).unwrap();
        assert_eq!(sim.get_state_by_range("", "").unwrap().count(), 0);
    }

    #[test]
    fn test_empty_key_rejected() {
        let store = MemoryStore::new();
        let mut sim = TxSimulator::new(&store);
        assert!(matches!(
            sim.put_state("", b"1".to_vec()),
            Err(Error::Validation(_))
        ));
        assert!(sim.into_write_set().is_empty());
    }
}
