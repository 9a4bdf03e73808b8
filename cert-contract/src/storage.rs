//! RocksDB world state
//!
//! One column family, `world_state`, maps `recordId` to canonical JSON.
//!
//! Keys are stored as their UTF-8 bytes, so RocksDB's bytewise comparator
//! gives the same order as the in-memory store.

use crate::{
    config::{Compression, StoreTuning},
    error::{Error, Result},
    scan::RangeScan,
    state::{KeyValue, StateStore, WriteSet},
    StoreConfig,
};
use rocksdb::{
    BlockBasedOptions, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType, Direction,
    IteratorMode, Options, WriteBatch, DB,
};
use std::fmt;
use std::sync::Arc;

const CF_WORLD_STATE: &str = "world_state";

/// Committed world state on disk
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Open the store, creating the directory and column family if needed
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let path = &config.data_dir;
        let tuning = &config.tuning;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(tuning.write_buffer_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(tuning.write_buffers);
        db_opts.set_max_background_jobs(tuning.background_jobs);
        if tuning.statistics {
            db_opts.enable_statistics();
        }

        let world_state =
            ColumnFamilyDescriptor::new(CF_WORLD_STATE, Self::world_state_options(tuning));
        let db = DB::open_cf_descriptors(&db_opts, path, vec![world_state])?;

        tracing::info!(path = ?path, compression = ?tuning.compression, "World state opened");

        Ok(Self { db: Arc::new(db) })
    }

    fn world_state_options(tuning: &StoreTuning) -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(match tuning.compression {
            Compression::None => DBCompressionType::None,
            Compression::Lz4 => DBCompressionType::Lz4,
            Compression::Zstd => DBCompressionType::Zstd,
        });

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_bloom_filter(tuning.bloom_bits_per_key, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_WORLD_STATE)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_WORLD_STATE)))
    }

    /// Flush and release the database lock
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("World state closed");
        Ok(())
    }
}

impl StateStore for RocksStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle()?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn scan(&self, start: &str, end: &str) -> Result<RangeScan<'_>> {
        let cf = self.cf_handle()?;
        let mode = if start.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(start.as_bytes(), Direction::Forward)
        };
        let end = end.to_string();

        let iter = self
            .db
            .iterator_cf(cf, mode)
            .map(|item| -> Result<KeyValue> {
                let (key, value) = item?;
                let key = String::from_utf8(key.into_vec())
                    .map_err(|e| Error::Storage(format!("Non UTF-8 key in world state: {}", e)))?;
                Ok((key, value.into_vec()))
            })
            .take_while(move |item: &Result<KeyValue>| match item {
                Ok((key, _)) => end.is_empty() || key.as_str() < end.as_str(),
                Err(_) => true,
            });

        Ok(RangeScan::new(iter))
    }

    fn apply(&self, writes: &WriteSet) -> Result<()> {
        let cf = self.cf_handle()?;
        let mut batch = WriteBatch::default();

        for (key, value) in writes {
            match value {
                Some(bytes) => batch.put_cf(cf, key.as_bytes(), bytes),
                None => batch.delete_cf(cf, key.as_bytes()),
            }
        }

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(keys = writes.len(), "Write set applied");

        Ok(())
    }
}

impl fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (RocksStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::at(temp_dir.path());
        (RocksStore::open(&config).unwrap(), temp_dir)
    }

    fn write_set(pairs: &[(&str, &str)]) -> WriteSet {
        let mut writes = WriteSet::new();
        for (key, value) in pairs {
            writes.put(*key, value.as_bytes().to_vec());
        }
        writes
    }

    #[test]
    fn test_storage_open() {
        let (store, _temp) = test_store();
        assert!(store.db.cf_handle(CF_WORLD_STATE).is_some());
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_apply_and_get() {
        let (store, _temp) = test_store();
        store.apply(&write_set(&[("R-1", "one"), ("R-2", "two")])).unwrap();

        assert_eq!(store.get("R-1").unwrap(), Some(b"one".to_vec()));

        let mut delete = WriteSet::new();
        delete.delete("R-1");
        store.apply(&delete).unwrap();
        assert_eq!(store.get("R-1").unwrap(), None);
        assert_eq!(store.get("R-2").unwrap(), Some(b"two".to_vec()));
    }

    #[test]
    fn test_scan_in_key_order() {
        let (store, _temp) = test_store();
        store
            .apply(&write_set(&[("c", "3"), ("a", "1"), ("b", "2"), ("d", "4")]))
            .unwrap();

        let all: Vec<String> = store
            .scan("", "")
            .unwrap()
            .map(|entry| entry.unwrap().key)
            .collect();
        assert_eq!(all, vec!["a", "b", "c", "d"]);

        let bounded: Vec<String> = store
            .scan("b", "d")
            .unwrap()
            .map(|entry| entry.unwrap().key)
            .collect();
        assert_eq!(bounded, vec!["b", "c"]);
    }

    #[test]
    fn test_reopen_keeps_state() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::at(temp_dir.path());

        let store = RocksStore::open(&config).unwrap();
        store.apply(&write_set(&[("R-1", "kept")])).unwrap();
        store.close().unwrap();

        let reopened = RocksStore::open(&config).unwrap();
        assert_eq!(reopened.get("R-1").unwrap(), Some(b"kept".to_vec()));
    }
}
