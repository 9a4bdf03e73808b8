//! World-state store settings

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where and how the committed world state is kept
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// RocksDB directory, created on open
    pub data_dir: PathBuf,

    /// Engine tuning
    pub tuning: StoreTuning,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/world-state"),
            tuning: StoreTuning::default(),
        }
    }
}

/// Block compression for stored records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Store blocks as-is
    None,
    /// Fast, light compression
    Lz4,
    /// Denser, slower compression
    Zstd,
}

impl std::str::FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "lz4" => Ok(Compression::Lz4),
            "zstd" => Ok(Compression::Zstd),
            other => Err(Error::Validation(format!("unknown compression: {}", other))),
        }
    }
}

/// RocksDB knobs; records are small JSON documents read by key far more often
/// than they are scanned
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreTuning {
    /// Memtable size (MB)
    pub write_buffer_mb: usize,

    /// Memtables kept before stalling writes
    pub write_buffers: i32,

    /// Compaction and flush threads
    pub background_jobs: i32,

    /// Bloom filter bits per key; existence checks precede every write
    pub bloom_bits_per_key: f64,

    /// Block compression
    pub compression: Compression,

    /// Collect RocksDB statistics
    pub statistics: bool,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            write_buffer_mb: 16,
            write_buffers: 2,
            background_jobs: 2,
            bloom_bits_per_key: 10.0,
            compression: Compression::Lz4,
            statistics: false,
        }
    }
}

impl StoreConfig {
    /// Default tuning under `data_dir`
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Read a TOML file; absent keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            Error::Validation(format!("invalid store config {}: {}", path.display(), e))
        })
    }

    /// Defaults overridden by `CERT_STORE_DATA_DIR` and `CERT_STORE_COMPRESSION`
    pub fn from_env() -> Result<Self> {
        let mut config = StoreConfig::default();

        if let Ok(dir) = std::env::var("CERT_STORE_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(compression) = std::env::var("CERT_STORE_COMPRESSION") {
            config.tuning.compression = compression.parse()?;
        }

        Ok(config)
    }
}
