//! Certificate Contract
//!
//! Deterministic record contract executed by every ledger replica.
//!
//! # Architecture
//!
//! - **Canonical Encoding**: Every stored value is sorted-key, whitespace-free JSON
//! - **World State**: Contract code only sees the [`WorldState`] stub
//! - **Simulation**: Writes are captured in a [`WriteSet`] and applied on commit
//! - **Range Scans**: Lazy, forward-only cursors over the key namespace
//!
//! # Invariants
//!
//! - Unique keys: Create never overwrites a live record
//! - Existence: Update, Delete and Transfer only touch live records
//! - Deterministic replay: Same operations → same world state bytes

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod canonical;
pub mod config;
pub mod contract;
pub mod error;
pub mod fixtures;
pub mod memory;
pub mod scan;
pub mod simulator;
pub mod state;
pub mod storage;
pub mod types;

// Re-exports
pub use config::{Compression, StoreConfig, StoreTuning};
pub use contract::{CertificateContract, Operation};
pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use scan::{RangeScan, ScanEntry};
pub use simulator::TxSimulator;
pub use state::{StateStore, WorldState, WriteSet};
pub use storage::RocksStore;
pub use types::{Approval, Issuer, Payload, Record, RECORD_TYPE};
