//! Certificate Gateway
//!
//! Client side of the certificate ledger: an authenticated session that
//! distinguishes read-only evaluation from state-changing submission.
//!
//! # Architecture
//!
//! - **Session**: One explicit [`Gateway`] per process, opened once and closed once
//! - **Identity**: MSP id plus credential, Ed25519 signatures over SHA-256 digests
//! - **Transport**: gRPC over TLS ([`GrpcTransport`]) or the in-process [`LocalNetwork`]
//! - **Deadlines**: evaluate, endorse, submit and commit-status each run under their own timer
//!
//! # Guarantees
//!
//! - Evaluate never mutates world state
//! - Every stage fails with a deadline-exceeded error rather than hanging
//! - No automatic retries; submit retries could duplicate effects

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod local;
pub mod metrics;
pub mod proto;
pub mod session;
pub mod transport;

// Re-exports
pub use client::CertificateClient;
pub use config::{CallTimeouts, GatewayConfig, LocalNetworkConfig};
pub use error::{Error, ErrorKind, GatewayErrorKind, Result, Stage};
pub use identity::{Identity, SigningIdentity};
pub use local::LocalNetwork;
pub use metrics::{GatewayMetrics, OrdererMetrics};
pub use session::Gateway;
pub use transport::{GatewayTransport, GrpcTransport};
