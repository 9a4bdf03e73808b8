//! In-process development network
//!
//! One endorsing peer and one ordering actor sharing a [`StateStore`]. It
//! speaks the same [`GatewayTransport`] protocol as a real gateway peer, so
//! the session, typed client and CLI run unchanged against it. [`serve`]
//! exposes the same network over gRPC and TLS.

mod orderer;
mod peer;
mod server;

pub use orderer::{CommitStatus, OrderedTransaction, OrdererHandle};
pub use peer::Peer;
pub use server::{serve, tls_config, NetworkService};

use crate::{
    config::GatewayConfig,
    error::Stage,
    identity::SigningIdentity,
    metrics::OrdererMetrics,
    proto::{
        CommitStatusRequest, CommitStatusResponse, EndorseRequest, EndorseResponse,
        EvaluateRequest, EvaluateResponse, SignedCommitStatusRequest, SubmitRequest,
        SubmitResponse,
    },
    session::Gateway,
    transport::GatewayTransport,
    Error, Result,
};
use async_trait::async_trait;
use cert_contract::{MemoryStore, RocksStore, StateStore, StoreConfig};
use ed25519_dalek::VerifyingKey;
use parking_lot::Mutex;
use prost::Message;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// MSP of the development peer
pub const PEER_MSP_ID: &str = "Org1MSP";

/// Single-peer network running inside the process
pub struct LocalNetwork {
    peer: Peer,
    orderer: OrdererHandle,
    task: Mutex<Option<JoinHandle<()>>>,
    store: Arc<dyn StateStore>,
    metrics: OrdererMetrics,
    closed: AtomicBool,
}

impl LocalNetwork {
    /// Open the configured store and start the orderer
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn start(config: &GatewayConfig) -> Result<Self> {
        let store: Arc<dyn StateStore> = match &config.local.data_dir {
            Some(dir) => Arc::new(RocksStore::open(&StoreConfig::at(dir)).map_err(|e| {
                Error::Configuration(format!(
                    "cannot open world state at {}: {}",
                    dir.display(),
                    e.message()
                ))
            })?),
            None => Arc::new(MemoryStore::new()),
        };
        Self::with_store(store, config)
    }

    /// Start over an existing store
    pub fn with_store(store: Arc<dyn StateStore>, config: &GatewayConfig) -> Result<Self> {
        let metrics = OrdererMetrics::new()?;
        let (orderer, task) = OrdererHandle::spawn(store.clone(), &config.local, metrics.clone());
        let peer = Peer::new(
            store.clone(),
            SigningIdentity::generate(PEER_MSP_ID),
            config.channel_name.clone(),
            config.chaincode_name.clone(),
        );

        tracing::info!(
            channel = %config.channel_name,
            chaincode = %config.chaincode_name,
            persistent = config.local.data_dir.is_some(),
            "Development network started"
        );

        Ok(Self {
            peer,
            orderer,
            task: Mutex::new(Some(task)),
            store,
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Trust signatures from `key` for members of `msp_id`
    pub fn register_member(&self, msp_id: &str, key: VerifyingKey) {
        self.peer.register_member(msp_id, key);
    }

    /// Committed world state
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Orderer metrics
    pub fn metrics(&self) -> &OrdererMetrics {
        &self.metrics
    }

    /// Endorsing peer
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Cut a block now instead of waiting for the batch timeout
    pub async fn flush(&self) -> Result<()> {
        self.orderer.flush().await
    }

    fn ensure_open(&self, stage: Stage) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection_refused(stage, "development network is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewayTransport for LocalNetwork {
    async fn evaluate(&self, request: EvaluateRequest, _: Duration) -> Result<EvaluateResponse> {
        self.ensure_open(Stage::Evaluate)?;
        self.peer.evaluate(request)
    }

    async fn endorse(&self, request: EndorseRequest, _: Duration) -> Result<EndorseResponse> {
        self.ensure_open(Stage::Endorse)?;
        self.peer.endorse(request)
    }

    async fn submit(&self, request: SubmitRequest, _: Duration) -> Result<SubmitResponse> {
        self.ensure_open(Stage::Submit)?;
        let transaction = self.peer.validate(request)?;
        self.orderer.broadcast(transaction).await?;
        Ok(SubmitResponse {})
    }

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        _: Duration,
    ) -> Result<CommitStatusResponse> {
        self.ensure_open(Stage::CommitStatus)?;

        let query = CommitStatusRequest::decode(request.request.as_slice()).map_err(|e| {
            Error::remote_rejected(Stage::CommitStatus, format!("malformed request: {}", e))
        })?;
        if !self
            .peer
            .authenticate(&query.identity, &request.request, &request.signature)
        {
            return Err(Error::remote_rejected(
                Stage::CommitStatus,
                "access denied: request signature did not verify",
            ));
        }

        let status = self.orderer.commit_status(query.transaction_id).await?;
        Ok(CommitStatusResponse {
            result: status.code as i32,
            block_number: status.block_number,
        })
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.orderer.shutdown().await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Orderer task failed");
            }
        }
        tracing::info!("Development network closed");
    }
}

impl fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("peer", &self.peer)
            .field("orderer", &self.orderer)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Gateway<LocalNetwork> {
    /// Session against a fresh development network, with a generated client
    /// identity registered as a member
    pub async fn open_local(config: &GatewayConfig) -> Result<Self> {
        let network = LocalNetwork::start(config).await?;
        let identity = SigningIdentity::generate(config.msp_id.clone());
        network.register_member(&config.msp_id, identity.verifying_key());

        Gateway::new(network, identity, config)
    }
}
