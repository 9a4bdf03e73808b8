//! Transport seam between the session and the network
//!
//! The session only ever talks to a [`GatewayTransport`]. [`GrpcTransport`]
//! speaks gRPC over TLS to a real gateway peer; the development network in
//! [`crate::local`] implements the same trait in process.

use crate::{
    config::GatewayConfig,
    error::Stage,
    proto::{
        CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest, EvaluateResponse,
        GatewayClient, SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
    },
    Error, Result,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::error::Error as _;
use std::time::Duration;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

/// One round trip per protocol stage
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Read-only execution on one peer
    async fn evaluate(&self, request: EvaluateRequest, deadline: Duration)
        -> Result<EvaluateResponse>;

    /// Simulate and collect endorsements
    async fn endorse(&self, request: EndorseRequest, deadline: Duration)
        -> Result<EndorseResponse>;

    /// Hand a client-signed transaction to ordering
    async fn submit(&self, request: SubmitRequest, deadline: Duration) -> Result<SubmitResponse>;

    /// Wait for the commit outcome
    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        deadline: Duration,
    ) -> Result<CommitStatusResponse>;

    /// Release network resources; idempotent
    async fn close(&self);
}

/// gRPC transport over one shared TLS channel
#[derive(Debug)]
pub struct GrpcTransport {
    client: RwLock<Option<GatewayClient>>,
}

impl GrpcTransport {
    /// Establish the channel, bounded by `connect_timeout_ms`
    pub async fn connect(config: &GatewayConfig) -> Result<Self> {
        let endpoint = endpoint(config).await?;
        let deadline = config.connect_timeout();

        let channel = tokio::time::timeout(deadline, endpoint.connect())
            .await
            .map_err(|_| Error::deadline_exceeded(Stage::Connect, deadline))?
            .map_err(|e| Error::connection_refused(Stage::Connect, transport_detail(&e)))?;

        tracing::info!(
            peer = %config.peer_endpoint,
            host_alias = %config.peer_host_alias,
            "gRPC connection established"
        );

        Ok(Self::from_channel(channel))
    }

    /// Configure the channel without dialing; the first call connects
    pub async fn connect_lazy(config: &GatewayConfig) -> Result<Self> {
        let channel = endpoint(config).await?.connect_lazy();
        Ok(Self::from_channel(channel))
    }

    /// Wrap an existing channel
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: RwLock::new(Some(GatewayClient::new(channel))),
        }
    }

    fn client(&self, stage: Stage) -> Result<GatewayClient> {
        self.client
            .read()
            .clone()
            .ok_or_else(|| Error::connection_refused(stage, "gateway connection is closed"))
    }
}

#[async_trait]
impl GatewayTransport for GrpcTransport {
    async fn evaluate(
        &self,
        request: EvaluateRequest,
        deadline: Duration,
    ) -> Result<EvaluateResponse> {
        let mut client = self.client(Stage::Evaluate)?;
        client
            .evaluate(with_timeout(request, deadline))
            .await
            .map(tonic::Response::into_inner)
            .map_err(|status| Error::from_status(Stage::Evaluate, &status))
    }

    async fn endorse(&self, request: EndorseRequest, deadline: Duration) -> Result<EndorseResponse> {
        let mut client = self.client(Stage::Endorse)?;
        client
            .endorse(with_timeout(request, deadline))
            .await
            .map(tonic::Response::into_inner)
            .map_err(|status| Error::from_status(Stage::Endorse, &status))
    }

    async fn submit(&self, request: SubmitRequest, deadline: Duration) -> Result<SubmitResponse> {
        let mut client = self.client(Stage::Submit)?;
        client
            .submit(with_timeout(request, deadline))
            .await
            .map(tonic::Response::into_inner)
            .map_err(|status| Error::from_status(Stage::Submit, &status))
    }

    async fn commit_status(
        &self,
        request: SignedCommitStatusRequest,
        deadline: Duration,
    ) -> Result<CommitStatusResponse> {
        let mut client = self.client(Stage::CommitStatus)?;
        client
            .commit_status(with_timeout(request, deadline))
            .await
            .map(tonic::Response::into_inner)
            .map_err(|status| Error::from_status(Stage::CommitStatus, &status))
    }

    async fn close(&self) {
        if self.client.write().take().is_some() {
            tracing::info!("gRPC client closed");
        }
    }
}

/// TLS endpoint for the configured peer
async fn endpoint(config: &GatewayConfig) -> Result<Endpoint> {
    let tls_cert_path = config.tls_cert_path();
    let pem = tokio::fs::read(&tls_cert_path).await.map_err(|e| {
        Error::Configuration(format!(
            "Failed to read TLS root certificate {}: {}",
            tls_cert_path.display(),
            e
        ))
    })?;

    let tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(pem))
        .domain_name(config.peer_host_alias.clone());

    Endpoint::from_shared(format!("https://{}", config.peer_endpoint))
        .map_err(|e| {
            Error::Configuration(format!("Invalid peer endpoint {}: {}", config.peer_endpoint, e))
        })?
        .tls_config(tls)
        .map_err(|e| Error::Configuration(format!("Invalid TLS configuration: {}", e)))
        .map(|endpoint| endpoint.connect_timeout(config.connect_timeout()))
}

/// Propagate the stage deadline to the server as `grpc-timeout`
fn with_timeout<T>(message: T, deadline: Duration) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    request.set_timeout(deadline);
    request
}

/// Transport errors hide the root cause in their source chain
fn transport_detail(err: &tonic::transport::Error) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}
