//! gRPC front end for the development network
//!
//! Serves a [`LocalNetwork`] under the `/gateway.Gateway/*` paths over TLS, so
//! a [`GrpcTransport`](crate::GrpcTransport) session in another process (or
//! task) drives the same endorse / order / commit pipeline as the in-process
//! transport.

use super::LocalNetwork;
use crate::{
    error::Stage,
    proto::{
        CommitStatusResponse, EndorseRequest, EndorseResponse, EvaluateRequest, EvaluateResponse,
        GatewayServer, GatewayService, SignedCommitStatusRequest, SubmitRequest, SubmitResponse,
    },
    transport::GatewayTransport,
    Error, Result,
};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic::{Request, Response, Status};

/// Per-call deadline handed to the network; tonic already enforces the
/// caller's `grpc-timeout` header
const SERVED_DEADLINE: Duration = Duration::from_secs(3600);

/// [`GatewayService`] backed by a development network
#[derive(Debug, Clone)]
pub struct NetworkService {
    network: Arc<LocalNetwork>,
}

impl NetworkService {
    /// Serve `network`
    pub fn new(network: Arc<LocalNetwork>) -> Self {
        Self { network }
    }
}

#[tonic::async_trait]
impl GatewayService for NetworkService {
    async fn evaluate(
        &self,
        request: Request<EvaluateRequest>,
    ) -> std::result::Result<Response<EvaluateResponse>, Status> {
        let response = GatewayTransport::evaluate(
            self.network.as_ref(),
            request.into_inner(),
            SERVED_DEADLINE,
        )
        .await
        .map_err(|e| served_error(Stage::Evaluate, e))?;
        Ok(Response::new(response))
    }

    async fn endorse(
        &self,
        request: Request<EndorseRequest>,
    ) -> std::result::Result<Response<EndorseResponse>, Status> {
        let response = GatewayTransport::endorse(
            self.network.as_ref(),
            request.into_inner(),
            SERVED_DEADLINE,
        )
        .await
        .map_err(|e| served_error(Stage::Endorse, e))?;
        Ok(Response::new(response))
    }

    async fn submit(
        &self,
        request: Request<SubmitRequest>,
    ) -> std::result::Result<Response<SubmitResponse>, Status> {
        let request = request.into_inner();
        tracing::debug!(tx_id = %request.transaction_id, "Submit received");

        let response =
            GatewayTransport::submit(self.network.as_ref(), request, SERVED_DEADLINE)
                .await
                .map_err(|e| served_error(Stage::Submit, e))?;
        Ok(Response::new(response))
    }

    async fn commit_status(
        &self,
        request: Request<SignedCommitStatusRequest>,
    ) -> std::result::Result<Response<CommitStatusResponse>, Status> {
        let response = GatewayTransport::commit_status(
            self.network.as_ref(),
            request.into_inner(),
            SERVED_DEADLINE,
        )
        .await
        .map_err(|e| served_error(Stage::CommitStatus, e))?;
        Ok(Response::new(response))
    }
}

fn served_error(stage: Stage, err: Error) -> Status {
    tracing::debug!(stage = %stage, error = %err, "Request failed");
    err.to_status()
}

/// Server TLS from PEM files
pub async fn tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerTlsConfig> {
    let cert = tokio::fs::read(cert_path).await.map_err(|e| {
        Error::Configuration(format!("cannot read {}: {}", cert_path.display(), e))
    })?;
    let key = tokio::fs::read(key_path).await.map_err(|e| {
        Error::Configuration(format!("cannot read {}: {}", key_path.display(), e))
    })?;
    Ok(ServerTlsConfig::new().identity(Identity::from_pem(cert, key)))
}

/// Serve `network` on `listener` until `shutdown` resolves
pub async fn serve<F>(
    network: Arc<LocalNetwork>,
    listener: TcpListener,
    tls: ServerTlsConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let addr = listener
        .local_addr()
        .map_err(|e| Error::Configuration(format!("listener has no address: {}", e)))?;

    let mut server = Server::builder()
        .tls_config(tls)
        .map_err(|e| Error::Configuration(format!("invalid server TLS: {}", e)))?;

    tracing::info!(addr = %addr, "Serving development network");

    server
        .add_service(GatewayServer::new(NetworkService::new(network)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .map_err(|e| {
            Error::connection_refused(Stage::Connect, format!("gRPC server failed: {}", e))
        })?;

    tracing::info!(addr = %addr, "Development network server stopped");
    Ok(())
}
