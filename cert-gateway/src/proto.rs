//! Gateway wire protocol
//!
//! Protobuf messages exchanged with the gateway peer, a unary gRPC client
//! over a shared [`Channel`], and the matching server adapter
//! ([`GatewayServer`]) for anything implementing [`GatewayService`].
//! Messages are declared with `prost::Message` directly so the crate needs no
//! protoc at build time.
//!
//! # Flow
//!
//! ```text
//! evaluate:  EvaluateRequest ──► EvaluateResponse (ChaincodeResponse)
//! submit:    EndorseRequest  ──► EndorseResponse  (Envelope<PreparedTransaction>)
//!            SubmitRequest   ──► SubmitResponse
//!            SignedCommitStatusRequest ──► CommitStatusResponse
//! ```

use std::convert::Infallible;
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::{empty_body, http, Arc, Body, BoxFuture, Context, Poll, Service, StdError};
use tonic::transport::Channel;
use tonic::{Request, Response, Status};

const EVALUATE_PATH: &str = "/gateway.Gateway/Evaluate";
const ENDORSE_PATH: &str = "/gateway.Gateway/Endorse";
const SUBMIT_PATH: &str = "/gateway.Gateway/Submit";
const COMMIT_STATUS_PATH: &str = "/gateway.Gateway/CommitStatus";

/// Creator identity as carried in proposals
#[derive(Clone, PartialEq, prost::Message)]
pub struct SerializedIdentity {
    /// Membership service provider id
    #[prost(string, tag = "1")]
    pub mspid: String,
    /// Credential bytes (certificate or public key)
    #[prost(bytes = "vec", tag = "2")]
    pub id_bytes: Vec<u8>,
}

/// Contract invocation proposed by a client
#[derive(Clone, PartialEq, prost::Message)]
pub struct Proposal {
    /// hex(SHA-256(nonce ‖ creator))
    #[prost(string, tag = "1")]
    pub tx_id: String,
    /// Channel name
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Contract name
    #[prost(string, tag = "3")]
    pub chaincode_name: String,
    /// Operation name
    #[prost(string, tag = "4")]
    pub function: String,
    /// Ordered arguments
    #[prost(bytes = "vec", repeated, tag = "5")]
    pub args: Vec<Vec<u8>>,
    /// Encoded [`SerializedIdentity`]
    #[prost(bytes = "vec", tag = "6")]
    pub creator: Vec<u8>,
    /// Random nonce
    #[prost(bytes = "vec", tag = "7")]
    pub nonce: Vec<u8>,
    /// Client clock at proposal time
    #[prost(message, optional, tag = "8")]
    pub timestamp: Option<prost_types::Timestamp>,
}

/// Proposal bytes plus the creator's signature over them
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedProposal {
    /// Encoded [`Proposal`]
    #[prost(bytes = "vec", tag = "1")]
    pub proposal_bytes: Vec<u8>,
    /// Creator signature
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Contract execution outcome
#[derive(Clone, PartialEq, prost::Message)]
pub struct ChaincodeResponse {
    /// HTTP-like status, 200 on success
    #[prost(int32, tag = "1")]
    pub status: i32,
    /// Failure detail
    #[prost(string, tag = "2")]
    pub message: String,
    /// Operation result
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
}

/// Single key mutation
#[derive(Clone, PartialEq, prost::Message)]
pub struct KvWrite {
    /// Key
    #[prost(string, tag = "1")]
    pub key: String,
    /// Delete marker
    #[prost(bool, tag = "2")]
    pub is_delete: bool,
    /// New value
    #[prost(bytes = "vec", tag = "3")]
    pub value: Vec<u8>,
}

/// Peer signature over a prepared transaction
#[derive(Clone, PartialEq, prost::Message)]
pub struct Endorsement {
    /// Encoded [`SerializedIdentity`] of the endorsing peer
    #[prost(bytes = "vec", tag = "1")]
    pub endorser: Vec<u8>,
    /// Signature over the transaction encoded with no endorsements
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Simulated transaction awaiting ordering
#[derive(Clone, PartialEq, prost::Message)]
pub struct PreparedTransaction {
    /// Transaction id
    #[prost(string, tag = "1")]
    pub tx_id: String,
    /// Channel name
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Encoded [`SerializedIdentity`] of the client
    #[prost(bytes = "vec", tag = "3")]
    pub creator: Vec<u8>,
    /// Simulation outcome
    #[prost(message, optional, tag = "4")]
    pub response: Option<ChaincodeResponse>,
    /// Write set in key order
    #[prost(message, repeated, tag = "5")]
    pub writes: Vec<KvWrite>,
    /// Peer endorsements
    #[prost(message, repeated, tag = "6")]
    pub endorsements: Vec<Endorsement>,
    /// Keys the simulation read as absent, in key order
    #[prost(string, repeated, tag = "7")]
    pub absent_keys: Vec<String>,
}

/// Signed payload
#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    /// Encoded [`PreparedTransaction`]
    #[prost(bytes = "vec", tag = "1")]
    pub payload: Vec<u8>,
    /// Client signature over `payload`
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Read-only call
#[derive(Clone, PartialEq, prost::Message)]
pub struct EvaluateRequest {
    /// Transaction id
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    /// Channel name
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Signed proposal
    #[prost(message, optional, tag = "3")]
    pub proposed_transaction: Option<SignedProposal>,
}

/// Read-only call outcome
#[derive(Clone, PartialEq, prost::Message)]
pub struct EvaluateResponse {
    /// Contract outcome
    #[prost(message, optional, tag = "1")]
    pub result: Option<ChaincodeResponse>,
}

/// Endorsement request
#[derive(Clone, PartialEq, prost::Message)]
pub struct EndorseRequest {
    /// Transaction id
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    /// Channel name
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Signed proposal
    #[prost(message, optional, tag = "3")]
    pub proposed_transaction: Option<SignedProposal>,
}

/// Endorsement outcome; `prepared_transaction` is absent when the contract failed
#[derive(Clone, PartialEq, prost::Message)]
pub struct EndorseResponse {
    /// Unsigned envelope of a [`PreparedTransaction`]
    #[prost(message, optional, tag = "1")]
    pub prepared_transaction: Option<Envelope>,
    /// Contract outcome
    #[prost(message, optional, tag = "2")]
    pub result: Option<ChaincodeResponse>,
}

/// Hand-off to ordering
#[derive(Clone, PartialEq, prost::Message)]
pub struct SubmitRequest {
    /// Transaction id
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    /// Channel name
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Client-signed envelope
    #[prost(message, optional, tag = "3")]
    pub prepared_transaction: Option<Envelope>,
}

/// Ordering accepted the transaction
#[derive(Clone, PartialEq, prost::Message)]
pub struct SubmitResponse {}

/// Commit-status query
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommitStatusRequest {
    /// Transaction id
    #[prost(string, tag = "1")]
    pub transaction_id: String,
    /// Channel name
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Encoded [`SerializedIdentity`] of the caller
    #[prost(bytes = "vec", tag = "3")]
    pub identity: Vec<u8>,
}

/// Signed commit-status query
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignedCommitStatusRequest {
    /// Encoded [`CommitStatusRequest`]
    #[prost(bytes = "vec", tag = "1")]
    pub request: Vec<u8>,
    /// Caller signature over `request`
    #[prost(bytes = "vec", tag = "2")]
    pub signature: Vec<u8>,
}

/// Commit outcome
#[derive(Clone, PartialEq, prost::Message)]
pub struct CommitStatusResponse {
    /// Validation code assigned at commit
    #[prost(enumeration = "TxValidationCode", tag = "1")]
    pub result: i32,
    /// Block the transaction landed in
    #[prost(uint64, tag = "2")]
    pub block_number: u64,
}

/// Validation code assigned to each transaction in a block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum TxValidationCode {
    /// Committed; writes applied
    Valid = 0,
    /// Payload could not be decoded
    BadPayload = 2,
    /// Creator signature did not verify
    BadCreatorSignature = 4,
    /// Transaction id already committed
    DuplicateTxid = 9,
    /// Missing or invalid endorsement
    EndorsementPolicyFailure = 10,
    /// A key read as absent was written before commit
    MvccReadConflict = 11,
    /// Any other rejection
    InvalidOtherReason = 255,
}

impl TxValidationCode {
    /// Name for a raw wire code; codes this client does not know print as
    /// `UNKNOWN`
    pub fn name_of(code: i32) -> &'static str {
        TxValidationCode::try_from(code).map_or("UNKNOWN", |code| code.as_str())
    }

    /// Upper-case name as used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TxValidationCode::Valid => "VALID",
            TxValidationCode::BadPayload => "BAD_PAYLOAD",
            TxValidationCode::BadCreatorSignature => "BAD_CREATOR_SIGNATURE",
            TxValidationCode::DuplicateTxid => "DUPLICATE_TXID",
            TxValidationCode::EndorsementPolicyFailure => "ENDORSEMENT_POLICY_FAILURE",
            TxValidationCode::MvccReadConflict => "MVCC_READ_CONFLICT",
            TxValidationCode::InvalidOtherReason => "INVALID_OTHER_REASON",
        }
    }
}

/// Unary gRPC client for the gateway service
#[derive(Debug, Clone)]
pub struct GatewayClient {
    inner: tonic::client::Grpc<Channel>,
}

impl GatewayClient {
    /// Wrap a channel; the channel is cheap to clone and multiplexed
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: tonic::client::Grpc::new(channel),
        }
    }

    /// Read-only evaluation on a single peer
    pub async fn evaluate(
        &mut self,
        request: tonic::Request<EvaluateRequest>,
    ) -> std::result::Result<tonic::Response<EvaluateResponse>, tonic::Status> {
        self.unary(request, EVALUATE_PATH).await
    }

    /// Collect endorsements
    pub async fn endorse(
        &mut self,
        request: tonic::Request<EndorseRequest>,
    ) -> std::result::Result<tonic::Response<EndorseResponse>, tonic::Status> {
        self.unary(request, ENDORSE_PATH).await
    }

    /// Hand a signed transaction to ordering
    pub async fn submit(
        &mut self,
        request: tonic::Request<SubmitRequest>,
    ) -> std::result::Result<tonic::Response<SubmitResponse>, tonic::Status> {
        self.unary(request, SUBMIT_PATH).await
    }

    /// Wait for the commit outcome
    pub async fn commit_status(
        &mut self,
        request: tonic::Request<SignedCommitStatusRequest>,
    ) -> std::result::Result<tonic::Response<CommitStatusResponse>, tonic::Status> {
        self.unary(request, COMMIT_STATUS_PATH).await
    }

    async fn unary<M1, M2>(
        &mut self,
        request: tonic::Request<M1>,
        path: &'static str,
    ) -> std::result::Result<tonic::Response<M2>, tonic::Status>
    where
        M1: prost::Message + Send + Sync + 'static,
        M2: prost::Message + Default + Send + Sync + 'static,
    {
        self.inner.ready().await.map_err(|e| {
            tonic::Status::new(
                tonic::Code::Unavailable,
                format!("Service was not ready: {}", e),
            )
        })?;
        let codec: ProstCodec<M1, M2> = ProstCodec::default();
        self.inner
            .unary(request, PathAndQuery::from_static(path), codec)
            .await
    }
}

/// Server side of the gateway service
#[tonic::async_trait]
pub trait GatewayService: Send + Sync + 'static {
    /// Read-only evaluation
    async fn evaluate(
        &self,
        request: Request<EvaluateRequest>,
    ) -> std::result::Result<Response<EvaluateResponse>, Status>;

    /// Simulate and endorse
    async fn endorse(
        &self,
        request: Request<EndorseRequest>,
    ) -> std::result::Result<Response<EndorseResponse>, Status>;

    /// Accept a signed transaction for ordering
    async fn submit(
        &self,
        request: Request<SubmitRequest>,
    ) -> std::result::Result<Response<SubmitResponse>, Status>;

    /// Wait for a transaction's final outcome
    async fn commit_status(
        &self,
        request: Request<SignedCommitStatusRequest>,
    ) -> std::result::Result<Response<CommitStatusResponse>, Status>;
}

/// Routes `/gateway.Gateway/*` requests to a [`GatewayService`]
#[derive(Debug)]
pub struct GatewayServer<S> {
    service: Arc<S>,
}

impl<S: GatewayService> GatewayServer<S> {
    /// Wrap a service implementation
    pub fn new(service: S) -> Self {
        Self::from_arc(Arc::new(service))
    }

    /// Wrap a shared service implementation
    pub fn from_arc(service: Arc<S>) -> Self {
        Self { service }
    }
}

impl<S> Clone for GatewayServer<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

impl<S: GatewayService> tonic::server::NamedService for GatewayServer<S> {
    const NAME: &'static str = "gateway.Gateway";
}

impl<S, B> Service<http::Request<B>> for GatewayServer<S>
where
    S: GatewayService,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let service = Arc::clone(&self.service);
        match req.uri().path() {
            EVALUATE_PATH => serve_unary(req, Unary::new(service, handlers::evaluate::<S>)),
            ENDORSE_PATH => serve_unary(req, Unary::new(service, handlers::endorse::<S>)),
            SUBMIT_PATH => serve_unary(req, Unary::new(service, handlers::submit::<S>)),
            COMMIT_STATUS_PATH => {
                serve_unary(req, Unary::new(service, handlers::commit_status::<S>))
            }
            _ => Box::pin(async move { Ok(unimplemented()) }),
        }
    }
}

type Handler<S, Req, Resp> =
    fn(Arc<S>, Request<Req>) -> BoxFuture<Response<Resp>, Status>;

/// One unary method bound to its service
struct Unary<S, Req, Resp> {
    service: Arc<S>,
    handler: Handler<S, Req, Resp>,
}

impl<S, Req, Resp> Unary<S, Req, Resp> {
    fn new(service: Arc<S>, handler: Handler<S, Req, Resp>) -> Self {
        Self { service, handler }
    }
}

impl<S, Req, Resp> tonic::server::UnaryService<Req> for Unary<S, Req, Resp> {
    type Response = Resp;
    type Future = BoxFuture<Response<Resp>, Status>;

    fn call(&mut self, request: Request<Req>) -> Self::Future {
        (self.handler)(Arc::clone(&self.service), request)
    }
}

fn serve_unary<S, B, Req, Resp>(
    req: http::Request<B>,
    method: Unary<S, Req, Resp>,
) -> BoxFuture<http::Response<BoxBody>, Infallible>
where
    S: Send + Sync + 'static,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
    Req: prost::Message + Default + Send + 'static,
    Resp: prost::Message + Send + 'static,
{
    Box::pin(async move {
        let codec: ProstCodec<Resp, Req> = ProstCodec::default();
        let mut grpc = tonic::server::Grpc::new(codec);
        Ok(grpc.unary(method, req).await)
    })
}

fn unimplemented() -> http::Response<BoxBody> {
    let mut response = http::Response::new(empty_body());
    let headers = response.headers_mut();
    headers.insert(
        "grpc-status",
        http::HeaderValue::from(tonic::Code::Unimplemented as i32),
    );
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/grpc"),
    );
    response
}

/// Owned-service adapters so each method fits a plain fn pointer
mod handlers {
    use super::*;

    pub(super) fn evaluate<S: GatewayService>(
        service: Arc<S>,
        request: Request<EvaluateRequest>,
    ) -> BoxFuture<Response<EvaluateResponse>, Status> {
        Box::pin(async move { service.evaluate(request).await })
    }

    pub(super) fn endorse<S: GatewayService>(
        service: Arc<S>,
        request: Request<EndorseRequest>,
    ) -> BoxFuture<Response<EndorseResponse>, Status> {
        Box::pin(async move { service.endorse(request).await })
    }

    pub(super) fn submit<S: GatewayService>(
        service: Arc<S>,
        request: Request<SubmitRequest>,
    ) -> BoxFuture<Response<SubmitResponse>, Status> {
        Box::pin(async move { service.submit(request).await })
    }

    pub(super) fn commit_status<S: GatewayService>(
        service: Arc<S>,
        request: Request<SignedCommitStatusRequest>,
    ) -> BoxFuture<Response<CommitStatusResponse>, Status> {
        Box::pin(async move { service.commit_status(request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_validation_code_accessor() {
        let response = CommitStatusResponse {
            result: TxValidationCode::DuplicateTxid as i32,
            block_number: 7,
        };
        let decoded = CommitStatusResponse::decode(response.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.result(), TxValidationCode::DuplicateTxid);
        assert_eq!(decoded.result().as_str(), "DUPLICATE_TXID");
    }

    #[test]
    fn test_unknown_code_names() {
        assert_eq!(TxValidationCode::name_of(11), "MVCC_READ_CONFLICT");
        assert_eq!(TxValidationCode::name_of(12), "UNKNOWN");
        assert_eq!(TxValidationCode::name_of(-1), "UNKNOWN");
    }

    #[test]
    fn test_default_validation_code_is_valid() {
        assert_eq!(CommitStatusResponse::default().result(), TxValidationCode::Valid);
    }

    #[test]
    fn test_empty_args_survive_encoding() {
        let proposal = Proposal {
            function: "TransferAsset".into(),
            args: vec![b"R-1".to_vec(), Vec::new()],
            ..Default::default()
        };
        let decoded = Proposal::decode(proposal.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.args.len(), 2);
        assert!(decoded.args[1].is_empty());
    }
}
