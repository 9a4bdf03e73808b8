//! Gateway session
//!
//! One [`Gateway`] per process: it owns the transport, the signing identity
//! and the stage deadlines, and is passed by reference to every call site.
//!
//! # Call classes
//!
//! ```text
//! evaluate:  proposal ──► peer ──► result            (evaluate deadline)
//!
//! submit:    proposal ──► endorse ──► prepared tx     (endorse deadline)
//!                         client signs envelope
//!                         submit ──► orderer          (submit deadline)
//!                         commit status ──► code      (commit-status deadline)
//! ```
//!
//! Every stage runs under its own timer; expiry surfaces as a deadline-exceeded
//! gateway error tagged with the stage. Nothing is retried.

use crate::{
    config::GatewayConfig,
    error::Stage,
    identity::{self, SigningIdentity},
    metrics::{GatewayMetrics, EVALUATE, SUBMIT},
    proto::{
        ChaincodeResponse, CommitStatusRequest, EndorseRequest, EvaluateRequest, Proposal,
        SignedCommitStatusRequest, SignedProposal, SubmitRequest, TxValidationCode,
    },
    transport::{GatewayTransport, GrpcTransport},
    CallTimeouts, Error, Result,
};
use cert_contract::error::status;
use prost::Message;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Nonce length in bytes
pub const NONCE_LEN: usize = 24;

/// Explicit gateway session
#[derive(Debug)]
pub struct Gateway<T> {
    transport: T,
    identity: SigningIdentity,
    channel_name: String,
    chaincode_name: String,
    timeouts: CallTimeouts,
    metrics: GatewayMetrics,
    closed: AtomicBool,
}

impl Gateway<GrpcTransport> {
    /// Load the identity and connect to the configured peer
    pub async fn open(config: &GatewayConfig) -> Result<Self> {
        tracing::info!(
            peer = %config.peer_endpoint,
            channel = %config.channel_name,
            chaincode = %config.chaincode_name,
            "Opening gateway session"
        );

        let identity =
            SigningIdentity::load(&config.msp_id, &config.cert_dir(), &config.key_dir()).await?;
        let transport = GrpcTransport::connect(config).await?;

        Self::new(transport, identity, config)
    }
}

impl<T: GatewayTransport> Gateway<T> {
    /// Session over an already-built transport
    pub fn new(transport: T, identity: SigningIdentity, config: &GatewayConfig) -> Result<Self> {
        Ok(Self {
            transport,
            identity,
            channel_name: config.channel_name.clone(),
            chaincode_name: config.chaincode_name.clone(),
            timeouts: config.timeouts,
            metrics: GatewayMetrics::new()?,
            closed: AtomicBool::new(false),
        })
    }

    /// Read-only call against a single peer
    pub async fn evaluate(&self, operation: &str, args: &[Vec<u8>]) -> Result<Vec<u8>> {
        let started = Instant::now();
        self.metrics.record_call(EVALUATE, operation);

        let result = self.run_evaluate(operation, args).await;
        self.finish(EVALUATE, operation, started, &result);
        result
    }

    /// State-changing call: endorse, order, wait for commit
    pub async fn submit(&self, operation: &str, args: &[Vec<u8>]) -> Result<Vec<u8>> {
        let started = Instant::now();
        self.metrics.record_call(SUBMIT, operation);

        let result = self.run_submit(operation, args).await;
        self.finish(SUBMIT, operation, started, &result);
        result
    }

    /// Release the transport; safe to call repeatedly
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transport.close().await;
        tracing::info!("Gateway closed");
    }

    /// Whether [`Gateway::close`] has run
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Identity used to sign proposals
    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Session metrics
    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    async fn run_evaluate(&self, operation: &str, args: &[Vec<u8>]) -> Result<Vec<u8>> {
        self.ensure_open(Stage::Evaluate)?;
        let (tx_id, proposal) = self.new_proposal(operation, args);

        let deadline = self.timeouts.evaluate();
        let request = EvaluateRequest {
            transaction_id: tx_id.clone(),
            channel_id: self.channel_name.clone(),
            proposed_transaction: Some(proposal),
        };
        let response = with_deadline(
            Stage::Evaluate,
            deadline,
            self.transport.evaluate(request, deadline),
        )
        .await?;

        tracing::debug!(tx_id = %tx_id, operation = %operation, "Evaluated");
        contract_result(Stage::Evaluate, response.result)
    }

    async fn run_submit(&self, operation: &str, args: &[Vec<u8>]) -> Result<Vec<u8>> {
        self.ensure_open(Stage::Endorse)?;
        let (tx_id, proposal) = self.new_proposal(operation, args);

        // Endorse
        let deadline = self.timeouts.endorse();
        let request = EndorseRequest {
            transaction_id: tx_id.clone(),
            channel_id: self.channel_name.clone(),
            proposed_transaction: Some(proposal),
        };
        let endorsed = with_deadline(
            Stage::Endorse,
            deadline,
            self.transport.endorse(request, deadline),
        )
        .await?;
        let payload = contract_result(Stage::Endorse, endorsed.result)?;
        let mut envelope = endorsed.prepared_transaction.ok_or_else(|| {
            Error::remote_rejected(Stage::Endorse, "endorsement returned no transaction")
        })?;
        tracing::debug!(tx_id = %tx_id, operation = %operation, "Endorsed");

        // Submit
        envelope.signature = self.identity.sign(&envelope.payload);
        let deadline = self.timeouts.submit();
        let request = SubmitRequest {
            transaction_id: tx_id.clone(),
            channel_id: self.channel_name.clone(),
            prepared_transaction: Some(envelope),
        };
        with_deadline(
            Stage::Submit,
            deadline,
            self.transport.submit(request, deadline),
        )
        .await?;
        tracing::debug!(tx_id = %tx_id, "Submitted to ordering");

        // Commit status
        let query = CommitStatusRequest {
            transaction_id: tx_id.clone(),
            channel_id: self.channel_name.clone(),
            identity: self.identity.identity().to_bytes(),
        }
        .encode_to_vec();
        let request = SignedCommitStatusRequest {
            signature: self.identity.sign(&query),
            request: query,
        };
        let deadline = self.timeouts.commit_status();
        let committed = with_deadline(
            Stage::CommitStatus,
            deadline,
            self.transport.commit_status(request, deadline),
        )
        .await?;

        // Raw comparison: codes this client has no variant for are failures too
        if committed.result != TxValidationCode::Valid as i32 {
            return Err(Error::remote_rejected(
                Stage::CommitStatus,
                format!(
                    "transaction {} failed to commit with status code {} ({})",
                    tx_id,
                    committed.result,
                    TxValidationCode::name_of(committed.result)
                ),
            ));
        }

        tracing::info!(
            tx_id = %tx_id,
            operation = %operation,
            block = committed.block_number,
            "Transaction committed"
        );
        Ok(payload)
    }

    fn new_proposal(&self, operation: &str, args: &[Vec<u8>]) -> (String, SignedProposal) {
        let nonce = rand::random::<[u8; NONCE_LEN]>().to_vec();
        let creator = self.identity.identity().to_bytes();
        let tx_id = identity::transaction_id(&nonce, &creator);

        let now = chrono::Utc::now();
        let proposal = Proposal {
            tx_id: tx_id.clone(),
            channel_id: self.channel_name.clone(),
            chaincode_name: self.chaincode_name.clone(),
            function: operation.to_string(),
            args: args.to_vec(),
            creator,
            nonce,
            timestamp: Some(prost_types::Timestamp {
                seconds: now.timestamp(),
                nanos: now.timestamp_subsec_nanos() as i32,
            }),
        };

        let proposal_bytes = proposal.encode_to_vec();
        let signature = self.identity.sign(&proposal_bytes);

        (
            tx_id,
            SignedProposal {
                proposal_bytes,
                signature,
            },
        )
    }

    fn ensure_open(&self, stage: Stage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::connection_refused(stage, "gateway session is closed"));
        }
        Ok(())
    }

    fn finish(&self, class: &str, operation: &str, started: Instant, result: &Result<Vec<u8>>) {
        self.metrics
            .record_duration(class, started.elapsed().as_secs_f64());

        if let Err(e) = result {
            self.metrics.record_failure(class, e.kind());
            tracing::warn!(
                class = class,
                operation = %operation,
                kind = e.kind().as_str(),
                error = %e,
                "Gateway call failed"
            );
        }
    }
}

/// Run one stage under its deadline
async fn with_deadline<R>(
    stage: Stage,
    deadline: Duration,
    call: impl Future<Output = Result<R>>,
) -> Result<R> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::deadline_exceeded(stage, deadline)),
    }
}

/// Unpack a contract response, rebuilding contract errors
fn contract_result(stage: Stage, response: Option<ChaincodeResponse>) -> Result<Vec<u8>> {
    let response = response
        .ok_or_else(|| Error::remote_rejected(stage, "response carried no contract result"))?;

    if response.status == status::OK {
        Ok(response.payload)
    } else {
        Err(Error::from_chaincode(stage, response.status, response.message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{
        CommitStatusResponse, EndorseResponse, EvaluateResponse, SubmitResponse,
    };
    use crate::ErrorKind;
    use crate::GatewayErrorKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Scripted transport that records the stages it saw
    #[derive(Debug, Default)]
    struct Scripted {
        hang_at: Option<Stage>,
        commit_code: Option<i32>,
        seen: Mutex<Vec<Stage>>,
        closes: Mutex<usize>,
    }

    impl Scripted {
        async fn maybe_hang(&self, stage: Stage) {
            self.seen.lock().push(stage);
            if self.hang_at == Some(stage) {
                std::future::pending::<()>().await;
            }
        }
    }

    fn ok(payload: &[u8]) -> Option<ChaincodeResponse> {
        Some(ChaincodeResponse {
            status: status::OK,
            message: String::new(),
            payload: payload.to_vec(),
        })
    }

    #[async_trait]
    impl GatewayTransport for Scripted {
        async fn evaluate(&self, _: EvaluateRequest, _: Duration) -> Result<EvaluateResponse> {
            self.maybe_hang(Stage::Evaluate).await;
            Ok(EvaluateResponse { result: ok(b"read") })
        }

        async fn endorse(&self, request: EndorseRequest, _: Duration) -> Result<EndorseResponse> {
            self.maybe_hang(Stage::Endorse).await;
            let proposal = request.proposed_transaction.unwrap();
            Ok(EndorseResponse {
                prepared_transaction: Some(crate::proto::Envelope {
                    payload: proposal.proposal_bytes,
                    signature: Vec::new(),
                }),
                result: ok(b"written"),
            })
        }

        async fn submit(&self, request: SubmitRequest, _: Duration) -> Result<SubmitResponse> {
            self.maybe_hang(Stage::Submit).await;
            assert!(!request.prepared_transaction.unwrap().signature.is_empty());
            Ok(SubmitResponse {})
        }

        async fn commit_status(
            &self,
            _: SignedCommitStatusRequest,
            _: Duration,
        ) -> Result<CommitStatusResponse> {
            self.maybe_hang(Stage::CommitStatus).await;
            Ok(CommitStatusResponse {
                result: self.commit_code.unwrap_or(TxValidationCode::Valid as i32),
                block_number: 1,
            })
        }

        async fn close(&self) {
            *self.closes.lock() += 1;
        }
    }

    fn gateway(transport: Scripted) -> Gateway<Scripted> {
        let config = GatewayConfig {
            timeouts: CallTimeouts {
                evaluate_ms: 50,
                endorse_ms: 50,
                submit_ms: 50,
                commit_status_ms: 50,
            },
            ..Default::default()
        };
        Gateway::new(transport, SigningIdentity::generate("Org1MSP"), &config).unwrap()
    }

    #[tokio::test]
    async fn test_evaluate_skips_ordering() {
        let gateway = gateway(Scripted::default());
        assert_eq!(gateway.evaluate("ReadAsset", &[b"R-1".to_vec()]).await.unwrap(), b"read");
        assert_eq!(*gateway.transport().seen.lock(), vec![Stage::Evaluate]);
    }

    #[tokio::test]
    async fn test_submit_runs_every_stage() {
        let gateway = gateway(Scripted::default());
        assert_eq!(gateway.submit("DeleteAsset", &[b"R-1".to_vec()]).await.unwrap(), b"written");
        assert_eq!(
            *gateway.transport().seen.lock(),
            vec![Stage::Endorse, Stage::Submit, Stage::CommitStatus]
        );
    }

    #[tokio::test]
    async fn test_each_stage_has_its_own_deadline() {
        for hang_at in [Stage::Evaluate, Stage::Endorse, Stage::Submit, Stage::CommitStatus] {
            let gateway = gateway(Scripted {
                hang_at: Some(hang_at),
                ..Default::default()
            });

            let result = if hang_at == Stage::Evaluate {
                gateway.evaluate("ReadAsset", &[b"R-1".to_vec()]).await
            } else {
                gateway.submit("DeleteAsset", &[b"R-1".to_vec()]).await
            };

            let err = result.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Gateway(GatewayErrorKind::DeadlineExceeded));
            assert_eq!(err.stage(), Some(hang_at));
        }
    }

    #[tokio::test]
    async fn test_invalid_commit_code_is_rejected() {
        let gateway = gateway(Scripted {
            commit_code: Some(TxValidationCode::DuplicateTxid as i32),
            ..Default::default()
        });

        let err = gateway.submit("DeleteAsset", &[b"R-1".to_vec()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Gateway(GatewayErrorKind::RemoteRejected));
        assert_eq!(err.stage(), Some(Stage::CommitStatus));
        assert!(err.to_string().contains("DUPLICATE_TXID"));
    }

    #[tokio::test]
    async fn test_undeclared_commit_code_is_rejected() {
        for code in [TxValidationCode::MvccReadConflict as i32, 12, 254] {
            let gateway = gateway(Scripted {
                commit_code: Some(code),
                ..Default::default()
            });

            let err = gateway.submit("DeleteAsset", &[b"R-1".to_vec()]).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Gateway(GatewayErrorKind::RemoteRejected));
            assert_eq!(err.stage(), Some(Stage::CommitStatus));
            assert!(err.to_string().contains(&format!("status code {}", code)));
        }
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let gateway = gateway(Scripted::default());
        gateway.close().await;
        gateway.close().await;

        assert!(gateway.is_closed());
        assert_eq!(*gateway.transport().closes.lock(), 1);

        let err = gateway.evaluate("GetAllAssets", &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Gateway(GatewayErrorKind::ConnectionRefused));
        assert!(gateway.transport().seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_counted() {
        let gateway = gateway(Scripted {
            hang_at: Some(Stage::Evaluate),
            ..Default::default()
        });
        let _ = gateway.evaluate("ReadAsset", &[b"R-1".to_vec()]).await;

        let failures = gateway
            .metrics()
            .failures_total
            .with_label_values(&[EVALUATE, "deadline_exceeded"])
            .get();
        assert_eq!(failures, 1);
    }

    #[test]
    fn test_contract_status_rebuilt() {
        let response = ChaincodeResponse {
            status: status::CONFLICT,
            message: "the certificate R-1 already exists".into(),
            payload: Vec::new(),
        };
        let err = contract_result(Stage::Endorse, Some(response)).unwrap_err();
        assert_eq!(err, Error::Conflict("the certificate R-1 already exists".into()));
    }
}
