//! Endorsing peer
//!
//! Checks proposals, executes the contract against committed state through a
//! [`TxSimulator`], and signs the resulting write set. Also validates
//! client-signed transactions before they reach the orderer.

use super::orderer::OrderedTransaction;
use crate::{
    error::Stage,
    identity::{self, Identity, SigningIdentity},
    proto::{
        ChaincodeResponse, EndorseRequest, EndorseResponse, Endorsement, Envelope,
        EvaluateRequest, EvaluateResponse, KvWrite, PreparedTransaction, Proposal, SignedProposal,
        SubmitRequest, TxValidationCode,
    },
    Error, Result,
};
use cert_contract::{error::status, CertificateContract, StateStore, TxSimulator, WriteSet};
use ed25519_dalek::VerifyingKey;
use parking_lot::RwLock;
use prost::Message;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Single endorsing and committing peer
pub struct Peer {
    store: Arc<dyn StateStore>,
    contract: CertificateContract,
    identity: SigningIdentity,
    channel_name: String,
    chaincode_name: String,
    members: RwLock<HashMap<String, Vec<VerifyingKey>>>,
}

impl Peer {
    /// Create peer over committed state
    pub fn new(
        store: Arc<dyn StateStore>,
        identity: SigningIdentity,
        channel_name: impl Into<String>,
        chaincode_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            contract: CertificateContract::new(),
            identity,
            channel_name: channel_name.into(),
            chaincode_name: chaincode_name.into(),
            members: RwLock::new(HashMap::new()),
        }
    }

    /// Trust signatures from `key` for members of `msp_id`
    pub fn register_member(&self, msp_id: &str, key: VerifyingKey) {
        self.members
            .write()
            .entry(msp_id.to_string())
            .or_default()
            .push(key);
        tracing::info!(msp_id = %msp_id, "Member registered");
    }

    /// Endorser identity
    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Execute without producing a transaction; the write set is dropped
    pub fn evaluate(&self, request: EvaluateRequest) -> Result<EvaluateResponse> {
        let proposal = self.check_proposal(Stage::Evaluate, request.proposed_transaction)?;
        let (response, _discarded) = self.simulate(&proposal);

        Ok(EvaluateResponse {
            result: Some(response),
        })
    }

    /// Execute and sign the write set
    pub fn endorse(&self, request: EndorseRequest) -> Result<EndorseResponse> {
        let proposal = self.check_proposal(Stage::Endorse, request.proposed_transaction)?;
        let (response, Simulation { absent_keys, writes }) = self.simulate(&proposal);

        if response.status != status::OK {
            return Ok(EndorseResponse {
                prepared_transaction: None,
                result: Some(response),
            });
        }

        let mut prepared = PreparedTransaction {
            tx_id: proposal.tx_id.clone(),
            channel_id: proposal.channel_id,
            creator: proposal.creator,
            response: Some(response.clone()),
            writes: writes
                .iter()
                .map(|(key, value)| KvWrite {
                    key: key.clone(),
                    is_delete: value.is_none(),
                    value: value.clone().unwrap_or_default(),
                })
                .collect(),
            endorsements: Vec::new(),
            absent_keys,
        };
        let endorsement = Endorsement {
            endorser: self.identity.identity().to_bytes(),
            signature: self.identity.sign(&prepared.encode_to_vec()),
        };
        prepared.endorsements.push(endorsement);

        tracing::debug!(
            tx_id = %proposal.tx_id,
            function = %proposal.function,
            writes = writes.len(),
            "Proposal endorsed"
        );

        Ok(EndorseResponse {
            prepared_transaction: Some(Envelope {
                payload: prepared.encode_to_vec(),
                signature: Vec::new(),
            }),
            result: Some(response),
        })
    }

    /// Check a submitted transaction and assign its validation code
    pub fn validate(&self, request: SubmitRequest) -> Result<OrderedTransaction> {
        let envelope = request.prepared_transaction.ok_or_else(|| {
            Error::remote_rejected(Stage::Submit, "submit request carried no transaction")
        })?;

        let prepared = match PreparedTransaction::decode(envelope.payload.as_slice()) {
            Ok(prepared) if prepared.tx_id == request.transaction_id => prepared,
            _ => {
                return Ok(OrderedTransaction {
                    tx_id: request.transaction_id,
                    writes: WriteSet::new(),
                    absent_keys: Vec::new(),
                    code: TxValidationCode::BadPayload,
                })
            }
        };

        let code = self.validation_code(&prepared, &envelope);
        let mut writes = WriteSet::new();
        for write in prepared.writes {
            if write.is_delete {
                writes.delete(write.key);
            } else {
                writes.put(write.key, write.value);
            }
        }

        Ok(OrderedTransaction {
            tx_id: prepared.tx_id,
            writes,
            absent_keys: prepared.absent_keys,
            code,
        })
    }

    /// Whether `signature` over `payload` comes from a registered member
    pub fn authenticate(&self, creator: &[u8], payload: &[u8], signature: &[u8]) -> bool {
        let identity = match Identity::from_bytes(creator) {
            Ok(identity) => identity,
            Err(_) => return false,
        };

        self.members
            .read()
            .get(identity.msp_id())
            .map_or(false, |keys| {
                keys.iter()
                    .any(|key| identity::verify(key, payload, signature))
            })
    }

    fn check_proposal(&self, stage: Stage, signed: Option<SignedProposal>) -> Result<Proposal> {
        let signed =
            signed.ok_or_else(|| Error::remote_rejected(stage, "request carried no proposal"))?;
        let proposal = Proposal::decode(signed.proposal_bytes.as_slice())
            .map_err(|e| Error::remote_rejected(stage, format!("malformed proposal: {}", e)))?;

        if proposal.channel_id != self.channel_name {
            return Err(Error::remote_rejected(
                stage,
                format!("channel {} not found", proposal.channel_id),
            ));
        }
        if proposal.chaincode_name != self.chaincode_name {
            return Err(Error::remote_rejected(
                stage,
                format!("chaincode {} not found", proposal.chaincode_name),
            ));
        }
        if proposal.tx_id != identity::transaction_id(&proposal.nonce, &proposal.creator) {
            return Err(Error::remote_rejected(stage, "transaction id mismatch"));
        }
        if !self.authenticate(&proposal.creator, &signed.proposal_bytes, &signed.signature) {
            return Err(Error::remote_rejected(
                stage,
                "access denied: creator signature did not verify",
            ));
        }

        Ok(proposal)
    }

    fn simulate(&self, proposal: &Proposal) -> (ChaincodeResponse, Simulation) {
        let mut sim = TxSimulator::new(self.store.as_ref());

        match self
            .contract
            .invoke(&mut sim, &proposal.function, &proposal.args)
        {
            Ok(payload) => (
                ChaincodeResponse {
                    status: status::OK,
                    message: String::new(),
                    payload,
                },
                Simulation::from(sim),
            ),
            Err(e) => {
                tracing::debug!(
                    tx_id = %proposal.tx_id,
                    function = %proposal.function,
                    error = %e,
                    "Contract rejected proposal"
                );
                (
                    ChaincodeResponse {
                        status: e.status(),
                        message: e.message().to_string(),
                        payload: Vec::new(),
                    },
                    Simulation::default(),
                )
            }
        }
    }

    fn validation_code(&self, prepared: &PreparedTransaction, envelope: &Envelope) -> TxValidationCode {
        if prepared.channel_id != self.channel_name {
            return TxValidationCode::InvalidOtherReason;
        }
        if !self.authenticate(&prepared.creator, &envelope.payload, &envelope.signature) {
            return TxValidationCode::BadCreatorSignature;
        }
        if prepared.response.as_ref().map(|r| r.status) != Some(status::OK) {
            return TxValidationCode::EndorsementPolicyFailure;
        }

        let unendorsed = PreparedTransaction {
            endorsements: Vec::new(),
            ..prepared.clone()
        }
        .encode_to_vec();
        let endorser = self.identity.identity().to_bytes();
        let endorsed = !prepared.endorsements.is_empty()
            && prepared.endorsements.iter().all(|e| {
                e.endorser == endorser
                    && identity::verify(&self.identity.verifying_key(), &unendorsed, &e.signature)
            });
        if !endorsed {
            return TxValidationCode::EndorsementPolicyFailure;
        }

        TxValidationCode::Valid
    }
}

/// What a successful simulation leaves behind
#[derive(Debug, Default)]
struct Simulation {
    absent_keys: Vec<String>,
    writes: WriteSet,
}

impl From<TxSimulator<'_>> for Simulation {
    fn from(sim: TxSimulator<'_>) -> Self {
        let (absent, writes) = sim.into_parts();
        Self {
            absent_keys: absent.into_iter().collect(),
            writes,
        }
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("channel", &self.channel_name)
            .field("chaincode", &self.chaincode_name)
            .field("identity", &self.identity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cert_contract::MemoryStore;

    struct Fixture {
        peer: Peer,
        client: SigningIdentity,
        store: Arc<MemoryStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let peer = Peer::new(
            store.clone(),
            SigningIdentity::generate("Org1MSP"),
            "mychannel",
            "basic",
        );
        let client = SigningIdentity::generate("Org1MSP");
        peer.register_member("Org1MSP", client.verifying_key());
        Fixture {
            peer,
            client,
            store,
        }
    }

    fn signed_proposal(client: &SigningIdentity, function: &str, args: &[&str]) -> SignedProposal {
        let nonce = vec![9u8; 24];
        let creator = client.identity().to_bytes();
        let proposal = Proposal {
            tx_id: identity::transaction_id(&nonce, &creator),
            channel_id: "mychannel".into(),
            chaincode_name: "basic".into(),
            function: function.into(),
            args: args.iter().map(|a| a.as_bytes().to_vec()).collect(),
            creator,
            nonce,
            timestamp: None,
        };
        let proposal_bytes = proposal.encode_to_vec();
        SignedProposal {
            signature: client.sign(&proposal_bytes),
            proposal_bytes,
        }
    }

    fn endorse(fx: &Fixture, function: &str, args: &[&str]) -> (String, Envelope) {
        let response = fx
            .peer
            .endorse(EndorseRequest {
                proposed_transaction: Some(signed_proposal(&fx.client, function, args)),
                ..Default::default()
            })
            .unwrap();
        let envelope = response.prepared_transaction.unwrap();
        let tx_id = PreparedTransaction::decode(envelope.payload.as_slice())
            .unwrap()
            .tx_id;
        (tx_id, envelope)
    }

    #[test]
    fn test_evaluate_never_writes() {
        let fx = fixture();
        let response = fx
            .peer
            .evaluate(EvaluateRequest {
                proposed_transaction: Some(signed_proposal(
                    &fx.client,
                    "CreateAsset",
                    &[r#"{"recordId":"R-1"}"#],
                )),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(response.result.unwrap().status, status::OK);
        assert!(fx.store.is_empty());
    }

    #[test]
    fn test_unknown_member_rejected() {
        let fx = fixture();
        let stranger = SigningIdentity::generate("Org1MSP");
        let err = fx
            .peer
            .evaluate(EvaluateRequest {
                proposed_transaction: Some(signed_proposal(&stranger, "GetAllAssets", &[])),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Evaluate));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_contract_failure_not_endorsed() {
        let fx = fixture();
        let response = fx
            .peer
            .endorse(EndorseRequest {
                proposed_transaction: Some(signed_proposal(&fx.client, "DeleteAsset", &["nope"])),
                ..Default::default()
            })
            .unwrap();

        assert!(response.prepared_transaction.is_none());
        assert_eq!(response.result.unwrap().status, status::NOT_FOUND);
    }

    #[test]
    fn test_validate_signed_transaction() {
        let fx = fixture();
        let (tx_id, mut envelope) = endorse(&fx, "CreateAsset", &[r#"{"recordId":"R-1"}"#]);
        envelope.signature = fx.client.sign(&envelope.payload);

        let ordered = fx
            .peer
            .validate(SubmitRequest {
                transaction_id: tx_id.clone(),
                channel_id: "mychannel".into(),
                prepared_transaction: Some(envelope),
            })
            .unwrap();

        assert_eq!(ordered.code, TxValidationCode::Valid);
        assert_eq!(ordered.tx_id, tx_id);
        assert_eq!(ordered.writes.len(), 1);
        assert_eq!(ordered.absent_keys, vec!["R-1".to_string()]);
    }

    #[test]
    fn test_absent_keys_are_endorsed() {
        let fx = fixture();
        let (tx_id, envelope) = endorse(&fx, "CreateAsset", &[r#"{"recordId":"R-1"}"#]);

        // Dropping the read set after endorsement breaks the endorsement
        let mut prepared = PreparedTransaction::decode(envelope.payload.as_slice()).unwrap();
        assert_eq!(prepared.absent_keys, vec!["R-1".to_string()]);
        prepared.absent_keys.clear();
        let payload = prepared.encode_to_vec();

        let ordered = fx
            .peer
            .validate(SubmitRequest {
                transaction_id: tx_id,
                channel_id: "mychannel".into(),
                prepared_transaction: Some(Envelope {
                    signature: fx.client.sign(&payload),
                    payload,
                }),
            })
            .unwrap();
        assert_eq!(ordered.code, TxValidationCode::EndorsementPolicyFailure);
    }

    #[test]
    fn test_validate_rejects_tampering() {
        let fx = fixture();

        // Unsigned by the client
        let (tx_id, envelope) = endorse(&fx, "CreateAsset", &[r#"{"recordId":"R-1"}"#]);
        let ordered = fx
            .peer
            .validate(SubmitRequest {
                transaction_id: tx_id.clone(),
                channel_id: "mychannel".into(),
                prepared_transaction: Some(envelope.clone()),
            })
            .unwrap();
        assert_eq!(ordered.code, TxValidationCode::BadCreatorSignature);

        // Write set altered after endorsement, re-signed by the client
        let mut prepared = PreparedTransaction::decode(envelope.payload.as_slice()).unwrap();
        prepared.writes[0].value = b"forged".to_vec();
        let payload = prepared.encode_to_vec();
        let forged = Envelope {
            signature: fx.client.sign(&payload),
            payload,
        };
        let ordered = fx
            .peer
            .validate(SubmitRequest {
                transaction_id: tx_id.clone(),
                channel_id: "mychannel".into(),
                prepared_transaction: Some(forged),
            })
            .unwrap();
        assert_eq!(ordered.code, TxValidationCode::EndorsementPolicyFailure);

        // Garbage payload
        let ordered = fx
            .peer
            .validate(SubmitRequest {
                transaction_id: tx_id,
                channel_id: "mychannel".into(),
                prepared_transaction: Some(Envelope {
                    payload: vec![0xff, 0xff, 0xff],
                    signature: Vec::new(),
                }),
            })
            .unwrap();
        assert_eq!(ordered.code, TxValidationCode::BadPayload);
        assert!(ordered.writes.is_empty());
    }
}
