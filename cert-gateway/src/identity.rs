//! Identity and signing
//!
//! The client identity is an MSP id plus opaque credential bytes. Signatures
//! are Ed25519 over the SHA-256 digest of the signed bytes, so every signer
//! and verifier hashes the same way.

use crate::{proto::SerializedIdentity, Error, Result};
use ed25519_dalek::pkcs8::DecodePrivateKey;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use prost::Message;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};

/// SHA-256 digest
pub fn digest(payload: &[u8]) -> [u8; 32] {
    Sha256::digest(payload).into()
}

/// Verify a signature produced by [`SigningIdentity::sign`]
pub fn verify(key: &VerifyingKey, payload: &[u8], signature: &[u8]) -> bool {
    match Signature::from_slice(signature) {
        Ok(signature) => key.verify(&digest(payload), &signature).is_ok(),
        Err(_) => false,
    }
}

/// Transaction id for a proposal: hex(SHA-256(nonce ‖ creator))
pub fn transaction_id(nonce: &[u8], creator: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(nonce);
    hasher.update(creator);
    hex::encode(hasher.finalize())
}

/// Public identity presented to the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    msp_id: String,
    credentials: Vec<u8>,
}

impl Identity {
    /// Create identity
    pub fn new(msp_id: impl Into<String>, credentials: Vec<u8>) -> Self {
        Self {
            msp_id: msp_id.into(),
            credentials,
        }
    }

    /// MSP id
    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    /// Credential bytes
    pub fn credentials(&self) -> &[u8] {
        &self.credentials
    }

    /// Wire form, used as the proposal creator
    pub fn to_bytes(&self) -> Vec<u8> {
        SerializedIdentity {
            mspid: self.msp_id.clone(),
            id_bytes: self.credentials.clone(),
        }
        .encode_to_vec()
    }

    /// Parse the wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let serialized = SerializedIdentity::decode(bytes)?;
        Ok(Self::new(serialized.mspid, serialized.id_bytes))
    }
}

/// Identity plus the private key that signs for it
pub struct SigningIdentity {
    identity: Identity,
    key: SigningKey,
}

impl SigningIdentity {
    /// Pair an identity with its key
    pub fn new(identity: Identity, key: SigningKey) -> Self {
        Self { identity, key }
    }

    /// Fresh random key; the credential is the raw public key
    pub fn generate(msp_id: impl Into<String>) -> Self {
        let key = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let credentials = key.verifying_key().to_bytes().to_vec();
        Self::new(Identity::new(msp_id, credentials), key)
    }

    /// Load the first credential file from `cert_dir` and the first PKCS#8
    /// PEM key from `key_dir`
    pub async fn load(msp_id: &str, cert_dir: &Path, key_dir: &Path) -> Result<Self> {
        let cert_path = first_file_in(cert_dir).await?;
        let credentials = tokio::fs::read(&cert_path).await.map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", cert_path.display(), e))
        })?;

        let key_path = first_file_in(key_dir).await?;
        let pem = tokio::fs::read_to_string(&key_path).await.map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", key_path.display(), e))
        })?;
        let key = SigningKey::from_pkcs8_pem(&pem).map_err(|e| {
            Error::Configuration(format!("Invalid private key {}: {}", key_path.display(), e))
        })?;

        tracing::info!(
            msp_id = %msp_id,
            cert = %cert_path.display(),
            key = %key_path.display(),
            "Loaded signing identity"
        );

        Ok(Self::new(Identity::new(msp_id, credentials), key))
    }

    /// Public identity
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Key that verifies this identity's signatures
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Sign the SHA-256 digest of `payload`
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.key.sign(&digest(payload)).to_bytes().to_vec()
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("msp_id", &self.identity.msp_id)
            .field("public_key", &hex::encode(self.key.verifying_key().to_bytes()))
            .finish()
    }
}

/// Lexicographically first regular file in `dir`
pub async fn first_file_in(dir: &Path) -> Result<PathBuf> {
    let unreadable =
        |e: std::io::Error| Error::Configuration(format!("Cannot read {}: {}", dir.display(), e));

    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        if entry.file_type().await.map_err(unreadable)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    if files.len() > 1 {
        tracing::warn!(
            dir = %dir.display(),
            count = files.len(),
            "Several files found, using the first"
        );
    }

    files
        .into_iter()
        .next()
        .ok_or_else(|| Error::Configuration(format!("No files in directory: {}", dir.display())))
}
