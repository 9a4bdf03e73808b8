//! Typed certificate client
//!
//! Maps each contract operation onto the right call class and decodes its
//! result. Reads go through evaluate; everything that changes world state
//! goes through submit.
//!
//! The `*_document` methods send and return raw JSON, exactly as stored.
//! The typed methods go through [`Record`], which fills in defaults for
//! fields it models (an `approval` block always carries `approved`, for
//! instance).
//!
//! # Example
//!
//! ```no_run
//! use cert_contract::Record;
//! use cert_gateway::{CertificateClient, Gateway, GatewayConfig};
//!
//! # async fn run() -> cert_gateway::Result<()> {
//! let config = GatewayConfig::from_env()?;
//! let gateway = Gateway::open(&config).await?;
//! let client = CertificateClient::new(&gateway);
//!
//! client.create(&Record::new("R-1").with_subject("A")).await?;
//! let previous = client.transfer("R-1", "B").await?;
//! assert_eq!(previous, "A");
//!
//! gateway.close().await;
//! # Ok(())
//! # }
//! ```

use crate::{session::Gateway, transport::GatewayTransport, Error, Result};
use cert_contract::{Operation, Record};
use serde_json::Value;

/// Certificate operations over a gateway session
#[derive(Debug)]
pub struct CertificateClient<'g, T> {
    gateway: &'g Gateway<T>,
}

impl<'g, T: GatewayTransport> CertificateClient<'g, T> {
    /// Borrow a session
    pub fn new(gateway: &'g Gateway<T>) -> Self {
        Self { gateway }
    }

    /// Write the seed records
    pub async fn bootstrap(&self) -> Result<()> {
        self.submit(Operation::Bootstrap, Vec::new()).await?;
        Ok(())
    }

    /// Create a record; fails with `Conflict` if the id is taken
    pub async fn create(&self, record: &Record) -> Result<Record> {
        let bytes = self.submit(Operation::Create, vec![encode(record)?]).await?;
        decode_record(&bytes)
    }

    /// Create from a raw JSON document; returns the stored document
    pub async fn create_document(&self, document: &Value) -> Result<Value> {
        let bytes = self
            .submit(Operation::Create, vec![document.to_string()])
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read a record
    pub async fn read(&self, id: &str) -> Result<Record> {
        let bytes = self.evaluate(Operation::Read, vec![id.into()]).await?;
        decode_record(&bytes)
    }

    /// Read the stored document as-is
    pub async fn read_document(&self, id: &str) -> Result<Value> {
        let bytes = self.evaluate(Operation::Read, vec![id.into()]).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Replace a record wholesale
    pub async fn update(&self, record: &Record) -> Result<Record> {
        let bytes = self.submit(Operation::Update, vec![encode(record)?]).await?;
        decode_record(&bytes)
    }

    /// Replace from a raw JSON document; returns the stored document
    pub async fn update_document(&self, document: &Value) -> Result<Value> {
        let bytes = self
            .submit(Operation::Update, vec![document.to_string()])
            .await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Delete a record
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.submit(Operation::Delete, vec![id.into()]).await?;
        Ok(())
    }

    /// Change a record's subject; returns the subject seen at execution time
    pub async fn transfer(&self, id: &str, new_subject_id: &str) -> Result<String> {
        let bytes = self
            .submit(Operation::Transfer, vec![id.into(), new_subject_id.into()])
            .await?;
        String::from_utf8(bytes)
            .map_err(|e| Error::Encoding(format!("previous subject is not UTF-8: {}", e)))
    }

    /// Every stored entry in key order
    pub async fn list(&self) -> Result<Vec<Value>> {
        let bytes = self.evaluate(Operation::List, Vec::new()).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Whether a record exists
    pub async fn exists(&self, id: &str) -> Result<bool> {
        let bytes = self.evaluate(Operation::Exists, vec![id.into()]).await?;
        match bytes.as_slice() {
            b"true" => Ok(true),
            b"false" => Ok(false),
            other => Err(Error::Encoding(format!(
                "unexpected AssetExists result: {}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    async fn evaluate(&self, operation: Operation, args: Vec<String>) -> Result<Vec<u8>> {
        debug_assert!(operation.is_read_only());
        self.gateway.evaluate(operation.name(), &into_bytes(args)).await
    }

    async fn submit(&self, operation: Operation, args: Vec<String>) -> Result<Vec<u8>> {
        self.gateway.submit(operation.name(), &into_bytes(args)).await
    }
}

fn into_bytes(args: Vec<String>) -> Vec<Vec<u8>> {
    args.into_iter().map(String::into_bytes).collect()
}

fn encode(record: &Record) -> Result<String> {
    let bytes = record.to_canonical_bytes().map_err(Error::from_contract)?;
    String::from_utf8(bytes).map_err(|e| Error::Encoding(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> Result<Record> {
    Record::from_json(bytes).map_err(Error::from_contract)
}
