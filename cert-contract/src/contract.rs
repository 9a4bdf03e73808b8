//! Certificate record contract
//!
//! Transition rules executed identically on every replica. The contract is
//! stateless; all state lives behind the [`WorldState`] stub it is handed.
//!
//! # Example
//!
//! ```
//! use cert_contract::{CertificateContract, MemoryStore, StateStore, TxSimulator};
//!
//! let store = MemoryStore::new();
//! let contract = CertificateContract::new();
//!
//! let mut sim = TxSimulator::new(&store);
//! contract
//!     .invoke(&mut sim, "CreateAsset", &[br#"{"recordId":"R-1"}"#.to_vec()])
//!     .unwrap();
//! store.apply(sim.write_set()).unwrap();
//!
//! assert!(store.get("R-1").unwrap().is_some());
//! ```

use crate::{
    canonical, fixtures,
    state::WorldState,
    types::RECORD_TYPE,
    Error, Result,
};
use serde_json::{Map, Value};
use std::fmt;

/// Operations exposed by the contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Write the seed records
    Bootstrap,
    /// Create a record from JSON
    Create,
    /// Read a record's stored bytes
    Read,
    /// Replace a record wholesale
    Update,
    /// Remove a record
    Delete,
    /// Change a record's subject
    Transfer,
    /// Every record in key order
    List,
    /// Whether a record exists
    Exists,
}

impl Operation {
    /// All operations
    pub const ALL: [Operation; 8] = [
        Operation::Bootstrap,
        Operation::Create,
        Operation::Read,
        Operation::Update,
        Operation::Delete,
        Operation::Transfer,
        Operation::List,
        Operation::Exists,
    ];

    /// Parse a wire name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "Bootstrap" | "InitLedger" => Some(Operation::Bootstrap),
            "CreateAsset" => Some(Operation::Create),
            "ReadAsset" => Some(Operation::Read),
            "UpdateAsset" => Some(Operation::Update),
            "DeleteAsset" => Some(Operation::Delete),
            "TransferAsset" => Some(Operation::Transfer),
            "GetAllAssets" => Some(Operation::List),
            "AssetExists" => Some(Operation::Exists),
            _ => None,
        }
    }

    /// Wire name (`Bootstrap` is sent as `InitLedger`)
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Bootstrap => "InitLedger",
            Operation::Create => "CreateAsset",
            Operation::Read => "ReadAsset",
            Operation::Update => "UpdateAsset",
            Operation::Delete => "DeleteAsset",
            Operation::Transfer => "TransferAsset",
            Operation::List => "GetAllAssets",
            Operation::Exists => "AssetExists",
        }
    }

    /// Number of arguments expected
    pub fn arity(&self) -> usize {
        match self {
            Operation::Bootstrap | Operation::List => 0,
            Operation::Transfer => 2,
            _ => 1,
        }
    }

    /// Whether the operation leaves world state untouched
    pub fn is_read_only(&self) -> bool {
        matches!(self, Operation::Read | Operation::List | Operation::Exists)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The certificate contract
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateContract;

impl CertificateContract {
    /// Create the contract
    pub fn new() -> Self {
        Self
    }

    /// Dispatch a wire call
    pub fn invoke(
        &self,
        stub: &mut dyn WorldState,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        let operation = Operation::parse(function)
            .ok_or_else(|| Error::Validation(format!("unknown operation: {}", function)))?;

        if args.len() != operation.arity() {
            return Err(Error::Validation(format!(
                "{} expects {} argument(s), got {}",
                operation,
                operation.arity(),
                args.len()
            )));
        }

        match operation {
            Operation::Bootstrap => {
                self.bootstrap(stub)?;
                Ok(Vec::new())
            }
            Operation::Create => canonical::encode_value(&self.create(stub, &args[0])?),
            Operation::Read => self.read(stub, arg_str(args, 0)?),
            Operation::Update => canonical::encode_value(&self.update(stub, &args[0])?),
            Operation::Delete => {
                self.delete(stub, arg_str(args, 0)?)?;
                Ok(Vec::new())
            }
            Operation::Transfer => {
                let previous = self.transfer(stub, arg_str(args, 0)?, arg_str(args, 1)?)?;
                Ok(previous.into_bytes())
            }
            Operation::List => canonical::encode_value(&Value::Array(self.list(stub)?)),
            Operation::Exists => {
                let exists = self.exists(stub, arg_str(args, 0)?)?;
                Ok(exists.to_string().into_bytes())
            }
        }
    }

    /// Write the seed records, overwriting any previous values
    pub fn bootstrap(&self, stub: &mut dyn WorldState) -> Result<()> {
        for mut record in fixtures::seed_records() {
            record.record_type = Some(RECORD_TYPE.to_string());
            stub.put_state(&record.record_id, record.to_canonical_bytes()?)?;
            tracing::info!(record_id = %record.record_id, "Certificate initialized");
        }
        Ok(())
    }

    /// Create a record; fails if the key is taken
    ///
    /// The caller's document is stored as sent, key-sorted, plus `recordType`
    /// when it is absent.
    pub fn create(&self, stub: &mut dyn WorldState, record_json: &[u8]) -> Result<Value> {
        let (id, mut record) = parse_record(record_json)?;

        if self.exists(stub, &id)? {
            return Err(Error::Conflict(format!("the certificate {} already exists", id)));
        }

        stamp_record_type(&mut record);
        let record = Value::Object(record);
        stub.put_state(&id, canonical::encode_value(&record)?)?;

        tracing::info!(record_id = %id, "Certificate created");
        Ok(record)
    }

    /// Stored bytes for `id`
    pub fn read(&self, stub: &dyn WorldState, id: &str) -> Result<Vec<u8>> {
        match stub.get_state(id)? {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(Error::not_found(id)),
        }
    }

    /// Replace a live record wholesale
    pub fn update(&self, stub: &mut dyn WorldState, record_json: &[u8]) -> Result<Value> {
        let (id, mut record) = parse_record(record_json)?;

        if !self.exists(stub, &id)? {
            return Err(Error::not_found(&id));
        }

        stamp_record_type(&mut record);
        let record = Value::Object(record);
        stub.put_state(&id, canonical::encode_value(&record)?)?;

        tracing::info!(record_id = %id, "Certificate updated");
        Ok(record)
    }

    /// Remove a live record
    pub fn delete(&self, stub: &mut dyn WorldState, id: &str) -> Result<()> {
        if !self.exists(stub, id)? {
            return Err(Error::not_found(id));
        }
        stub.delete_state(id)?;

        tracing::info!(record_id = %id, "Certificate deleted");
        Ok(())
    }

    /// Whether a non-empty value is stored at `id`
    pub fn exists(&self, stub: &dyn WorldState, id: &str) -> Result<bool> {
        Ok(stub.get_state(id)?.map_or(false, |bytes| !bytes.is_empty()))
    }

    /// Move a record to `new_subject_id`, returning the previous subject
    pub fn transfer(
        &self,
        stub: &mut dyn WorldState,
        id: &str,
        new_subject_id: &str,
    ) -> Result<String> {
        let bytes = self.read(stub, id)?;
        let mut record = match canonical::decode::<Value>(&bytes)? {
            Value::Object(record) => record,
            _ => {
                return Err(Error::Encoding(format!(
                    "the certificate {} is not a JSON object",
                    id
                )))
            }
        };

        // Only subjectId changes; every other field keeps its stored form
        let previous = match record.insert(
            "subjectId".to_string(),
            Value::String(new_subject_id.to_string()),
        ) {
            Some(Value::String(subject)) => subject,
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        };
        stub.put_state(id, canonical::encode_value(&Value::Object(record))?)?;

        tracing::info!(
            record_id = %id,
            from = %previous,
            to = %new_subject_id,
            "Certificate transferred"
        );
        Ok(previous)
    }

    /// Every stored entry in key order
    ///
    /// Entries that are not valid JSON come back as JSON strings.
    pub fn list(&self, stub: &dyn WorldState) -> Result<Vec<Value>> {
        let mut scan = stub.get_state_by_range("", "")?;
        let mut results = Vec::new();

        while scan.has_next() {
            if let Some(entry) = scan.advance() {
                results.push(entry?.decode());
            }
        }

        Ok(results)
    }
}

/// Decode a caller document and return its key
fn parse_record(record_json: &[u8]) -> Result<(String, Map<String, Value>)> {
    let Value::Object(record) = canonical::decode::<Value>(record_json)? else {
        return Err(Error::Validation("record must be a JSON object".to_string()));
    };

    match record.get("recordId") {
        Some(Value::String(id)) if !id.is_empty() => Ok((id.clone(), record)),
        _ => Err(Error::Validation("recordId is required".to_string())),
    }
}

fn stamp_record_type(record: &mut Map<String, Value>) {
    record
        .entry("recordType")
        .or_insert_with(|| Value::String(RECORD_TYPE.to_string()));
}

fn arg_str(args: &[Vec<u8>], index: usize) -> Result<&str> {
    std::str::from_utf8(&args[index])
        .map_err(|e| Error::Validation(format!("argument {} is not UTF-8: {}", index, e)))
}
