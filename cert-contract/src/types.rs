//! Typed view of certificate records
//!
//! The contract itself stores caller documents untouched; these types are
//! for clients and fixtures that want named fields. Unknown fields survive a
//! decode/encode cycle through the `extensions` maps.

use crate::{canonical, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Discriminator stamped on every certificate entry
pub const RECORD_TYPE: &str = "certificate";

/// Certificate record stored under its `recordId`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Ledger key, immutable once created
    #[serde(default)]
    pub record_id: String,

    /// Entity the record is about (changed by Transfer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    /// Issuing party
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<Issuer>,

    /// Approval trail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<Approval>,

    /// Descriptive fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,

    /// Lifecycle label ("Pending", "Approved", "Issued", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Namespace discriminator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_type: Option<String>,

    /// External reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Fields this version does not model
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl Record {
    /// Create a record with only its key set
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            ..Default::default()
        }
    }

    /// Set the subject
    pub fn with_subject(mut self, subject_id: impl Into<String>) -> Self {
        self.subject_id = Some(subject_id.into());
        self
    }

    /// Set the status label
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Parse from JSON bytes
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        canonical::decode(bytes)
    }

    /// Canonical bytes as written to world state
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        canonical::encode(self)
    }

    /// Whether this entry belongs to the certificate namespace
    pub fn is_certificate(&self) -> bool {
        self.record_type.as_deref() == Some(RECORD_TYPE)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.record_id)
    }
}

/// Issuing party
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issuer {
    /// Issuer identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_id: Option<String>,

    /// Issuance timestamp (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,

    /// Unmodelled fields
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl Issuer {
    /// Create issuer
    pub fn new(issuer_id: impl Into<String>, issue_date: impl Into<String>) -> Self {
        Self {
            issuer_id: Some(issuer_id.into()),
            issue_date: Some(issue_date.into()),
            extensions: BTreeMap::new(),
        }
    }
}

/// Approval trail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    /// Approver identifiers
    #[serde(default)]
    pub approver_ids: Vec<String>,

    /// Approval-stage labels, parallel to `approver_ids`
    #[serde(default)]
    pub stages: Vec<String>,

    /// Fully approved flag
    #[serde(default)]
    pub approved: bool,

    /// Approval timestamp, `null` until approved
    #[serde(default)]
    pub approved_at: Option<String>,

    /// Unmodelled fields
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

/// Schema-free descriptive fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Value>);

impl Payload {
    /// Empty payload
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Certificate name
    pub fn name(&self) -> Option<&str> {
        self.get("name").and_then(Value::as_str)
    }

    /// Category (course, discipline)
    pub fn category(&self) -> Option<&str> {
        self.get("category").and_then(Value::as_str)
    }

    /// Qualification level
    pub fn level(&self) -> Option<&str> {
        self.get("level").and_then(Value::as_str)
    }

    /// Iterate fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no fields are set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
