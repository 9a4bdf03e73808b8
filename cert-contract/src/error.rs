//! Error types for the contract

use thiserror::Error;

/// Result type for contract operations
pub type Result<T> = std::result::Result<T, Error>;

/// Response status codes carried in a contract response
pub mod status {
    /// Operation succeeded
    pub const OK: i32 = 200;
    /// Malformed or missing input
    pub const BAD_REQUEST: i32 = 400;
    /// Key absent from world state
    pub const NOT_FOUND: i32 = 404;
    /// Key already present in world state
    pub const CONFLICT: i32 = 409;
    /// Value could not be encoded or decoded
    pub const UNPROCESSABLE: i32 = 422;
    /// Storage failure on the executing peer
    pub const INTERNAL: i32 = 500;
}

/// Contract errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or malformed input (absent key, bad arity, unknown operation)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Key already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Canonical encoding or decoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Status code used when the error crosses the wire
    pub fn status(&self) -> i32 {
        match self {
            Error::Validation(_) => status::BAD_REQUEST,
            Error::NotFound(_) => status::NOT_FOUND,
            Error::Conflict(_) => status::CONFLICT,
            Error::Encoding(_) => status::UNPROCESSABLE,
            Error::Storage(_) => status::INTERNAL,
        }
    }

    /// Detail message without the kind prefix
    pub fn message(&self) -> &str {
        match self {
            Error::Validation(msg)
            | Error::Conflict(msg)
            | Error::NotFound(msg)
            | Error::Encoding(msg)
            | Error::Storage(msg) => msg,
        }
    }

    pub(crate) fn not_found(id: &str) -> Self {
        Error::NotFound(format!("the certificate {} does not exist", id))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::Validation("x".into()).status(), status::BAD_REQUEST);
        assert_eq!(Error::not_found("R-1").status(), status::NOT_FOUND);
        assert_eq!(Error::Conflict("x".into()).status(), status::CONFLICT);
        assert_eq!(Error::Storage("x".into()).status(), status::INTERNAL);
    }

    #[test]
    fn test_message_has_no_prefix() {
        let err = Error::not_found("R-1");
        assert_eq!(err.message(), "the certificate R-1 does not exist");
        assert!(err.to_string().starts_with("Not found"));
    }
}
