//! Error types for the gateway
//!
//! Contract errors travel over the wire as a status code plus message and are
//! rebuilt into the same kind here, so callers match on one taxonomy whether a
//! failure happened locally, in transit, or inside the contract.

use cert_contract::error::status;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol stage a gateway failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Channel establishment
    Connect,
    /// Read-only execution on a single peer
    Evaluate,
    /// Endorsement collection
    Endorse,
    /// Hand-off to the ordering service
    Submit,
    /// Waiting for the commit outcome
    CommitStatus,
}

impl Stage {
    /// Stable lowercase name, used in logs and metric labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Connect => "connect",
            Stage::Evaluate => "evaluate",
            Stage::Endorse => "endorse",
            Stage::Submit => "submit",
            Stage::CommitStatus => "commit-status",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-kinds of a gateway failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayErrorKind {
    /// Peer unreachable or session closed
    ConnectionRefused,
    /// Stage deadline expired
    DeadlineExceeded,
    /// Network answered with a failure
    RemoteRejected,
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GatewayErrorKind::ConnectionRefused => "connection refused",
            GatewayErrorKind::DeadlineExceeded => "deadline exceeded",
            GatewayErrorKind::RemoteRejected => "remote rejected",
        })
    }
}

/// Machine-readable error kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or malformed input
    Validation,
    /// Key already exists
    Conflict,
    /// Key does not exist
    NotFound,
    /// Bad or missing local configuration
    Configuration,
    /// Transport or consensus failure
    Gateway(GatewayErrorKind),
    /// Value could not be encoded or decoded
    Encoding,
}

impl ErrorKind {
    /// Stable name, used as a metric label
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Gateway(GatewayErrorKind::ConnectionRefused) => "connection_refused",
            ErrorKind::Gateway(GatewayErrorKind::DeadlineExceeded) => "deadline_exceeded",
            ErrorKind::Gateway(GatewayErrorKind::RemoteRejected) => "remote_rejected",
            ErrorKind::Encoding => "encoding",
        }
    }
}

/// Gateway errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Key already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad or missing local configuration (paths, keys, certificates)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport or consensus failure at a given stage
    #[error("Gateway error ({kind}) during {stage}: {message}")]
    Gateway {
        /// What went wrong
        kind: GatewayErrorKind,
        /// Where it went wrong
        stage: Stage,
        /// Detail
        message: String,
    },

    /// Value could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl Error {
    /// Machine-readable kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Gateway { kind, .. } => ErrorKind::Gateway(*kind),
            Error::Encoding(_) => ErrorKind::Encoding,
        }
    }

    /// Failing stage, for gateway errors
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Gateway { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Peer unreachable or session closed
    pub fn connection_refused(stage: Stage, message: impl Into<String>) -> Self {
        Error::Gateway {
            kind: GatewayErrorKind::ConnectionRefused,
            stage,
            message: message.into(),
        }
    }

    /// Stage deadline expired
    pub fn deadline_exceeded(stage: Stage, deadline: Duration) -> Self {
        Error::Gateway {
            kind: GatewayErrorKind::DeadlineExceeded,
            stage,
            message: format!("no response within {:?}", deadline),
        }
    }

    /// Network answered with a failure
    pub fn remote_rejected(stage: Stage, message: impl Into<String>) -> Self {
        Error::Gateway {
            kind: GatewayErrorKind::RemoteRejected,
            stage,
            message: message.into(),
        }
    }

    /// Rebuild a contract failure from its wire status
    pub fn from_chaincode(stage: Stage, code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            status::BAD_REQUEST => Error::Validation(message),
            status::NOT_FOUND => Error::NotFound(message),
            status::CONFLICT => Error::Conflict(message),
            status::UNPROCESSABLE => Error::Encoding(message),
            other => Error::remote_rejected(stage, format!("status {}: {}", other, message)),
        }
    }

    /// Classify a gRPC status
    pub fn from_status(stage: Stage, status: &tonic::Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            tonic::Code::Unavailable => Error::connection_refused(stage, message),
            tonic::Code::DeadlineExceeded => Error::Gateway {
                kind: GatewayErrorKind::DeadlineExceeded,
                stage,
                message,
            },
            code => Error::remote_rejected(stage, format!("{:?}: {}", code, message)),
        }
    }

    /// Status a serving peer answers with; [`Error::from_status`] on the
    /// client recovers the gateway kind
    pub fn to_status(&self) -> tonic::Status {
        match self {
            Error::Gateway {
                kind: GatewayErrorKind::ConnectionRefused,
                message,
                ..
            } => tonic::Status::unavailable(message.clone()),
            Error::Gateway {
                kind: GatewayErrorKind::DeadlineExceeded,
                message,
                ..
            } => tonic::Status::deadline_exceeded(message.clone()),
            Error::Gateway {
                kind: GatewayErrorKind::RemoteRejected,
                message,
                ..
            } => tonic::Status::failed_precondition(message.clone()),
            Error::Validation(msg) | Error::Encoding(msg) => {
                tonic::Status::invalid_argument(msg.clone())
            }
            Error::NotFound(msg) => tonic::Status::not_found(msg.clone()),
            Error::Conflict(msg) => tonic::Status::already_exists(msg.clone()),
            Error::Configuration(msg) => tonic::Status::internal(msg.clone()),
        }
    }

    /// Map a contract-side failure (decoding a result, encoding an argument,
    /// reading world state)
    pub fn from_contract(err: cert_contract::Error) -> Self {
        match err {
            cert_contract::Error::Validation(msg) => Error::Validation(msg),
            cert_contract::Error::Conflict(msg) => Error::Conflict(msg),
            cert_contract::Error::NotFound(msg) => Error::NotFound(msg),
            cert_contract::Error::Encoding(msg) => Error::Encoding(msg),
            cert_contract::Error::Storage(msg) => {
                Error::remote_rejected(Stage::Connect, format!("world state failure: {}", msg))
            }
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

impl From<prometheus::Error> for Error {
    fn from(err: prometheus::Error) -> Self {
        Error::Configuration(format!("metrics registry: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chaincode_status_round_trip() {
        let cases = [
            (cert_contract::Error::Validation("v".into()), ErrorKind::Validation),
            (cert_contract::Error::NotFound("n".into()), ErrorKind::NotFound),
            (cert_contract::Error::Conflict("c".into()), ErrorKind::Conflict),
            (cert_contract::Error::Encoding("e".into()), ErrorKind::Encoding),
            (
                cert_contract::Error::Storage("s".into()),
                ErrorKind::Gateway(GatewayErrorKind::RemoteRejected),
            ),
        ];

        for (contract_err, expected) in cases {
            let rebuilt =
                Error::from_chaincode(Stage::Endorse, contract_err.status(), contract_err.message());
            assert_eq!(rebuilt.kind(), expected);
        }
    }

    #[test]
    fn test_status_mapping() {
        let unavailable = Error::from_status(Stage::Evaluate, &tonic::Status::unavailable("down"));
        assert_eq!(
            unavailable.kind(),
            ErrorKind::Gateway(GatewayErrorKind::ConnectionRefused)
        );
        assert_eq!(unavailable.stage(), Some(Stage::Evaluate));

        let late = Error::from_status(Stage::Submit, &tonic::Status::deadline_exceeded("slow"));
        assert_eq!(late.kind(), ErrorKind::Gateway(GatewayErrorKind::DeadlineExceeded));

        let aborted = Error::from_status(Stage::Endorse, &tonic::Status::aborted("no"));
        assert_eq!(aborted.kind(), ErrorKind::Gateway(GatewayErrorKind::RemoteRejected));
    }

    #[test]
    fn test_storage_failure_is_not_configuration() {
        let err = Error::from_contract(cert_contract::Error::Storage("disk gone".into()));
        assert_eq!(err.kind(), ErrorKind::Gateway(GatewayErrorKind::RemoteRejected));
        assert_eq!(err.stage(), Some(Stage::Connect));
        assert!(err.to_string().contains("disk gone"));

        let err = Error::from_contract(cert_contract::Error::Conflict("taken".into()));
        assert_eq!(err, Error::Conflict("taken".into()));
    }

    #[test]
    fn test_served_status_keeps_gateway_kind() {
        let cases = [
            Error::connection_refused(Stage::Submit, "closed"),
            Error::deadline_exceeded(Stage::CommitStatus, Duration::from_millis(5)),
            Error::remote_rejected(Stage::Evaluate, "access denied"),
        ];

        for served in cases {
            let seen = Error::from_status(Stage::Evaluate, &served.to_status());
            assert_eq!(seen.kind(), served.kind());
        }

        let seen = Error::from_status(Stage::Submit, &Error::Validation("bad".into()).to_status());
        assert_eq!(seen.kind(), ErrorKind::Gateway(GatewayErrorKind::RemoteRejected));
        assert!(seen.to_string().contains("InvalidArgument"));
    }

    #[test]
    fn test_display_names_stage() {
        let err = Error::deadline_exceeded(Stage::CommitStatus, Duration::from_secs(60));
        assert_eq!(
            err.to_string(),
            "Gateway error (deadline exceeded) during commit-status: no response within 60s"
        );
    }
}
