//! Configuration for the gateway session and the development network

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CRYPTO_PATH: &str =
    "../../test-network/organizations/peerOrganizations/org1.example.com";

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Membership service provider of the client identity
    pub msp_id: String,

    /// Channel the contract is deployed on
    pub channel_name: String,

    /// Contract name
    pub chaincode_name: String,

    /// Peer gRPC endpoint (host:port)
    pub peer_endpoint: String,

    /// TLS host name override, checked against the peer certificate
    pub peer_host_alias: String,

    /// Root of the organization's crypto material
    pub crypto_path: PathBuf,

    /// TLS root certificate (defaults under `crypto_path`)
    pub tls_cert_path: Option<PathBuf>,

    /// Directory holding the client credential (defaults under `crypto_path`)
    pub cert_dir: Option<PathBuf>,

    /// Directory holding the client private key (defaults under `crypto_path`)
    pub key_dir: Option<PathBuf>,

    /// Channel establishment deadline (milliseconds)
    pub connect_timeout_ms: u64,

    /// Per-stage deadlines
    pub timeouts: CallTimeouts,

    /// Development network settings
    pub local: LocalNetworkConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            msp_id: "Org1MSP".to_string(),
            channel_name: "mychannel".to_string(),
            chaincode_name: "basic".to_string(),
            peer_endpoint: "localhost:7051".to_string(),
            peer_host_alias: "peer0.org1.example.com".to_string(),
            crypto_path: PathBuf::from(DEFAULT_CRYPTO_PATH),
            tls_cert_path: None,
            cert_dir: None,
            key_dir: None,
            connect_timeout_ms: 5000,
            timeouts: CallTimeouts::default(),
            local: LocalNetworkConfig::default(),
        }
    }
}

/// Per-stage deadlines (milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallTimeouts {
    /// Read-only evaluation
    pub evaluate_ms: u64,

    /// Endorsement collection
    pub endorse_ms: u64,

    /// Submission to ordering
    pub submit_ms: u64,

    /// Waiting for commit status
    pub commit_status_ms: u64,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            evaluate_ms: 5_000,
            endorse_ms: 15_000,
            submit_ms: 5_000,
            commit_status_ms: 60_000,
        }
    }
}

impl CallTimeouts {
    /// Evaluate deadline
    pub fn evaluate(&self) -> Duration {
        Duration::from_millis(self.evaluate_ms)
    }

    /// Endorse deadline
    pub fn endorse(&self) -> Duration {
        Duration::from_millis(self.endorse_ms)
    }

    /// Submit deadline
    pub fn submit(&self) -> Duration {
        Duration::from_millis(self.submit_ms)
    }

    /// Commit-status deadline
    pub fn commit_status(&self) -> Duration {
        Duration::from_millis(self.commit_status_ms)
    }
}

/// In-process development network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalNetworkConfig {
    /// Cut a block once this many transactions are pending
    pub max_message_count: usize,

    /// Cut a non-empty block after this long (milliseconds)
    pub batch_timeout_ms: u64,

    /// Orderer mailbox capacity
    pub mailbox_capacity: usize,

    /// Blocks whose transaction outcomes stay queryable by commit status
    pub status_retention_blocks: usize,

    /// RocksDB world state; in-memory when unset
    pub data_dir: Option<PathBuf>,
}

impl Default for LocalNetworkConfig {
    fn default() -> Self {
        Self {
            max_message_count: 10,
            batch_timeout_ms: 2_000,
            mailbox_capacity: 1000,
            status_retention_blocks: 1024,
            data_dir: None,
        }
    }
}

impl LocalNetworkConfig {
    /// Block-cut timeout
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

impl GatewayConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: GatewayConfig = toml::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = GatewayConfig::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(msp_id) = std::env::var("MSP_ID") {
            self.msp_id = msp_id;
        }
        if let Ok(channel) = std::env::var("CHANNEL_NAME") {
            self.channel_name = channel;
        }
        if let Ok(chaincode) = std::env::var("CHAINCODE_NAME") {
            self.chaincode_name = chaincode;
        }
        if let Ok(endpoint) = std::env::var("PEER_ENDPOINT") {
            self.peer_endpoint = endpoint;
        }
        if let Ok(alias) = std::env::var("PEER_HOST_ALIAS") {
            self.peer_host_alias = alias;
        }
        if let Ok(path) = std::env::var("CRYPTO_PATH") {
            self.crypto_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("TLS_CERT_PATH") {
            self.tls_cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("CERT_DIRECTORY_PATH") {
            self.cert_dir = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("KEY_DIRECTORY_PATH") {
            self.key_dir = Some(PathBuf::from(path));
        }
        if let Ok(ms) = std::env::var("CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = ms
                .parse()
                .map_err(|e| Error::Configuration(format!("Invalid CONNECT_TIMEOUT_MS: {}", e)))?;
        }
        Ok(())
    }

    /// TLS root certificate path
    pub fn tls_cert_path(&self) -> PathBuf {
        self.tls_cert_path.clone().unwrap_or_else(|| {
            self.crypto_path
                .join("peers")
                .join(&self.peer_host_alias)
                .join("tls")
                .join("ca.crt")
        })
    }

    /// Client credential directory
    pub fn cert_dir(&self) -> PathBuf {
        self.cert_dir
            .clone()
            .unwrap_or_else(|| self.user_msp_dir().join("signcerts"))
    }

    /// Client private key directory
    pub fn key_dir(&self) -> PathBuf {
        self.key_dir
            .clone()
            .unwrap_or_else(|| self.user_msp_dir().join("keystore"))
    }

    /// Channel establishment deadline
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    fn user_msp_dir(&self) -> PathBuf {
        let org = self
            .peer_host_alias
            .split_once('.')
            .map(|(_, org)| org)
            .unwrap_or("org1.example.com");
        self.crypto_path
            .join("users")
            .join(format!("User1@{}", org))
            .join("msp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.msp_id, "Org1MSP");
        assert_eq!(config.channel_name, "mychannel");
        assert_eq!(config.chaincode_name, "basic");
        assert_eq!(config.timeouts.evaluate(), Duration::from_secs(5));
        assert_eq!(config.timeouts.endorse(), Duration::from_secs(15));
        assert_eq!(config.timeouts.submit(), Duration::from_secs(5));
        assert_eq!(config.timeouts.commit_status(), Duration::from_secs(60));
    }

    #[test]
    fn test_derived_paths() {
        let config = GatewayConfig {
            crypto_path: PathBuf::from("/crypto"),
            ..Default::default()
        };
        assert_eq!(
            config.tls_cert_path(),
            PathBuf::from("/crypto/peers/peer0.org1.example.com/tls/ca.crt")
        );
        assert_eq!(
            config.key_dir(),
            PathBuf::from("/crypto/users/User1@org1.example.com/msp/keystore")
        );

        let explicit = GatewayConfig {
            cert_dir: Some(PathBuf::from("/elsewhere")),
            ..config
        };
        assert_eq!(explicit.cert_dir(), PathBuf::from("/elsewhere"));
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(
            &path,
            "channel_name = \"certs\"\n[timeouts]\nevaluate_ms = 250\n[local]\nmax_message_count = 1\n",
        )
        .unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.channel_name, "certs");
        assert_eq!(config.msp_id, "Org1MSP");
        assert_eq!(config.timeouts.evaluate_ms, 250);
        assert_eq!(config.timeouts.commit_status_ms, 60_000);
        assert_eq!(config.local.max_message_count, 1);
        assert_eq!(config.local.status_retention_blocks, 1024);
    }

    #[test]
    fn test_unreadable_file_is_configuration_error() {
        let err = GatewayConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }
}
