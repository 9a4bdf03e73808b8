//! Certificate ledger command-line client

use anyhow::Context;
use cert_gateway::{
    local, CertificateClient, Gateway, GatewayConfig, GatewayTransport, LocalNetwork,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "certctl")]
#[command(about = "Issue, inspect and transfer certificates on the ledger")]
struct Cli {
    /// Path to a TOML configuration file (defaults plus environment otherwise)
    #[arg(short, long, env = "CERTCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Run against an in-process development network persisted in this directory
    #[arg(long, value_name = "DATA_DIR")]
    local: Option<PathBuf>,

    /// Print session metrics after the command
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the seed certificates
    Init,
    /// List every certificate
    List,
    /// Show one certificate
    Read {
        /// Record id
        id: String,
    },
    /// Create a certificate from a JSON record
    Create {
        /// JSON record with at least `recordId`
        record: String,
    },
    /// Replace a certificate from a JSON record
    Update {
        /// JSON record with at least `recordId`
        record: String,
    },
    /// Delete a certificate
    Delete {
        /// Record id
        id: String,
    },
    /// Move a certificate to a new subject
    Transfer {
        /// Record id
        id: String,
        /// New subject id
        new_subject_id: String,
    },
    /// Check whether a certificate exists
    Exists {
        /// Record id
        id: String,
    },
    /// Serve a development network over gRPC until interrupted
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7051")]
        listen: SocketAddr,
        /// Server certificate (PEM)
        #[arg(long)]
        tls_cert: PathBuf,
        /// Server private key (PEM)
        #[arg(long)]
        tls_key: PathBuf,
        /// Public keys (hex) of client identities to admit, as MSP:KEY
        #[arg(long = "member", value_name = "MSP:KEY")]
        members: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    config.apply_env()?;

    if let Command::Serve {
        listen,
        tls_cert,
        tls_key,
        members,
    } = cli.command
    {
        config.local.data_dir = cli.local;
        return serve(&config, listen, &tls_cert, &tls_key, &members).await;
    }

    match cli.local {
        Some(data_dir) => {
            config.local.data_dir = Some(data_dir);
            let gateway = Gateway::open_local(&config).await?;
            session(&gateway, cli.command, cli.metrics).await
        }
        None => {
            let gateway = Gateway::open(&config)
                .await
                .context("failed to open gateway session")?;
            session(&gateway, cli.command, cli.metrics).await
        }
    }
}

/// Serve a development network until Ctrl-C
async fn serve(
    config: &GatewayConfig,
    listen: SocketAddr,
    tls_cert: &std::path::Path,
    tls_key: &std::path::Path,
    members: &[String],
) -> anyhow::Result<()> {
    let network = Arc::new(LocalNetwork::start(config).await?);
    for member in members {
        let (msp_id, key) = parse_member(member)?;
        network.register_member(&msp_id, key);
    }

    let tls = local::tls_config(tls_cert, tls_key).await?;
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot listen on {}", listen))?;

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
    };
    let served = local::serve(Arc::clone(&network), listener, tls, shutdown).await;

    network.close().await;
    Ok(served?)
}

/// Run one command, racing Ctrl-C, and always close the session
async fn session<T: GatewayTransport>(
    gateway: &Gateway<T>,
    command: Command,
    print_metrics: bool,
) -> anyhow::Result<()> {
    let result = tokio::select! {
        result = execute(gateway, command) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, closing gateway");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    if print_metrics {
        match gateway.metrics().render() {
            Ok(text) => eprintln!("{}", text),
            Err(e) => tracing::warn!(error = %e, "Failed to render metrics"),
        }
    }

    gateway.close().await;
    result
}

async fn execute<T: GatewayTransport>(gateway: &Gateway<T>, command: Command) -> anyhow::Result<()> {
    let client = CertificateClient::new(gateway);

    match command {
        Command::Init => {
            client.bootstrap().await?;
            println!("Ledger initialized with seed certificates");
        }
        Command::List => {
            let records = client.list().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Command::Read { id } => {
            let record = client.read_document(&id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Create { record } => {
            let record = parse_record(&record)?;
            let created = client.create_document(&record).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        Command::Update { record } => {
            let record = parse_record(&record)?;
            let updated = client.update_document(&record).await?;
            println!("{}", serde_json::to_string_pretty(&updated)?);
        }
        Command::Delete { id } => {
            client.delete(&id).await?;
            println!("Certificate {} deleted", id);
        }
        Command::Transfer { id, new_subject_id } => {
            let previous = client.transfer(&id, &new_subject_id).await?;
            println!(
                "Certificate {} transferred from {:?} to {:?}",
                id, previous, new_subject_id
            );
        }
        Command::Exists { id } => {
            println!("{}", client.exists(&id).await?);
        }
        Command::Serve { .. } => anyhow::bail!("serve does not run inside a session"),
    }

    Ok(())
}

/// Caller JSON is sent as-is; the contract validates `recordId`
fn parse_record(json: &str) -> anyhow::Result<Value> {
    let record: Value = serde_json::from_str(json).context("record is not valid JSON")?;
    anyhow::ensure!(record.is_object(), "record must be a JSON object");
    Ok(record)
}

/// `MSP:HEX` member entry
fn parse_member(entry: &str) -> anyhow::Result<(String, ed25519_dalek::VerifyingKey)> {
    let (msp_id, key) = entry
        .split_once(':')
        .with_context(|| format!("member {:?} is not MSP:KEY", entry))?;
    let bytes: [u8; 32] = hex::decode(key)
        .context("member key is not hex")?
        .try_into()
        .map_err(|_| anyhow::anyhow!("member key must be 32 bytes"))?;
    let key = ed25519_dalek::VerifyingKey::from_bytes(&bytes).context("invalid member key")?;
    Ok((msp_id.to_string(), key))
}
