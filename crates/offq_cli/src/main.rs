use std::{net::SocketAddr, path::Path, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use offq_connectivity::{spawn_heartbeat, ConnectivityState};
use offq_contract::QueueStatus;
use offq_control_plane::{build_router, AppState};
use offq_queue::{QueueConfig, QueueManager};
use offq_storage::{RecordStore, SqliteRecordStore, StorageConfig};
use offq_transfer::{SpoolConfig, SpoolTransferClient, TransferClient};
use serde::Deserialize;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Offline upload queue daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the queue and its HTTP control plane.
    Serve {
        #[arg(long, default_value = "config/node.toml")]
        config: PathBuf,
    },
    /// Print queue counts from the local store.
    Status {
        #[arg(long, default_value = "config/node.toml")]
        config: PathBuf,
    },
    /// Run a single drain pass and exit.
    Drain {
        #[arg(long, default_value = "config/node.toml")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize)]
struct RuntimeConfig {
    storage: StorageSection,
    transfer: TransferSection,
    #[serde(default)]
    connectivity: ConnectivitySection,
    http: HttpSection,
    #[serde(default)]
    queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct StorageSection {
    sqlite_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TransferSection {
    outbox_dir: PathBuf,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct ConnectivitySection {
    heartbeat_ms: u64,
}

impl Default for ConnectivitySection {
    fn default() -> Self {
        Self { heartbeat_ms: 5000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct HttpSection {
    bind: String,
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { config } => serve(load_config(&config)?).await,
        Command::Status { config } => status(load_config(&config)?).await,
        Command::Drain { config } => drain_once(load_config(&config)?).await,
    }
}

fn load_config(config_path: &Path) -> Result<RuntimeConfig> {
    let config_source = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read config file {}", config_path.display()))?;
    parse_config(&config_source)
        .with_context(|| format!("invalid config TOML at {}", config_path.display()))
}

fn parse_config(source: &str) -> Result<RuntimeConfig> {
    Ok(toml::from_str(source)?)
}

async fn open_store(config: &RuntimeConfig) -> Result<Arc<SqliteRecordStore>> {
    if let Some(parent) = Path::new(&config.storage.sqlite_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = SqliteRecordStore::open(StorageConfig {
        sqlite_path: config.storage.sqlite_path.clone(),
    })
    .await
    .with_context(|| format!("failed to open store {}", config.storage.sqlite_path))?;
    Ok(Arc::new(store))
}

fn spool_client(config: &RuntimeConfig) -> Arc<SpoolTransferClient> {
    let mut spool = SpoolConfig::new(config.transfer.outbox_dir.clone());
    spool.timeout = Duration::from_millis(config.transfer.timeout_ms);
    Arc::new(SpoolTransferClient::new(spool))
}

async fn serve(config: RuntimeConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let client = spool_client(&config);

    let reachable = client.probe().await;
    if !reachable {
        warn!(
            outbox = %config.transfer.outbox_dir.display(),
            "outbox unreachable at startup, uploads will queue"
        );
    }
    let connectivity = Arc::new(ConnectivityState::new(reachable));
    let probe_client = client.clone();
    let heartbeat = spawn_heartbeat(
        connectivity.clone(),
        Duration::from_millis(config.connectivity.heartbeat_ms),
        move || {
            let client = probe_client.clone();
            async move { client.probe().await }
        },
    );

    let queue = QueueManager::new(store.clone(), client, connectivity, config.queue.clone());
    let listener_task = queue.start().await.context("failed to start upload queue")?;
    let app = build_router(AppState::new(queue));

    if !is_loopback_bind(&config.http.bind) {
        warn!(bind = %config.http.bind, "control plane has no authentication and is exposed beyond loopback");
    }

    let socket: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid socket address {}", config.http.bind))?;

    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;

    info!(bind = %config.http.bind, "offqd control-plane listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server failed");

    heartbeat.abort();
    listener_task.abort();
    store.close().await;
    info!("offqd stopped");
    served
}

async fn status(config: RuntimeConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let records = store.list_all().await.context("failed to list uploads")?;
    let status = QueueStatus::from_records(&records);
    println!("{}", serde_json::to_string_pretty(&status)?);
    store.close().await;
    Ok(())
}

async fn drain_once(config: RuntimeConfig) -> Result<()> {
    let store = open_store(&config).await?;
    let client = spool_client(&config);
    let connectivity = Arc::new(ConnectivityState::new(client.probe().await));

    let queue = QueueManager::new(store.clone(), client, connectivity, config.queue.clone());
    let recovered = queue.recover().await.context("failed to recover in-flight uploads")?;
    if recovered > 0 {
        info!(recovered, "re-queued uploads left in flight");
    }
    let outcome = queue.drain().await.context("drain failed")?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

fn is_loopback_bind(bind: &str) -> bool {
    match bind.parse::<SocketAddr>() {
        Ok(addr) => addr.ip().is_loopback(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse_config(
            r#"
            [storage]
            sqlite_path = "data/offq.sqlite"

            [transfer]
            outbox_dir = "data/outbox"

            [http]
            bind = "127.0.0.1:8787"
            "#,
        )
        .expect("config");

        assert_eq!(config.transfer.timeout_ms, 30_000);
        assert_eq!(config.connectivity.heartbeat_ms, 5000);
        assert_eq!(config.queue, QueueConfig::default());
        assert!(config.queue.redrain.is_none());
    }

    #[test]
    fn queue_sections_override_backoff() {
        let config = parse_config(
            r#"
            [storage]
            sqlite_path = "offq.sqlite"

            [transfer]
            outbox_dir = "/mnt/outbox"
            timeout_ms = 500

            [http]
            bind = "0.0.0.0:9000"

            [queue.retry]
            initial_delay_ms = 250
            max_attempts = 4

            [queue.redrain]
            initial_delay_ms = 2000
            max_delay_ms = 60000
            "#,
        )
        .expect("config");

        assert_eq!(config.queue.retry.initial_delay_ms, 250);
        assert_eq!(config.queue.retry.max_attempts, 4);
        assert_eq!(config.queue.retry.max_delay_ms, 10_000);
        let redrain = config.queue.redrain.expect("redrain");
        assert_eq!(redrain.initial_delay_ms, 2000);
        assert_eq!(redrain.max_attempts, 3);
        assert!(!is_loopback_bind(&config.http.bind));
    }

    #[test]
    fn missing_sections_are_rejected() {
        assert!(parse_config("[http]\nbind = \"127.0.0.1:1\"\n").is_err());
    }

    #[test]
    fn loopback_binds_are_detected() {
        assert!(is_loopback_bind("127.0.0.1:8787"));
        assert!(is_loopback_bind("[::1]:8787"));
        assert!(!is_loopback_bind("not-an-address"));
    }
}
