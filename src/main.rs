use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use chatroom_server::ServerConfig;
use chatroom_store::{MessageStore, SqliteMessageStore};
use chatroom_telemetry::{LogFormat, TelemetryConfig};

/// How long in-flight connections get to drain after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Multi-user WebSocket chat server.
#[derive(Debug, Parser)]
#[command(name = "chatroom", version)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "CHATROOM_ADDR", default_value = "0.0.0.0:8080")]
    addr: String,

    /// SQLite database holding chat history.
    #[arg(long, env = "CHATROOM_DB", default_value = "./chat.db")]
    db: PathBuf,

    /// Log output format: pretty or json.
    #[arg(long, env = "CHATROOM_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    chatroom_telemetry::init_telemetry(&TelemetryConfig {
        format: cli.log_format,
        ..TelemetryConfig::default()
    })
    .context("failed to initialize logging")?;

    tracing::info!(addr = %cli.addr, db = %cli.db.display(), "starting chatroom");

    let store = SqliteMessageStore::open(&cli.db)
        .with_context(|| format!("failed to open database at {}", cli.db.display()))?;
    store.init().context("failed to initialize message store")?;

    let config = ServerConfig {
        addr: cli.addr,
        ..ServerConfig::default()
    };
    let handle = chatroom_server::start(config, Arc::new(store))
        .await
        .context("failed to start server")?;

    tracing::info!(addr = %handle.local_addr(), "chatroom ready");

    shutdown_signal().await;
    handle.shutdown();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, handle.wait()).await.is_err() {
        tracing::warn!("shutdown timed out after {SHUTDOWN_TIMEOUT:?}");
    }
    tracing::info!("chatroom stopped");
    Ok(())
}

/// Resolve on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
