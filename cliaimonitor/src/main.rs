//! CLIAIMONITOR control-plane binary: wires the store, agent-comms hub,
//! and HTTP/WebSocket façade together and serves them (spec §6).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cliaimonitor_comms::AgentCommsHub;
use cliaimonitor_server::{router, AppState};
use cliaimonitor_store::{PoolConfig, Store};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "cliaimonitor", about = "CLIAIMONITOR control-plane server")]
struct Cli {
    /// Path to the SQLite database file. Defaults to an in-memory store.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long, default_value = "127.0.0.1:8787")]
    bind: String,

    /// Extra allowed WebSocket origins, comma-separated
    /// (`CLIAIMONITOR_ALLOWED_ORIGINS` overrides if set).
    #[arg(long, default_value = "")]
    allowed_origins: String,

    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let store = Arc::new(match &cli.db_path {
        Some(path) => Store::open(path, PoolConfig::default())
            .with_context(|| format!("failed to open store at {}", path.display()))?,
        None => Store::open_in_memory(PoolConfig::default())
            .context("failed to open in-memory store")?,
    });
    let comms = Arc::new(AgentCommsHub::new());

    let origins_env = std::env::var("CLIAIMONITOR_ALLOWED_ORIGINS").unwrap_or_default();
    let extra_origins = if origins_env.is_empty() {
        cli.allowed_origins.clone()
    } else {
        origins_env
    };
    let allowed_origins = cliaimonitor_server::validation::allowed_origins(&extra_origins);

    let state = AppState::new(store, comms, allowed_origins);
    let app = router(state);

    let addr = cli
        .bind
        .parse::<std::net::SocketAddr>()
        .with_context(|| format!("invalid bind address '{}'", cli.bind))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "starting cliaimonitor control-plane server");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    Ok(())
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Waits for Ctrl+C or SIGTERM so the grace-period shutdown protocol
/// (spec §5) has a chance to run before the process exits.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
