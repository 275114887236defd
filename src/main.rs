#![forbid(unsafe_code)]

//! `exec-relay` — chat relay server binary.
//!
//! Bootstraps configuration and credentials, builds the platform client
//! and stream relay, and serves the HTTP/SSE endpoints until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use exec_relay::config::GlobalConfig;
use exec_relay::documents::SessionDocuments;
use exec_relay::http::{server, AppState};
use exec_relay::platform::http::HttpPlatform;
use exec_relay::platform::ExecutionPlatform;
use exec_relay::watcher::relay::StreamRelay;
use exec_relay::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "exec-relay", about = "Streams remote execution answers as chat", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("exec-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    config.load_credentials().await?;
    let config = Arc::new(config);
    info!(
        platform = %config.platform.base_url,
        delta_mode = ?config.watch.delta_mode,
        "configuration loaded"
    );

    // ── Build relay ─────────────────────────────────────
    let platform: Arc<dyn ExecutionPlatform> = Arc::new(HttpPlatform::new(&config.platform)?);
    let documents = Arc::new(SessionDocuments::new(
        Arc::clone(&platform),
        config.documents.clone(),
    ));
    let relay = Arc::new(StreamRelay::new(
        platform,
        documents,
        config.watch_settings(),
        config.max_concurrent_streams,
    ));
    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        relay,
    });

    // ── Serve ───────────────────────────────────────────
    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = server::serve(state, server_ct).await {
            error!(%err, "http relay failed");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    let _ = server_handle.await;
    info!("exec-relay shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
