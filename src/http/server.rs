//! HTTP server bootstrap.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{routes, AppState};
use crate::{AppError, Result};

/// Multipart framing allowance on top of the attachment size limit.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.documents.max_attachment_bytes + FORM_OVERHEAD_BYTES;
    Router::new()
        .route("/health", get(routes::health))
        .route("/start-stream", post(routes::start_stream))
        .route("/stream", get(routes::stream))
        .route("/chat", get(routes::chat))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind `http_host:http_port` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or the server
/// fails to bind.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", state.config.http_host, state.config.http_port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid bind address: {err}")))?;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind http on {bind}: {err}")))?;
    serve_on(listener, state, ct).await
}

/// Serve on an already bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server stops with an error.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Io(format!("listener has no local address: {err}")))?;
    info!(%local, "starting http relay");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server error: {err}")))?;

    info!("http relay shut down");
    Ok(())
}
