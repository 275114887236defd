//! Request handlers and error mapping.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Multipart, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::AppState;
use crate::documents::AttachmentUpload;
use crate::models::job::{JobKind, JobRef};
use crate::watcher::relay::{ChatRequest, PreparedWatch, StreamRelay};
use crate::AppError;

/// Error returned before a stream starts, rendered as `{"detail"}`.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

/// HTTP status for a pre-stream failure.
#[must_use]
pub fn status_for(err: &AppError) -> StatusCode {
    match err {
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::NotRunnable(_) => StatusCode::CONFLICT,
        AppError::AmbiguousSink(_) => StatusCode::UNPROCESSABLE_ENTITY,
        AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        AppError::AtCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if self.0.is_pre_stream() {
            debug!(err = %self.0, %status, "request rejected");
        } else {
            warn!(err = %self.0, %status, "request failed before streaming");
        }
        let body = Json(serde_json::json!({ "detail": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Handler for `GET /health`.
pub async fn health() -> &'static str {
    "ok"
}

/// Body returned by `POST /start-stream`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartStreamResponse {
    /// Conversation identifier.
    pub session_id: String,
    /// Message that was appended.
    pub message: String,
    /// Name of the attached file, if any.
    pub file_name: Option<String>,
    /// Where the uploaded attachment can be fetched from, if any.
    pub attachment_url: Option<String>,
    /// Document the message was appended to.
    pub item_id: String,
    /// Key of the appended user turn.
    pub prompt_key: String,
}

/// Handler for `POST /start-stream` (multipart form).
///
/// # Errors
///
/// Returns [`ApiError`] for missing fields, oversized files, or platform
/// failures.
pub async fn start_stream(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<StartStreamResponse>, ApiError> {
    let mut session_id = None;
    let mut message = None;
    let mut attachment = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("session_id") => session_id = Some(field.text().await.map_err(invalid_form)?),
            Some("message") => message = Some(field.text().await.map_err(invalid_form)?),
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_owned();
                let bytes = field.bytes().await.map_err(invalid_form)?;
                if !bytes.is_empty() {
                    attachment = Some(AttachmentUpload { file_name, bytes });
                }
            }
            _ => {}
        }
    }

    let session_id =
        session_id.ok_or_else(|| AppError::InvalidRequest("missing field session_id".into()))?;
    let message = message.ok_or_else(|| AppError::InvalidRequest("missing field message".into()))?;
    let file_name = attachment.as_ref().map(|a| a.file_name.clone());

    info!(session_id, has_file = file_name.is_some(), "start-stream request");
    let (document, appended) = state
        .relay
        .start_turn(&session_id, &message, attachment)
        .await?;

    Ok(Json(StartStreamResponse {
        session_id,
        message,
        file_name,
        attachment_url: appended.attachment_url,
        item_id: document.id,
        prompt_key: appended.prompt_key,
    }))
}

fn invalid_form(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError(AppError::InvalidRequest(format!("invalid multipart body: {err}")))
}

fn default_kind() -> JobKind {
    JobKind::Pipeline
}

/// Query of `GET /stream`.
#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Conversation identifier (logged only).
    #[serde(default)]
    pub session_id: Option<String>,
    /// Pipeline or model id.
    #[serde(alias = "value_id")]
    pub job_id: String,
    /// Job kind.
    #[serde(alias = "stream_type", default = "default_kind")]
    pub kind: JobKind,
    /// Document prepared by `/start-stream`.
    pub item_id: String,
}

/// Query of `GET /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    /// Conversation identifier.
    pub session_id: String,
    /// User message.
    #[serde(alias = "question")]
    pub message: String,
    /// Pipeline or model id.
    #[serde(alias = "pipeline_id")]
    pub job_id: String,
    /// Job kind.
    #[serde(default = "default_kind")]
    pub kind: JobKind,
}

/// Handler for `GET /stream`: run a job against a prepared document.
///
/// # Errors
///
/// Returns [`ApiError`] for configuration-class failures before streaming.
pub async fn stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> Result<Response, ApiError> {
    let job = JobRef {
        id: query.job_id,
        kind: query.kind,
    };
    info!(session_id = ?query.session_id, job_id = %job.id, item_id = %query.item_id, "stream request");
    let prepared = state.relay.prepare_existing(&job, &query.item_id).await?;
    Ok(sse_response(&state.relay, prepared))
}

/// Handler for `GET /chat`: append the message, run the job, stream.
///
/// # Errors
///
/// Returns [`ApiError`] for configuration-class failures before streaming.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
) -> Result<Response, ApiError> {
    info!(session_id = %query.session_id, job_id = %query.job_id, "chat request");
    let request = ChatRequest {
        session_id: query.session_id,
        message: query.message,
        job: JobRef {
            id: query.job_id,
            kind: query.kind,
        },
        attachment: None,
    };
    let prepared = state.relay.prepare_chat(request).await?;
    Ok(sse_response(&state.relay, prepared))
}

/// Start the watch loop and wrap its events in an SSE response.
///
/// The cancellation token is tied to the response body: when the client
/// disconnects the body is dropped and the watch loop stops polling.
fn sse_response(relay: &Arc<StreamRelay>, prepared: PreparedWatch) -> Response {
    let headers = [(header::CACHE_CONTROL, "no-cache")];
    (headers, Sse::new(event_stream(relay, prepared)).keep_alive(KeepAlive::default()))
        .into_response()
}

fn event_stream(
    relay: &Arc<StreamRelay>,
    prepared: PreparedWatch,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let cancel = CancellationToken::new();
    let events = relay.spawn(prepared, cancel.clone());
    let guard = cancel.drop_guard();

    stream::unfold((events, guard), |(mut events, guard)| async move {
        let event = events.recv().await?;
        let frame = match serde_json::to_string(&event) {
            Ok(json) => Event::default().data(json),
            Err(err) => {
                warn!(%err, "failed to encode stream event");
                Event::default().data(r#"{"type":"error","text":"failed to encode event"}"#)
            }
        };
        Some((Ok(frame), (events, guard)))
    })
}
