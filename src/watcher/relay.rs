//! Top-level watch loop turning remote progress into stream events.
//!
//! A request goes `Init → LocatingSink → AwaitingContent → Streaming` and
//! ends in `Done`, `Failed`, or `TimedOut`. Whatever the path, the event
//! sequence of a request that reached the watch loop ends with exactly
//! one `done` marker. Configuration-class failures surface from the
//! `prepare_*` methods before any event is produced.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::delta::{ContentPoller, DeltaTracker, PollOutcome};
use super::locator::ExecutionLocator;
use super::submission::{resolve_job, submit};
use super::TIMEOUT_MESSAGE;
use crate::config::{DeltaMode, WatchSettings};
use crate::documents::{AppendedTurn, AttachmentUpload, SessionDocuments};
use crate::models::document::DocumentHandle;
use crate::models::event::StreamEvent;
use crate::models::job::{JobRef, SubmittedJob};
use crate::platform::ExecutionPlatform;
use crate::{AppError, Result};

/// Capacity of the per-request event channel.
const EVENT_BUFFER: usize = 64;

/// Phase of a watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// User turn appended and job submitted.
    Init,
    /// Waiting for the sink execution to be scheduled.
    LocatingSink,
    /// Sink execution known, no content emitted yet.
    AwaitingContent,
    /// At least one delta emitted.
    Streaming,
    /// Finished successfully.
    Done,
    /// Finished with an in-stream error.
    Failed,
    /// Deadline elapsed.
    TimedOut,
    /// Caller went away; no further events.
    Cancelled,
}

impl WatchState {
    /// Whether the loop has stopped.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

/// One-shot chat request: append the message and run the job on it.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Conversation identifier.
    pub session_id: String,
    /// User message.
    pub message: String,
    /// Pipeline or model answering the message.
    pub job: JobRef,
    /// Optional file sent with the message.
    pub attachment: Option<AttachmentUpload>,
}

/// A submitted request ready to be watched.
///
/// Holds one of the relay's stream slots until dropped.
#[derive(Debug)]
pub struct PreparedWatch {
    /// Correlation id used in logs.
    pub request_id: Uuid,
    /// Submitted job with its resolved sink.
    pub job: SubmittedJob,
    /// Conversation document receiving the answer.
    pub document_id: String,
    /// Key of the user turn being answered.
    pub prompt_key: String,
    /// Global deadline for the whole request.
    pub deadline: Instant,
    _slot: OwnedSemaphorePermit,
}

/// Per-request watch state; discarded when the request ends.
#[derive(Debug)]
pub struct WatchSession {
    state: WatchState,
    deadline: Instant,
    sink_execution_id: Option<String>,
}

impl WatchSession {
    fn new(deadline: Instant) -> Self {
        Self {
            state: WatchState::Init,
            deadline,
            sink_execution_id: None,
        }
    }

    fn transition(&mut self, next: WatchState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "watch state transition");
            self.state = next;
        }
    }

}

/// Drives watch loops for incoming requests.
pub struct StreamRelay {
    platform: Arc<dyn ExecutionPlatform>,
    documents: Arc<SessionDocuments>,
    settings: WatchSettings,
    slots: Arc<Semaphore>,
}

impl StreamRelay {
    /// Create a relay allowing at most `max_concurrent` running watch loops.
    #[must_use]
    pub fn new(
        platform: Arc<dyn ExecutionPlatform>,
        documents: Arc<SessionDocuments>,
        settings: WatchSettings,
        max_concurrent: usize,
    ) -> Self {
        Self {
            platform,
            documents,
            settings,
            slots: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Number of stream slots currently free.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Append a user turn to the session's document without running a job.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` for bad input and propagates
    /// platform failures.
    pub async fn start_turn(
        &self,
        session_id: &str,
        message: &str,
        attachment: Option<AttachmentUpload>,
    ) -> Result<(DocumentHandle, AppendedTurn)> {
        if let Some(ref attachment) = attachment {
            self.documents.validate_attachment(attachment)?;
        }
        let document = self
            .documents
            .ensure_document(session_id, None, serde_json::json!({}))
            .await?;
        let appended = self
            .documents
            .append_user_turn(&document, message, attachment)
            .await?;
        Ok((document, appended))
    }

    /// Append the message and submit the job (the `Init` phase).
    ///
    /// # Errors
    ///
    /// Returns `AppError::AtCapacity`, `AppError::NotFound`,
    /// `AppError::NotRunnable`, `AppError::AmbiguousSink` or
    /// `AppError::InvalidRequest` before any remote work is submitted, and
    /// propagates platform failures.
    pub async fn prepare_chat(&self, request: ChatRequest) -> Result<PreparedWatch> {
        let slot = self.acquire_slot()?;
        let deadline = Instant::now() + self.settings.deadline;

        if let Some(ref attachment) = request.attachment {
            self.documents.validate_attachment(attachment)?;
        }
        let resolved = resolve_job(self.platform.as_ref(), &request.job).await?;
        let metadata = if self.documents.is_per_job(Some(&request.job)) {
            resolved.document_metadata()
        } else {
            serde_json::json!({})
        };
        let document = self
            .documents
            .ensure_document(&request.session_id, Some(&request.job), metadata)
            .await?;
        let appended = self
            .documents
            .append_user_turn(&document, &request.message, request.attachment)
            .await?;
        let job = submit(self.platform.as_ref(), &resolved, &document.id).await?;

        Ok(PreparedWatch {
            request_id: Uuid::new_v4(),
            job,
            document_id: document.id,
            prompt_key: appended.prompt_key,
            deadline,
            _slot: slot,
        })
    }

    /// Submit the job against a document whose latest user turn is
    /// already in place.
    ///
    /// # Errors
    ///
    /// Same as [`prepare_chat`](Self::prepare_chat); additionally
    /// `AppError::InvalidRequest` when the document has no user turn.
    pub async fn prepare_existing(&self, job: &JobRef, item_id: &str) -> Result<PreparedWatch> {
        let slot = self.acquire_slot()?;
        let deadline = Instant::now() + self.settings.deadline;

        let resolved = resolve_job(self.platform.as_ref(), job).await?;
        let document = self
            .documents
            .refetch(item_id)
            .await
            .map_err(|err| match err {
                AppError::NotFound(_) => AppError::NotFound(format!("item '{item_id}' not found")),
                other => other,
            })?;
        let prompt_key = document
            .last_user_key()
            .ok_or_else(|| {
                AppError::InvalidRequest(format!("item '{item_id}' has no user message"))
            })?
            .to_owned();
        let submitted = submit(self.platform.as_ref(), &resolved, &document.id).await?;

        Ok(PreparedWatch {
            request_id: Uuid::new_v4(),
            job: submitted,
            document_id: document.id,
            prompt_key,
            deadline,
            _slot: slot,
        })
    }

    /// Run the watch loop on a background task and return its events.
    ///
    /// Cancelling `cancel` (or dropping the receiver) stops remote polling.
    #[must_use]
    pub fn spawn(
        self: &Arc<Self>,
        prepared: PreparedWatch,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            relay.watch(prepared, tx, cancel).await;
        });
        rx
    }

    /// Run the watch loop to completion, sending events to `tx`.
    ///
    /// Never fails: every failure after submission, including a panic
    /// inside the loop, becomes a final `error` event followed by `done`.
    /// Returns the terminal state.
    pub async fn watch(
        &self,
        prepared: PreparedWatch,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) -> WatchState {
        let span = info_span!(
            "watch",
            request_id = %prepared.request_id,
            job_id = %prepared.job.job_id,
            run_id = %prepared.job.run_id,
        );

        async move {
            let mut session = WatchSession::new(prepared.deadline);
            let deadline = session.deadline;
            let guarded = async {
                match AssertUnwindSafe(self.drive(&prepared, &mut session, &tx))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => Err(AppError::Internal(panic_message(payload.as_ref()))),
                }
            };
            let outcome = tokio::select! {
                () = cancel.cancelled() => None,
                result = tokio::time::timeout_at(deadline, guarded) => Some(result),
            };

            let final_state = match outcome {
                None => {
                    info!(state = ?session.state, "watch cancelled by caller");
                    return WatchState::Cancelled;
                }
                Some(_) if tx.is_closed() => {
                    info!(state = ?session.state, "event receiver dropped; stopping watch");
                    return WatchState::Cancelled;
                }
                Some(Ok(Ok(()))) => WatchState::Done,
                Some(Ok(Err(err))) => {
                    if matches!(err, AppError::RemoteExecutionFailed(_)) {
                        warn!(%err, "sink execution failed");
                    } else {
                        error!(%err, state = ?session.state, "watch failed");
                    }
                    let _ = tx.send(StreamEvent::error(err.stream_text())).await;
                    WatchState::Failed
                }
                Some(Err(_elapsed)) => {
                    warn!(state = ?session.state, "watch deadline elapsed");
                    let timeout = AppError::Timeout(TIMEOUT_MESSAGE.into());
                    let _ = tx.send(StreamEvent::error(timeout.stream_text())).await;
                    WatchState::TimedOut
                }
            };

            session.transition(final_state);
            let _ = tx.send(StreamEvent::done()).await;
            info!(
                state = ?final_state,
                sink_execution_id = ?session.sink_execution_id,
                "watch finished"
            );
            final_state
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        prepared: &PreparedWatch,
        session: &mut WatchSession,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        session.transition(WatchState::LocatingSink);
        let mut locator = ExecutionLocator::new(
            Arc::clone(&self.platform),
            prepared.job.clone(),
            self.settings.locate_poll_interval,
            self.settings.empty_terminal_poll_threshold,
        );
        let execution_id = locator.locate().await?;
        session.sink_execution_id = Some(execution_id.clone());
        session.transition(WatchState::AwaitingContent);

        let mut poller = ContentPoller::new(
            Arc::clone(&self.platform),
            execution_id,
            prepared.document_id.clone(),
            prepared.prompt_key.clone(),
            DeltaTracker::new(self.settings.delta_mode, self.settings.chunk_size),
        );

        loop {
            match poller.poll().await? {
                PollOutcome::Pending => {}
                PollOutcome::Progress { deltas, finished } => {
                    if !deltas.is_empty() {
                        session.transition(WatchState::Streaming);
                        self.emit_deltas(deltas, tx).await?;
                    }
                    if finished {
                        return Ok(());
                    }
                }
                PollOutcome::Failed { message } => {
                    return Err(AppError::RemoteExecutionFailed(message));
                }
            }
            tokio::time::sleep(self.settings.content_poll_interval).await;
        }
    }

    async fn emit_deltas(&self, deltas: Vec<String>, tx: &mpsc::Sender<StreamEvent>) -> Result<()> {
        let paced = self.settings.delta_mode == DeltaMode::Character
            && !self.settings.char_delay.is_zero();
        let count = deltas.len();
        debug!(count, "emitting deltas");

        for (index, delta) in deltas.into_iter().enumerate() {
            tx.send(StreamEvent::system(delta))
                .await
                .map_err(|_| AppError::Io("event receiver dropped".into()))?;
            if paced && index + 1 < count {
                tokio::time::sleep(self.settings.char_delay).await;
            }
        }
        Ok(())
    }

    fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|_| AppError::AtCapacity("too many concurrent streams".into()))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "watch loop panicked".to_owned())
}
