//! Content extraction and delta computation.
//!
//! Each poll re-reads the sink execution and the shared document; the
//! only state carried between polls is the high-water mark of what has
//! already been emitted.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::DeltaMode;
use crate::models::execution::ExecutionStatus;
use crate::platform::ExecutionPlatform;
use crate::{AppError, Result};

/// Pull the answer text out of an assistant turn's content.
///
/// Plain strings are used as-is; for mixed-content lists the first
/// `text` element wins.
///
/// # Errors
///
/// Returns `AppError::MalformedContent` for a list without text and
/// `AppError::UnknownContentShape` for any other JSON shape.
pub fn extract_answer(content: &Value, document_id: &str) -> Result<String> {
    match content {
        Value::String(text) => Ok(text.clone()),
        Value::Array(parts) => parts
            .iter()
            .find(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .and_then(|part| part.get("text").and_then(Value::as_str))
            .map(str::to_owned)
            .ok_or_else(|| AppError::MalformedContent("Cant find text content in response".into())),
        other => Err(AppError::UnknownContentShape(format!(
            "Unknown assistant content type: {}, item id: {document_id}",
            json_shape(other)
        ))),
    }
}

fn json_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// High-water mark bookkeeping for one request.
#[derive(Debug, Clone)]
pub struct DeltaTracker {
    mode: DeltaMode,
    chunk_size: usize,
    last_message: Option<String>,
    emitted_chars: usize,
}

impl DeltaTracker {
    /// Create a tracker; `chunk_size` is clamped to at least one character.
    #[must_use]
    pub fn new(mode: DeltaMode, chunk_size: usize) -> Self {
        Self {
            mode,
            chunk_size: chunk_size.max(1),
            last_message: None,
            emitted_chars: 0,
        }
    }

    /// Characters emitted so far (character mode).
    #[must_use]
    pub fn emitted_chars(&self) -> usize {
        self.emitted_chars
    }

    /// Compute the events for the latest content and advance the mark.
    ///
    /// Message mode yields the whole content when it differs from the
    /// last emitted message. Character mode yields the unseen suffix split
    /// into `chunk_size`-character pieces; content that shrank yields
    /// nothing.
    pub fn advance(&mut self, content: &str) -> Vec<String> {
        match self.mode {
            DeltaMode::Message => {
                if content.is_empty() || self.last_message.as_deref() == Some(content) {
                    return Vec::new();
                }
                self.last_message = Some(content.to_owned());
                vec![content.to_owned()]
            }
            DeltaMode::Character => {
                let chars: Vec<char> = content.chars().collect();
                if chars.len() <= self.emitted_chars {
                    return Vec::new();
                }
                let deltas = chars[self.emitted_chars..]
                    .chunks(self.chunk_size)
                    .map(|chunk| chunk.iter().collect::<String>())
                    .collect();
                self.emitted_chars = chars.len();
                deltas
            }
        }
    }
}

/// Result of one content poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing new: the execution has not started or its answer turn has
    /// not appeared yet.
    Pending,
    /// New content (possibly empty); `finished` marks a successful end.
    Progress {
        /// Events to emit, in order.
        deltas: Vec<String>,
        /// Whether the execution reported success.
        finished: bool,
    },
    /// The execution failed.
    Failed {
        /// Remote error message, or a generic fallback.
        message: String,
    },
}

/// Polls one sink execution and the conversation document for new
/// assistant content.
pub struct ContentPoller {
    platform: Arc<dyn ExecutionPlatform>,
    execution_id: String,
    document_id: String,
    prompt_key: String,
    model_name: Option<Option<String>>,
    tracker: DeltaTracker,
}

impl ContentPoller {
    /// Create a poller for the answer to `prompt_key` in `document_id`.
    #[must_use]
    pub fn new(
        platform: Arc<dyn ExecutionPlatform>,
        execution_id: String,
        document_id: String,
        prompt_key: String,
        tracker: DeltaTracker,
    ) -> Self {
        Self {
            platform,
            execution_id,
            document_id,
            prompt_key,
            model_name: None,
            tracker,
        }
    }

    /// Run one poll.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedContent` or
    /// `AppError::UnknownContentShape` for unreadable assistant turns, and
    /// propagates platform failures.
    pub async fn poll(&mut self) -> Result<PollOutcome> {
        let execution = self.platform.get_sub_execution(&self.execution_id).await?;
        let status = execution.status();
        debug!(execution_id = %self.execution_id, ?status, "content poll");

        match status {
            ExecutionStatus::Created => return Ok(PollOutcome::Pending),
            ExecutionStatus::Failed => {
                let message = execution.last_error().map_or_else(
                    || format!("Execution failed, execution id: {}", execution.id),
                    str::to_owned,
                );
                return Ok(PollOutcome::Failed { message });
            }
            ExecutionStatus::Running | ExecutionStatus::Success => {}
        }

        if self.model_name.is_none() {
            self.model_name = Some(self.producing_model_name(execution.producing_model_id()).await);
        }
        let model_name = self.model_name.clone().flatten();

        let document = self.platform.fetch_document(&self.document_id).await?;
        let Some(answer_turn) = document.assistant_turns(model_name.as_deref()).last() else {
            return Ok(PollOutcome::Pending);
        };
        if answer_turn.key != self.prompt_key {
            // Still looking at the answer to an earlier prompt.
            return Ok(PollOutcome::Pending);
        }

        let answer = extract_answer(&answer_turn.content, &document.id)?;
        let deltas = self.tracker.advance(&answer);
        Ok(PollOutcome::Progress {
            deltas,
            finished: status == ExecutionStatus::Success,
        })
    }

    async fn producing_model_name(&self, model_id: Option<&str>) -> Option<String> {
        let model_id = model_id?;
        match self.platform.get_model(model_id).await {
            Ok(model) => Some(model.name),
            Err(err) => {
                warn!(model_id, %err, "producing model lookup failed; reading all assistant turns");
                None
            }
        }
    }
}
