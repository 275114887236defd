//! Events delivered to the caller over the stream.

use serde::{Deserialize, Serialize};

/// Kind of a [`StreamEvent`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Assistant content.
    System,
    /// In-stream failure description.
    Error,
    /// End-of-stream marker.
    Done,
}

/// Unit of the outbound stream, serialized as `{"text", "type"}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamEvent {
    /// Payload; absent on the `done` marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
}

impl StreamEvent {
    /// Assistant content event.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            kind: EventKind::System,
        }
    }

    /// Failure event.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            kind: EventKind::Error,
        }
    }

    /// Terminal marker.
    #[must_use]
    pub fn done() -> Self {
        Self {
            text: None,
            kind: EventKind::Done,
        }
    }

    /// Whether this is the terminal marker.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.kind == EventKind::Done
    }
}
