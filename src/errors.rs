//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all relay failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Referenced pipeline, model, dataset or document does not exist.
    NotFound(String),
    /// Referenced job exists but is not in a runnable operational state.
    NotRunnable(String),
    /// Pipeline graph has zero or several terminal nodes.
    AmbiguousSink(String),
    /// Job finished without ever scheduling its sink node.
    NoResponseProduced(String),
    /// Assistant turn is a content list without any text element.
    MalformedContent(String),
    /// Assistant turn content is neither text nor a content list.
    UnknownContentShape(String),
    /// Sink execution reported failure; carries the text shown to the caller.
    RemoteExecutionFailed(String),
    /// Global request deadline elapsed.
    Timeout(String),
    /// Transport or protocol failure talking to the execution platform.
    Remote(String),
    /// Inbound request was rejected before any remote work started.
    InvalidRequest(String),
    /// All stream slots are taken.
    AtCapacity(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// Unexpected fault inside the relay itself, such as a panicking task.
    Internal(String),
}

impl AppError {
    /// Whether this error belongs to the class reported before a stream
    /// starts (and therefore aborts the request outright).
    #[must_use]
    pub fn is_pre_stream(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::NotFound(_)
                | Self::NotRunnable(_)
                | Self::AmbiguousSink(_)
                | Self::InvalidRequest(_)
                | Self::AtCapacity(_)
        )
    }

    /// Text carried by the final in-stream `error` event for this failure.
    #[must_use]
    pub fn stream_text(&self) -> String {
        match self {
            Self::NoResponseProduced(msg)
            | Self::MalformedContent(msg)
            | Self::UnknownContentShape(msg)
            | Self::RemoteExecutionFailed(msg)
            | Self::Timeout(msg) => msg.clone(),
            other => format!(
                "Sorry, there was an error while generating the response\n\n{other}"
            ),
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::NotRunnable(msg) => write!(f, "not runnable: {msg}"),
            Self::AmbiguousSink(msg) => write!(f, "ambiguous sink: {msg}"),
            Self::NoResponseProduced(msg) => write!(f, "no response produced: {msg}"),
            Self::MalformedContent(msg) => write!(f, "malformed content: {msg}"),
            Self::UnknownContentShape(msg) => write!(f, "unknown content shape: {msg}"),
            Self::RemoteExecutionFailed(msg) => write!(f, "remote execution failed: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Remote(msg) => write!(f, "remote: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Self::AtCapacity(msg) => write!(f, "at capacity: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Internal(msg) => write!(f, "internal: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Remote(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Remote(format!("invalid payload: {err}"))
    }
}
