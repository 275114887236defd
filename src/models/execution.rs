//! Sub-execution model as reported by the platform.

use serde::{Deserialize, Serialize};

/// Status of a single sub-execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Scheduled but not started.
    Created,
    /// Finished successfully.
    Success,
    /// Finished with a failure.
    Failed,
    /// Started; also the fallback for intermediate statuses.
    #[serde(other)]
    Running,
}

/// One entry of an execution's status history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusLogEntry {
    /// Status reached.
    pub status: ExecutionStatus,
    /// Error message attached to a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Model reference attached to executions produced by a model node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionModel {
    /// Producing model identifier.
    pub model_id: String,
}

/// Concrete execution bound to a sink node for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubExecution {
    /// Execution identifier.
    pub id: String,
    /// Status history, oldest first.
    #[serde(default)]
    pub status_log: Vec<StatusLogEntry>,
    /// Producing model, when the sink node runs a model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ExecutionModel>,
}

impl SubExecution {
    /// Latest status; an empty log counts as `Created`.
    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.status_log
            .last()
            .map_or(ExecutionStatus::Created, |entry| entry.status)
    }

    /// Error message of the latest status entry, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.status_log
            .last()
            .and_then(|entry| entry.error.as_deref())
            .filter(|msg| !msg.is_empty())
    }

    /// Identifier of the producing model, if reported.
    #[must_use]
    pub fn producing_model_id(&self) -> Option<&str> {
        self.model.as_ref().map(|m| m.model_id.as_str())
    }
}
