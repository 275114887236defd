//! Job references, platform job descriptions, and submitted job handles.

use serde::{Deserialize, Serialize};

/// Kind of remote work a job reference points at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Multi-node pipeline graph.
    Pipeline,
    /// Single model inference.
    Model,
}

/// Caller-supplied reference to a pipeline or model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub struct JobRef {
    /// Pipeline or model identifier on the platform.
    pub id: String,
    /// Which kind of job `id` names.
    pub kind: JobKind,
}

impl JobRef {
    /// Reference a pipeline by id.
    pub fn pipeline(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: JobKind::Pipeline,
        }
    }

    /// Reference a model by id.
    pub fn model(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: JobKind::Model,
        }
    }
}

/// Status of one pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Executing.
    #[serde(alias = "in-progress", alias = "in_progress")]
    Running,
    /// Finished successfully.
    Success,
    /// Finished with a failure.
    Failed,
    /// Queued; also the fallback for statuses this relay does not know.
    #[serde(other)]
    Pending,
}

impl RunStatus {
    /// Whether the run will not change status again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// A node of a pipeline graph.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    /// Node identifier, unique within the pipeline.
    pub node_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
}

/// A directed edge between two pipeline nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConnection {
    /// Node the edge leaves.
    pub source_node_id: String,
    /// Node the edge enters.
    pub target_node_id: String,
}

/// Pipeline-level variable copied into new conversation documents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineVariable {
    /// Variable name.
    pub name: String,
    /// Variable value, any JSON.
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Pipeline description returned by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pipeline {
    /// Pipeline identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Operational status, e.g. `Installed`.
    pub status: String,
    /// Graph nodes.
    #[serde(default)]
    pub nodes: Vec<PipelineNode>,
    /// Graph edges.
    #[serde(default)]
    pub connections: Vec<PipelineConnection>,
    /// Variables exposed to the pipeline's nodes.
    #[serde(default)]
    pub variables: Vec<PipelineVariable>,
}

impl Pipeline {
    /// Only installed pipelines accept executions.
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        self.status.eq_ignore_ascii_case("installed")
    }

    /// Variables as a `{name: value}` JSON object.
    #[must_use]
    pub fn variables_object(&self) -> serde_json::Value {
        let map = self
            .variables
            .iter()
            .map(|v| (v.name.clone(), v.value.clone()))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(map)
    }
}

/// Model description returned by the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Model {
    /// Model identifier.
    pub id: String,
    /// Model name; assistant turns are tagged with it.
    pub name: String,
    /// Lifecycle status, e.g. `deployed`. Informational only.
    pub status: String,
}

/// Status snapshot of a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineRun {
    /// Run identifier.
    pub id: String,
    /// Current status.
    pub status: RunStatus,
}

/// Where the final answer of a submitted job comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobTarget {
    /// Executions of `sink_node_id` within the run carry the answer.
    Pipeline {
        /// The unique node with no outgoing connections.
        sink_node_id: String,
    },
    /// The run itself is the single sink execution.
    Model,
}

/// A job accepted by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    /// Pipeline or model identifier.
    pub job_id: String,
    /// Pipeline run id, or the prediction execution id for models.
    pub run_id: String,
    /// Sink resolution, computed once at submission.
    pub target: JobTarget,
}

impl SubmittedJob {
    /// Kind of the submitted job.
    #[must_use]
    pub fn kind(&self) -> JobKind {
        match self.target {
            JobTarget::Pipeline { .. } => JobKind::Pipeline,
            JobTarget::Model => JobKind::Model,
        }
    }
}
