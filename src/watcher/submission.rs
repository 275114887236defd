//! Job submission and sink resolution.

use std::collections::BTreeSet;

use serde_json::{json, Value};
use tracing::info;

use crate::models::job::{JobKind, JobRef, JobTarget, Model, Pipeline, SubmittedJob};
use crate::platform::ExecutionPlatform;
use crate::{AppError, Result};

/// A job that exists and, for pipelines, is installed with a known sink.
#[derive(Debug, Clone)]
pub enum ResolvedJob {
    /// Pipeline with its resolved sink node.
    Pipeline {
        /// Pipeline description.
        pipeline: Pipeline,
        /// Unique terminal node.
        sink_node_id: String,
    },
    /// Model, which is not gated on its status.
    Model(Model),
}

impl ResolvedJob {
    /// Metadata stored on conversation documents created for this job.
    #[must_use]
    pub fn document_metadata(&self) -> Value {
        match self {
            Self::Pipeline { pipeline, .. } => json!({ "prompt": pipeline.variables_object() }),
            Self::Model(_) => json!({}),
        }
    }
}

/// Find the unique node that is not the source of any connection.
///
/// # Errors
///
/// Returns `AppError::AmbiguousSink` when zero or several such nodes exist.
pub fn resolve_sink(pipeline: &Pipeline) -> Result<String> {
    let all_nodes: BTreeSet<&str> = pipeline.nodes.iter().map(|n| n.node_id.as_str()).collect();
    let sources: BTreeSet<&str> = pipeline
        .connections
        .iter()
        .map(|c| c.source_node_id.as_str())
        .collect();

    let sinks: Vec<&str> = all_nodes.difference(&sources).copied().collect();
    match sinks.as_slice() {
        [sink] => Ok((*sink).to_owned()),
        [] => Err(AppError::AmbiguousSink(format!(
            "pipeline '{}' has no terminal node",
            pipeline.id
        ))),
        many => Err(AppError::AmbiguousSink(format!(
            "pipeline '{}' has {} terminal nodes: {}",
            pipeline.id,
            many.len(),
            many.join(", ")
        ))),
    }
}

/// Look up a job. Pipelines must be installed and have a single sink.
///
/// # Errors
///
/// Returns `AppError::NotFound`, `AppError::NotRunnable` (pipelines only),
/// or `AppError::AmbiguousSink`.
pub async fn resolve_job(platform: &dyn ExecutionPlatform, job: &JobRef) -> Result<ResolvedJob> {
    match job.kind {
        JobKind::Pipeline => {
            let pipeline = platform
                .get_pipeline(&job.id)
                .await
                .map_err(not_found("pipeline", &job.id))?;
            if !pipeline.is_runnable() {
                return Err(AppError::NotRunnable(format!(
                    "pipeline '{}' is not running (status: {})",
                    pipeline.id, pipeline.status
                )));
            }
            let sink_node_id = resolve_sink(&pipeline)?;
            Ok(ResolvedJob::Pipeline {
                pipeline,
                sink_node_id,
            })
        }
        JobKind::Model => {
            let model = platform
                .get_model(&job.id)
                .await
                .map_err(not_found("model", &job.id))?;
            Ok(ResolvedJob::Model(model))
        }
    }
}

/// Start a resolved job on the given document.
///
/// # Errors
///
/// Propagates platform failures.
pub async fn submit(
    platform: &dyn ExecutionPlatform,
    resolved: &ResolvedJob,
    item_id: &str,
) -> Result<SubmittedJob> {
    let submitted = match resolved {
        ResolvedJob::Pipeline {
            pipeline,
            sink_node_id,
        } => {
            let run_id = platform.execute_pipeline(&pipeline.id, item_id).await?;
            SubmittedJob {
                job_id: pipeline.id.clone(),
                run_id,
                target: JobTarget::Pipeline {
                    sink_node_id: sink_node_id.clone(),
                },
            }
        }
        ResolvedJob::Model(model) => {
            let run_id = platform.predict(&model.id, item_id).await?;
            SubmittedJob {
                job_id: model.id.clone(),
                run_id,
                target: JobTarget::Model,
            }
        }
    };

    info!(
        job_id = %submitted.job_id,
        run_id = %submitted.run_id,
        target = ?submitted.target,
        "job submitted"
    );
    Ok(submitted)
}

fn not_found<'a>(what: &'a str, id: &'a str) -> impl FnOnce(AppError) -> AppError + 'a {
    move |err| match err {
        AppError::NotFound(_) => AppError::NotFound(format!("{what} '{id}' not found")),
        other => other,
    }
}
