//! Remote execution platform abstraction.
//!
//! The [`ExecutionPlatform`] trait is the narrow contract the watcher
//! needs from the platform: job lookup and submission, run and
//! sub-execution status, and the shared conversation documents. The
//! production implementation is [`http::HttpPlatform`]; tests plug in
//! scripted fakes.

pub mod http;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::models::document::{Attachment, Dataset, Document, DocumentHandle, Turn};
use crate::models::execution::SubExecution;
use crate::models::job::{Model, Pipeline, PipelineRun};
use crate::Result;

/// Boxed future returned by every [`ExecutionPlatform`] method.
pub type PlatformFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Interface between the relay and the remote execution platform.
///
/// Every method is a remote call; implementations must not block the
/// calling task.
pub trait ExecutionPlatform: Send + Sync {
    /// Fetch a pipeline with its graph.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an unknown id.
    fn get_pipeline<'a>(&'a self, pipeline_id: &'a str) -> PlatformFuture<'a, Pipeline>;

    /// Fetch a model.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an unknown id.
    fn get_model<'a>(&'a self, model_id: &'a str) -> PlatformFuture<'a, Model>;

    /// Start a pipeline run with the document as input; returns the run id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) if the platform rejects the run.
    fn execute_pipeline<'a>(
        &'a self,
        pipeline_id: &'a str,
        item_id: &'a str,
    ) -> PlatformFuture<'a, String>;

    /// Start a model prediction on the document; returns the execution id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) if the platform rejects the call.
    fn predict<'a>(&'a self, model_id: &'a str, item_id: &'a str) -> PlatformFuture<'a, String>;

    /// Current status of a pipeline run.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) on transport failure.
    fn get_pipeline_run<'a>(
        &'a self,
        pipeline_id: &'a str,
        run_id: &'a str,
    ) -> PlatformFuture<'a, PipelineRun>;

    /// Sub-executions of `node_id` within a run, in listing order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) on transport failure.
    fn list_sub_executions<'a>(
        &'a self,
        pipeline_id: &'a str,
        run_id: &'a str,
        node_id: &'a str,
    ) -> PlatformFuture<'a, Vec<SubExecution>>;

    /// Fetch one sub-execution with its status log.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an unknown id.
    fn get_sub_execution<'a>(&'a self, execution_id: &'a str) -> PlatformFuture<'a, SubExecution>;

    /// Look up a dataset of the configured project by name.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) on transport failure.
    fn find_dataset<'a>(&'a self, name: &'a str) -> PlatformFuture<'a, Option<Dataset>>;

    /// Create a dataset in the configured project.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) on transport failure.
    fn create_dataset<'a>(&'a self, name: &'a str) -> PlatformFuture<'a, Dataset>;

    /// Look up a document by name within a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) on transport failure.
    fn find_document<'a>(
        &'a self,
        dataset_id: &'a str,
        name: &'a str,
    ) -> PlatformFuture<'a, Option<DocumentHandle>>;

    /// Create an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) on transport failure.
    fn create_document<'a>(
        &'a self,
        dataset_id: &'a str,
        name: &'a str,
        metadata: serde_json::Value,
    ) -> PlatformFuture<'a, DocumentHandle>;

    /// Append one turn to a document.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an unknown document.
    fn append_turn<'a>(&'a self, document_id: &'a str, turn: &'a Turn) -> PlatformFuture<'a, ()>;

    /// Fetch the current content of a document.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an unknown document.
    fn fetch_document<'a>(&'a self, document_id: &'a str) -> PlatformFuture<'a, Document>;

    /// Upload a file into a dataset.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Remote`](crate::AppError::Remote) on transport failure.
    fn upload_attachment<'a>(
        &'a self,
        dataset_id: &'a str,
        file_name: &'a str,
        bytes: Bytes,
    ) -> PlatformFuture<'a, Attachment>;
}
