//! Session document accessor.
//!
//! Resolves (creating lazily) the dataset and per-session conversation
//! document on the platform, appends user turns, and re-fetches documents
//! so the watcher can see assistant turns written by remote executions.
//! Dataset and document handles are cached for the lifetime of the
//! process; document *content* is never cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{DatasetScope, DocumentsConfig};
use crate::models::document::{Dataset, Document, DocumentHandle, Turn};
use crate::models::job::JobRef;
use crate::platform::ExecutionPlatform;
use crate::{AppError, Result};

/// File sent along with a user message.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    /// Original file name.
    pub file_name: String,
    /// File content.
    pub bytes: Bytes,
}

/// Result of appending a user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedTurn {
    /// Key of the new user turn; the expected assistant answer shares it.
    pub prompt_key: String,
    /// URL of the uploaded attachment, if any.
    pub attachment_url: Option<String>,
}

/// Per-process accessor for conversation documents.
pub struct SessionDocuments {
    platform: Arc<dyn ExecutionPlatform>,
    config: DocumentsConfig,
    datasets: Mutex<HashMap<String, Dataset>>,
    documents: Mutex<HashMap<(String, String), DocumentHandle>>,
}

impl SessionDocuments {
    /// Create an accessor with empty caches.
    #[must_use]
    pub fn new(platform: Arc<dyn ExecutionPlatform>, config: DocumentsConfig) -> Self {
        Self {
            platform,
            config,
            datasets: Mutex::new(HashMap::new()),
            documents: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the dataset holding documents for `job`.
    ///
    /// In shared scope, or when no job is known yet, this is the
    /// configured dataset name.
    #[must_use]
    pub fn dataset_name_for(&self, job: Option<&JobRef>) -> String {
        match (self.config.dataset_scope, job) {
            (DatasetScope::PerJob, Some(job)) => format!("prompt-for-pipeline-{}", job.id),
            _ => self.config.dataset_name.clone(),
        }
    }

    /// Whether documents for `job` live in a job-specific dataset.
    #[must_use]
    pub fn is_per_job(&self, job: Option<&JobRef>) -> bool {
        self.config.dataset_scope == DatasetScope::PerJob && job.is_some()
    }

    /// Resolve a dataset by name, creating it when absent.
    ///
    /// # Errors
    ///
    /// Propagates platform failures.
    pub async fn ensure_dataset(&self, name: &str) -> Result<Dataset> {
        if let Some(dataset) = self
            .datasets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(dataset.clone());
        }

        let dataset = if let Some(found) = self.platform.find_dataset(name).await? {
            found
        } else {
            info!(dataset = name, "creating conversation dataset");
            self.platform.create_dataset(name).await?
        };

        self.datasets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_owned(), dataset.clone());
        Ok(dataset)
    }

    /// Resolve the conversation document for a session, creating it when
    /// absent. `metadata` is only written on creation.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` for an empty session id and
    /// propagates platform failures.
    pub async fn ensure_document(
        &self,
        session_id: &str,
        job: Option<&JobRef>,
        metadata: Value,
    ) -> Result<DocumentHandle> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(AppError::InvalidRequest("session_id must not be empty".into()));
        }

        let dataset_name = self.dataset_name_for(job);
        let cache_key = (dataset_name.clone(), session_id.to_owned());
        if let Some(handle) = self
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
        {
            return Ok(handle.clone());
        }

        let dataset = self.ensure_dataset(&dataset_name).await?;
        let name = format!("{session_id}.json");
        let handle = if let Some(found) = self.platform.find_document(&dataset.id, &name).await? {
            found
        } else {
            info!(session_id, dataset = %dataset.name, "creating conversation document");
            self.platform
                .create_document(&dataset.id, &name, metadata)
                .await?
        };

        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cache_key, handle.clone());
        Ok(handle)
    }

    /// Reject attachments over the configured size limit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` when the file is too large.
    pub fn validate_attachment(&self, attachment: &AttachmentUpload) -> Result<()> {
        if attachment.bytes.len() > self.config.max_attachment_bytes {
            return Err(AppError::InvalidRequest(format!(
                "file size too large: {} bytes exceeds limit of {}",
                attachment.bytes.len(),
                self.config.max_attachment_bytes
            )));
        }
        if attachment.file_name.trim().is_empty() || attachment.file_name.contains('/') {
            return Err(AppError::InvalidRequest(format!(
                "invalid file name '{}'",
                attachment.file_name
            )));
        }
        Ok(())
    }

    /// Append a new user turn, uploading the attachment first when given.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidRequest` for empty text or a rejected
    /// attachment, and propagates platform failures.
    pub async fn append_user_turn(
        &self,
        document: &DocumentHandle,
        text: &str,
        attachment: Option<AttachmentUpload>,
    ) -> Result<AppendedTurn> {
        if text.trim().is_empty() {
            return Err(AppError::InvalidRequest("message must not be empty".into()));
        }
        if let Some(ref attachment) = attachment {
            self.validate_attachment(attachment)?;
        }

        let attachment_url = match attachment {
            Some(upload) => {
                let uploaded = self
                    .platform
                    .upload_attachment(&document.dataset_id, &upload.file_name, upload.bytes)
                    .await?;
                debug!(file_id = %uploaded.id, "attachment uploaded");
                Some(uploaded.url)
            }
            None => None,
        };

        let current = self.platform.fetch_document(&document.id).await?;
        let prompt_key = current.next_prompt_key();
        let turn = Turn::user(prompt_key.clone(), text, attachment_url.as_deref());
        self.platform.append_turn(&document.id, &turn).await?;
        info!(document_id = %document.id, prompt_key, "user turn appended");

        Ok(AppendedTurn {
            prompt_key,
            attachment_url,
        })
    }

    /// Fetch the latest content of a document.
    ///
    /// # Errors
    ///
    /// Propagates platform failures.
    pub async fn refetch(&self, document_id: &str) -> Result<Document> {
        self.platform.fetch_document(document_id).await
    }
}
