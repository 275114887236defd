//! REST implementation of [`ExecutionPlatform`] over `reqwest`.

use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ExecutionPlatform, PlatformFuture};
use crate::config::PlatformConfig;
use crate::models::document::{Attachment, Dataset, Document, DocumentHandle, Turn};
use crate::models::execution::SubExecution;
use crate::models::job::{Model, Pipeline, PipelineRun};
use crate::{AppError, Result};

/// Body of endpoints that answer with just an identifier.
#[derive(Debug, Deserialize)]
struct IdResponse {
    id: String,
}

/// Body of list endpoints.
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// HTTP client for the platform REST API.
#[derive(Clone)]
pub struct HttpPlatform {
    client: Client,
    base_url: String,
    project_id: String,
    api_token: Option<String>,
}

impl HttpPlatform {
    /// Build a client from platform configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be constructed.
    pub fn new(config: &PlatformConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            project_id: config.project_id.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(what.to_owned()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!("{what}: http {status}: {body}")));
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T> {
        let response = self.send(request, what).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<Option<T>> {
        match self.json(request, what).await {
            Ok(value) => Ok(Some(value)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl ExecutionPlatform for HttpPlatform {
    fn get_pipeline<'a>(&'a self, pipeline_id: &'a str) -> PlatformFuture<'a, Pipeline> {
        Box::pin(async move {
            let request = self.client.get(self.url(&format!("/pipelines/{pipeline_id}")));
            self.json(request, &format!("pipeline '{pipeline_id}'")).await
        })
    }

    fn get_model<'a>(&'a self, model_id: &'a str) -> PlatformFuture<'a, Model> {
        Box::pin(async move {
            let request = self.client.get(self.url(&format!("/models/{model_id}")));
            self.json(request, &format!("model '{model_id}'")).await
        })
    }

    fn execute_pipeline<'a>(
        &'a self,
        pipeline_id: &'a str,
        item_id: &'a str,
    ) -> PlatformFuture<'a, String> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(&format!("/pipelines/{pipeline_id}/execute")))
                .json(&json!({ "input": { "item": item_id } }));
            let run: IdResponse = self
                .json(request, &format!("pipeline '{pipeline_id}'"))
                .await?;
            debug!(pipeline_id, run_id = %run.id, "pipeline run started");
            Ok(run.id)
        })
    }

    fn predict<'a>(&'a self, model_id: &'a str, item_id: &'a str) -> PlatformFuture<'a, String> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(&format!("/models/{model_id}/predict")))
                .json(&json!({ "itemIds": [item_id] }));
            let execution: IdResponse = self.json(request, &format!("model '{model_id}'")).await?;
            debug!(model_id, execution_id = %execution.id, "prediction started");
            Ok(execution.id)
        })
    }

    fn get_pipeline_run<'a>(
        &'a self,
        pipeline_id: &'a str,
        run_id: &'a str,
    ) -> PlatformFuture<'a, PipelineRun> {
        Box::pin(async move {
            let request = self.client.get(
                self.url(&format!("/pipelines/{pipeline_id}/executions/{run_id}")),
            );
            self.json(request, &format!("pipeline run '{run_id}'")).await
        })
    }

    fn list_sub_executions<'a>(
        &'a self,
        pipeline_id: &'a str,
        run_id: &'a str,
        node_id: &'a str,
    ) -> PlatformFuture<'a, Vec<SubExecution>> {
        Box::pin(async move {
            let request = self.client.post(self.url("/executions/query")).json(&json!({
                "pipelineId": pipeline_id,
                "pipelineExecutionId": run_id,
                "nodeId": node_id,
            }));
            let list: ListResponse<SubExecution> =
                self.json(request, "execution query").await?;
            Ok(list.items)
        })
    }

    fn get_sub_execution<'a>(&'a self, execution_id: &'a str) -> PlatformFuture<'a, SubExecution> {
        Box::pin(async move {
            let request = self.client.get(self.url(&format!("/executions/{execution_id}")));
            self.json(request, &format!("execution '{execution_id}'")).await
        })
    }

    fn find_dataset<'a>(&'a self, name: &'a str) -> PlatformFuture<'a, Option<Dataset>> {
        Box::pin(async move {
            let request = self.client.get(self.url(&format!(
                "/projects/{}/datasets/by-name/{name}",
                self.project_id
            )));
            self.optional(request, &format!("dataset '{name}'")).await
        })
    }

    fn create_dataset<'a>(&'a self, name: &'a str) -> PlatformFuture<'a, Dataset> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(&format!("/projects/{}/datasets", self.project_id)))
                .json(&json!({ "name": name }));
            self.json(request, &format!("dataset '{name}'")).await
        })
    }

    fn find_document<'a>(
        &'a self,
        dataset_id: &'a str,
        name: &'a str,
    ) -> PlatformFuture<'a, Option<DocumentHandle>> {
        Box::pin(async move {
            let request = self.client.get(
                self.url(&format!("/datasets/{dataset_id}/documents/by-name/{name}")),
            );
            self.optional(request, &format!("document '{name}'")).await
        })
    }

    fn create_document<'a>(
        &'a self,
        dataset_id: &'a str,
        name: &'a str,
        metadata: serde_json::Value,
    ) -> PlatformFuture<'a, DocumentHandle> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(&format!("/datasets/{dataset_id}/documents")))
                .json(&json!({ "name": name, "metadata": metadata }));
            self.json(request, &format!("document '{name}'")).await
        })
    }

    fn append_turn<'a>(&'a self, document_id: &'a str, turn: &'a Turn) -> PlatformFuture<'a, ()> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(&format!("/documents/{document_id}/turns")))
                .json(turn);
            self.send(request, &format!("document '{document_id}'"))
                .await?;
            Ok(())
        })
    }

    fn fetch_document<'a>(&'a self, document_id: &'a str) -> PlatformFuture<'a, Document> {
        Box::pin(async move {
            let request = self.client.get(self.url(&format!("/documents/{document_id}")));
            self.json(request, &format!("document '{document_id}'")).await
        })
    }

    fn upload_attachment<'a>(
        &'a self,
        dataset_id: &'a str,
        file_name: &'a str,
        bytes: Bytes,
    ) -> PlatformFuture<'a, Attachment> {
        Box::pin(async move {
            let request = self
                .client
                .put(self.url(&format!("/datasets/{dataset_id}/files/{file_name}")))
                .body(bytes);
            self.json(request, &format!("upload '{file_name}'")).await
        })
    }
}
