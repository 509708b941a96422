use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use docstream_core::{AppError, EngineConfig, ErrorCategory};

use crate::classify::{classify_http_status, classify_transport_error};
use crate::types::{DocumentListPage, EngineDocument, EngineTaskStatus, SubmitRequest, SubmitResponse};

/// Seam the pipeline and reconciler work against; mocked in their tests.
#[async_trait]
pub trait IngestionEngine: Send + Sync {
    async fn submit_document(&self, request: SubmitRequest) -> Result<SubmitResponse, AppError>;

    async fn get_document(&self, external_id: &str) -> Result<Option<EngineDocument>, AppError>;

    /// Bounded listing page, used for fallback reconciliation by metadata.
    async fn list_documents(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<EngineDocument>, AppError>;

    async fn task_status(&self, task_id: &str) -> Result<EngineTaskStatus, AppError>;

    /// Idempotent delete: a 422 for an unknown document counts as success.
    async fn delete_document(&self, external_id: &str) -> Result<(), AppError>;
}

/// Reqwest client for the engine's HTTP API.
pub struct IndexEngineClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl IndexEngineClient {
    pub fn new(config: &EngineConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    async fn engine_error(response: reqwest::Response) -> AppError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        AppError::Engine {
            category: classify_http_status(status),
            message: format!("Engine returned {}: {}", status, body),
        }
    }

    fn transport_error(error: reqwest::Error) -> AppError {
        AppError::Engine {
            category: classify_transport_error(&error),
            message: format!("Engine request failed: {}", error),
        }
    }
}

#[async_trait]
impl IngestionEngine for IndexEngineClient {
    #[tracing::instrument(skip(self, request), fields(document_id = %request.document_id, file_name = %request.file_name))]
    async fn submit_document(&self, request: SubmitRequest) -> Result<SubmitResponse, AppError> {
        let metadata = serde_json::json!({
            "original_document_id": request.document_id.to_string(),
            "tenant_id": request.tenant_id.to_string(),
            "user_id": request.user_id.to_string(),
            "collection_id": request.collection_id.map(|c| c.to_string()),
            "original_filename": request.file_name,
            "content_type": request.content_type,
            "checksum": request.checksum,
        });

        let part = Part::bytes(request.data.to_vec())
            .file_name(request.file_name.clone())
            .mime_str(&request.content_type)
            .map_err(|e| AppError::InvalidInput(format!("Invalid content type: {}", e)))?;

        let form = Form::new()
            .part("file", part)
            .text("metadata", metadata.to_string());

        let response = self
            .request(self.http.post(format!("{}/documents", self.base_url)))
            .multipart(form)
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::engine_error(response).await);
        }

        let submit: SubmitResponse = response.json().await.map_err(|e| AppError::Engine {
            category: ErrorCategory::Unknown,
            message: format!("Failed to parse submission response: {}", e),
        })?;

        tracing::debug!(
            id = ?submit.id,
            task_id = ?submit.task_id,
            "Document submitted to engine"
        );
        Ok(submit)
    }

    #[tracing::instrument(skip(self))]
    async fn get_document(&self, external_id: &str) -> Result<Option<EngineDocument>, AppError> {
        let response = self
            .request(
                self.http
                    .get(format!("{}/documents/{}", self.base_url, external_id)),
            )
            .send()
            .await
            .map_err(Self::transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::engine_error(response).await);
        }

        let document: EngineDocument = response.json().await.map_err(|e| AppError::Engine {
            category: ErrorCategory::Unknown,
            message: format!("Failed to parse document response: {}", e),
        })?;
        Ok(Some(document))
    }

    #[tracing::instrument(skip(self))]
    async fn list_documents(
        &self,
        offset: u32,
        limit: u32,
    ) -> Result<Vec<EngineDocument>, AppError> {
        let response = self
            .request(self.http.get(format!("{}/documents", self.base_url)))
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::engine_error(response).await);
        }

        let page: DocumentListPage = response.json().await.map_err(|e| AppError::Engine {
            category: ErrorCategory::Unknown,
            message: format!("Failed to parse document listing: {}", e),
        })?;
        Ok(page.results)
    }

    #[tracing::instrument(skip(self))]
    async fn task_status(&self, task_id: &str) -> Result<EngineTaskStatus, AppError> {
        let response = self
            .request(
                self.http
                    .get(format!("{}/ingest/status/{}", self.base_url, task_id)),
            )
            .send()
            .await
            .map_err(Self::transport_error)?;

        if !response.status().is_success() {
            return Err(Self::engine_error(response).await);
        }

        let status: EngineTaskStatus = response.json().await.map_err(|e| AppError::Engine {
            category: ErrorCategory::Unknown,
            message: format!("Failed to parse task status: {}", e),
        })?;
        Ok(status)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_document(&self, external_id: &str) -> Result<(), AppError> {
        let response = self
            .request(
                self.http
                    .delete(format!("{}/documents/{}", self.base_url, external_id)),
            )
            .send()
            .await
            .map_err(Self::transport_error)?;

        // 422 means the engine never had (or already dropped) the document;
        // treat it as deleted.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            tracing::debug!(external_id, "Delete returned 422, treating as already deleted");
            return Ok(());
        }
        if !response.status().is_success() {
            return Err(Self::engine_error(response).await);
        }
        Ok(())
    }
}
