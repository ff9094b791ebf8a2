//! Thin request/response contracts over HTTP to the Execution and Allocation services,
//! spec §4.6. Both clients set `Content-Type`/`Accept`/`X-Correlation-ID` and are invoked only
//! through the [`crate::facade::ResilienceFacade`] — they never retry or breaker-admit on
//! their own.

use crate::domain::{AllocationRequest, ExecutionRecord, ExecutionUpdateRequest};
use crate::dlq::SourceMetadata;
use crate::error::{classify_http_status, AppError};
use reqwest::Client;

/// `{GetExecution, UpdateExecution, IsHealthy}` capability set the Processor depends on
/// (spec §4.9's "interface polymorphism" note) — exact types are irrelevant for testing.
/// `payload`/`source` carry the original Fill Event and its broker origin through to the
/// facade-bound implementors, so a terminal failure can dead-letter the real message rather
/// than a synthetic stand-in.
#[async_trait::async_trait]
pub trait ExecutionCollaborator: Send + Sync {
    async fn get_execution(
        &self,
        execution_service_id: i64,
        payload: &str,
        source: SourceMetadata,
    ) -> Result<ExecutionRecord, AppError>;
    async fn update_execution(
        &self,
        execution_service_id: i64,
        update: ExecutionUpdateRequest,
        payload: &str,
        source: SourceMetadata,
    ) -> Result<ExecutionRecord, AppError>;
    async fn is_healthy(&self) -> bool;
}

/// `{PostExecution}` capability set for the Allocation collaborator.
#[async_trait::async_trait]
pub trait AllocationCollaborator: Send + Sync {
    async fn post_execution(
        &self,
        allocation: &AllocationRequest,
        payload: &str,
        source: SourceMetadata,
    ) -> Result<(), AppError>;
}

pub struct ExecutionClient {
    http: Client,
    base_url: String,
}

impl ExecutionClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into() }
    }

    fn execution_url(&self, id: i64) -> String {
        format!("{}/api/v1/execution/{id}", self.base_url.trim_end_matches('/'))
    }

    async fn handle_response(
        response: reqwest::Response,
        downstream: &str,
    ) -> Result<ExecutionRecord, AppError> {
        let status = response.status();
        if status.is_success() {
            let body = response.text().await.map_err(AppError::from)?;
            serde_json::from_str(&body).map_err(AppError::from)
        } else {
            let snippet: String = response.text().await.unwrap_or_default().chars().take(200).collect();
            Err(classify_http_status(status.as_u16(), downstream, &snippet))
        }
    }
}

#[async_trait::async_trait]
impl ExecutionCollaborator for ExecutionClient {
    async fn get_execution(
        &self,
        execution_service_id: i64,
        _payload: &str,
        _source: SourceMetadata,
    ) -> Result<ExecutionRecord, AppError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .http
            .get(self.execution_url(execution_service_id))
            .header("Accept", "application/json")
            .header("X-Correlation-ID", &correlation_id)
            .send()
            .await
            .map_err(AppError::from)?;
        Self::handle_response(response, "execution-service").await
    }

    async fn update_execution(
        &self,
        execution_service_id: i64,
        update: ExecutionUpdateRequest,
        _payload: &str,
        _source: SourceMetadata,
    ) -> Result<ExecutionRecord, AppError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .http
            .put(self.execution_url(execution_service_id))
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-Correlation-ID", &correlation_id)
            .json(&update)
            .send()
            .await
            .map_err(AppError::from)?;
        Self::handle_response(response, "execution-service").await
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/actuator/health/liveness", self.base_url.trim_end_matches('/'));
        matches!(self.http.get(url).send().await, Ok(r) if r.status().is_success())
    }
}

pub struct AllocationClient {
    http: Client,
    base_url: String,
}

impl AllocationClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self { http, base_url: base_url.into() }
    }
}

#[async_trait::async_trait]
impl AllocationCollaborator for AllocationClient {
    async fn post_execution(
        &self,
        allocation: &AllocationRequest,
        _payload: &str,
        _source: SourceMetadata,
    ) -> Result<(), AppError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/api/v1/executions", self.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-Correlation-ID", &correlation_id)
            .json(allocation)
            .send()
            .await
            .map_err(AppError::from)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let snippet: String = response.text().await.unwrap_or_default().chars().take(200).collect();
            // All Allocation-side failures are retryable External, per spec §4.6 — unlike the
            // Execution Client there is no per-status Validation/NotFound/Conflict distinction.
            Err(AppError::new(
                crate::ErrorKind::External,
                "ALLOCATION_FAILURE",
                format!("allocation-service returned {status}: {snippet}"),
            ))
        }
    }
}
