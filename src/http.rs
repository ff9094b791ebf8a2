//! Control-plane HTTP surface (spec §6): `/health/live`, `/health/ready`, `/metrics`,
//! `/stats`, `/version`. Grounded in HoneyLink backend's `axum` + `tower-http` stack.
//! `/health/ready` returns 503 when either the bus consumer or the Execution Service health
//! probe is unhealthy (spec §7); `/health/live` is always 200 while the process is up.

use crate::clients::ExecutionCollaborator;
use crate::dlq::DeadLetterStore;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Request extension carrying the inbound or freshly-generated correlation id, for log
/// correlation across the control-plane surface.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

/// Reads `X-Correlation-ID` off the request, or generates one, stores it as a request
/// extension, and echoes it back on the response. Grounded in HoneyLink backend's
/// `tower-http` middleware stack.
async fn correlation_id(mut request: Request, next: Next) -> impl IntoResponse {
    let id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(CorrelationId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// Readiness bit the Consumer Loop flips as it starts/stops pulling messages, plus the
/// Execution Service liveness probe consulted on every `/health/ready` call.
pub struct HealthState {
    consumer_ready: Arc<AtomicBool>,
    execution: Arc<dyn ExecutionCollaborator>,
    dlq: Arc<DeadLetterStore>,
}

impl Clone for HealthState {
    fn clone(&self) -> Self {
        Self {
            consumer_ready: Arc::clone(&self.consumer_ready),
            execution: Arc::clone(&self.execution),
            dlq: Arc::clone(&self.dlq),
        }
    }
}

impl HealthState {
    pub fn new(execution: Arc<dyn ExecutionCollaborator>, dlq: Arc<DeadLetterStore>) -> Self {
        Self { consumer_ready: Arc::new(AtomicBool::new(true)), execution, dlq }
    }

    pub fn set_consumer_ready(&self, ready: bool) {
        self.consumer_ready.store(ready, Ordering::SeqCst);
    }
}

#[derive(Serialize)]
struct VersionResponse {
    name: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct StatsResponse {
    dead_letter_size: usize,
    dead_letter_evicted_for_capacity: u64,
    dead_letter_evicted_for_retention: u64,
}

async fn live() -> impl IntoResponse {
    StatusCode::OK
}

async fn ready(State(state): State<HealthState>) -> impl IntoResponse {
    let consumer_ready = state.consumer_ready.load(Ordering::SeqCst);
    let execution_healthy = state.execution.is_healthy().await;
    if consumer_ready && execution_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn version() -> impl IntoResponse {
    Json(VersionResponse { name: env!("CARGO_PKG_NAME"), version: env!("CARGO_PKG_VERSION") })
}

async fn stats(State(state): State<HealthState>) -> impl IntoResponse {
    let stats = state.dlq.stats();
    Json(StatsResponse {
        dead_letter_size: stats.current_size,
        dead_letter_evicted_for_capacity: stats.evicted_for_capacity,
        dead_letter_evicted_for_retention: stats.evicted_for_retention,
    })
}

async fn metrics() -> impl IntoResponse {
    (StatusCode::OK, crate::telemetry::metrics::render())
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/stats", get(stats))
        .route("/version", get(version))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(middleware::from_fn(correlation_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serves the control-plane router on `addr` until `cancellation` fires.
pub async fn serve(addr: &str, state: HealthState, cancellation: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "health server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancellation.cancelled().await })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AllocationRequest, ExecutionRecord, ExecutionUpdateRequest};
    use crate::error::AppError;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct AlwaysHealthy;

    #[async_trait::async_trait]
    impl ExecutionCollaborator for AlwaysHealthy {
        async fn get_execution(
            &self,
            _id: i64,
            _payload: &str,
            _source: crate::dlq::SourceMetadata,
        ) -> Result<ExecutionRecord, AppError> {
            unimplemented!()
        }
        async fn update_execution(
            &self,
            _id: i64,
            _update: ExecutionUpdateRequest,
            _payload: &str,
            _source: crate::dlq::SourceMetadata,
        ) -> Result<ExecutionRecord, AppError> {
            unimplemented!()
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    struct AlwaysUnhealthy;

    #[async_trait::async_trait]
    impl ExecutionCollaborator for AlwaysUnhealthy {
        async fn get_execution(
            &self,
            _id: i64,
            _payload: &str,
            _source: crate::dlq::SourceMetadata,
        ) -> Result<ExecutionRecord, AppError> {
            unimplemented!()
        }
        async fn update_execution(
            &self,
            _id: i64,
            _update: ExecutionUpdateRequest,
            _payload: &str,
            _source: crate::dlq::SourceMetadata,
        ) -> Result<ExecutionRecord, AppError> {
            unimplemented!()
        }
        async fn is_healthy(&self) -> bool {
            false
        }
    }

    fn dlq() -> Arc<DeadLetterStore> {
        Arc::new(DeadLetterStore::new(100, std::time::Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn live_is_always_ok() {
        let state = HealthState::new(Arc::new(AlwaysUnhealthy), dlq());
        let response = router(state)
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_is_503_when_execution_service_unhealthy() {
        let state = HealthState::new(Arc::new(AlwaysUnhealthy), dlq());
        let response = router(state)
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn ready_is_200_when_everything_healthy() {
        let state = HealthState::new(Arc::new(AlwaysHealthy), dlq());
        let response = router(state)
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_is_503_when_consumer_not_ready() {
        let state = HealthState::new(Arc::new(AlwaysHealthy), dlq());
        state.set_consumer_ready(false);
        let response = router(state)
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn correlation_id_is_generated_when_absent() {
        let state = HealthState::new(Arc::new(AlwaysHealthy), dlq());
        let response = router(state)
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().get("x-correlation-id").is_some());
    }

    #[tokio::test]
    async fn correlation_id_is_echoed_when_present() {
        let state = HealthState::new(Arc::new(AlwaysHealthy), dlq());
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .header("x-correlation-id", "test-corr-id")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get("x-correlation-id").unwrap(), "test-corr-id");
    }

    #[tokio::test]
    async fn stats_reports_dead_letter_size() {
        let store = dlq();
        store.insert(
            "payload".to_string(),
            "boom".to_string(),
            crate::dlq::SourceMetadata { topic: "t".to_string(), partition: 0, offset: 1 },
        );
        let state = HealthState::new(Arc::new(AlwaysHealthy), store);
        let response = router(state)
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
