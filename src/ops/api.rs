//! REST handlers for the operational surface
//!
//! Every handler is a thin call into the orchestrator, governor, batch queue
//! or alert manager. Read endpoints always answer; only mutations report
//! failures.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::notifications::AlertSink;
use crate::orchestrator::{CycleKind, CycleOutcome, HealthStatus};
use crate::scheduler::{RuleRequest, SchedulerError};

use super::server::AppState;

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed mutation that still carries a result body
    pub fn failure(data: T, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Some(data),
            error: Some(message.into()),
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Manual throttle request
#[derive(Debug, Deserialize)]
pub struct ThrottleRequest {
    pub level: u8,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Read-only views
        .route("/api/status", get(status))
        .route("/api/throttle", get(throttle_status).post(set_throttle))
        .route("/api/alerts", get(active_alerts))
        .route("/api/queue", get(queue_status))
        // Orchestrator control
        .route("/api/cycles/{cycle}", post(execute_cycle))
        .route("/api/orchestrator/pause", post(pause))
        .route("/api/orchestrator/resume", post(resume))
        // Governor control
        .route("/api/throttle/reset", post(reset_throttle))
        .route("/api/emergency-stop", post(emergency_stop))
        // Alerts
        .route("/api/alerts/{id}/acknowledge", post(acknowledge_alert))
        .route("/api/alerts/{id}/resolve", post(resolve_alert))
        // Scheduling rules
        .route("/api/rules", get(list_rules).post(apply_rule))
        .route("/api/rules/{id}", delete(cancel_rule))
        .with_state(state)
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.app.orchestrator.health_report().await;
    let code = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        // 200 while degraded so liveness checks keep the process
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(report))
}

async fn prometheus_metrics() -> Response {
    match crate::metrics::encode_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

// ============================================================================
// Read Handlers
// ============================================================================

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    #[derive(Serialize)]
    struct StatusResponse {
        server_uptime_secs: u64,
        #[serde(flatten)]
        orchestrator: crate::orchestrator::OrchestratorMetrics,
    }

    Json(ApiResponse::success(StatusResponse {
        server_uptime_secs: state.start_time.elapsed().as_secs(),
        orchestrator: state.app.orchestrator.metrics().await,
    }))
}

async fn throttle_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.app.governor.throttle_status().await))
}

async fn active_alerts(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.app.alerts.list_active_alerts().await))
}

async fn queue_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.app.batches.queue_status().await))
}

async fn list_rules(State(state): State<AppState>) -> impl IntoResponse {
    let rules = state
        .app
        .planner
        .rules()
        .active_rules(chrono::Utc::now())
        .await;
    Json(ApiResponse::success(rules))
}

// ============================================================================
// Orchestrator Handlers
// ============================================================================

async fn execute_cycle(State(state): State<AppState>, Path(cycle): Path<String>) -> Response {
    let Some(kind) = CycleKind::parse(&cycle) else {
        return error(StatusCode::NOT_FOUND, format!("Unknown cycle: {cycle}"));
    };

    let report = state.app.orchestrator.execute_now(kind).await;
    match report.outcome {
        CycleOutcome::Failed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::failure(report, format!("{} cycle failed", kind.as_str()))),
        )
            .into_response(),
        CycleOutcome::Completed | CycleOutcome::Skipped => {
            (StatusCode::OK, Json(ApiResponse::success(report))).into_response()
        }
    }
}

async fn pause(State(state): State<AppState>) -> Response {
    if state.app.orchestrator.pause().await {
        (StatusCode::OK, Json(ApiResponse::success("paused"))).into_response()
    } else {
        error(StatusCode::CONFLICT, "Orchestrator is not running")
    }
}

async fn resume(State(state): State<AppState>) -> Response {
    if state.app.orchestrator.resume().await {
        (StatusCode::OK, Json(ApiResponse::success("running"))).into_response()
    } else {
        error(StatusCode::CONFLICT, "Orchestrator is not paused")
    }
}

// ============================================================================
// Governor Handlers
// ============================================================================

async fn set_throttle(State(state): State<AppState>, Json(request): Json<ThrottleRequest>) -> Response {
    if request.level > 100 {
        return error(
            StatusCode::BAD_REQUEST,
            format!("Throttle level must be 0-100, got {}", request.level),
        );
    }
    let limits = state.app.governor.force_throttle_level(request.level).await;
    (StatusCode::OK, Json(ApiResponse::success(limits))).into_response()
}

async fn reset_throttle(State(state): State<AppState>) -> impl IntoResponse {
    Json(ApiResponse::success(state.app.governor.reset_to_baseline().await))
}

async fn emergency_stop(State(state): State<AppState>) -> impl IntoResponse {
    tracing::warn!("Emergency stop requested through the ops API");
    Json(ApiResponse::success(state.app.governor.emergency_stop().await))
}

// ============================================================================
// Alert and Rule Handlers
// ============================================================================

async fn acknowledge_alert(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.app.alerts.acknowledge(&id).await {
        (StatusCode::OK, Json(ApiResponse::success(id))).into_response()
    } else {
        error(StatusCode::NOT_FOUND, format!("Alert not found: {id}"))
    }
}

async fn resolve_alert(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if state.app.alerts.resolve(&id).await {
        (StatusCode::OK, Json(ApiResponse::success(id))).into_response()
    } else {
        error(StatusCode::NOT_FOUND, format!("Alert not found: {id}"))
    }
}

async fn apply_rule(State(state): State<AppState>, Json(request): Json<RuleRequest>) -> Response {
    match state.app.planner.rules().apply(request).await {
        Ok(rule) => (StatusCode::OK, Json(ApiResponse::success(rule))).into_response(),
        Err(e) => error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn cancel_rule(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.app.planner.rules().cancel(&id).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success(id))).into_response(),
        Err(e @ SchedulerError::RuleNotFound { .. }) => error(StatusCode::NOT_FOUND, e.to_string()),
        Err(e) => error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::config::Config;
    use crate::governor::{StaticMetricsSource, SystemMetrics};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> (Router, App) {
        let mut config = Config::default();
        config.llm.enabled = false;
        let app = App::builder(config, Arc::new(MemoryStore::new()))
            .metrics_source(Arc::new(StaticMetricsSource::new(SystemMetrics::idle())))
            .build()
            .unwrap();
        (create_router(AppState::new(app.clone())), app)
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header(header::CONTENT_TYPE, "application/json");
        }
        let request = request
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[test]
    fn test_api_response_shapes() {
        let response = ApiResponse::success("ok");
        assert!(response.success);
        assert!(response.error.is_none());

        let response = ApiResponse::failure(1, "boom");
        assert!(!response.success);
        assert_eq!(response.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let (router, _) = router();
        let (status, body) = send(router.clone(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = send(router, "GET", "/api/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "stopped");
    }

    #[tokio::test]
    async fn test_throttle_roundtrip() {
        let (router, app) = router();
        let (status, body) = send(router.clone(), "POST", "/api/throttle", Some(r#"{"level":50}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["throttle_level"], 50);
        assert_eq!(app.governor.limits().throttle_level, 50);

        let (status, _) = send(router.clone(), "POST", "/api/throttle", Some(r#"{"level":150}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(router, "POST", "/api/throttle/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["throttle_level"], 0);
    }

    #[tokio::test]
    async fn test_emergency_stop_reflected_in_throttle_status() {
        let (router, _) = router();
        let (status, _) = send(router.clone(), "POST", "/api/emergency-stop", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(router, "GET", "/api/throttle", None).await;
        assert_eq!(body["data"]["emergency"], true);
    }

    #[tokio::test]
    async fn test_execute_cycle() {
        let (router, _) = router();
        let (status, body) = send(router.clone(), "POST", "/api/cycles/scheduling", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], "completed");

        let (status, _) = send(router, "POST", "/api/cycles/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rule_lifecycle() {
        let (router, _) = router();
        let (status, body) = send(
            router.clone(),
            "POST",
            "/api/rules",
            Some(r#"{"language":"en","peak_hours":[20],"reason":"launch"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, _) = send(router.clone(), "DELETE", &format!("/api/rules/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(router, "DELETE", "/api/rules/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
