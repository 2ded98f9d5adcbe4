//! HTTP Surface
//!
//! Two axum servers, mirroring the split between the product API and the
//! operational endpoints:
//!
//! - **Session API** (`/api/...`): the addressable surface for the
//!   stateless UI cycle. Every request carries (or is allocated) a session
//!   id; state between requests lives in the state manager.
//! - **Health server** (`/health`, `/healthz`, `/readyz`, `/metrics`): for
//!   orchestrators and monitoring.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::agent::{AgentCore, AgentError};
use crate::application::data_manager::{DataManager, ProviderStatusView};
use crate::application::state::StateManager;
use crate::domain::session::{ChatMessage, ToolCallRecord, TurnOutcome};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Errors
// =============================================================================

/// API failure mapped to a JSON problem response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unknown session id.
    #[error("session not found")]
    SessionNotFound,
    /// The model endpoint failed; the turn was not completed.
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),
    /// Server failed to bind or serve.
    #[error("server error: {0}")]
    Server(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            Self::SessionNotFound => (StatusCode::NOT_FOUND, "session_not_found"),
            Self::LlmUnavailable(_) => (StatusCode::BAD_GATEWAY, "llm_unavailable"),
            Self::Server(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        };
        let body = Json(serde_json::json!({
            "error": kind,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

// =============================================================================
// DTOs
// =============================================================================

/// Request body for `POST /api/ask`.
#[derive(Debug, Deserialize)]
pub struct AskRequest {
    /// Session to continue; a new session is allocated when omitted.
    #[serde(default)]
    pub session_id: Option<Uuid>,
    /// The natural-language query.
    pub query: String,
}

/// Response body for `POST /api/ask`.
#[derive(Debug, Serialize)]
pub struct AskResponse {
    /// Session the turn ran in.
    pub session_id: Uuid,
    /// Synthesized answer (empty when cancelled).
    pub answer: String,
    /// How the turn ended.
    pub outcome: TurnOutcome,
    /// Loop iterations consumed.
    pub iterations: u32,
    /// Tool calls the agent made, in execution order.
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Response body for the history endpoint.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Session id.
    pub session_id: Uuid,
    /// Retained conversation.
    pub messages: Vec<ChatMessage>,
}

/// Response body for the status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Adapter connection snapshots.
    pub providers: Vec<ProviderStatusView>,
    /// Live session count.
    pub sessions: usize,
}

// =============================================================================
// Session API server
// =============================================================================

/// Shared state behind the session API.
pub struct ApiState {
    /// Session store.
    pub sessions: Arc<StateManager>,
    /// Agent loop.
    pub agent: Arc<AgentCore>,
    /// Market data access, for the status endpoint.
    pub data: Arc<DataManager>,
}

/// Build the session API router.
#[must_use]
pub fn api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/ask", post(ask_handler))
        .route("/api/status", get(status_handler))
        .route("/api/sessions/{id}/history", get(history_handler))
        .route("/api/sessions/{id}/cancel", post(cancel_handler))
        .route("/api/sessions/{id}", delete(end_session_handler))
        .with_state(state)
}

/// Session API HTTP server.
pub struct ApiServer {
    port: u16,
    state: Arc<ApiState>,
    cancel: CancellationToken,
}

impl ApiServer {
    /// Create the server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<ApiState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the server errors while running.
    pub async fn run(self) -> Result<(), ApiError> {
        let app = api_router(self.state);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Server(format!("bind {addr} failed: {e}")))?;

        tracing::info!(port = self.port, "Session API listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiError::Server(e.to_string()))?;

        tracing::info!("Session API stopped");
        Ok(())
    }
}

async fn ask_handler(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);
    let entry = state.sessions.session(session_id);

    // The writer lock serializes turns per session; holding it across the
    // whole turn also guarantees a single outstanding LLM call per session.
    let mut session = entry.lock().await;
    let cancel = entry.begin_turn();

    let result = state
        .agent
        .answer(&session.history, &request.query, &cancel)
        .await;
    entry.finish_turn();

    let turn = match result {
        Ok(turn) => turn,
        Err(AgentError::Llm(error)) => {
            // Terminal for this turn only; the session stays usable.
            return Err(ApiError::LlmUnavailable(error.0));
        }
    };

    if turn.outcome != TurnOutcome::Cancelled {
        session.record_exchange(&request.query, &turn.answer);
    }

    Ok(Json(AskResponse {
        session_id,
        answer: turn.answer,
        outcome: turn.outcome,
        iterations: turn.iterations,
        tool_calls: turn.tool_calls,
    }))
}

async fn history_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<HistoryResponse>, ApiError> {
    if !state.sessions.contains(id) {
        return Err(ApiError::SessionNotFound);
    }
    let entry = state.sessions.session(id);
    let session = entry.lock().await;

    Ok(Json(HistoryResponse {
        session_id: id,
        messages: session.history.clone(),
    }))
}

async fn cancel_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.sessions.contains(id) {
        return Err(ApiError::SessionNotFound);
    }
    let cancelled = state.sessions.cancel_turn(id);
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn end_session_handler(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.sessions.end_session(id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound)
    }
}

async fn status_handler(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        providers: state.data.provider_statuses(),
        sessions: state.sessions.session_count(),
    })
}

// =============================================================================
// Health server
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy`, `degraded`, or `unhealthy`.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Adapter connection snapshots.
    pub providers: Vec<ProviderStatusView>,
    /// Live session count.
    pub sessions: usize,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// At least one adapter is streaming.
    Healthy,
    /// Adapters exist but none is connected.
    Degraded,
}

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    data: Arc<DataManager>,
    sessions: Arc<StateManager>,
}

impl HealthServerState {
    /// Create the health state.
    #[must_use]
    pub fn new(version: String, data: Arc<DataManager>, sessions: Arc<StateManager>) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            data,
            sessions,
        }
    }
}

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create the server.
    #[must_use]
    pub const fn new(
        port: u16,
        state: Arc<HealthServerState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run until cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails or the server errors while running.
    pub async fn run(self) -> Result<(), ApiError> {
        let app = health_router(self.state);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ApiError::Server(format!("bind {addr} failed: {e}")))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ApiError::Server(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
#[must_use]
pub fn health_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    (StatusCode::OK, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.data.any_connected() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "metrics not initialized".to_string(),
            )
        },
        |handle| (StatusCode::OK, handle.render()),
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let providers = state.data.provider_statuses();
    let status = if state.data.any_connected() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        providers,
        sessions: state.sessions.session_count(),
    }
}

// =============================================================================
// Tests
// =============================================================================
