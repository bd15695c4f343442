//! REST API handlers for the quiz server
//!
//! Admin endpoints only schedule work and answer 202; the job runs as its
//! own task and reports through the log. Allocation is synchronous.

use axum::{
    extract::{rejection::QueryRejection, MatchedPath, Query, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Instant;

use crate::error::Error;
use crate::metrics;
use crate::models::{Allocation, StoreStats};
use crate::storage::run_blocking;

use super::auth::{AdminAuth, UserIdentity};
use super::server::AppState;

/// Body returned when no bundle matches the requested image count
pub const NO_QUESTION_MESSAGE: &str = "No unused image set available";

// ============================================================================
// API Response Types
// ============================================================================

/// `{message}` body for accepted jobs and empty allocations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Simple error response
#[derive(Debug, Clone, Serialize, Deserialize)]
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

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// `POST /v1/keywords` body
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordsRequest {
    pub category: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// `GET /v1/questions` query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionsQuery {
    #[serde(default)]
    pub image_count: i64,
}

/// Crate error rendered as a JSON response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(error = %self.0, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(ErrorResponse::new(self.0.to_string()))).into_response()
    }
}

fn accepted(message: impl Into<String>) -> (StatusCode, Json<MessageResponse>) {
    (StatusCode::ACCEPTED, Json(MessageResponse::new(message)))
}

/// Run an admin job detached from the request
fn spawn_job<F, T>(name: &'static str, job: F)
where
    F: Future<Output = crate::error::Result<T>> + Send + 'static,
    T: std::fmt::Debug + Send + 'static,
{
    tokio::spawn(async move {
        match job.await {
            Ok(outcome) => tracing::info!(job = name, ?outcome, "Background job finished"),
            Err(e) => tracing::error!(job = name, error = %e, "Background job failed"),
        }
    });
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(super::ui::index))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_text))
        .route("/v1/stats", get(get_stats))
        .route("/v1/keywords", post(create_keywords))
        .route("/v1/questions", get(get_questions).post(create_questions))
        .route("/v1/batch/questions", post(create_batch_questions))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;
    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}

// ============================================================================
// Health Handlers
// ============================================================================

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics_text() -> Response {
    match metrics::encode_metrics() {
        Ok(body) => ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(format!("Failed to encode metrics: {e}"))),
        )
            .into_response(),
    }
}

async fn get_stats(_admin: AdminAuth, State(state): State<AppState>) -> Result<Json<StoreStats>, ApiError> {
    let stats = run_blocking(&state.store, |s| s.stats())
        .await
        .map_err(Error::from)?;
    Ok(Json(stats))
}

// ============================================================================
// Pipeline Handlers
// ============================================================================

async fn create_keywords(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Json(request): Json<KeywordsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let category = request.category.trim().to_string();
    if category.is_empty() {
        return Err(Error::validation("category must not be empty").into());
    }

    tracing::info!(category = %category, keywords = request.keywords.len(), "Keyword ingestion requested");
    let ingestor = state.ingestor.clone();
    let keywords = request.keywords;
    let job_category = category.clone();
    spawn_job("ingest", async move { ingestor.ingest(&job_category, &keywords).await });

    Ok(accepted(format!(
        "Crawling and image set creation for '{category}' started in the background"
    )))
}

async fn create_questions(_admin: AdminAuth, State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    let batch_size = orchestrator.batch_size();
    spawn_job("generate_batch", async move { orchestrator.generate_batch(batch_size).await });

    accepted(format!(
        "Question generation for up to {batch_size} image sets started in the background"
    ))
}

async fn create_batch_questions(_admin: AdminAuth, State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = state.orchestrator.clone();
    spawn_job("ensure_supply", async move { orchestrator.ensure_supply().await });

    accepted("Question supply check started in the background")
}

// ============================================================================
// Allocation Handler
// ============================================================================

async fn get_questions(
    UserIdentity(requester): UserIdentity,
    State(state): State<AppState>,
    query: Result<Query<QuestionsQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| Error::validation(e.body_text()))?;

    match state.allocation.allocate_raw(query.image_count, requester).await? {
        Allocation::Claimed { view, .. } => Ok(Json(view).into_response()),
        Allocation::NotAvailable { .. } => Ok(Json(MessageResponse::new(NO_QUESTION_MESSAGE)).into_response()),
    }
}

