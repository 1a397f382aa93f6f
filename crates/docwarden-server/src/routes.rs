//! HTTP trigger and operator endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use docwarden::integrity::IntegrityHealer;
use docwarden::recovery::{FailedJob, RecoveredJob, StuckTaskSummary};
use docwarden::{IntegrityError, IntegrityValidator, StuckTaskDetector};

#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<StuckTaskDetector>,
    pub validator: Arc<IntegrityValidator>,
    pub healer: Arc<IntegrityHealer>,
}

#[derive(Serialize)]
struct RecoverResponse {
    success: bool,
    message: String,
    worker_id: String,
    recovered: Vec<RecoveredJob>,
    failed: Vec<FailedJob>,
}

#[derive(Serialize)]
struct StuckResponse {
    threshold_minutes: i64,
    stuck: Vec<StuckTaskSummary>,
}

#[derive(Deserialize)]
struct HealRequest {
    job_id: String,
}

const DEFAULT_HISTORY_LIMIT: u32 = 50;

#[derive(Deserialize)]
struct HistoryParams {
    limit: Option<u32>,
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/recover-stuck", post(recover_stuck_handler))
        .route("/stuck", get(stuck_handler))
        .route("/recoveries", get(recoveries_handler))
        .route("/recoveries/:job_id", get(job_recoveries_handler))
        .route("/integrity", get(validate_all_handler))
        .route("/integrity/heal", post(heal_handler))
        .route("/integrity/:job_id", get(validate_one_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn recover_stuck_handler(State(state): State<AppState>) -> Response {
    match state.detector.detect_and_recover().await {
        Ok(report) => (
            StatusCode::OK,
            Json(RecoverResponse {
                success: true,
                message: report.message(),
                worker_id: report.worker_id,
                recovered: report.recovered,
                failed: report.failed,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": e.to_string(),
                "worker_id": e.worker_id(),
            })),
        )
            .into_response(),
    }
}

async fn stuck_handler(State(state): State<AppState>) -> Response {
    match state.detector.scan() {
        Ok(stuck) => Json(StuckResponse {
            threshold_minutes: state.detector.threshold().num_minutes(),
            stuck,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn recoveries_handler(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    match state.detector.history(None, limit) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn job_recoveries_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.detector.history(Some(&job_id), DEFAULT_HISTORY_LIMIT) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn validate_all_handler(State(state): State<AppState>) -> Response {
    match state.validator.validate_all() {
        Ok(issues) => Json(issues).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn validate_one_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Response {
    match state.validator.validate_one(&job_id) {
        Ok(issue) => Json(issue).into_response(),
        Err(e @ IntegrityError::JobNotFound(_)) => error_response(StatusCode::NOT_FOUND, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn heal_handler(
    State(state): State<AppState>,
    Json(payload): Json<HealRequest>,
) -> Response {
    Json(state.healer.heal(&payload.job_id)).into_response()
}
