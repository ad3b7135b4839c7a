//! Thin axum surface over [`BenchmarkService`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::service::{BenchmarkService, QueueStatus, RefreshTicket, Scorecard, ServiceError};
use crate::types::{Job, RefreshClass, Score};

const DEFAULT_HISTORY_LIMIT: usize = 20;
const MAX_HISTORY_LIMIT: usize = 500;

#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<BenchmarkService>,
}

impl ApiState {
    pub fn new(service: Arc<BenchmarkService>) -> Self {
        Self { service }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    fn new(code: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let status = match self.code.as_str() {
            "ALREADY_IN_PROGRESS" => StatusCode::CONFLICT,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "INVALID_PARAMETERS" | "UNSUPPORTED_CHAIN" => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<ServiceError> for ErrorResponse {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::AlreadyInProgress { .. } => ErrorResponse::new("ALREADY_IN_PROGRESS", "already in progress"),
            ServiceError::UnsupportedChain(chain) => {
                ErrorResponse::new("UNSUPPORTED_CHAIN", format!("Unsupported chain: {}", chain))
            }
            ServiceError::InvalidAddress(raw) => {
                ErrorResponse::new("INVALID_PARAMETERS", format!("Invalid address: {}", raw))
            }
            ServiceError::NotFound(what) => ErrorResponse::new("NOT_FOUND", format!("{} not found", what)),
            ServiceError::Enqueue(e) => {
                error!("Enqueue failed: {}", e);
                ErrorResponse::new("ENQUEUE_FAILED", "Failed to enqueue refresh")
            }
            ServiceError::Store(e) => {
                error!("Store failure: {}", e);
                ErrorResponse::new("INTERNAL_ERROR", "Internal storage error")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshQuery {
    pub class: Option<String>,
    pub priority: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct QueueStatusQuery {
    pub chain: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/assets/:chain/:address/scorecard", get(get_scorecard))
        .route("/assets/:chain/:address/scores", get(get_score_history))
        .route("/assets/:chain/:address/refresh", post(request_refresh))
        .route("/queue/status", get(get_queue_status))
        .route("/jobs/:job_id", get(get_job))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
    })
}

/// GET /assets/:chain/:address/scorecard
async fn get_scorecard(
    State(state): State<ApiState>,
    Path((chain, address)): Path<(String, String)>,
) -> Result<Json<Scorecard>, ErrorResponse> {
    let scorecard = state.service.scorecard(&chain, &address).await?;
    Ok(Json(scorecard))
}

/// GET /assets/:chain/:address/scores?limit=20
async fn get_score_history(
    State(state): State<ApiState>,
    Path((chain, address)): Path<(String, String)>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<Score>>, ErrorResponse> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);
    let history = state.service.score_history(&chain, &address, limit).await?;
    Ok(Json(history))
}

/// POST /assets/:chain/:address/refresh?class=volatile&priority=1
async fn request_refresh(
    State(state): State<ApiState>,
    Path((chain, address)): Path<(String, String)>,
    Query(params): Query<RefreshQuery>,
) -> Result<(StatusCode, Json<RefreshTicket>), ErrorResponse> {
    let class = match params.class.as_deref() {
        None => RefreshClass::Full,
        Some(raw) => RefreshClass::from_str(raw)
            .ok_or_else(|| ErrorResponse::new("INVALID_PARAMETERS", format!("Unknown refresh class: {}", raw)))?,
    };

    info!("Refresh requested for {} on {} ({})", address, chain, class);
    let ticket = state
        .service
        .request_refresh(&chain, &address, class, params.priority)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(ticket)))
}

/// GET /queue/status?chain=ethereum&address=0x...
async fn get_queue_status(
    State(state): State<ApiState>,
    Query(params): Query<QueueStatusQuery>,
) -> Result<Json<QueueStatus>, ErrorResponse> {
    let asset_id = match (params.chain.as_deref(), params.address.as_deref()) {
        (Some(chain), Some(address)) => Some(state.service.asset_id(chain, address).await?),
        (None, None) => None,
        _ => {
            return Err(ErrorResponse::new(
                "INVALID_PARAMETERS",
                "chain and address must be given together",
            ))
        }
    };
    Ok(Json(state.service.queue_status(asset_id).await?))
}

/// GET /jobs/:job_id
async fn get_job(State(state): State<ApiState>, Path(job_id): Path<String>) -> Result<Json<Job>, ErrorResponse> {
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|_| ErrorResponse::new("INVALID_PARAMETERS", "Invalid job ID format"))?;
    Ok(Json(state.service.job(job_id).await?))
}
