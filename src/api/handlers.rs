use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::checks::{CheckError, CheckOrchestrator, CheckOutcome};
use crate::clock::SharedClock;
use crate::data::{Alarm, AlarmId, CheckResult, HistoryFilter, Incident, Page};
use crate::storage::{DayPartitionedStore, IncidentScope, PartitionedAppendStore, StorageError};

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: CheckOrchestrator,
    pub results: Arc<DayPartitionedStore>,
    pub clock: SharedClock,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Alarms
// ============================================================================

pub async fn due_alarms(State(state): State<Arc<AppState>>) -> Json<Vec<Alarm>> {
    Json(
        state
            .orchestrator
            .alarms()
            .alarms_due_for_check(state.clock.now()),
    )
}

#[derive(Debug, Default, Deserialize)]
pub struct AlarmQuery {
    #[serde(default)]
    pub incidents: IncidentScope,
}

pub async fn get_alarm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AlarmId>,
    Query(query): Query<AlarmQuery>,
) -> Result<Json<Alarm>, ApiError> {
    let alarm = state
        .orchestrator
        .alarms()
        .find_alarm_by_id(id, query.incidents)?;
    Ok(Json(alarm))
}

#[derive(Debug, Default, Deserialize)]
pub struct CheckRequest {
    #[serde(default)]
    pub expected_watermark: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct CheckResponse {
    pub alarm_id: AlarmId,
    #[serde(flatten)]
    pub outcome: CheckOutcome,
}

pub async fn trigger_check(
    State(state): State<Arc<AppState>>,
    Path(id): Path<AlarmId>,
    request: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, ApiError> {
    // An empty body means "no watermark seen yet"
    let request = match request {
        Ok(Json(request)) => request,
        Err(JsonRejection::MissingJsonContentType(_)) => CheckRequest::default(),
        Err(e) => return Err(ApiError::BadRequest(e.body_text())),
    };
    let outcome = state
        .orchestrator
        .check_alarm(id, request.expected_watermark)
        .await?;
    Ok(Json(CheckResponse {
        alarm_id: id,
        outcome,
    }))
}

// ============================================================================
// History
// ============================================================================

pub async fn list_incidents(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<HistoryFilter>,
) -> Json<Page<Incident>> {
    Json(state.orchestrator.alarms().incidents(&filter))
}

pub async fn list_results(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<HistoryFilter>,
) -> Result<Json<Page<CheckResult>>, ApiError> {
    Ok(Json(state.results.query(&filter)?))
}

// ============================================================================
// Maintenance
// ============================================================================

#[derive(Serialize)]
pub struct PartitionsResponse {
    pub created: Vec<String>,
    pub tables: Vec<String>,
}

pub async fn ensure_partitions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PartitionsResponse>, ApiError> {
    let created = state.results.ensure_for(state.clock.now())?;
    let tables = state
        .results
        .sub_tables()
        .into_iter()
        .map(|entry| entry.name)
        .collect();
    Ok(Json(PartitionsResponse { created, tables }))
}

#[derive(Serialize)]
pub struct RotateResponse {
    pub rotated: usize,
}

pub async fn rotate_partitions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RotateResponse>, ApiError> {
    let retention = state.results.config().retention;
    let rotated = state.results.rotate_older_than(retention)?;
    Ok(Json(RotateResponse { rotated }))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict {
        message: String,
        watermark: Option<DateTime<Utc>>,
    },
    Internal(String),
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AlarmNotFound(_) => ApiError::NotFound(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<CheckError> for ApiError {
    fn from(e: CheckError) -> Self {
        match e {
            CheckError::NotFound(_) => ApiError::NotFound(e.to_string()),
            CheckError::AlreadyTriggered { watermark, .. } => ApiError::Conflict {
                message: e.to_string(),
                watermark,
            },
            CheckError::Storage(inner) => inner.into(),
            CheckError::Aborted(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            ApiError::Conflict { message, watermark } => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": message, "watermark": watermark }),
            ),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": msg }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
