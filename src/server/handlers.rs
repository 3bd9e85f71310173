use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::convert::Infallible;

use crate::error::DbError;
use crate::executor::{CancelResponse, QueryService, INVALID_RUN_MESSAGE};

#[derive(Clone)]
pub struct AppState {
    pub service: QueryService,
    pub startup_time: std::time::Instant,
}

#[derive(Debug, Deserialize)]
pub struct StartQueryRequest {
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct StartQueryResponse {
    pub run_id: String,
}

pub async fn start_query(
    State(state): State<AppState>,
    Json(req): Json<StartQueryRequest>,
) -> Result<Json<StartQueryResponse>, DbError> {
    let run_id = state.service.prepare(&req.query).inspect_err(|e| {
        tracing::warn!("Query rejected ({}): {}", e.kind(), e);
    })?;
    Ok(Json(StartQueryResponse { run_id }))
}

pub async fn stream_query(State(state): State<AppState>, Path(run_id): Path<String>) -> Response {
    let stream = match state.service.open_stream(&run_id) {
        Ok(stream) => stream,
        Err(_) => return (StatusCode::NOT_FOUND, INVALID_RUN_MESSAGE).into_response(),
    };

    let body = Body::from_stream(stream.map(|frame| Ok::<_, Infallible>(Bytes::from(frame))));
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

pub async fn cancel_query(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Json<CancelResponse> {
    Json(state.service.cancel(&run_id))
}

pub async fn health_check_handler(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_secs": state.startup_time.elapsed().as_secs(),
        "active_runs": state.service.registry().len(),
    }))
}
