//! `GET /health`

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};

use tender_payments::HealthReport;

use crate::error::ApiResult;
use crate::state::AppState;

/// 503 when the database does not answer.
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<(StatusCode, Json<HealthReport>)> {
    let report = state.orchestrator.health().await?;
    let status = if report.database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    Ok((status, Json(report)))
}
