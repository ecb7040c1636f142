//! `/valor`: direct device payments.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};

use tender_payments::{CancelReport, PaymentStatusView, SaleResult, TerminalPaymentRequest};

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /valor/payment`
pub async fn start_payment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<TerminalPaymentRequest>, JsonRejection>,
) -> ApiResult<Json<SaleResult>> {
    let Json(request) = payload?;
    Ok(Json(state.orchestrator.start_terminal_payment(&request).await?))
}

/// `GET /valor/status/{id}`
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<Json<PaymentStatusView>> {
    Ok(Json(state.orchestrator.payment_status(&reference).await?))
}

/// `POST /valor/payment/{id}/cancel`
pub async fn cancel_payment(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<Json<CancelReport>> {
    Ok(Json(state.orchestrator.cancel_terminal_payment(&reference).await?))
}
