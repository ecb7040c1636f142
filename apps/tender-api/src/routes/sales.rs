//! `/sales` and `/payment/status`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};

use tender_payments::{BulkChargeReport, BulkChargeRequest, PaymentStatusView, SaleRequest, SaleResult};

use crate::error::ApiResult;
use crate::state::AppState;

/// `POST /sales`
///
/// Terminal sales answer at once with `pending: true` and a reference to
/// poll at `GET /payment/status/{id}`.
pub async fn create_sale(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SaleRequest>, JsonRejection>,
) -> ApiResult<Json<SaleResult>> {
    let Json(request) = payload?;
    let result = state.orchestrator.process_sale(&request).await?;
    Ok(Json(result))
}

/// `GET /payment/status/{id}`
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> ApiResult<Json<PaymentStatusView>> {
    Ok(Json(state.orchestrator.payment_status(&reference).await?))
}

/// `POST /sales/charge-invoices`
///
/// Per-document failures are in the report, not the status code.
pub async fn charge_invoices(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BulkChargeRequest>, JsonRejection>,
) -> ApiResult<Json<BulkChargeReport>> {
    let Json(request) = payload?;
    Ok(Json(state.orchestrator.charge_invoices(&request).await?))
}
