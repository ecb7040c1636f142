//! `/orders`: back-office reads and post-settlement actions.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    Json,
};
use serde::Deserialize;

use tender_core::{Money, Order, OrderStatus};
use tender_payments::{OrderActionResult, OrderPaymentStatus, PaymentError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// Optional refund body. Partial refunds are rejected, so `amountCents`
/// must equal the settled payment; an empty body refunds it in full.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    #[serde(default)]
    pub amount_cents: Option<i64>,
}

/// `GET /orders?status=open&limit=100`
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Order>>> {
    let Query(query) = query?;

    let status = match query.status.as_deref() {
        Some(raw) => raw.parse::<OrderStatus>().map_err(PaymentError::from)?,
        None => OrderStatus::Open,
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);

    Ok(Json(state.orchestrator.list_orders(status, limit).await?))
}

/// `GET /orders/{id}/payment-status`
pub async fn payment_status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> ApiResult<Json<OrderPaymentStatus>> {
    Ok(Json(state.orchestrator.order_payment_status(&order_id).await?))
}

/// `POST /orders/{id}/void`
pub async fn void_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> ApiResult<Json<OrderActionResult>> {
    Ok(Json(state.orchestrator.void_order(&order_id).await?))
}

/// `POST /orders/{id}/refund`
///
/// Always a full refund: the order moves to REFUNDED, which is final.
pub async fn refund_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<OrderActionResult>> {
    let request = if body.is_empty() {
        RefundRequest::default()
    } else {
        serde_json::from_slice::<RefundRequest>(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
    };

    let amount = request.amount_cents.map(Money::from_cents);
    Ok(Json(state.orchestrator.refund_order(&order_id, amount).await?))
}
