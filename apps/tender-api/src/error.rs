//! HTTP error mapping.
//!
//! ```text
//! ErrorKind                 Status   Code
//! ───────────────────────   ──────   ───────────────────────
//! Validation                 400     validation_error
//! Declined                   402     payment_declined
//! Gateway                    502     gateway_error
//! ReconciliationConflict     409     reconciliation_conflict
//! InvalidState               409     invalid_state
//! NotFound                   404     not_found
//! Internal                   500     internal_error
//! ```

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use tender_payments::{ErrorKind, PaymentError};

pub type ApiResult<T> = Result<T, ApiError>;

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    /// False for gateway errors: the charge may have gone through.
    pub retry_safe: bool,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// Body or query string that could not be parsed.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Payment(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Declined => StatusCode::PAYMENT_REQUIRED,
                ErrorKind::Gateway => StatusCode::BAD_GATEWAY,
                ErrorKind::ReconciliationConflict | ErrorKind::InvalidState => StatusCode::CONFLICT,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "validation_error",
            ApiError::Payment(err) => match err.kind() {
                ErrorKind::Validation => "validation_error",
                ErrorKind::Declined => "payment_declined",
                ErrorKind::Gateway => "gateway_error",
                ErrorKind::ReconciliationConflict => "reconciliation_conflict",
                ErrorKind::InvalidState => "invalid_state",
                ErrorKind::NotFound => "not_found",
                ErrorKind::Internal => "internal_error",
            },
        }
    }

    fn retry_safe(&self) -> bool {
        match self {
            ApiError::BadRequest(_) => true,
            ApiError::Payment(err) => err.is_retry_safe(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            ApiError::Payment(err) if err.kind() == ErrorKind::Internal => {
                // Storage and config detail stays in the log.
                error!(error = %err, "Request failed");
                "Internal server error".to_string()
            }
            ApiError::Payment(err) if err.kind() == ErrorKind::Gateway => {
                warn!(error = %err, "Gateway outcome unknown");
                err.to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorBody {
            code: self.code(),
            message,
            retry_safe: self.retry_safe(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tender_core::ValidationError;
    use tender_db::DbError;

    #[test]
    fn test_status_mapping() {
        let validation: ApiError = PaymentError::from(ValidationError::Required {
            field: "device_id".into(),
        })
        .into();
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(validation.code(), "validation_error");

        let declined: ApiError = PaymentError::declined("insufficient funds").into();
        assert_eq!(declined.status(), StatusCode::PAYMENT_REQUIRED);

        let gateway: ApiError = PaymentError::gateway("request timed out").into();
        assert_eq!(gateway.status(), StatusCode::BAD_GATEWAY);
        assert!(!gateway.retry_safe());

        let missing: ApiError = PaymentError::NotFound {
            entity: "Order",
            id: "ord-1".into(),
        }
        .into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let state: ApiError = PaymentError::InvalidState("order is open".into()).into();
        assert_eq!(state.status(), StatusCode::CONFLICT);
        assert_eq!(state.code(), "invalid_state");
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err: ApiError = PaymentError::Storage(DbError::ConnectionFailed("disk I/O error".into())).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "internal_error");
    }
}
