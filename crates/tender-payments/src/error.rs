//! # Payment Error Types
//!
//! Every failure an adapter, client or worker can report, grouped by what
//! the caller is allowed to do next.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Payment Error Categories                           │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Validation     │  │   Declined      │  │     Gateway             │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  no call made   │  │  call made      │  │  outcome unknown        │ │
//! │  │  fix and retry  │  │  no funds moved │  │  DO NOT blindly retry   │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Conflict       │  │   State         │  │     Storage / Config    │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  settlement not │  │  order or       │  │  database, config file, │ │
//! │  │  applicable     │  │  terminal rule  │  │  accounting system      │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  UnderReview and Timeout are not errors: they arrive as outcomes        │
//! │  (PaymentOutcome.under_review, TerminalState::TimedOut).                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use tender_core::{CoreError, ValidationError};
use tender_db::DbError;

/// Result type alias for payment operations.
pub type PaymentResult<T> = Result<T, PaymentError>;

/// Payment error type.
#[derive(Debug, Error)]
pub enum PaymentError {
    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Input rejected locally. No external call was made.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The provider answered and refused the charge.
    #[error("Payment declined: {reason}")]
    Declined { reason: String },

    // =========================================================================
    // Provider Errors
    // =========================================================================
    /// Network failure, timeout or unreadable response. The charge may or
    /// may not have happened.
    #[error("Gateway error: {message}")]
    Gateway { message: String },

    /// The accounting system rejected or could not receive a record.
    #[error("Accounting error: {0}")]
    Accounting(String),

    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// A settlement could not be applied and was recorded for an operator.
    #[error("Reconciliation conflict: {detail}")]
    Conflict { detail: String },

    /// An order or terminal transition that the lifecycle forbids.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("No adapter registered for payment method {0}")]
    UnsupportedMethod(String),

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid payments configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// A worker or poll task is gone.
    #[error("Channel error: {0}")]
    ChannelClosed(String),
}

/// Coarse category reported to callers and used for HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Declined,
    Gateway,
    ReconciliationConflict,
    InvalidState,
    NotFound,
    Internal,
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for PaymentError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => PaymentError::Validation(v),
            CoreError::OrderNotFound(id) => PaymentError::NotFound { entity: "Order", id },
            other => PaymentError::InvalidState(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("request timed out: {}", err)
        } else if err.is_connect() {
            format!("connection failed: {}", err)
        } else {
            err.to_string()
        };
        PaymentError::Gateway { message }
    }
}

impl From<std::io::Error> for PaymentError {
    fn from(err: std::io::Error) -> Self {
        PaymentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for PaymentError {
    fn from(err: toml::de::Error) -> Self {
        PaymentError::ConfigLoadFailed(err.to_string())
    }
}

impl From<url::ParseError> for PaymentError {
    fn from(err: url::ParseError) -> Self {
        PaymentError::InvalidConfig(format!("invalid URL: {}", err))
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl PaymentError {
    pub fn gateway(message: impl Into<String>) -> Self {
        PaymentError::Gateway { message: message.into() }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        PaymentError::Declined { reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::Validation(_) => ErrorKind::Validation,
            PaymentError::Declined { .. } => ErrorKind::Declined,
            PaymentError::Gateway { .. } => ErrorKind::Gateway,
            PaymentError::Conflict { .. } => ErrorKind::ReconciliationConflict,
            PaymentError::InvalidState(_) | PaymentError::UnsupportedMethod(_) => {
                ErrorKind::InvalidState
            }
            PaymentError::NotFound { .. } => ErrorKind::NotFound,
            PaymentError::Storage(DbError::NotFound { .. }) => ErrorKind::NotFound,
            PaymentError::Accounting(_)
            | PaymentError::Storage(_)
            | PaymentError::InvalidConfig(_)
            | PaymentError::ConfigLoadFailed(_)
            | PaymentError::ChannelClosed(_) => ErrorKind::Internal,
        }
    }

    /// True when resubmitting cannot double-charge: either nothing was
    /// sent, or the provider gave a definitive refusal.
    ///
    /// A `Gateway` error is never retry-safe.
    pub fn is_retry_safe(&self) -> bool {
        matches!(self.kind(), ErrorKind::Validation | ErrorKind::Declined)
    }
}
