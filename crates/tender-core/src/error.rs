//! # Error Types
//!
//! Domain-specific error types for tender-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tender-core errors (this file)                                        │
//! │  ├── CoreError        - Ledger and state machine rule violations       │
//! │  └── ValidationError  - Input rejected before any network call         │
//! │                                                                         │
//! │  tender-db errors                                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tender-payments errors                                                │
//! │  └── PaymentError     - Validation / Declined / Gateway / UnderReview  │
//! │                         / Timeout / ReconciliationConflict             │
//! │                                                                         │
//! │  tender-api errors                                                     │
//! │  └── ApiError         - What the register sees (code + HTTP status)    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core business rule errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Order cannot be found.
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// The order lifecycle does not allow the requested transition.
    ///
    /// ## When This Occurs
    /// ```text
    /// Refund requested on an OPEN order
    ///      │
    ///      ▼
    /// InvalidOrderTransition { from: "open", to: "refunded" }
    ///      │
    ///      ▼
    /// Adapter is never called
    /// ```
    #[error("Order {order_id} cannot move from {from} to {to}")]
    InvalidOrderTransition {
        order_id: String,
        from: String,
        to: String,
    },

    /// The terminal payment state machine rejected an event.
    #[error("Terminal payment cannot handle {event} while {state}")]
    InvalidTerminalTransition { state: String, event: String },

    /// Sale has more line items than allowed.
    #[error("Sale cannot have more than {max} line items")]
    TooManyLineItems { max: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any external call is made, so correcting the input and
/// retrying immediately is always safe.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., routing number, expiry).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Card number, expiry or CVV failed local checks.
    ///
    /// The message never contains the offending value.
    #[error("Invalid card format: {reason}")]
    InvalidCardFormat { reason: String },

    /// Cash tendered does not cover the sale total.
    #[error("Cash received {received} is less than total {total}")]
    InsufficientCash { received: i64, total: i64 },

    /// The request's instrument does not match the adapter it was sent to.
    #[error("Payment method {method} does not accept this instrument")]
    InstrumentMismatch { method: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::InvalidOrderTransition {
            order_id: "ord-1".to_string(),
            from: "open".to_string(),
            to: "refunded".to_string(),
        };
        assert_eq!(err.to_string(), "Order ord-1 cannot move from open to refunded");

        let err = ValidationError::InsufficientCash {
            received: 500,
            total: 1000,
        };
        assert_eq!(err.to_string(), "Cash received 500 is less than total 1000");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "device_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
