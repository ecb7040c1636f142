//! # Repository Module
//!
//! Database repository implementations for Tender POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Orchestrator / worker                                                  │
//! │       │                                                                 │
//! │       │  db.orders().settle(order_id, &settlement)                      │
//! │       ▼                                                                 │
//! │  OrderRepository                                                       │
//! │  ├── create_open / get_by_id / get_by_invoice / list_open_after        │
//! │  ├── settle (payment + OPEN→PAID + pending sale→completed, one txn)    │
//! │  ├── mark_declined (OPEN only)                                         │
//! │  └── mark_voided / mark_refunded (PAID only)                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`sale::SaleLedgerRepository`] - Sale ledger writer (sale + items + tenders)
//! - [`order::OrderRepository`] - Orders and their settlements
//! - [`invoice::InvoicePaymentRepository`] - Bulk charge records
//! - [`terminal::TerminalSessionRepository`] - Persisted terminal polling keys
//! - [`conflict::ConflictRepository`] - Reconciliation conflict alerts

use chrono::Utc;
use uuid::Uuid;

pub mod conflict;
pub mod invoice;
pub mod order;
pub mod sale;
pub mod terminal;

/// Generates a 10-digit invoice number: `YYMMDD` + 4 random digits.
///
/// Numeric only, so a cashier can key it on a terminal keypad when the
/// push fails and the sale is run on the device by hand. Callers retry
/// on a UNIQUE collision.
pub fn generate_invoice_number() -> String {
    let date_part = Utc::now().format("%y%m%d");
    let suffix = Uuid::new_v4().as_u128() % 10_000;
    format!("{}{:04}", date_part, suffix)
}

/// Attempts made to find a free invoice number before giving up.
pub const INVOICE_NUMBER_ATTEMPTS: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_number_shape() {
        let invoice = generate_invoice_number();
        assert_eq!(invoice.len(), 10);
        assert!(invoice.chars().all(|c| c.is_ascii_digit()));
        assert!(invoice.starts_with(&Utc::now().format("%y%m%d").to_string()));
    }
}
