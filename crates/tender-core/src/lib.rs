//! # tender-core: Pure Payment Domain Logic for Tender POS
//!
//! This crate holds every rule of the payment engine that can be expressed
//! without touching a database, a gateway, or a clock-driven loop.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tender POS Architecture                          │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Register UI (external)                       │   │
//! │  │    Cart ──► Tender screen ──► Terminal wait ──► Receipt         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ HTTP (tender-api)                      │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │          tender-payments (adapters, poller, reconciler)         │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tender-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐ ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌────────┐ │   │
//! │  │   │  money  │ │  fees   │ │  types   │ │validation│ │terminal│ │   │
//! │  │   │  Money  │ │ Fee/Tax │ │ Order    │ │ Luhn     │ │ state  │ │   │
//! │  │   │ rounding│ │ surchg. │ │ Payment  │ │ routing  │ │ machine│ │   │
//! │  │   └─────────┘ └─────────┘ └──────────┘ └──────────┘ └────────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`money`] - Money type with integer arithmetic and half-up percentages
//! - [`fees`] - Fee/Tax calculator (subtotal, tax, card surcharge)
//! - [`types`] - Ledger entities, payment requests and outcomes
//! - [`terminal`] - Terminal payment state machine (pure transitions)
//! - [`validation`] - Card, bank and identifier format checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tender_core::fees::{FeeCalculator, FeeInput};
//! use tender_core::money::Money;
//! use tender_core::types::{PaymentMethod, TaxRate};
//!
//! let calc = FeeCalculator::default();
//! let fees = calc.calculate(&FeeInput {
//!     subtotal: Money::from_cents(10_000),
//!     tax_rate: TaxRate::from_bps(750),
//!     tax_exempt: false,
//!     method: PaymentMethod::CardManual,
//! });
//!
//! assert_eq!(fees.tax.cents(), 750);
//! assert_eq!(fees.surcharge.cents(), 323);
//! assert_eq!(fees.total.cents(), 11_073);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod fees;
pub mod money;
pub mod terminal;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use fees::{FeeBreakdown, FeeCalculator, FeeInput};
pub use money::Money;
pub use terminal::{PollResult, TerminalEvent, TerminalState};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Card-network surcharge applied to card tenders, in basis points (3%).
pub const DEFAULT_SURCHARGE_BPS: u32 = 300;

/// Maximum line items accepted in a single sale.
pub const MAX_LINE_ITEMS: usize = 200;

/// Maximum documents accepted in one bulk charge request.
pub const MAX_BULK_DOCUMENTS: usize = 100;
