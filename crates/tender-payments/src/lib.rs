//! # tender-payments: Payment Orchestration Engine for Tender POS
//!
//! Turns a priced cart into a settled, ledgered payment, whatever the
//! payment method, and keeps the ledger in step with what the providers
//! actually settled.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Payment Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                PaymentOrchestrator (entry point)                 │  │
//! │  │   fees ──► AdapterRegistry ──► sale ledger / order + session     │  │
//! │  └───────┬───────────────────────┬───────────────────────┬──────────┘  │
//! │          ▼                       ▼                       ▼             │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────┐    │
//! │  │ Adapters       │  │ TerminalService    │  │ BulkCharger        │    │
//! │  │                │  │                    │  │                    │    │
//! │  │ cash, card,    │  │ one poll task per  │  │ N documents, one   │    │
//! │  │ reader token,  │  │ device payment,    │  │ stored profile,    │    │
//! │  │ stored profile,│  │ cancel by message  │  │ isolated failures  │    │
//! │  │ ach, terminal  │  │                    │  │                    │    │
//! │  └───────┬────────┘  └─────────┬──────────┘  └─────────┬──────────┘    │
//! │          ▼                     ▼                       ▼               │
//! │  ┌────────────────┐  ┌────────────────────┐  ┌────────────────────┐    │
//! │  │ GatewayClient  │  │ TerminalClient     │  │ AccountingClient   │    │
//! │  │ Authorize.Net  │  │ cloud-to-device    │  │ Zoho Books +       │    │
//! │  │                │  │                    │  │ TtlCache tokens    │    │
//! │  └────────────────┘  └────────────────────┘  └────────────────────┘    │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │ ReconciliationWorker (background, every 12s)                     │  │
//! │  │ OPEN orders ──► find_settled(invoice) ──► apply_settlement       │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! ### Engine
//! - [`orchestrator`] - Sale flow, order void/refund, status reads
//! - [`adapter`] - One adapter per payment method, method → adapter table
//! - [`poller`] - Terminal poll tasks and cancellation
//! - [`bulk`] - Bulk invoice charging
//! - [`reconcile`] - Settlement matching and the background worker
//!
//! ### Providers
//! - [`gateway`] - Authorize.Net JSON API client
//! - [`terminal_client`] - Card terminal cloud API client
//! - [`accounting`] - Zoho Books customer payment client
//! - [`cache`] - TTL cache for provider tokens
//!
//! ### Support
//! - [`config`] - `payments.toml` + `TENDER_*` environment overrides
//! - [`error`] - Payment error taxonomy
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tender_payments::{PaymentOrchestrator, PaymentsConfig, ProviderClients, ReconciliationWorker};
//!
//! let config = PaymentsConfig::load(None)?;
//! let clients = ProviderClients::from_config(&config)?;
//! let orchestrator = PaymentOrchestrator::from_clients(db.clone(), &clients, &config)?;
//!
//! let (worker, handle) = ReconciliationWorker::new(
//!     db, clients.terminal.clone(), clients.accounting.clone(), config.reconciliation.clone(),
//! );
//! tokio::spawn(worker.run());
//!
//! let result = orchestrator.process_sale(&request).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

// Engine
pub mod adapter;
pub mod bulk;
pub mod orchestrator;
pub mod poller;
pub mod reconcile;

// Providers
pub mod accounting;
pub mod cache;
pub mod gateway;
pub mod terminal_client;

// Support
pub mod config;
pub mod error;

/// Scriptable provider fakes, shared with the API crate's route tests.
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// =============================================================================
// Re-exports
// =============================================================================

pub use adapter::{AdapterRegistry, PaymentAdapter};
pub use bulk::{BulkChargeReport, BulkChargeRequest, BulkCharger, BulkDocument, BulkOutcome, ProfileKind};
pub use config::PaymentsConfig;
pub use error::{ErrorKind, PaymentError, PaymentResult};
pub use orchestrator::{
    HealthReport, OrderActionResult, OrderPaymentStatus, PaymentOrchestrator, PaymentStatusView, ProviderClients,
    SaleRequest, SaleResult, TerminalPaymentRequest,
};
pub use poller::{CancelReport, PollPolicy, TerminalService};
pub use reconcile::{CycleReport, ReconciliationHandle, ReconciliationWorker};

pub use accounting::{AccountingClient, ZohoBooksClient};
pub use cache::TtlCache;
pub use gateway::{AuthorizeNetGateway, GatewayClient};
pub use terminal_client::{HttpTerminalClient, TerminalClient};
