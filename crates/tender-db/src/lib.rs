//! # tender-db: Ledger Persistence for Tender POS
//!
//! SQLite storage for orders, settlements, the sale ledger, invoice charge
//! records, terminal sessions and reconciliation conflicts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tender POS Data Flow                             │
//! │                                                                         │
//! │  Orchestrator / Poller / Reconciliation worker                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    tender-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌────────────────────┐   ┌───────────┐  │   │
//! │  │   │   Database    │    │   Repositories     │   │Migrations │  │   │
//! │  │   │   (pool.rs)   │◄───│ SaleLedgerRepo     │   │ (embedded)│  │   │
//! │  │   │  SqlitePool   │    │ OrderRepo          │   │           │  │   │
//! │  │   │               │    │ InvoicePaymentRepo │   │ 001_...   │  │   │
//! │  │   │               │    │ TerminalSessionRepo│   │           │  │   │
//! │  │   │               │    │ ConflictRepo       │   │           │  │   │
//! │  │   └───────────────┘    └────────────────────┘   └───────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL)                                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Exactly-Once Writes
//!
//! Every table holding a provider transaction id has a UNIQUE index on it.
//! Write paths that hit that index report "already recorded" instead of an
//! error, so a live request and the reconciliation worker can race safely.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tender_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./tender.db")).await?;
//! let open = db.orders().list_open(100).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::conflict::ConflictRepository;
pub use repository::invoice::{InvoicePaymentRepository, RecordOutcome};
pub use repository::order::{NewOrder, OrderCursor, OrderRepository, SettleOutcome, Settlement};
pub use repository::sale::{LedgerEntry, LedgerWrite, SaleLedgerRepository};
pub use repository::terminal::TerminalSessionRepository;
