//! # Payment Method Adapters
//!
//! One adapter per payment method behind a common contract, selected from
//! a method → adapter table.
//!
//! ## Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PaymentRequest { instrument: <tagged by method>, ... }                 │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  AdapterRegistry::get(method)                                           │
//! │        │                                                                │
//! │        ├── cash                 ──► CashAdapter          (no network)   │
//! │        ├── card_manual          ──► CardManualAdapter    ─┐             │
//! │        ├── card_reader_token    ──► CardReaderAdapter     │             │
//! │        ├── card_stored_profile  ──► StoredProfileAdapter  ├─► Gateway   │
//! │        ├── ach_stored_profile   ──► StoredProfileAdapter  │             │
//! │        ├── ach                  ──► AchAdapter           ─┘             │
//! │        └── card_terminal        ──► TerminalAdapter      ──► Terminal   │
//! │                                      (returns Pending)                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Local validation always runs before any network call, so a
//! `Validation` error guarantees nothing was sent.

mod ach;
mod card;
mod cash;
mod profile;
mod terminal;

pub use ach::AchAdapter;
pub use card::{CardManualAdapter, CardReaderAdapter};
pub use cash::CashAdapter;
pub use profile::StoredProfileAdapter;
pub use terminal::TerminalAdapter;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{PaymentError, PaymentResult};
use crate::gateway::GatewayClient;
use crate::terminal_client::TerminalClient;
use tender_core::{Money, PaymentMethod, PaymentOutcome, PaymentRequest, ValidationError};

#[async_trait]
pub trait PaymentAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    async fn authorize(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome>;

    async fn void(&self, provider_transaction_id: &str) -> PaymentResult<bool>;

    async fn refund(&self, provider_transaction_id: &str, amount: Money) -> PaymentResult<bool>;
}

fn instrument_mismatch(method: PaymentMethod) -> PaymentError {
    ValidationError::InstrumentMismatch {
        method: method.to_string(),
    }
    .into()
}

async fn gateway_void(gateway: &dyn GatewayClient, transaction_id: &str) -> PaymentResult<bool> {
    let response = gateway.void(transaction_id).await?;
    if !response.is_accepted() {
        warn!(transaction_id, message = %response.message, "Gateway refused void");
    }
    Ok(response.is_accepted())
}

async fn gateway_refund(gateway: &dyn GatewayClient, transaction_id: &str, amount: Money) -> PaymentResult<bool> {
    let response = gateway.refund(transaction_id, amount).await?;
    if !response.is_accepted() {
        warn!(transaction_id, message = %response.message, "Gateway refused refund");
    }
    Ok(response.is_accepted())
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<PaymentMethod, Arc<dyn PaymentAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All seven methods wired to one gateway and one terminal provider.
    pub fn standard(gateway: Arc<dyn GatewayClient>, terminal: Arc<dyn TerminalClient>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CashAdapter));
        registry.register(Arc::new(CardManualAdapter::new(gateway.clone())));
        registry.register(Arc::new(CardReaderAdapter::new(gateway.clone())));
        registry.register(Arc::new(StoredProfileAdapter::card(gateway.clone())));
        registry.register(Arc::new(StoredProfileAdapter::ach(gateway.clone())));
        registry.register(Arc::new(AchAdapter::new(gateway)));
        registry.register(Arc::new(TerminalAdapter::new(terminal)));
        registry
    }

    /// Replaces any adapter already registered for the same method.
    pub fn register(&mut self, adapter: Arc<dyn PaymentAdapter>) {
        self.adapters.insert(adapter.method(), adapter);
    }

    pub fn get(&self, method: PaymentMethod) -> PaymentResult<Arc<dyn PaymentAdapter>> {
        self.adapters
            .get(&method)
            .cloned()
            .ok_or_else(|| PaymentError::UnsupportedMethod(method.to_string()))
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|m| self.adapters.contains_key(m))
            .collect()
    }
}
