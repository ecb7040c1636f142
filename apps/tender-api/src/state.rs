//! Shared application state.

use tender_payments::PaymentOrchestrator;

/// Handed to every handler behind an `Arc`.
pub struct AppState {
    pub orchestrator: PaymentOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: PaymentOrchestrator) -> Self {
        AppState { orchestrator }
    }
}
