//! Cloud-to-device card terminal.
//!
//! `authorize` only pushes the payment and returns `Pending` with the
//! provider reference. The outcome arrives later through
//! [`crate::poller::TerminalService`] or the reconciliation worker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{instrument_mismatch, PaymentAdapter};
use crate::error::PaymentResult;
use crate::terminal_client::{TerminalClient, TerminalPush};
use tender_core::validation::{validate_device_id, validate_invoice_number, validate_payment_amount};
use tender_core::{Money, PaymentInstrument, PaymentMethod, PaymentOutcome, PaymentRequest, ValidationError};

pub struct TerminalAdapter {
    client: Arc<dyn TerminalClient>,
}

impl TerminalAdapter {
    pub fn new(client: Arc<dyn TerminalClient>) -> Self {
        TerminalAdapter { client }
    }
}

#[async_trait]
impl PaymentAdapter for TerminalAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CardTerminal
    }

    async fn authorize(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        let PaymentInstrument::CardTerminal { device_id } = &request.instrument else {
            return Err(instrument_mismatch(self.method()));
        };
        validate_device_id(device_id)?;
        let invoice_number = request.invoice_number.as_deref().ok_or_else(|| ValidationError::Required {
            field: "invoice_number".to_string(),
        })?;
        validate_invoice_number(invoice_number)?;
        validate_payment_amount(request.total())?;

        let push = TerminalPush {
            device_id: device_id.trim().to_string(),
            amount: request.total(),
            invoice_number: invoice_number.to_string(),
        };
        let reference = self.client.push_payment(&push).await?;

        info!(reference = %reference, device_id = %push.device_id, "Terminal payment pending");
        Ok(PaymentOutcome::pending(reference))
    }

    async fn void(&self, provider_transaction_id: &str) -> PaymentResult<bool> {
        self.client.void(provider_transaction_id).await
    }

    async fn refund(&self, provider_transaction_id: &str, amount: Money) -> PaymentResult<bool> {
        self.client.refund(provider_transaction_id, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentError;
    use crate::testing::StubTerminal;
    use tender_core::OutcomeStatus;

    fn terminal_request(device_id: &str, invoice: Option<&str>) -> PaymentRequest {
        PaymentRequest {
            instrument: PaymentInstrument::CardTerminal {
                device_id: device_id.into(),
            },
            amount: Money::from_cents(2_000),
            tax: Money::from_cents(150),
            surcharge: Money::from_cents(65),
            customer_ref: None,
            invoice_number: invoice.map(str::to_string),
            line_items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_push_returns_pending_reference() {
        let terminal = Arc::new(StubTerminal::new());
        let adapter = TerminalAdapter::new(terminal.clone());

        let outcome = adapter
            .authorize(&terminal_request("EPI-0042", Some("2610180001")))
            .await
            .unwrap();
        assert_eq!(outcome.status, OutcomeStatus::Pending);
        assert!(!outcome.is_settled());

        let pushes = terminal.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].amount, Money::from_cents(2_215));
        assert_eq!(outcome.provider_transaction_id.as_deref(), Some("ref-1"));
    }

    #[tokio::test]
    async fn test_missing_device_fails_before_push() {
        let terminal = Arc::new(StubTerminal::new());
        let adapter = TerminalAdapter::new(terminal.clone());

        let err = adapter
            .authorize(&terminal_request("  ", Some("2610180001")))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));

        let err = adapter.authorize(&terminal_request("EPI-1", None)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(ValidationError::Required { .. })));
        assert!(terminal.pushes().is_empty());
    }
}
