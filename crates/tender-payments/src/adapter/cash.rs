//! Cash tender. No network, always approved once the cash covers the total.

use async_trait::async_trait;
use tracing::debug;

use super::{instrument_mismatch, PaymentAdapter};
use crate::error::PaymentResult;
use tender_core::{Money, PaymentInstrument, PaymentMethod, PaymentOutcome, PaymentRequest, ValidationError};

pub struct CashAdapter;

impl CashAdapter {
    /// Change owed for a request, or `InsufficientCash`.
    pub fn change_due(request: &PaymentRequest) -> PaymentResult<Money> {
        let PaymentInstrument::Cash { cash_received_cents } = request.instrument else {
            return Err(instrument_mismatch(PaymentMethod::Cash));
        };
        let total = request.total();
        if cash_received_cents < total.cents() {
            return Err(ValidationError::InsufficientCash {
                received: cash_received_cents,
                total: total.cents(),
            }
            .into());
        }
        Ok(Money::from_cents(cash_received_cents) - total)
    }
}

#[async_trait]
impl PaymentAdapter for CashAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Cash
    }

    async fn authorize(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        let change = Self::change_due(request)?;
        debug!(total = %request.total(), change = %change, "Cash tender accepted");
        Ok(PaymentOutcome::approved(None, format!("Cash accepted, change {}", change)))
    }

    async fn void(&self, _provider_transaction_id: &str) -> PaymentResult<bool> {
        Ok(true)
    }

    async fn refund(&self, _provider_transaction_id: &str, _amount: Money) -> PaymentResult<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentError;

    fn cash_request(received: i64, subtotal: i64, tax: i64) -> PaymentRequest {
        PaymentRequest {
            instrument: PaymentInstrument::Cash {
                cash_received_cents: received,
            },
            amount: Money::from_cents(subtotal),
            tax: Money::from_cents(tax),
            surcharge: Money::zero(),
            customer_ref: None,
            invoice_number: None,
            line_items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_cash_covers_total() {
        let request = cash_request(12_000, 10_000, 750);
        let outcome = CashAdapter.authorize(&request).await.unwrap();
        assert!(outcome.is_settled());
        assert_eq!(outcome.provider_transaction_id, None);
        assert_eq!(CashAdapter::change_due(&request).unwrap(), Money::from_cents(1_250));
    }

    #[tokio::test]
    async fn test_exact_cash_is_enough() {
        let request = cash_request(10_750, 10_000, 750);
        assert_eq!(CashAdapter::change_due(&request).unwrap(), Money::zero());
    }

    #[tokio::test]
    async fn test_short_cash_is_validation_error() {
        for received in [0, 1, 10_749] {
            let err = CashAdapter
                .authorize(&cash_request(received, 10_000, 750))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                PaymentError::Validation(ValidationError::InsufficientCash { .. })
            ));
            assert!(err.is_retry_safe());
        }
    }
}
