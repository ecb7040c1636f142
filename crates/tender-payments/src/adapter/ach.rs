//! One-off ACH debit from routing and account numbers.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{gateway_refund, gateway_void, instrument_mismatch, PaymentAdapter};
use crate::error::PaymentResult;
use crate::gateway::{GatewayCharge, GatewayClient, GatewayPayment};
use tender_core::validation::{validate_bank_account, validate_payment_amount};
use tender_core::{Money, PaymentInstrument, PaymentMethod, PaymentOutcome, PaymentRequest};

pub struct AchAdapter {
    gateway: Arc<dyn GatewayClient>,
}

impl AchAdapter {
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        AchAdapter { gateway }
    }
}

#[async_trait]
impl PaymentAdapter for AchAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Ach
    }

    async fn authorize(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        let PaymentInstrument::Ach(account) = &request.instrument else {
            return Err(instrument_mismatch(self.method()));
        };
        validate_bank_account(account)?;
        validate_payment_amount(request.total())?;

        let charge = GatewayCharge::from_request(request, GatewayPayment::Bank(account));
        let outcome = self.gateway.charge(&charge).await?.into_outcome()?;

        info!(
            account_type = account.account_type.as_str(),
            transaction_id = ?outcome.provider_transaction_id,
            under_review = outcome.under_review,
            "ACH debit submitted"
        );
        Ok(outcome)
    }

    async fn void(&self, provider_transaction_id: &str) -> PaymentResult<bool> {
        gateway_void(self.gateway.as_ref(), provider_transaction_id).await
    }

    async fn refund(&self, provider_transaction_id: &str, amount: Money) -> PaymentResult<bool> {
        gateway_refund(self.gateway.as_ref(), provider_transaction_id, amount).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PaymentError;
    use crate::testing::StubGateway;
    use tender_core::BankAccount;

    fn ach_request(routing: &str, account: &str) -> PaymentRequest {
        let bank: BankAccount = serde_json::from_value(serde_json::json!({
            "routingNumber": routing,
            "accountNumber": account,
            "accountType": "checking",
            "nameOnAccount": "Jane Doe"
        }))
        .unwrap();
        PaymentRequest {
            instrument: PaymentInstrument::Ach(bank),
            amount: Money::from_cents(25_000),
            tax: Money::zero(),
            surcharge: Money::zero(),
            customer_ref: None,
            invoice_number: None,
            line_items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_bank_details_checked_before_gateway() {
        let gateway = Arc::new(StubGateway::approving());
        let adapter = AchAdapter::new(gateway.clone());

        let too_long = "1".repeat(18);
        for (routing, account) in [
            ("12345678", "000123456"),
            ("123456789", "123"),
            ("123456789", too_long.as_str()),
        ] {
            let err = adapter.authorize(&ach_request(routing, account)).await.unwrap_err();
            assert!(matches!(err, PaymentError::Validation(_)));
        }
        assert_eq!(gateway.charge_count(), 0);

        let outcome = adapter.authorize(&ach_request("123456789", "000123456")).await.unwrap();
        assert!(outcome.is_settled());
        assert_eq!(gateway.charged(), vec![Money::from_cents(25_000)]);
    }
}
