//! Stored gateway profile charges (card or ACH). No card or bank data
//! passes through this adapter, only the profile id pair.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{gateway_refund, gateway_void, instrument_mismatch, PaymentAdapter};
use crate::error::PaymentResult;
use crate::gateway::{GatewayCharge, GatewayClient, GatewayPayment};
use tender_core::validation::validate_payment_amount;
use tender_core::{Money, PaymentInstrument, PaymentMethod, PaymentOutcome, PaymentRequest, ValidationError};

pub struct StoredProfileAdapter {
    method: PaymentMethod,
    gateway: Arc<dyn GatewayClient>,
}

impl StoredProfileAdapter {
    pub fn card(gateway: Arc<dyn GatewayClient>) -> Self {
        StoredProfileAdapter {
            method: PaymentMethod::CardStoredProfile,
            gateway,
        }
    }

    pub fn ach(gateway: Arc<dyn GatewayClient>) -> Self {
        StoredProfileAdapter {
            method: PaymentMethod::AchStoredProfile,
            gateway,
        }
    }
}

#[async_trait]
impl PaymentAdapter for StoredProfileAdapter {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn authorize(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        let profile = match (&request.instrument, self.method) {
            (PaymentInstrument::CardStoredProfile(p), PaymentMethod::CardStoredProfile)
            | (PaymentInstrument::AchStoredProfile(p), PaymentMethod::AchStoredProfile) => p,
            _ => return Err(instrument_mismatch(self.method)),
        };

        for (field, value) in [
            ("customer_profile_id", &profile.customer_profile_id),
            ("payment_profile_id", &profile.payment_profile_id),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::Required {
                    field: field.to_string(),
                }
                .into());
            }
        }
        validate_payment_amount(request.total())?;

        let charge = GatewayCharge::from_request(request, GatewayPayment::Profile(profile));
        let outcome = self.gateway.charge(&charge).await?.into_outcome()?;

        info!(
            method = %self.method,
            customer_profile_id = %profile.customer_profile_id,
            transaction_id = ?outcome.provider_transaction_id,
            under_review = outcome.under_review,
            "Stored profile charged"
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
