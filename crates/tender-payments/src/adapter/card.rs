//! Keyed card and reader-tokenized card adapters.
//!
//! Both charge through the gateway in one authorize+capture call. Keyed
//! cards are checked locally first; reader tokens are forwarded untouched.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{gateway_refund, gateway_void, instrument_mismatch, PaymentAdapter};
use crate::error::PaymentResult;
use crate::gateway::{GatewayCharge, GatewayClient, GatewayPayment};
use tender_core::validation::{detect_card_brand, validate_card, validate_payment_amount};
use tender_core::{Money, PaymentInstrument, PaymentMethod, PaymentOutcome, PaymentRequest, ValidationError};

// =============================================================================
// Keyed Card
// =============================================================================

pub struct CardManualAdapter {
    gateway: Arc<dyn GatewayClient>,
}

impl CardManualAdapter {
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        CardManualAdapter { gateway }
    }
}

#[async_trait]
impl PaymentAdapter for CardManualAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CardManual
    }

    async fn authorize(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        let PaymentInstrument::CardManual(card) = &request.instrument else {
            return Err(instrument_mismatch(self.method()));
        };
        validate_card(card)?;
        validate_payment_amount(request.total())?;

        let charge = GatewayCharge::from_request(request, GatewayPayment::Card(card));
        let mut outcome = self.gateway.charge(&charge).await?.into_outcome()?;

        if outcome.card_last4.is_none() {
            outcome.card_last4 = Some(card.last4());
        }
        if outcome.card_brand.is_none() {
            outcome.card_brand = detect_card_brand(&card.number).map(str::to_string);
        }

        info!(
            transaction_id = ?outcome.provider_transaction_id,
            under_review = outcome.under_review,
            "Keyed card charged"
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

// =============================================================================
// Reader Token
// =============================================================================

pub struct CardReaderAdapter {
    gateway: Arc<dyn GatewayClient>,
}

impl CardReaderAdapter {
    pub fn new(gateway: Arc<dyn GatewayClient>) -> Self {
        CardReaderAdapter { gateway }
    }
}

#[async_trait]
impl PaymentAdapter for CardReaderAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CardReaderToken
    }

    async fn authorize(&self, request: &PaymentRequest) -> PaymentResult<PaymentOutcome> {
        let PaymentInstrument::CardReaderToken(opaque) = &request.instrument else {
            return Err(instrument_mismatch(self.method()));
        };
        if opaque.descriptor.trim().is_empty() || opaque.value.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "opaque_data".to_string(),
            }
            .into());
        }
        validate_payment_amount(request.total())?;

        let charge = GatewayCharge::from_request(request, GatewayPayment::Opaque(opaque));
        let outcome = self.gateway.charge(&charge).await?.into_outcome()?;

        info!(
            transaction_id = ?outcome.provider_transaction_id,
            under_review = outcome.under_review,
            "Reader card charged"
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
