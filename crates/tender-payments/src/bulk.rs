//! # Bulk Charge Aggregator
//!
//! Charges a list of accounting documents (invoices, sales orders) against
//! one stored payment profile, one gateway transaction per document.
//!
//! ## Per-Document Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  for each document (sequential, isolated)                               │
//! │    1. validate document id + amount                                     │
//! │    2. surcharge_for(method, amount)        card: 3%, ACH: none          │
//! │    3. stored profile adapter.authorize()                                │
//! │          ├── Err ──────────────► errors[]                  continue     │
//! │          ├── held for review ──► under_review[]                         │
//! │          └── approved ─────────► results[]                              │
//! │    4. invoice_payments.insert(record)                                   │
//! │    5. settled? accounting.record_payment()                              │
//! │          └── failure ──► zohoPaymentRecorded = false + warning          │
//! │                          (charge stands, worker retries the record)     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Outcome
//!
//! | settled | under review | failed | outcome                 |
//! |---------|--------------|--------|-------------------------|
//! | ≥1      | 0            | 0      | `success`               |
//! | ≥1      | ≥1           | 0      | `success_with_review`   |
//! | 0       | ≥1           | 0      | `needs_manual_approval` |
//! | ≥1      | any          | ≥1     | `partial_failure`       |
//! | 0       | ≥1           | ≥1     | `partial_failure`       |
//! | 0       | 0            | ≥1     | `failed`                |
//!
//! Under-review charges are never counted as failures, and never as
//! successes: the funds are not guaranteed.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::accounting::{AccountingClient, AccountingPayment};
use crate::adapter::PaymentAdapter;
use crate::error::{ErrorKind, PaymentError, PaymentResult};
use tender_core::validation::validate_payment_amount;
use tender_core::{
    DocumentType, FeeCalculator, InvoicePaymentRecord, Money, PaymentInstrument, PaymentMethod,
    PaymentOutcome, PaymentRequest, StoredPaymentProfile, ValidationError, MAX_BULK_DOCUMENTS,
};
use tender_db::{Database, RecordOutcome};

/// Gateway limit on the invoice number field.
const GATEWAY_INVOICE_MAX: usize = 20;

// =============================================================================
// Request
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    #[default]
    Card,
    Ach,
}

impl ProfileKind {
    pub const fn method(&self) -> PaymentMethod {
        match self {
            ProfileKind::Card => PaymentMethod::CardStoredProfile,
            ProfileKind::Ach => PaymentMethod::AchStoredProfile,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkDocument {
    pub document_type: DocumentType,
    pub document_id: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkChargeRequest {
    pub customer_ref: String,
    pub profile: StoredPaymentProfile,
    #[serde(default)]
    pub profile_kind: ProfileKind,
    pub documents: Vec<BulkDocument>,
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    pub document_type: DocumentType,
    pub document_id: String,
    pub amount: Money,
    /// Amount plus surcharge.
    pub amount_charged: Money,
    pub cc_fee: Money,
    pub transaction_id: String,
    pub auth_code: Option<String>,
    pub card_last4: Option<String>,
    pub under_review: bool,
    pub zoho_payment_recorded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemError {
    pub document_type: DocumentType,
    pub document_id: String,
    pub amount: Money,
    pub kind: ErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub under_review: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOutcome {
    Success,
    SuccessWithReview,
    NeedsManualApproval,
    /// Some documents were charged or held, others failed.
    PartialFailure,
    Failed,
}

impl BulkOutcome {
    pub fn classify(summary: &BulkSummary) -> Self {
        match (summary.successful, summary.under_review, summary.failed) {
            (0, 0, _) => BulkOutcome::Failed,
            (_, _, failed) if failed > 0 => BulkOutcome::PartialFailure,
            (0, _, _) => BulkOutcome::NeedsManualApproval,
            (_, 0, _) => BulkOutcome::Success,
            _ => BulkOutcome::SuccessWithReview,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkChargeReport {
    pub outcome: BulkOutcome,
    pub message: String,
    /// Settled charges only.
    pub results: Vec<BulkItemResult>,
    pub under_review: Vec<BulkItemResult>,
    pub errors: Vec<BulkItemError>,
    pub summary: BulkSummary,
}

impl BulkChargeReport {
    fn new(total: usize) -> Self {
        BulkChargeReport {
            outcome: BulkOutcome::Failed,
            message: String::new(),
            results: Vec::new(),
            under_review: Vec::new(),
            errors: Vec::new(),
            summary: BulkSummary {
                total,
                ..BulkSummary::default()
            },
        }
    }

    fn finish(mut self) -> Self {
        self.summary.successful = self.results.len();
        self.summary.under_review = self.under_review.len();
        self.summary.failed = self.errors.len();
        self.outcome = BulkOutcome::classify(&self.summary);

        let ids = |items: &[BulkItemResult]| {
            items
                .iter()
                .map(|r| r.transaction_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };

        let message = match self.outcome {
            BulkOutcome::Success => format!(
                "Charged {} document(s). Transaction IDs: {}",
                self.summary.successful,
                ids(&self.results)
            ),
            BulkOutcome::SuccessWithReview => format!(
                "Charged {} document(s). Transaction IDs: {}. {} charge(s) held for review: {}",
                self.summary.successful,
                ids(&self.results),
                self.summary.under_review,
                ids(&self.under_review)
            ),
            BulkOutcome::NeedsManualApproval => format!(
                "{} charge(s) held for review and need manual approval in the gateway: {}",
                self.summary.under_review,
                ids(&self.under_review)
            ),
            BulkOutcome::PartialFailure => {
                let mut message = format!(
                    "{} of {} document(s) failed",
                    self.summary.failed, self.summary.total
                );
                if self.summary.successful > 0 {
                    message.push_str(&format!(
                        ". Charged {} document(s). Transaction IDs: {}",
                        self.summary.successful,
                        ids(&self.results)
                    ));
                }
                if self.summary.under_review > 0 {
                    message.push_str(&format!(
                        ". {} charge(s) held for review: {}",
                        self.summary.under_review,
                        ids(&self.under_review)
                    ));
                }
                message
            }
            BulkOutcome::Failed => "No documents were charged".to_string(),
        };
        self.message = message;
        self
    }
}

// =============================================================================
// Aggregator
// =============================================================================

pub struct BulkCharger {
    db: Database,
    card: Arc<dyn PaymentAdapter>,
    ach: Arc<dyn PaymentAdapter>,
    fees: FeeCalculator,
    accounting: Option<Arc<dyn AccountingClient>>,
}

impl BulkCharger {
    pub fn new(
        db: Database,
        card: Arc<dyn PaymentAdapter>,
        ach: Arc<dyn PaymentAdapter>,
        fees: FeeCalculator,
        accounting: Option<Arc<dyn AccountingClient>>,
    ) -> Self {
        BulkCharger {
            db,
            card,
            ach,
            fees,
            accounting,
        }
    }

    /// Charges every document. Only a malformed batch fails as a whole;
    /// per-document failures land in `errors`.
    pub async fn charge(&self, request: &BulkChargeRequest) -> PaymentResult<BulkChargeReport> {
        if request.documents.is_empty() {
            return Err(ValidationError::Required {
                field: "documents".to_string(),
            }
            .into());
        }
        if request.documents.len() > MAX_BULK_DOCUMENTS {
            return Err(ValidationError::OutOfRange {
                field: "documents".to_string(),
                min: 1,
                max: MAX_BULK_DOCUMENTS as i64,
            }
            .into());
        }
        if request.customer_ref.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "customer_ref".to_string(),
            }
            .into());
        }

        info!(
            customer_ref = %request.customer_ref,
            count = request.documents.len(),
            method = %request.profile_kind.method(),
            "Bulk charge starting"
        );

        let mut report = BulkChargeReport::new(request.documents.len());

        for document in &request.documents {
            match self.charge_one(request, document).await {
                Ok(item) if item.under_review => report.under_review.push(item),
                Ok(item) => report.results.push(item),
                Err(e) => {
                    warn!(?e, document_id = %document.document_id, "Document charge failed");
                    report.errors.push(BulkItemError {
                        document_type: document.document_type,
                        document_id: document.document_id.clone(),
                        amount: Money::from_cents(document.amount_cents),
                        kind: e.kind(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let report = report.finish();
        info!(
            customer_ref = %request.customer_ref,
            outcome = ?report.outcome,
            successful = report.summary.successful,
            under_review = report.summary.under_review,
            failed = report.summary.failed,
            "Bulk charge finished"
        );
        Ok(report)
    }

    async fn charge_one(
        &self,
        request: &BulkChargeRequest,
        document: &BulkDocument,
    ) -> PaymentResult<BulkItemResult> {
        if document.document_id.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "document_id".to_string(),
            }
            .into());
        }
        let amount = Money::from_cents(document.amount_cents);
        validate_payment_amount(amount)?;

        let method = request.profile_kind.method();
        let surcharge = self.fees.surcharge_for(method, amount);
        let (adapter, instrument) = match request.profile_kind {
            ProfileKind::Card => (&self.card, PaymentInstrument::CardStoredProfile(request.profile.clone())),
            ProfileKind::Ach => (&self.ach, PaymentInstrument::AchStoredProfile(request.profile.clone())),
        };

        let payment = PaymentRequest {
            instrument,
            amount,
            tax: Money::zero(),
            surcharge,
            customer_ref: Some(request.customer_ref.clone()),
            invoice_number: Some(document.document_id.chars().take(GATEWAY_INVOICE_MAX).collect()),
            line_items: Vec::new(),
        };

        let outcome = adapter.authorize(&payment).await?;
        let transaction_id = outcome
            .provider_transaction_id
            .clone()
            .ok_or_else(|| PaymentError::gateway("gateway accepted the charge without a transaction id"))?;

        let mut item = BulkItemResult {
            document_type: document.document_type,
            document_id: document.document_id.clone(),
            amount,
            amount_charged: payment.total(),
            cc_fee: surcharge,
            transaction_id,
            auth_code: outcome.auth_code.clone(),
            card_last4: outcome.card_last4.clone(),
            under_review: outcome.under_review,
            zoho_payment_recorded: false,
            warning: None,
        };

        self.save_record(request, &item).await;

        if outcome.is_settled() {
            self.record_in_accounting(request, &mut item, &outcome).await;
        }

        Ok(item)
    }

    /// The charge already happened; a failed write is logged, not raised.
    async fn save_record(&self, request: &BulkChargeRequest, item: &BulkItemResult) {
        let record = InvoicePaymentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            customer_ref: request.customer_ref.clone(),
            document_type: item.document_type,
            document_id: item.document_id.clone(),
            amount_cents: item.amount.cents(),
            amount_charged_cents: item.amount_charged.cents(),
            cc_fee_cents: item.cc_fee.cents(),
            transaction_id: item.transaction_id.clone(),
            under_review: item.under_review,
            recorded_in_accounting: false,
            card_last4: item.card_last4.clone(),
            created_at: Utc::now(),
        };

        match self.db.invoice_payments().insert(&record).await {
            Ok(RecordOutcome::Recorded) => {}
            Ok(RecordOutcome::AlreadyRecorded) => {
                warn!(transaction_id = %item.transaction_id, "Invoice payment already recorded");
            }
            Err(e) => {
                error!(?e, document_id = %item.document_id, transaction_id = %item.transaction_id,
                    "Charge captured but invoice payment record failed");
            }
        }
    }

    async fn record_in_accounting(
        &self,
        request: &BulkChargeRequest,
        item: &mut BulkItemResult,
        outcome: &PaymentOutcome,
    ) {
        let Some(accounting) = &self.accounting else {
            return;
        };

        let payment = AccountingPayment {
            customer_ref: request.customer_ref.clone(),
            document_type: item.document_type,
            document_id: item.document_id.clone(),
            amount: item.amount,
            transaction_id: item.transaction_id.clone(),
        };

        match accounting.record_payment(&payment).await {
            Ok(()) => {
                item.zoho_payment_recorded = true;
                if let Err(e) = self.db.invoice_payments().mark_recorded(&item.transaction_id).await {
                    warn!(?e, transaction_id = %item.transaction_id, "Failed to flag accounting record");
                }
            }
            Err(e) => {
                warn!(
                    ?e,
                    document_id = %item.document_id,
                    transaction_id = ?outcome.provider_transaction_id,
                    "Charge captured but accounting record failed"
                );
                item.warning = Some(format!(
                    "Payment charged but not recorded in the accounting system: {}",
                    e
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StoredProfileAdapter;
    use crate::testing::{Scripted, StubAccounting, StubGateway};
    use tender_db::DbConfig;

    async fn charger(
        gateway: Arc<StubGateway>,
        accounting: Option<Arc<dyn AccountingClient>>,
    ) -> (BulkCharger, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let charger = BulkCharger::new(
            db.clone(),
            Arc::new(StoredProfileAdapter::card(gateway.clone())),
            Arc::new(StoredProfileAdapter::ach(gateway)),
            FeeCalculator::default(),
            accounting,
        );
        (charger, db)
    }

    fn request(kind: ProfileKind, amounts: &[i64]) -> BulkChargeRequest {
        BulkChargeRequest {
            customer_ref: "CUST-77".to_string(),
            profile: StoredPaymentProfile {
                customer_profile_id: "900100".to_string(),
                payment_profile_id: "900200".to_string(),
            },
            profile_kind: kind,
            documents: amounts
                .iter()
                .enumerate()
                .map(|(i, cents)| BulkDocument {
                    document_type: DocumentType::Invoice,
                    document_id: format!("INV-{:03}", i + 1),
                    amount_cents: *cents,
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_rest() {
        let gateway = Arc::new(StubGateway::scripted(vec![
            Scripted::Approve,
            Scripted::Decline("The credit card has expired."),
            Scripted::Approve,
        ]));
        let (charger, _db) = charger(gateway.clone(), None).await;

        let report = charger
            .charge(&request(ProfileKind::Card, &[1_000, 2_000, 3_000]))
            .await
            .unwrap();

        assert_eq!(report.summary.successful, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.outcome, BulkOutcome::PartialFailure);
        assert!(report.message.starts_with("1 of 3 document(s) failed"));
        assert_eq!(report.errors[0].document_id, "INV-002");
        assert_eq!(report.errors[0].kind, ErrorKind::Declined);
        assert_eq!(gateway.charge_count(), 3);
    }

    #[tokio::test]
    async fn test_under_review_is_neither_success_nor_failure() {
        let gateway = Arc::new(StubGateway::scripted(vec![Scripted::Approve, Scripted::Review]));
        let (charger, db) = charger(gateway, None).await;

        let report = charger
            .charge(&request(ProfileKind::Card, &[5_000, 7_500]))
            .await
            .unwrap();

        assert_eq!(report.summary.successful, 1);
        assert_eq!(report.summary.failed, 0);
        assert_eq!(report.under_review.len(), 1);
        assert_eq!(report.outcome, BulkOutcome::SuccessWithReview);
        assert!(report.message.contains("held for review"));

        let held = db
            .invoice_payments()
            .get_by_transaction(&report.under_review[0].transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert!(held.under_review);
    }

    #[tokio::test]
    async fn test_all_under_review_needs_manual_approval() {
        let gateway = Arc::new(StubGateway::scripted(vec![Scripted::Review, Scripted::Review]));
        let (charger, _db) = charger(gateway, None).await;

        let report = charger
            .charge(&request(ProfileKind::Card, &[5_000, 7_500]))
            .await
            .unwrap();
        assert_eq!(report.outcome, BulkOutcome::NeedsManualApproval);
        assert!(report.results.is_empty());
    }

    #[tokio::test]
    async fn test_surcharge_per_document() {
        let gateway = Arc::new(StubGateway::approving());
        let (charger, db) = charger(gateway.clone(), None).await;

        let report = charger
            .charge(&request(ProfileKind::Card, &[5_000, 7_500]))
            .await
            .unwrap();

        assert_eq!(gateway.charged(), vec![Money::from_cents(5_150), Money::from_cents(7_725)]);
        assert_eq!(report.results[1].cc_fee, Money::from_cents(225));

        let record = db
            .invoice_payments()
            .get_by_transaction(&report.results[0].transaction_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.amount_cents, 5_000);
        assert_eq!(record.amount_charged_cents, 5_150);
        assert_eq!(record.cc_fee_cents, 150);
    }

    #[tokio::test]
    async fn test_ach_profile_has_no_surcharge() {
        let gateway = Arc::new(StubGateway::approving());
        let (charger, _db) = charger(gateway.clone(), None).await;

        charger.charge(&request(ProfileKind::Ach, &[5_000])).await.unwrap();
        assert_eq!(gateway.charged(), vec![Money::from_cents(5_000)]);
    }

    #[tokio::test]
    async fn test_accounting_failure_keeps_the_charge() {
        let gateway = Arc::new(StubGateway::approving());
        let accounting: Arc<dyn AccountingClient> = Arc::new(StubAccounting::failing());
        let (charger, db) = charger(gateway, Some(accounting)).await;

        let report = charger.charge(&request(ProfileKind::Card, &[5_000])).await.unwrap();

        let item = &report.results[0];
        assert!(!item.zoho_payment_recorded);
        assert!(item.warning.is_some());
        assert_eq!(report.outcome, BulkOutcome::Success);

        let pending = db.invoice_payments().list_unrecorded(10).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_accounting_success_marks_record() {
        let gateway = Arc::new(StubGateway::approving());
        let accounting = Arc::new(StubAccounting::new());
        let (charger, db) = charger(gateway, Some(accounting.clone() as Arc<dyn AccountingClient>)).await;

        let report = charger.charge(&request(ProfileKind::Card, &[5_000])).await.unwrap();

        assert!(report.results[0].zoho_payment_recorded);
        assert_eq!(accounting.recorded()[0].amount, Money::from_cents(5_000));
        assert!(db.invoice_payments().list_unrecorded(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_document_is_isolated() {
        let gateway = Arc::new(StubGateway::approving());
        let (charger, _db) = charger(gateway.clone(), None).await;

        let report = charger
            .charge(&request(ProfileKind::Card, &[5_000, 0]))
            .await
            .unwrap();
        assert_eq!(report.summary.successful, 1);
        assert_eq!(report.errors[0].kind, ErrorKind::Validation);
        assert_eq!(report.outcome, BulkOutcome::PartialFailure);
        assert_eq!(gateway.charge_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_limits() {
        let (charger, _db) = charger(Arc::new(StubGateway::approving()), None).await;

        let err = charger.charge(&request(ProfileKind::Card, &[])).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));

        let too_many = vec![100; MAX_BULK_DOCUMENTS + 1];
        let err = charger.charge(&request(ProfileKind::Card, &too_many)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(ValidationError::OutOfRange { .. })));
    }

    #[test]
    fn test_outcome_classification() {
        let summary = |successful, under_review, failed| BulkSummary {
            total: successful + under_review + failed,
            successful,
            failed,
            under_review,
        };
        assert_eq!(BulkOutcome::classify(&summary(3, 0, 0)), BulkOutcome::Success);
        assert_eq!(BulkOutcome::classify(&summary(1, 1, 0)), BulkOutcome::SuccessWithReview);
        assert_eq!(BulkOutcome::classify(&summary(0, 2, 0)), BulkOutcome::NeedsManualApproval);
        assert_eq!(BulkOutcome::classify(&summary(2, 0, 1)), BulkOutcome::PartialFailure);
        assert_eq!(BulkOutcome::classify(&summary(0, 1, 2)), BulkOutcome::PartialFailure);
        assert_eq!(BulkOutcome::classify(&summary(1, 1, 1)), BulkOutcome::PartialFailure);
        assert_eq!(BulkOutcome::classify(&summary(0, 0, 3)), BulkOutcome::Failed);
    }
}
