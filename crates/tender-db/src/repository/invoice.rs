//! # Invoice Payment Repository
//!
//! Append-only records of documents charged by the bulk aggregator.
//! `transaction_id` is UNIQUE; inserting the same charge twice reports
//! [`RecordOutcome::AlreadyRecorded`].

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use tender_core::InvoicePaymentRecord;

const COLUMNS: &str = "id, customer_ref, document_type, document_id, amount_cents, \
    amount_charged_cents, cc_fee_cents, transaction_id, under_review, \
    recorded_in_accounting, card_last4, created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    AlreadyRecorded,
}

#[derive(Debug, Clone)]
pub struct InvoicePaymentRepository {
    pool: SqlitePool,
}

impl InvoicePaymentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        InvoicePaymentRepository { pool }
    }

    pub async fn insert(&self, record: &InvoicePaymentRecord) -> DbResult<RecordOutcome> {
        debug!(
            document_id = %record.document_id,
            transaction_id = %record.transaction_id,
            "Recording invoice payment"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO invoice_payments (
                id, customer_ref, document_type, document_id, amount_cents,
                amount_charged_cents, cc_fee_cents, transaction_id, under_review,
                recorded_in_accounting, card_last4, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&record.id)
        .bind(&record.customer_ref)
        .bind(record.document_type)
        .bind(&record.document_id)
        .bind(record.amount_cents)
        .bind(record.amount_charged_cents)
        .bind(record.cc_fee_cents)
        .bind(&record.transaction_id)
        .bind(record.under_review)
        .bind(record.recorded_in_accounting)
        .bind(&record.card_last4)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::from);

        match result {
            Ok(_) => Ok(RecordOutcome::Recorded),
            Err(e) if e.is_unique_violation_on("transaction_id") => {
                info!(transaction_id = %record.transaction_id, "Invoice payment already recorded");
                Ok(RecordOutcome::AlreadyRecorded)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_by_transaction(&self, transaction_id: &str) -> DbResult<Option<InvoicePaymentRecord>> {
        let sql = format!("SELECT {} FROM invoice_payments WHERE transaction_id = ?1", COLUMNS);
        let record = sqlx::query_as::<_, InvoicePaymentRecord>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Newest first.
    pub async fn list_for_customer(&self, customer_ref: &str, limit: i64) -> DbResult<Vec<InvoicePaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM invoice_payments WHERE customer_ref = ?1 \
             ORDER BY created_at DESC LIMIT ?2",
            COLUMNS
        );
        let records = sqlx::query_as::<_, InvoicePaymentRecord>(&sql)
            .bind(customer_ref)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Cleared charges whose accounting record is still missing.
    ///
    /// Held-for-review charges wait for an operator decision in the gateway
    /// and are left out.
    pub async fn list_unrecorded(&self, limit: i64) -> DbResult<Vec<InvoicePaymentRecord>> {
        let sql = format!(
            "SELECT {} FROM invoice_payments \
             WHERE recorded_in_accounting = 0 AND under_review = 0 \
             ORDER BY created_at ASC LIMIT ?1",
            COLUMNS
        );
        let records = sqlx::query_as::<_, InvoicePaymentRecord>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    pub async fn mark_recorded(&self, transaction_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE invoice_payments SET recorded_in_accounting = 1 WHERE transaction_id = ?1",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Utc;
    use tender_core::DocumentType;

    fn record(txn: &str) -> InvoicePaymentRecord {
        InvoicePaymentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            customer_ref: "cust-1".to_string(),
            document_type: DocumentType::Invoice,
            document_id: "INV-001".to_string(),
            amount_cents: 5_000,
            amount_charged_cents: 5_150,
            cc_fee_cents: 150,
            transaction_id: txn.to_string(),
            under_review: false,
            recorded_in_accounting: false,
            card_last4: Some("1111".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_on_transaction_id() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.invoice_payments();

        assert_eq!(repo.insert(&record("txn-1")).await.unwrap(), RecordOutcome::Recorded);
        assert_eq!(repo.insert(&record("txn-1")).await.unwrap(), RecordOutcome::AlreadyRecorded);
        assert_eq!(repo.list_for_customer("cust-1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_recorded() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.invoice_payments();
        repo.insert(&record("txn-1")).await.unwrap();

        assert_eq!(repo.list_unrecorded(10).await.unwrap().len(), 1);
        assert!(repo.mark_recorded("txn-1").await.unwrap());
        assert!(repo.list_unrecorded(10).await.unwrap().is_empty());

        let stored = repo.get_by_transaction("txn-1").await.unwrap().unwrap();
        assert!(stored.recorded_in_accounting);
        assert_eq!(stored.document_type, DocumentType::Invoice);
    }

    #[tokio::test]
    async fn test_unrecorded_skips_held_charges_before_limit() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.invoice_payments();
        for txn in ["held-1", "held-2", "held-3"] {
            repo.insert(&InvoicePaymentRecord {
                under_review: true,
                ..record(txn)
            })
            .await
            .unwrap();
        }
        repo.insert(&record("txn-cleared")).await.unwrap();

        let pending = repo.list_unrecorded(2).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].transaction_id, "txn-cleared");
    }
}
