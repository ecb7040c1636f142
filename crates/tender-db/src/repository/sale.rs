//! # Sale Ledger Repository
//!
//! Persists a finalized transaction (sale + line items + tender) exactly
//! once per successful authorization.
//!
//! ## Write Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  approved (sync)      ──► record(status = completed)                   │
//! │  under review         ──► record(status = under_review)                │
//! │  terminal push        ──► record(status = pending, order_id = Some)    │
//! │                              └─ completed later by OrderRepository::settle │
//! │  declined / error     ──► nothing written                              │
//! │                                                                         │
//! │  ┌─────────────────── SINGLE TRANSACTION ────────────────────┐         │
//! │  │ INSERT sales                                               │         │
//! │  │ INSERT sale_items  (snapshot of each line)                 │         │
//! │  │ INSERT sale_tenders (UNIQUE provider_transaction_id)       │         │
//! │  └────────────────────────────────────────────────────────────┘         │
//! │  Tender id already present ──► rollback, AlreadyRecorded               │
//! │  Invoice number taken (record_renumbering) ──► new number, retry       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{generate_invoice_number, INVOICE_NUMBER_ATTEMPTS};
use crate::error::{DbError, DbResult};
use tender_core::{Sale, SaleItem, SaleStatus, SaleTender};

/// Everything the ledger writes for one sale.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub sale: Sale,
    pub items: Vec<SaleItem>,
    pub tenders: Vec<SaleTender>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    Recorded,
    /// A tender with the same provider transaction id already exists.
    AlreadyRecorded,
}

const SALE_COLUMNS: &str = "id, invoice_number, order_id, status, method, \
    subtotal_cents, tax_cents, surcharge_cents, total_cents, tax_exempt, \
    customer_ref, lane_id, created_by, created_at, updated_at, completed_at";

/// Sale ledger writer and reader.
#[derive(Debug, Clone)]
pub struct SaleLedgerRepository {
    pool: SqlitePool,
}

impl SaleLedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SaleLedgerRepository { pool }
    }

    /// Writes a sale with its items and tenders in one transaction.
    pub async fn record(&self, entry: &LedgerEntry) -> DbResult<LedgerWrite> {
        let sale = &entry.sale;
        debug!(
            sale_id = %sale.id,
            invoice_number = %sale.invoice_number,
            status = ?sale.status,
            "Recording sale"
        );

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, invoice_number, order_id, status, method,
                subtotal_cents, tax_cents, surcharge_cents, total_cents, tax_exempt,
                customer_ref, lane_id, created_by, created_at, updated_at, completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.invoice_number)
        .bind(&sale.order_id)
        .bind(sale.status)
        .bind(sale.method)
        .bind(sale.subtotal_cents)
        .bind(sale.tax_cents)
        .bind(sale.surcharge_cents)
        .bind(sale.total_cents)
        .bind(sale.tax_exempt)
        .bind(&sale.customer_ref)
        .bind(&sale.lane_id)
        .bind(&sale.created_by)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.completed_at)
        .execute(&mut *tx)
        .await?;

        for item in &entry.items {
            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    id, sale_id, item_id, name_snapshot, unit_price_cents,
                    quantity_milli, uom_multiplier_milli, line_total_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&item.id)
            .bind(&item.sale_id)
            .bind(&item.item_id)
            .bind(&item.name_snapshot)
            .bind(item.unit_price_cents)
            .bind(item.quantity_milli)
            .bind(item.uom_multiplier_milli)
            .bind(item.line_total_cents)
            .execute(&mut *tx)
            .await?;
        }

        for tender in &entry.tenders {
            let inserted = sqlx::query(
                r#"
                INSERT INTO sale_tenders (
                    id, sale_id, method, amount_cents, provider_transaction_id,
                    auth_code, card_last4, card_brand, change_cents, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&tender.id)
            .bind(&tender.sale_id)
            .bind(tender.method)
            .bind(tender.amount_cents)
            .bind(&tender.provider_transaction_id)
            .bind(&tender.auth_code)
            .bind(&tender.card_last4)
            .bind(&tender.card_brand)
            .bind(tender.change_cents)
            .bind(tender.created_at)
            .execute(&mut *tx)
            .await
            .map_err(DbError::from);

            match inserted {
                Ok(_) => {}
                Err(e) if e.is_unique_violation_on("provider_transaction_id") => {
                    tx.rollback().await?;
                    info!(
                        provider_transaction_id = ?tender.provider_transaction_id,
                        "Tender already recorded, skipping ledger write"
                    );
                    return Ok(LedgerWrite::AlreadyRecorded);
                }
                Err(e) => return Err(e),
            }
        }

        tx.commit().await?;

        info!(sale_id = %sale.id, total_cents = sale.total_cents, "Sale recorded");
        Ok(LedgerWrite::Recorded)
    }

    /// Like [`record`](Self::record), for a payment that is already
    /// captured. When a concurrent sale took the invoice number the entry
    /// gets a fresh one and the write is retried, so the caller reads the
    /// final number back from `entry`.
    pub async fn record_renumbering(&self, entry: &mut LedgerEntry) -> DbResult<LedgerWrite> {
        let mut attempt = 1;
        loop {
            match self.record(entry).await {
                Err(e) if e.is_unique_violation_on("invoice_number") && attempt < INVOICE_NUMBER_ATTEMPTS => {
                    let taken = std::mem::replace(&mut entry.sale.invoice_number, generate_invoice_number());
                    warn!(
                        taken = %taken,
                        invoice_number = %entry.sale.invoice_number,
                        "Invoice number taken after capture, renumbering"
                    );
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    pub async fn get_by_invoice(&self, invoice_number: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE invoice_number = ?1", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    /// The ledger sale created alongside a terminal order.
    pub async fn get_by_order(&self, order_id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE order_id = ?1", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    pub async fn get_items(&self, sale_id: &str) -> DbResult<Vec<SaleItem>> {
        let items = sqlx::query_as::<_, SaleItem>(
            r#"
            SELECT id, sale_id, item_id, name_snapshot, unit_price_cents,
                   quantity_milli, uom_multiplier_milli, line_total_cents
            FROM sale_items
            WHERE sale_id = ?1
            ORDER BY rowid
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    pub async fn get_tenders(&self, sale_id: &str) -> DbResult<Vec<SaleTender>> {
        let tenders = sqlx::query_as::<_, SaleTender>(
            r#"
            SELECT id, sale_id, method, amount_cents, provider_transaction_id,
                   auth_code, card_last4, card_brand, change_cents, created_at
            FROM sale_tenders
            WHERE sale_id = ?1
            ORDER BY created_at
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenders)
    }

    /// Finds the sale that already holds a provider transaction id.
    pub async fn find_by_transaction(&self, provider_transaction_id: &str) -> DbResult<Option<Sale>> {
        let sql = format!(
            "SELECT {} FROM sales WHERE id = \
             (SELECT sale_id FROM sale_tenders WHERE provider_transaction_id = ?1)",
            SALE_COLUMNS
        );
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(provider_transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(sale)
    }

    /// Moves a sale out of `from` into `to`. Returns false if it was not in `from`.
    pub async fn transition(&self, sale_id: &str, from: SaleStatus, to: SaleStatus) -> DbResult<bool> {
        let now = Utc::now();
        let completed_at = (to == SaleStatus::Completed).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE sales
            SET status = ?1, updated_at = ?2, completed_at = COALESCE(?3, completed_at)
            WHERE id = ?4 AND status = ?5
            "#,
        )
        .bind(to)
        .bind(now)
        .bind(completed_at)
        .bind(sale_id)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Generates a UUID for a ledger row.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use chrono::Utc;
    use tender_core::PaymentMethod;

    fn entry(invoice: &str, txn: Option<&str>, status: SaleStatus) -> LedgerEntry {
        let now = Utc::now();
        let sale_id = generate_id();
        LedgerEntry {
            sale: Sale {
                id: sale_id.clone(),
                invoice_number: invoice.to_string(),
                order_id: None,
                status,
                method: PaymentMethod::CardManual,
                subtotal_cents: 10_000,
                tax_cents: 750,
                surcharge_cents: 323,
                total_cents: 11_073,
                tax_exempt: false,
                customer_ref: Some("cust-1".to_string()),
                lane_id: "lane-1".to_string(),
                created_by: "cashier".to_string(),
                created_at: now,
                updated_at: now,
                completed_at: (status == SaleStatus::Completed).then_some(now),
            },
            items: vec![SaleItem {
                id: generate_id(),
                sale_id: sale_id.clone(),
                item_id: "item-1".to_string(),
                name_snapshot: "Widget".to_string(),
                unit_price_cents: 10_000,
                quantity_milli: 1_000,
                uom_multiplier_milli: 1_000,
                line_total_cents: 10_000,
            }],
            tenders: vec![SaleTender {
                id: generate_id(),
                sale_id,
                method: PaymentMethod::CardManual,
                amount_cents: 11_073,
                provider_transaction_id: txn.map(str::to_string),
                auth_code: Some("ABC123".to_string()),
                card_last4: Some("1111".to_string()),
                card_brand: Some("Visa".to_string()),
                change_cents: 0,
                created_at: now,
            }],
        }
    }

    #[tokio::test]
    async fn test_record_and_read_back() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let e = entry("2610180001", Some("txn-1"), SaleStatus::Completed);
        assert_eq!(repo.record(&e).await.unwrap(), LedgerWrite::Recorded);

        let sale = repo.get_by_id(&e.sale.id).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(sale.total_cents, 11_073);
        assert_eq!(sale.method, PaymentMethod::CardManual);

        assert_eq!(repo.get_items(&sale.id).await.unwrap().len(), 1);
        let tenders = repo.get_tenders(&sale.id).await.unwrap();
        assert_eq!(tenders[0].card_last4.as_deref(), Some("1111"));

        let found = repo.find_by_transaction("txn-1").await.unwrap().unwrap();
        assert_eq!(found.id, sale.id);
    }

    #[tokio::test]
    async fn test_duplicate_transaction_is_already_recorded() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let first = entry("2610180001", Some("txn-dup"), SaleStatus::Completed);
        let second = entry("2610180002", Some("txn-dup"), SaleStatus::Completed);

        assert_eq!(repo.record(&first).await.unwrap(), LedgerWrite::Recorded);
        assert_eq!(repo.record(&second).await.unwrap(), LedgerWrite::AlreadyRecorded);

        // Rolled back: the second sale row does not exist
        assert!(repo.get_by_id(&second.sale.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cash_tenders_without_transaction_ids_coexist() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        assert_eq!(
            repo.record(&entry("2610180001", None, SaleStatus::Completed)).await.unwrap(),
            LedgerWrite::Recorded
        );
        assert_eq!(
            repo.record(&entry("2610180002", None, SaleStatus::Completed)).await.unwrap(),
            LedgerWrite::Recorded
        );
    }

    #[tokio::test]
    async fn test_taken_invoice_number_is_renumbered() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();
        repo.record(&entry("2610180001", Some("txn-1"), SaleStatus::Completed))
            .await
            .unwrap();

        let mut late = entry("2610180001", Some("txn-2"), SaleStatus::Completed);
        let err = repo.record(&late).await.unwrap_err();
        assert!(err.is_unique_violation_on("invoice_number"));

        assert_eq!(repo.record_renumbering(&mut late).await.unwrap(), LedgerWrite::Recorded);
        assert_ne!(late.sale.invoice_number, "2610180001");

        let stored = repo.find_by_transaction("txn-2").await.unwrap().unwrap();
        assert_eq!(stored.id, late.sale.id);
        assert_eq!(stored.invoice_number, late.sale.invoice_number);
    }

    #[tokio::test]
    async fn test_transition_requires_expected_status() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.sales();

        let e = entry("2610180003", Some("txn-3"), SaleStatus::UnderReview);
        repo.record(&e).await.unwrap();

        assert!(!repo
            .transition(&e.sale.id, SaleStatus::Pending, SaleStatus::Completed)
            .await
            .unwrap());
        assert!(repo
            .transition(&e.sale.id, SaleStatus::UnderReview, SaleStatus::Completed)
            .await
            .unwrap());

        let sale = repo.get_by_id(&e.sale.id).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
        assert!(sale.completed_at.is_some());
    }
}
