//! # Order Repository
//!
//! Orders created for terminal sales and the settlements matched to them.
//!
//! ## Settlement Transaction
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  settle(order_id, settlement)                                           │
//! │                                                                         │
//! │  ┌─────────────────── SINGLE TRANSACTION ────────────────────┐         │
//! │  │ 1. txn id already in order_payments?                       │         │
//! │  │      same order  ──► AlreadyRecorded                       │         │
//! │  │      other order ──► DuplicateTransaction                  │         │
//! │  │ 2. order not OPEN ──► NotOpen(status)                      │         │
//! │  │ 3. INSERT order_payments (UNIQUE txn id, UNIQUE order id)  │         │
//! │  │ 4. UPDATE orders SET status='paid' WHERE status='open'     │         │
//! │  │ 5. UPDATE sales pending ──► completed                      │         │
//! │  └────────────────────────────────────────────────────────────┘         │
//! │                                                                         │
//! │  A UNIQUE violation in step 3 means another writer won the race:       │
//! │  rollback and report AlreadyRecorded.                                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use tender_core::{Order, OrderStatus, Payment, PaymentStatus, SaleStatus};

const ORDER_COLUMNS: &str =
    "id, invoice_number, amount_cents, status, lane_id, created_by, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, order_id, provider_transaction_id, auth_code, status, \
    amount_cents, settled_at, created_at";

/// Fields the caller supplies for a new OPEN order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub invoice_number: String,
    pub amount_cents: i64,
    pub lane_id: String,
    pub created_by: String,
}

/// A provider-side transaction matched to an order.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub provider_transaction_id: String,
    pub auth_code: Option<String>,
    pub amount_cents: i64,
    pub settled_at: DateTime<Utc>,
}

/// Keyset position in the `(created_at, id)` order of OPEN orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCursor {
    pub created_at: DateTime<Utc>,
    pub id: String,
}

impl From<&Order> for OrderCursor {
    fn from(order: &Order) -> Self {
        OrderCursor {
            created_at: order.created_at,
            id: order.id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// Payment row created and the order moved to PAID.
    Settled(Payment),
    /// This exact settlement was already applied to this order.
    AlreadyRecorded,
    /// The order is no longer OPEN.
    NotOpen(OrderStatus),
    /// The transaction id is already settled against a different order.
    DuplicateTransaction { existing_order_id: String },
}

/// Repository for orders and their payments.
#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OrderRepository { pool }
    }

    /// Inserts an OPEN order.
    ///
    /// Fails with `UniqueViolation` on an invoice number collision.
    pub async fn create_open(&self, new: &NewOrder) -> DbResult<Order> {
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            invoice_number: new.invoice_number.clone(),
            amount_cents: new.amount_cents,
            status: OrderStatus::Open,
            lane_id: new.lane_id.clone(),
            created_by: new.created_by.clone(),
            created_at: now,
            updated_at: now,
        };

        debug!(order_id = %order.id, invoice_number = %order.invoice_number, "Creating order");

        sqlx::query(
            r#"
            INSERT INTO orders (
                id, invoice_number, amount_cents, status, lane_id, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&order.id)
        .bind(&order.invoice_number)
        .bind(order.amount_cents)
        .bind(order.status)
        .bind(&order.lane_id)
        .bind(&order.created_by)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(order)
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLUMNS);
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    pub async fn get_by_invoice(&self, invoice_number: &str) -> DbResult<Option<Order>> {
        let sql = format!("SELECT {} FROM orders WHERE invoice_number = ?1", ORDER_COLUMNS);
        let order = sqlx::query_as::<_, Order>(&sql)
            .bind(invoice_number)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    /// Orders in `status`, oldest first.
    pub async fn list_by_status(&self, status: OrderStatus, limit: i64) -> DbResult<Vec<Order>> {
        let sql = format!(
            "SELECT {} FROM orders WHERE status = ?1 ORDER BY created_at ASC, id ASC LIMIT ?2",
            ORDER_COLUMNS
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(status)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    /// OPEN orders, oldest first.
    pub async fn list_open(&self, limit: i64) -> DbResult<Vec<Order>> {
        self.list_by_status(OrderStatus::Open, limit).await
    }

    /// The next page of OPEN orders strictly after `cursor`, oldest first.
    /// `None` starts from the oldest.
    pub async fn list_open_after(&self, cursor: Option<&OrderCursor>, limit: i64) -> DbResult<Vec<Order>> {
        let Some(cursor) = cursor else {
            return self.list_open(limit).await;
        };

        let sql = format!(
            "SELECT {} FROM orders \
             WHERE status = ?1 AND (created_at > ?2 OR (created_at = ?2 AND id > ?3)) \
             ORDER BY created_at ASC, id ASC LIMIT ?4",
            ORDER_COLUMNS
        );
        let orders = sqlx::query_as::<_, Order>(&sql)
            .bind(OrderStatus::Open)
            .bind(cursor.created_at)
            .bind(&cursor.id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    pub async fn count_by_status(&self, status: OrderStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn payment_for_order(&self, order_id: &str) -> DbResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM order_payments WHERE order_id = ?1", PAYMENT_COLUMNS);
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    pub async fn payment_by_transaction(&self, provider_transaction_id: &str) -> DbResult<Option<Payment>> {
        let sql = format!(
            "SELECT {} FROM order_payments WHERE provider_transaction_id = ?1",
            PAYMENT_COLUMNS
        );
        let payment = sqlx::query_as::<_, Payment>(&sql)
            .bind(provider_transaction_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// Records a settlement and moves the order OPEN → PAID, at most once.
    pub async fn settle(&self, order_id: &str, settlement: &Settlement) -> DbResult<SettleOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<String> =
            sqlx::query_scalar("SELECT order_id FROM order_payments WHERE provider_transaction_id = ?1")
                .bind(&settlement.provider_transaction_id)
                .fetch_optional(&mut *tx)
                .await?;

        if let Some(existing_order_id) = existing {
            tx.rollback().await?;
            return Ok(if existing_order_id == order_id {
                SettleOutcome::AlreadyRecorded
            } else {
                SettleOutcome::DuplicateTransaction { existing_order_id }
            });
        }

        let status: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = ?1")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await?;

        let status = match status {
            Some(s) => s,
            None => {
                tx.rollback().await?;
                return Err(DbError::not_found("Order", order_id));
            }
        };

        if status != OrderStatus::Open {
            tx.rollback().await?;
            return Ok(SettleOutcome::NotOpen(status));
        }

        let now = Utc::now();
        let payment = Payment {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.to_string(),
            provider_transaction_id: settlement.provider_transaction_id.clone(),
            auth_code: settlement.auth_code.clone(),
            status: PaymentStatus::Captured,
            amount_cents: settlement.amount_cents,
            settled_at: Some(settlement.settled_at),
            created_at: now,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO order_payments (
                id, order_id, provider_transaction_id, auth_code, status,
                amount_cents, settled_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.order_id)
        .bind(&payment.provider_transaction_id)
        .bind(&payment.auth_code)
        .bind(payment.status)
        .bind(payment.amount_cents)
        .bind(payment.settled_at)
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(DbError::from);

        match inserted {
            Ok(_) => {}
            Err(e) if e.is_unique_violation() => {
                tx.rollback().await?;
                warn!(order_id, provider_transaction_id = %settlement.provider_transaction_id,
                    "Settlement raced with another writer");
                return Ok(SettleOutcome::AlreadyRecorded);
            }
            Err(e) => return Err(e),
        }

        let updated = sqlx::query(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(OrderStatus::Paid)
        .bind(now)
        .bind(order_id)
        .bind(OrderStatus::Open)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SettleOutcome::NotOpen(status));
        }

        sqlx::query(
            r#"
            UPDATE sales
            SET status = ?1, updated_at = ?2, completed_at = ?2
            WHERE order_id = ?3 AND status = ?4
            "#,
        )
        .bind(SaleStatus::Completed)
        .bind(now)
        .bind(order_id)
        .bind(SaleStatus::Pending)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE sale_tenders
            SET provider_transaction_id = ?1, auth_code = COALESCE(?2, auth_code)
            WHERE provider_transaction_id IS NULL
              AND sale_id IN (SELECT id FROM sales WHERE order_id = ?3)
            "#,
        )
        .bind(&settlement.provider_transaction_id)
        .bind(&settlement.auth_code)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            order_id,
            provider_transaction_id = %payment.provider_transaction_id,
            amount_cents = payment.amount_cents,
            "Order settled"
        );
        Ok(SettleOutcome::Settled(payment))
    }

    /// OPEN → DECLINED, with its pending sale. Returns false if the order
    /// was not OPEN.
    pub async fn mark_declined(&self, order_id: &str) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(OrderStatus::Declined)
        .bind(now)
        .bind(order_id)
        .bind(OrderStatus::Open)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE sales SET status = ?1, updated_at = ?2 WHERE order_id = ?3 AND status = ?4")
            .bind(SaleStatus::Declined)
            .bind(now)
            .bind(order_id)
            .bind(SaleStatus::Pending)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(order_id, "Order declined");
        Ok(true)
    }

    /// PAID → VOIDED. Returns false if the order was not PAID.
    pub async fn mark_voided(&self, order_id: &str) -> DbResult<bool> {
        self.close_paid(order_id, OrderStatus::Voided, PaymentStatus::Voided, SaleStatus::Voided)
            .await
    }

    /// PAID → REFUNDED. Returns false if the order was not PAID.
    pub async fn mark_refunded(&self, order_id: &str) -> DbResult<bool> {
        self.close_paid(
            order_id,
            OrderStatus::Refunded,
            PaymentStatus::Refunded,
            SaleStatus::Refunded,
        )
        .await
    }

    async fn close_paid(
        &self,
        order_id: &str,
        order_status: OrderStatus,
        payment_status: PaymentStatus,
        sale_status: SaleStatus,
    ) -> DbResult<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE orders SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(order_status)
        .bind(now)
        .bind(order_id)
        .bind(OrderStatus::Paid)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE order_payments SET status = ?1 WHERE order_id = ?2")
            .bind(payment_status)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE sales SET status = ?1, updated_at = ?2 WHERE order_id = ?3")
            .bind(sale_status)
            .bind(now)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(order_id, status = %order_status, "Order closed");
        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
