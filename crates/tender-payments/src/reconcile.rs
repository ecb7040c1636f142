//! # Reconciliation Worker
//!
//! Matches provider-side settled transactions back to OPEN orders.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Reconciliation Cycle (every 12s)                     │
//! │                                                                         │
//! │  orders WHERE status = 'open' AND (created_at, id) > cursor             │
//! │        ORDER BY created_at, id LIMIT batch_size                         │
//! │        │   (a short page moves the cursor back to the oldest order)     │
//! │        ▼  per order                                                     │
//! │  terminal.find_settled(invoice_number)                                  │
//! │        │                                                                │
//! │        ├── none ─────────────────────────► unmatched, retry next cycle  │
//! │        ├── error ────────────────────────► counted, retry next cycle    │
//! │        ▼                                                                │
//! │  apply_settlement()                                                     │
//! │        ├── Settled          payment row + OPEN→PAID (one txn)           │
//! │        ├── AlreadyRecorded  live path got there first, no-op            │
//! │        └── Conflict         order not OPEN / txn on another order /     │
//! │                             approved after cancel → operator alert      │
//! │                                                                         │
//! │  then: invoice_payments WHERE recorded_in_accounting = 0                │
//! │        AND under_review = 0 → retry the accounting record               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A live poll and this worker can both see the same settlement. The
//! UNIQUE index on the provider transaction id decides the winner; the
//! loser reads `AlreadyRecorded`.
//!
//! OPEN orders are retried for as long as they stay OPEN. Past
//! `stale_after_hours` a warning is logged once per order.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::accounting::{AccountingClient, AccountingPayment};
use crate::config::ReconciliationSettings;
use crate::error::{PaymentError, PaymentResult};
use crate::terminal_client::TerminalClient;
use tender_core::{ConflictKind, Money, Order, PollResult, TerminalEvent, TerminalState};
use tender_db::{Database, OrderCursor, SettleOutcome, Settlement};

// =============================================================================
// Settlement Matching
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    Settled,
    AlreadyRecorded,
    Conflict(ConflictKind),
}

/// Applies a provider settlement to an order, exactly once.
///
/// Shared by the live poller and the reconciliation worker.
pub async fn apply_settlement(
    db: &Database,
    order_id: &str,
    settlement: &Settlement,
) -> PaymentResult<MatchResult> {
    let session = db.terminal_sessions().get_by_order(order_id).await?;

    if let Some(session) = &session {
        if session.state == TerminalState::Cancelled {
            record_conflict(
                db,
                ConflictKind::ApprovedAfterCancel,
                Some(order_id),
                Some(&settlement.provider_transaction_id),
                &format!(
                    "provider settled {} for terminal payment {} which was cancelled",
                    settlement.provider_transaction_id, session.reference
                ),
            )
            .await?;
            return Ok(MatchResult::Conflict(ConflictKind::ApprovedAfterCancel));
        }
    }

    match db.orders().settle(order_id, settlement).await? {
        SettleOutcome::Settled(payment) => {
            if let Some(session) = session {
                close_session(db, &session.reference, session.state, session.attempts).await;
            }
            debug!(order_id, payment_id = %payment.id, "Settlement applied");
            Ok(MatchResult::Settled)
        }
        SettleOutcome::AlreadyRecorded => {
            debug!(order_id, provider_transaction_id = %settlement.provider_transaction_id,
                "Settlement already recorded");
            Ok(MatchResult::AlreadyRecorded)
        }
        SettleOutcome::NotOpen(status) => {
            record_conflict(
                db,
                ConflictKind::OrderNotOpen,
                Some(order_id),
                Some(&settlement.provider_transaction_id),
                &format!(
                    "settlement {} arrived for order in status {}",
                    settlement.provider_transaction_id, status
                ),
            )
            .await?;
            Ok(MatchResult::Conflict(ConflictKind::OrderNotOpen))
        }
        SettleOutcome::DuplicateTransaction { existing_order_id } => {
            record_conflict(
                db,
                ConflictKind::DuplicateTransaction,
                Some(order_id),
                Some(&settlement.provider_transaction_id),
                &format!(
                    "transaction {} is already settled against order {}",
                    settlement.provider_transaction_id, existing_order_id
                ),
            )
            .await?;
            Ok(MatchResult::Conflict(ConflictKind::DuplicateTransaction))
        }
    }
}

/// Moves a still-open terminal session to Approved after its order settled.
async fn close_session(db: &Database, reference: &str, state: TerminalState, attempts: i64) {
    let approved = match state {
        TerminalState::TimedOut => TerminalState::TimedOut
            .apply(TerminalEvent::Resume)
            .and_then(|s| s.apply(TerminalEvent::Poll(PollResult::APPROVED))),
        other => other.apply(TerminalEvent::Poll(PollResult::APPROVED)),
    };

    let Ok(next) = approved else {
        return;
    };

    if let Err(e) = db
        .terminal_sessions()
        .update_state(reference, state, next, attempts, Some("Settled"))
        .await
    {
        warn!(?e, reference, "Failed to close terminal session");
    }
}

/// Persists a conflict and raises the operator alert. An identical
/// unresolved conflict is not recorded twice.
pub async fn record_conflict(
    db: &Database,
    kind: ConflictKind,
    order_id: Option<&str>,
    provider_transaction_id: Option<&str>,
    detail: &str,
) -> PaymentResult<()> {
    let conflicts = db.conflicts();

    if let Some(txid) = provider_transaction_id {
        if conflicts.exists_unresolved(kind, txid).await? {
            debug!(kind = kind.as_str(), provider_transaction_id = txid, "Conflict already raised");
            return Ok(());
        }
    }

    let conflict = conflicts.record(kind, order_id, provider_transaction_id, detail).await?;
    error!(
        target: "tender::alerts",
        conflict_id = %conflict.id,
        kind = kind.as_str(),
        order_id = ?order_id,
        provider_transaction_id = ?provider_transaction_id,
        detail,
        "Reconciliation conflict"
    );
    Ok(())
}

// =============================================================================
// Worker
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub checked: usize,
    pub settled: usize,
    pub already_recorded: usize,
    pub conflicts: usize,
    pub unmatched: usize,
    pub errors: usize,
    pub accounting_recorded: usize,
}

/// Handle for stopping the worker.
#[derive(Clone)]
pub struct ReconciliationHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl ReconciliationHandle {
    pub async fn shutdown(&self) -> PaymentResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| PaymentError::ChannelClosed("Reconciliation shutdown channel closed".into()))
    }
}

pub struct ReconciliationWorker {
    db: Database,
    terminal: Arc<dyn TerminalClient>,
    accounting: Option<Arc<dyn AccountingClient>>,
    settings: ReconciliationSettings,
    /// Last order of the previous batch.
    cursor: Option<OrderCursor>,
    stale_warned: HashSet<String>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl ReconciliationWorker {
    pub fn new(
        db: Database,
        terminal: Arc<dyn TerminalClient>,
        accounting: Option<Arc<dyn AccountingClient>>,
        settings: ReconciliationSettings,
    ) -> (Self, ReconciliationHandle) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = ReconciliationWorker {
            db,
            terminal,
            accounting,
            settings,
            cursor: None,
            stale_warned: HashSet::new(),
            shutdown_rx,
        };

        (worker, ReconciliationHandle { shutdown_tx })
    }

    /// Runs until shutdown. Spawn as a background task.
    pub async fn run(mut self) {
        info!(interval_secs = self.settings.interval_secs, "Reconciliation worker starting");

        let mut interval = tokio::time::interval(Duration::from_secs(self.settings.interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(report) if report.settled > 0 || report.conflicts > 0 => {
                            info!(?report, "Reconciliation cycle finished");
                        }
                        Ok(report) => debug!(?report, "Reconciliation cycle finished"),
                        Err(e) => error!(?e, "Reconciliation cycle failed"),
                    }
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Reconciliation worker shutting down");
                    break;
                }
            }
        }

        info!("Reconciliation worker stopped");
    }

    /// One batch of OPEN orders, then the accounting backlog.
    ///
    /// Successive cycles walk the OPEN orders in `(created_at, id)` order
    /// and wrap around, so every OPEN order is checked eventually however
    /// many stay unmatched.
    pub async fn run_cycle(&mut self) -> PaymentResult<CycleReport> {
        let mut report = CycleReport::default();

        let orders = self.next_batch().await?;
        for order in orders {
            report.checked += 1;
            self.warn_if_stale(&order);

            let settled = match self.terminal.find_settled(&order.invoice_number).await {
                Ok(Some(settled)) => settled,
                Ok(None) => {
                    report.unmatched += 1;
                    continue;
                }
                Err(e) => {
                    warn!(?e, order_id = %order.id, invoice_number = %order.invoice_number,
                        "Settlement lookup failed");
                    report.errors += 1;
                    continue;
                }
            };

            let settlement = Settlement {
                provider_transaction_id: settled.transaction_id,
                auth_code: settled.auth_code,
                amount_cents: settled.amount_cents,
                settled_at: settled.settled_at,
            };

            match apply_settlement(&self.db, &order.id, &settlement).await {
                Ok(MatchResult::Settled) => {
                    info!(order_id = %order.id, invoice_number = %order.invoice_number,
                        provider_transaction_id = %settlement.provider_transaction_id,
                        "Reconciled settled order");
                    self.stale_warned.remove(&order.id);
                    report.settled += 1;
                }
                Ok(MatchResult::AlreadyRecorded) => report.already_recorded += 1,
                Ok(MatchResult::Conflict(_)) => report.conflicts += 1,
                Err(e) => {
                    error!(?e, order_id = %order.id, "Failed to apply settlement");
                    report.errors += 1;
                }
            }
        }

        report.accounting_recorded = self.retry_accounting().await?;
        Ok(report)
    }

    async fn next_batch(&mut self) -> PaymentResult<Vec<Order>> {
        let repo = self.db.orders();
        let limit = self.settings.batch_size;

        let mut orders = repo.list_open_after(self.cursor.as_ref(), limit).await?;
        if orders.is_empty() && self.cursor.take().is_some() {
            orders = repo.list_open_after(None, limit).await?;
        }

        self.cursor = if (orders.len() as i64) < limit {
            None
        } else {
            orders.last().map(OrderCursor::from)
        };
        Ok(orders)
    }

    fn warn_if_stale(&mut self, order: &Order) {
        let age = Utc::now() - order.created_at;
        if age.num_hours() < self.settings.stale_after_hours {
            return;
        }
        if self.stale_warned.insert(order.id.clone()) {
            warn!(
                order_id = %order.id,
                invoice_number = %order.invoice_number,
                age_hours = age.num_hours(),
                "Order still OPEN past the stale threshold, still retrying"
            );
        }
    }

    async fn retry_accounting(&self) -> PaymentResult<usize> {
        let Some(accounting) = &self.accounting else {
            return Ok(0);
        };

        let invoices = self.db.invoice_payments();
        let pending = invoices.list_unrecorded(self.settings.batch_size).await?;
        let mut recorded = 0;

        for record in pending {
            let payment = AccountingPayment {
                customer_ref: record.customer_ref.clone(),
                document_type: record.document_type,
                document_id: record.document_id.clone(),
                amount: Money::from_cents(record.amount_cents),
                transaction_id: record.transaction_id.clone(),
            };

            match accounting.record_payment(&payment).await {
                Ok(()) => {
                    invoices.mark_recorded(&record.transaction_id).await?;
                    info!(document_id = %record.document_id, transaction_id = %record.transaction_id,
                        "Accounting record retried");
                    recorded += 1;
                }
                Err(e) => {
                    warn!(?e, document_id = %record.document_id, "Accounting record still failing");
                }
            }
        }

        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubAccounting, StubTerminal};
    use tender_core::{DocumentType, InvoicePaymentRecord, OrderStatus, TerminalSession};
    use tender_db::{DbConfig, NewOrder};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn open_order(db: &Database, invoice: &str) -> Order {
        db.orders()
            .create_open(&NewOrder {
                invoice_number: invoice.to_string(),
                amount_cents: 5_000,
                lane_id: "lane-2".to_string(),
                created_by: "cashier".to_string(),
            })
            .await
            .unwrap()
    }

    fn settlement(txid: &str) -> Settlement {
        Settlement {
            provider_transaction_id: txid.to_string(),
            auth_code: Some("OK1234".to_string()),
            amount_cents: 5_000,
            settled_at: Utc::now(),
        }
    }

    fn worker(
        db: &Database,
        terminal: Arc<StubTerminal>,
        accounting: Option<Arc<dyn AccountingClient>>,
    ) -> ReconciliationWorker {
        worker_with_batch(db, terminal, accounting, ReconciliationSettings::default().batch_size)
    }

    fn worker_with_batch(
        db: &Database,
        terminal: Arc<StubTerminal>,
        accounting: Option<Arc<dyn AccountingClient>>,
        batch_size: i64,
    ) -> ReconciliationWorker {
        let settings = ReconciliationSettings {
            batch_size,
            ..ReconciliationSettings::default()
        };
        let (worker, _handle) = ReconciliationWorker::new(db.clone(), terminal, accounting, settings);
        worker
    }

    fn invoice_record(txid: &str, under_review: bool) -> InvoicePaymentRecord {
        InvoicePaymentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            customer_ref: "CUST-1".to_string(),
            document_type: DocumentType::Invoice,
            document_id: format!("INV-{}", txid),
            amount_cents: 5_000,
            amount_charged_cents: 5_150,
            cc_fee_cents: 150,
            transaction_id: txid.to_string(),
            under_review,
            recorded_in_accounting: false,
            card_last4: Some("1111".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_cycle_settles_matching_orders() {
        let db = db().await;
        let paid = open_order(&db, "2610180101").await;
        let waiting = open_order(&db, "2610180102").await;
        let broken = open_order(&db, "2610180103").await;

        let terminal = Arc::new(StubTerminal::new());
        terminal.settle("2610180101", "T-900", 5_000);
        terminal.fail_lookup("2610180103");

        let mut worker = worker(&db, terminal, None);
        let report = worker.run_cycle().await.unwrap();

        assert_eq!(report.checked, 3);
        assert_eq!(report.settled, 1);
        assert_eq!(report.unmatched, 1);
        assert_eq!(report.errors, 1);

        let orders = db.orders();
        assert_eq!(orders.get_by_id(&paid.id).await.unwrap().unwrap().status, OrderStatus::Paid);
        assert_eq!(orders.get_by_id(&waiting.id).await.unwrap().unwrap().status, OrderStatus::Open);
        assert_eq!(orders.get_by_id(&broken.id).await.unwrap().unwrap().status, OrderStatus::Open);

        // Second cycle: the paid order is no longer OPEN, nothing new happens.
        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.settled, 0);
    }

    #[tokio::test]
    async fn test_unmatched_backlog_does_not_starve_newer_orders() {
        let db = db().await;
        let stuck_a = open_order(&db, "2610180111").await;
        let stuck_b = open_order(&db, "2610180112").await;
        let fresh = open_order(&db, "2610180113").await;

        let terminal = Arc::new(StubTerminal::new());
        terminal.settle("2610180113", "T-913", 5_000);

        let mut worker = worker_with_batch(&db, terminal, None, 2);

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.unmatched, 2);

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.checked, 1);
        assert_eq!(report.settled, 1);

        let orders = db.orders();
        assert_eq!(orders.get_by_id(&fresh.id).await.unwrap().unwrap().status, OrderStatus::Paid);

        // Wrapped around to the oldest again.
        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(orders.get_by_id(&stuck_a.id).await.unwrap().unwrap().status, OrderStatus::Open);
        assert_eq!(orders.get_by_id(&stuck_b.id).await.unwrap().unwrap().status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_apply_settlement_is_idempotent() {
        let db = db().await;
        let order = open_order(&db, "2610180201").await;

        assert_eq!(
            apply_settlement(&db, &order.id, &settlement("T-1")).await.unwrap(),
            MatchResult::Settled
        );
        assert_eq!(
            apply_settlement(&db, &order.id, &settlement("T-1")).await.unwrap(),
            MatchResult::AlreadyRecorded
        );

        assert!(db.conflicts().list_unresolved(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_transaction_raises_conflict_once() {
        let db = db().await;
        let first = open_order(&db, "2610180301").await;
        let second = open_order(&db, "2610180302").await;

        apply_settlement(&db, &first.id, &settlement("T-7")).await.unwrap();
        let result = apply_settlement(&db, &second.id, &settlement("T-7")).await.unwrap();
        assert_eq!(result, MatchResult::Conflict(ConflictKind::DuplicateTransaction));
        apply_settlement(&db, &second.id, &settlement("T-7")).await.unwrap();

        let conflicts = db.conflicts().list_unresolved(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::DuplicateTransaction);
        assert_eq!(
            db.orders().get_by_id(&second.id).await.unwrap().unwrap().status,
            OrderStatus::Open
        );
    }

    #[tokio::test]
    async fn test_settlement_for_voided_order_is_conflict() {
        let db = db().await;
        let order = open_order(&db, "2610180401").await;
        apply_settlement(&db, &order.id, &settlement("T-1")).await.unwrap();
        assert!(db.orders().mark_voided(&order.id).await.unwrap());

        let result = apply_settlement(&db, &order.id, &settlement("T-2")).await.unwrap();
        assert_eq!(result, MatchResult::Conflict(ConflictKind::OrderNotOpen));
    }

    #[tokio::test]
    async fn test_settlement_closes_timed_out_session() {
        let db = db().await;
        let order = open_order(&db, "2610180501").await;
        let now = Utc::now();
        db.terminal_sessions()
            .insert(&TerminalSession {
                reference: "ref-9".to_string(),
                order_id: order.id.clone(),
                device_id: "EPI-9".to_string(),
                amount_cents: 5_000,
                state: TerminalState::TimedOut,
                attempts: 60,
                message: None,
                cancelled_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        apply_settlement(&db, &order.id, &settlement("T-ref-9")).await.unwrap();

        let session = db.terminal_sessions().get("ref-9").await.unwrap().unwrap();
        assert_eq!(session.state, TerminalState::Approved);
    }

    #[tokio::test]
    async fn test_accounting_backlog_is_retried() {
        let db = db().await;
        db.invoice_payments().insert(&invoice_record("txn-1", false)).await.unwrap();
        db.invoice_payments().insert(&invoice_record("txn-2", true)).await.unwrap();

        let accounting = Arc::new(StubAccounting::new());
        let mut worker = worker(&db, Arc::new(StubTerminal::new()), Some(accounting.clone() as Arc<dyn AccountingClient>));

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.accounting_recorded, 1);

        let recorded = accounting.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].amount, Money::from_cents(5_000));
        assert!(db.invoice_payments().get_by_transaction("txn-1").await.unwrap().unwrap().recorded_in_accounting);
    }

    #[tokio::test]
    async fn test_held_charges_do_not_block_accounting_retries() {
        let db = db().await;
        for txid in ["held-1", "held-2", "held-3"] {
            db.invoice_payments().insert(&invoice_record(txid, true)).await.unwrap();
        }
        db.invoice_payments().insert(&invoice_record("txn-failed", false)).await.unwrap();

        let accounting = Arc::new(StubAccounting::new());
        let mut worker = worker_with_batch(
            &db,
            Arc::new(StubTerminal::new()),
            Some(accounting.clone() as Arc<dyn AccountingClient>),
            2,
        );

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.accounting_recorded, 1);
        assert_eq!(accounting.recorded()[0].transaction_id, "txn-failed");
    }

    #[tokio::test]
    async fn test_handle_stops_worker() {
        let db = db().await;
        let (worker, handle) = ReconciliationWorker::new(
            db,
            Arc::new(StubTerminal::new()),
            None,
            ReconciliationSettings::default(),
        );
        let task = tokio::spawn(worker.run());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
