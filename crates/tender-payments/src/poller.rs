//! # Terminal Payment Poller
//!
//! Drives a pushed device payment from `Pending` to a final state.
//!
//! ## Poll Task
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  TerminalService::start(session)                                        │
//! │        │                                                                │
//! │        ▼  tokio::spawn (one task per reference)                         │
//! │  ┌───────────────────────────────────────────────────────────────┐     │
//! │  │ loop                                                          │     │
//! │  │   attempts == max?  ──► Exhausted ──► TimedOut                │     │
//! │  │   select!                                                     │     │
//! │  │     PollCommand::Cancel ──────────► Cancelled                 │     │
//! │  │     sleep(interval) ──► status() ──► Poll(result)             │     │
//! │  │                            approved ──► Approved              │     │
//! │  │                            declined ──► Declined              │     │
//! │  │                            pending / error ──► loop           │     │
//! │  └───────────────────────────────────────────────────────────────┘     │
//! │        │                                                                │
//! │        ▼                                                                │
//! │  finish(): persist state, settle the order on approval,                 │
//! │            close it as DECLINED on a device decline                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! TimedOut is not a failure. The device may still complete the payment;
//! the reconciliation worker picks it up by invoice number. Nothing is
//! voided or cancelled automatically.
//!
//! The reference is persisted in `terminal_sessions`, so a status read or
//! a restarted poll needs nothing from process memory.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TerminalSettings;
use crate::error::{PaymentError, PaymentResult};
use crate::reconcile::{apply_settlement, record_conflict};
use crate::terminal_client::{TerminalClient, TerminalStatus};
use tender_core::{ConflictKind, TerminalEvent, TerminalSession, TerminalState};
use tender_db::{Database, Settlement, TerminalSessionRepository};

// =============================================================================
// Policy / Outcome
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        PollPolicy {
            interval,
            max_attempts,
        }
    }

    /// Live payment at the lane: 2s × 60 by default.
    pub fn device(settings: &TerminalSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.poll_interval_ms),
            settings.max_attempts,
        )
    }

    /// Polling resumed after a restart: 12s × 120 by default.
    pub fn back_office(settings: &TerminalSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.back_office_interval_secs),
            settings.back_office_max_attempts,
        )
    }
}

#[derive(Debug)]
pub enum PollCommand {
    Cancel,
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    Approved { status: TerminalStatus, attempts: u32 },
    Declined { status: TerminalStatus, attempts: u32 },
    TimedOut { attempts: u32 },
    Cancelled { attempts: u32 },
}

impl PollOutcome {
    pub fn state(&self) -> TerminalState {
        match self {
            PollOutcome::Approved { .. } => TerminalState::Approved,
            PollOutcome::Declined { .. } => TerminalState::Declined,
            PollOutcome::TimedOut { .. } => TerminalState::TimedOut,
            PollOutcome::Cancelled { .. } => TerminalState::Cancelled,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Approved { attempts, .. }
            | PollOutcome::Declined { attempts, .. }
            | PollOutcome::TimedOut { attempts }
            | PollOutcome::Cancelled { attempts } => *attempts,
        }
    }
}

// =============================================================================
// Poll Loop
// =============================================================================

/// Polls `reference` until a definitive answer, a cancel command, or the
/// attempt budget runs out. Makes exactly `max_attempts` status calls at
/// most.
///
/// When `sessions` is given, the attempt count is saved after every poll.
pub async fn poll_until_final(
    client: &dyn TerminalClient,
    reference: &str,
    policy: PollPolicy,
    commands: &mut mpsc::Receiver<PollCommand>,
    sessions: Option<&TerminalSessionRepository>,
) -> PollOutcome {
    let mut state = TerminalState::Pending;
    let mut attempts: u32 = 0;
    let mut commands_open = true;

    loop {
        if attempts >= policy.max_attempts {
            if let Err(e) = state.apply(TerminalEvent::Exhausted) {
                warn!(?e, reference, "Unexpected state at poll exhaustion");
            }
            info!(reference, attempts, "Terminal polling exhausted, payment may still complete");
            return PollOutcome::TimedOut { attempts };
        }

        tokio::select! {
            biased;

            command = commands.recv(), if commands_open => match command {
                Some(PollCommand::Cancel) => {
                    info!(reference, attempts, "Terminal polling cancelled");
                    return PollOutcome::Cancelled { attempts };
                }
                None => commands_open = false,
            },

            _ = tokio::time::sleep(policy.interval) => {
                attempts += 1;
                match client.status(reference).await {
                    Ok(status) => match state.apply(TerminalEvent::Poll(status.result)) {
                        Ok(TerminalState::Approved) => {
                            return PollOutcome::Approved { status, attempts };
                        }
                        Ok(TerminalState::Declined) => {
                            return PollOutcome::Declined { status, attempts };
                        }
                        Ok(next) => state = next,
                        Err(e) => warn!(?e, reference, "Ignoring poll result"),
                    },
                    Err(e) => warn!(?e, reference, attempt = attempts, "Terminal status check failed"),
                }

                debug!(reference, attempt = attempts, "Terminal payment still pending");
                if let Some(repo) = sessions {
                    if let Err(e) = repo
                        .update_state(reference, TerminalState::Pending, TerminalState::Pending, attempts as i64, None)
                        .await
                    {
                        warn!(?e, reference, "Failed to save poll attempt");
                    }
                }
            }
        }
    }
}

// =============================================================================
// Terminal Service
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelReport {
    pub reference: String,
    /// False when the provider could not be told. The device may still
    /// complete the payment; an approval is then raised as a conflict.
    pub provider_acknowledged: bool,
}

/// Owns the live poll tasks.
#[derive(Clone)]
pub struct TerminalService {
    db: Database,
    client: Arc<dyn TerminalClient>,
    device_policy: PollPolicy,
    resume_policy: PollPolicy,
    tasks: Arc<Mutex<HashMap<String, mpsc::Sender<PollCommand>>>>,
}

impl TerminalService {
    pub fn new(
        db: Database,
        client: Arc<dyn TerminalClient>,
        device_policy: PollPolicy,
        resume_policy: PollPolicy,
    ) -> Self {
        TerminalService {
            db,
            client,
            device_policy,
            resume_policy,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_settings(db: Database, client: Arc<dyn TerminalClient>, settings: &TerminalSettings) -> Self {
        Self::new(
            db,
            client,
            PollPolicy::device(settings),
            PollPolicy::back_office(settings),
        )
    }

    /// Starts polling a freshly pushed payment.
    pub async fn start(&self, session: &TerminalSession) -> JoinHandle<PollOutcome> {
        self.spawn(session, self.device_policy).await
    }

    /// Restarts polling for sessions left `Pending` by a previous process.
    pub async fn resume_pending(&self) -> PaymentResult<usize> {
        let sessions = self.db.terminal_sessions().list_by_state(TerminalState::Pending).await?;
        let mut resumed = 0;
        for session in sessions {
            if self.is_polling(&session.reference).await {
                continue;
            }
            let _poll = self.spawn(&session, self.resume_policy).await;
            resumed += 1;
        }
        if resumed > 0 {
            info!(count = resumed, "Resumed terminal polling");
        }
        Ok(resumed)
    }

    pub async fn is_polling(&self, reference: &str) -> bool {
        self.tasks.lock().await.contains_key(reference)
    }

    pub async fn status(&self, reference: &str) -> PaymentResult<TerminalSession> {
        self.db
            .terminal_sessions()
            .get(reference)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                entity: "Terminal payment",
                id: reference.to_string(),
            })
    }

    /// Cashier abort. Only legal while `Pending`.
    pub async fn cancel(&self, reference: &str) -> PaymentResult<CancelReport> {
        let session = self.status(reference).await?;
        session.state.apply(TerminalEvent::Cancel)?;

        if !self.db.terminal_sessions().mark_cancelled(reference).await? {
            return Err(PaymentError::InvalidState(format!(
                "terminal payment {} is no longer pending",
                reference
            )));
        }

        let sender = self.tasks.lock().await.get(reference).cloned();
        if let Some(sender) = sender {
            if sender.send(PollCommand::Cancel).await.is_err() {
                debug!(reference, "Poll task already finished");
            }
        }

        let provider_acknowledged = match self.client.cancel(reference).await {
            Ok(()) => true,
            Err(e) => {
                warn!(?e, reference, "Terminal provider did not acknowledge cancel");
                false
            }
        };

        info!(reference, order_id = %session.order_id, provider_acknowledged, "Terminal payment cancelled");
        Ok(CancelReport {
            reference: reference.to_string(),
            provider_acknowledged,
        })
    }

    async fn spawn(&self, session: &TerminalSession, policy: PollPolicy) -> JoinHandle<PollOutcome> {
        let (tx, mut rx) = mpsc::channel(4);
        self.tasks.lock().await.insert(session.reference.clone(), tx);

        let service = self.clone();
        let reference = session.reference.clone();
        let order_id = session.order_id.clone();
        let amount_cents = session.amount_cents;

        tokio::spawn(async move {
            let sessions = service.db.terminal_sessions();
            let outcome =
                poll_until_final(service.client.as_ref(), &reference, policy, &mut rx, Some(&sessions)).await;

            service.tasks.lock().await.remove(&reference);

            if let Err(e) = service.finish(&reference, &order_id, amount_cents, &outcome).await {
                error!(?e, reference = %reference, "Failed to record terminal outcome");
            }
            outcome
        })
    }

    async fn finish(
        &self,
        reference: &str,
        order_id: &str,
        amount_cents: i64,
        outcome: &PollOutcome,
    ) -> PaymentResult<()> {
        let sessions = self.db.terminal_sessions();
        let attempts = outcome.attempts() as i64;

        match outcome {
            PollOutcome::Approved { status, .. } => {
                let transaction_id = status
                    .transaction_id
                    .clone()
                    .unwrap_or_else(|| reference.to_string());

                let moved = sessions
                    .update_state(
                        reference,
                        TerminalState::Pending,
                        TerminalState::Approved,
                        attempts,
                        status.message.as_deref(),
                    )
                    .await?;

                if !moved {
                    let current = sessions.get(reference).await?.map(|s| s.state);
                    if current == Some(TerminalState::Cancelled) {
                        record_conflict(
                            &self.db,
                            ConflictKind::ApprovedAfterCancel,
                            Some(order_id),
                            Some(&transaction_id),
                            &format!("terminal approved {} after the cashier cancelled it", reference),
                        )
                        .await?;
                        return Ok(());
                    }
                }

                let settlement = Settlement {
                    provider_transaction_id: transaction_id,
                    auth_code: status.auth_code.clone(),
                    amount_cents,
                    settled_at: Utc::now(),
                };
                apply_settlement(&self.db, order_id, &settlement).await?;
            }
            PollOutcome::Declined { status, .. } => {
                let moved = sessions
                    .update_state(
                        reference,
                        TerminalState::Pending,
                        TerminalState::Declined,
                        attempts,
                        Some(status.message.as_deref().unwrap_or("Declined")),
                    )
                    .await?;

                // A cancelled session keeps its order OPEN for reconciliation.
                if moved && self.db.orders().mark_declined(order_id).await? {
                    info!(reference, order_id, "Terminal payment declined, order closed");
                } else {
                    debug!(reference, order_id, "Decline arrived for a session that already moved on");
                }
            }
            PollOutcome::TimedOut { .. } => {
                sessions
                    .update_state(
                        reference,
                        TerminalState::Pending,
                        TerminalState::TimedOut,
                        attempts,
                        Some("No answer from terminal yet"),
                    )
                    .await?;
                warn!(reference, order_id, "Terminal payment timed out, left to reconciliation");
            }
            PollOutcome::Cancelled { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PollStep, StubTerminal};
    use tender_core::{OrderStatus, PollResult};
    use tender_db::{DbConfig, NewOrder};

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::from_millis(10), max_attempts)
    }

    async fn seeded_session(db: &Database) -> TerminalSession {
        let order = db
            .orders()
            .create_open(&NewOrder {
                invoice_number: "2610180007".to_string(),
                amount_cents: 2_215,
                lane_id: "lane-1".to_string(),
                created_by: "cashier".to_string(),
            })
            .await
            .unwrap();
        let now = Utc::now();
        let session = TerminalSession {
            reference: "ref-1".to_string(),
            order_id: order.id,
            device_id: "EPI-1".to_string(),
            amount_cents: 2_215,
            state: TerminalState::Pending,
            attempts: 0,
            message: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        db.terminal_sessions().insert(&session).await.unwrap();
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_exactly_max_attempts() {
        let terminal = StubTerminal::new();
        let (_tx, mut rx) = mpsc::channel(1);

        let outcome = poll_until_final(&terminal, "ref-1", fast(5), &mut rx, None).await;

        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 5 }));
        assert_eq!(terminal.status_calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exits_immediately_on_definitive_answer() {
        let terminal = StubTerminal::with_statuses(vec![PollStep::Pending, PollStep::Fail, PollStep::Approve]);
        let (_tx, mut rx) = mpsc::channel(1);

        let outcome = poll_until_final(&terminal, "ref-1", fast(60), &mut rx, None).await;

        match outcome {
            PollOutcome::Approved { status, attempts } => {
                assert_eq!(attempts, 3);
                assert_eq!(status.result, PollResult::APPROVED);
            }
            other => panic!("expected approval, got {:?}", other),
        }
        assert_eq!(terminal.status_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_command_stops_polling() {
        let terminal = StubTerminal::new();
        let (tx, mut rx) = mpsc::channel(1);
        tx.send(PollCommand::Cancel).await.unwrap();

        let outcome = poll_until_final(&terminal, "ref-1", fast(60), &mut rx, None).await;

        assert!(matches!(outcome, PollOutcome::Cancelled { attempts: 0 }));
        assert_eq!(terminal.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_command_channel_keeps_polling() {
        let terminal = StubTerminal::with_statuses(vec![PollStep::Pending, PollStep::Decline]);
        let (tx, mut rx) = mpsc::channel(1);
        drop(tx);

        let outcome = poll_until_final(&terminal, "ref-1", fast(10), &mut rx, None).await;
        assert!(matches!(outcome, PollOutcome::Declined { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_service_settles_order_on_approval() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = seeded_session(&db).await;
        let terminal = Arc::new(StubTerminal::with_statuses(vec![PollStep::Pending, PollStep::Approve]));
        let service = TerminalService::new(db.clone(), terminal, fast(10), fast(10));

        let outcome = service.start(&session).await.await.unwrap();
        assert_eq!(outcome.state(), TerminalState::Approved);

        let stored = service.status("ref-1").await.unwrap();
        assert_eq!(stored.state, TerminalState::Approved);
        assert_eq!(stored.attempts, 2);

        let order = db.orders().get_by_id(&session.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        let payment = db.orders().payment_for_order(&order.id).await.unwrap().unwrap();
        assert_eq!(payment.provider_transaction_id, "T-ref-1");
        assert!(!service.is_polling("ref-1").await);
    }

    #[tokio::test]
    async fn test_service_timeout_leaves_order_open() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = seeded_session(&db).await;
        let terminal = Arc::new(StubTerminal::new());
        let service = TerminalService::new(db.clone(), terminal.clone(), fast(3), fast(3));

        let outcome = service.start(&session).await.await.unwrap();
        assert!(matches!(outcome, PollOutcome::TimedOut { attempts: 3 }));

        assert_eq!(service.status("ref-1").await.unwrap().state, TerminalState::TimedOut);
        let order = db.orders().get_by_id(&session.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        // Never cancelled on the provider side automatically.
        assert!(terminal.cancels().is_empty());
    }

    #[tokio::test]
    async fn test_service_decline_closes_order() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = seeded_session(&db).await;
        let terminal = Arc::new(StubTerminal::with_statuses(vec![PollStep::Pending, PollStep::Decline]));
        let service = TerminalService::new(db.clone(), terminal, fast(10), fast(10));

        let outcome = service.start(&session).await.await.unwrap();
        assert_eq!(outcome.state(), TerminalState::Declined);

        assert_eq!(service.status("ref-1").await.unwrap().state, TerminalState::Declined);
        let order = db.orders().get_by_id(&session.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Declined);
        assert!(db.orders().list_open(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_only_while_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = seeded_session(&db).await;
        let terminal = Arc::new(StubTerminal::new());
        let service = TerminalService::new(
            db.clone(),
            terminal.clone(),
            PollPolicy::new(Duration::from_secs(3_600), 5),
            fast(5),
        );

        let handle = service.start(&session).await;
        let report = service.cancel("ref-1").await.unwrap();
        assert!(report.provider_acknowledged);
        assert_eq!(terminal.cancels(), vec!["ref-1".to_string()]);

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled { .. }));
        assert_eq!(service.status("ref-1").await.unwrap().state, TerminalState::Cancelled);

        let err = service.cancel("ref-1").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));

        let err = service.cancel("missing").await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_approval_after_cancel_is_a_conflict() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let session = seeded_session(&db).await;
        let terminal = Arc::new(StubTerminal::new());
        let service = TerminalService::new(db.clone(), terminal, fast(5), fast(5));

        db.terminal_sessions().mark_cancelled("ref-1").await.unwrap();

        let status = TerminalStatus {
            result: PollResult::APPROVED,
            transaction_id: Some("T-late".to_string()),
            ..TerminalStatus::default()
        };
        service
            .finish("ref-1", &session.order_id, 2_215, &PollOutcome::Approved { status, attempts: 4 })
            .await
            .unwrap();

        let order = db.orders().get_by_id(&session.order_id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        let conflicts = db.conflicts().list_unresolved(10).await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::ApprovedAfterCancel);
    }

    #[tokio::test]
    async fn test_resume_pending_restarts_polling() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seeded_session(&db).await;
        let terminal = Arc::new(StubTerminal::with_statuses(vec![PollStep::Decline]));
        let service = TerminalService::new(db.clone(), terminal, fast(5), fast(5));

        assert_eq!(service.resume_pending().await.unwrap(), 1);

        for _ in 0..100 {
            if service.status("ref-1").await.unwrap().state == TerminalState::Declined {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("resumed poll never finished");
    }
}
