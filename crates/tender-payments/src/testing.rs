//! Scriptable provider fakes for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::accounting::{AccountingClient, AccountingPayment};
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{GatewayCharge, GatewayClient, GatewayResponse, ResponseCode};
use crate::terminal_client::{SettledTransaction, TerminalClient, TerminalPush, TerminalStatus};
use tender_core::{Money, PollResult};

// =============================================================================
// Gateway
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub enum Scripted {
    Approve,
    Review,
    Decline(&'static str),
    Fail(&'static str),
}

/// Answers from a script, then approves.
pub struct StubGateway {
    script: Mutex<VecDeque<Scripted>>,
    charges: Mutex<Vec<Money>>,
    calls: AtomicUsize,
}

impl StubGateway {
    pub fn approving() -> Self {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Scripted>) -> Self {
        StubGateway {
            script: Mutex::new(script.into()),
            charges: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }

    pub fn charged(&self) -> Vec<Money> {
        self.charges.lock().unwrap().clone()
    }

    fn respond(&self) -> PaymentResult<GatewayResponse> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Scripted::Approve);

        let response = |code, transaction_id: Option<String>, message: &str| GatewayResponse {
            code,
            transaction_id,
            auth_code: Some(format!("AUTH{:02}", n)),
            account_number: Some("XXXX1111".to_string()),
            account_type: Some("Visa".to_string()),
            message: message.to_string(),
        };

        match step {
            Scripted::Approve => Ok(response(
                ResponseCode::Approved,
                Some(format!("txn-{}", n)),
                "This transaction has been approved.",
            )),
            Scripted::Review => Ok(response(
                ResponseCode::HeldForReview,
                Some(format!("txn-{}", n)),
                "This transaction is being held for review.",
            )),
            Scripted::Decline(reason) => Ok(response(ResponseCode::Declined, None, reason)),
            Scripted::Fail(message) => Err(PaymentError::gateway(message)),
        }
    }
}

#[async_trait]
impl GatewayClient for StubGateway {
    async fn charge(&self, charge: &GatewayCharge<'_>) -> PaymentResult<GatewayResponse> {
        self.charges.lock().unwrap().push(charge.amount);
        self.respond()
    }

    async fn void(&self, _transaction_id: &str) -> PaymentResult<GatewayResponse> {
        self.respond()
    }

    async fn refund(&self, _transaction_id: &str, _amount: Money) -> PaymentResult<GatewayResponse> {
        self.respond()
    }
}

// =============================================================================
// Terminal
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub enum PollStep {
    Pending,
    Approve,
    Decline,
    Fail,
}

#[derive(Debug, Clone, Copy)]
pub enum PushFailure {
    /// Provider answered 4xx.
    Rejected,
    /// Timeout or 5xx. The device may have the payment.
    Unreachable,
}

/// Terminal provider fake. Status checks follow the script, then stay pending.
pub struct StubTerminal {
    pushes: Mutex<Vec<TerminalPush>>,
    push_failure: Mutex<Option<PushFailure>>,
    statuses: Mutex<VecDeque<PollStep>>,
    status_calls: AtomicUsize,
    cancels: Mutex<Vec<String>>,
    settled: Mutex<HashMap<String, SettledTransaction>>,
    failing_lookups: Mutex<HashSet<String>>,
    voids: AtomicUsize,
    refunds: AtomicUsize,
}

impl StubTerminal {
    pub fn new() -> Self {
        Self::with_statuses(Vec::new())
    }

    pub fn with_statuses(steps: Vec<PollStep>) -> Self {
        StubTerminal {
            pushes: Mutex::new(Vec::new()),
            push_failure: Mutex::new(None),
            statuses: Mutex::new(steps.into()),
            status_calls: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
            settled: Mutex::new(HashMap::new()),
            failing_lookups: Mutex::new(HashSet::new()),
            voids: AtomicUsize::new(0),
            refunds: AtomicUsize::new(0),
        }
    }

    /// Makes `find_settled` report a transaction for this invoice.
    pub fn settle(&self, invoice_number: &str, transaction_id: &str, amount_cents: i64) {
        self.settled.lock().unwrap().insert(
            invoice_number.to_string(),
            SettledTransaction {
                transaction_id: transaction_id.to_string(),
                auth_code: Some("OK1234".to_string()),
                amount_cents,
                invoice_number: invoice_number.to_string(),
                settled_at: Utc::now(),
            },
        );
    }

    pub fn fail_pushes(&self, failure: PushFailure) {
        *self.push_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_lookup(&self, invoice_number: &str) {
        self.failing_lookups
            .lock()
            .unwrap()
            .insert(invoice_number.to_string());
    }

    pub fn pushes(&self) -> Vec<TerminalPush> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn void_count(&self) -> usize {
        self.voids.load(Ordering::SeqCst)
    }

    pub fn refund_count(&self) -> usize {
        self.refunds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TerminalClient for StubTerminal {
    async fn push_payment(&self, push: &TerminalPush) -> PaymentResult<String> {
        let mut pushes = self.pushes.lock().unwrap();
        pushes.push(push.clone());
        match *self.push_failure.lock().unwrap() {
            Some(PushFailure::Rejected) => Err(PaymentError::declined(
                "terminal provider rejected request: 422 Unprocessable Entity",
            )),
            Some(PushFailure::Unreachable) => Err(PaymentError::gateway("terminal request timed out")),
            None => Ok(format!("ref-{}", pushes.len())),
        }
    }

    async fn status(&self, reference: &str) -> PaymentResult<TerminalStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.statuses.lock().unwrap().pop_front().unwrap_or(PollStep::Pending);

        let mut status = TerminalStatus::default();
        match step {
            PollStep::Pending => status.result = PollResult::PENDING,
            PollStep::Approve => {
                status.result = PollResult::APPROVED;
                status.transaction_id = Some(format!("T-{}", reference));
                status.auth_code = Some("OK1234".to_string());
                status.card_last4 = Some("4242".to_string());
                status.card_brand = Some("Visa".to_string());
            }
            PollStep::Decline => {
                status.result = PollResult::DECLINED;
                status.message = Some("Card declined".to_string());
            }
            PollStep::Fail => return Err(PaymentError::gateway("status check timed out")),
        }
        Ok(status)
    }

    async fn cancel(&self, reference: &str) -> PaymentResult<()> {
        self.cancels.lock().unwrap().push(reference.to_string());
        Ok(())
    }

    async fn void(&self, _transaction_id: &str) -> PaymentResult<bool> {
        self.voids.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn refund(&self, _transaction_id: &str, _amount: Money) -> PaymentResult<bool> {
        self.refunds.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn find_settled(&self, invoice_number: &str) -> PaymentResult<Option<SettledTransaction>> {
        if self.failing_lookups.lock().unwrap().contains(invoice_number) {
            return Err(PaymentError::gateway("lookup timed out"));
        }
        Ok(self.settled.lock().unwrap().get(invoice_number).cloned())
    }
}

// =============================================================================
// Accounting
// =============================================================================

pub struct StubAccounting {
    fail: bool,
    recorded: Mutex<Vec<AccountingPayment>>,
}

impl StubAccounting {
    pub fn new() -> Self {
        StubAccounting {
            fail: false,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        StubAccounting {
            fail: true,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<AccountingPayment> {
        self.recorded.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountingClient for StubAccounting {
    async fn record_payment(&self, payment: &AccountingPayment) -> PaymentResult<()> {
        if self.fail {
            return Err(PaymentError::Accounting("service unavailable".to_string()));
        }
        self.recorded.lock().unwrap().push(payment.clone());
        Ok(())
    }
}
