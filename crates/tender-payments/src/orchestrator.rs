//! # Payment Orchestrator
//!
//! The single entry point for a sale: fees, adapter dispatch, ledger write.
//!
//! ## Sale Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SaleRequest                                                            │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  validate lines + tax rate ──► FeeCalculator ──► invoice number         │
//! │     │                                                                   │
//! │     ├── sync methods (cash, card, profile, ach)                         │
//! │     │      adapter.authorize()                                          │
//! │     │        ├── Err ─────────────────► nothing written                 │
//! │     │        ├── approved ────────────► ledger (completed)              │
//! │     │        └── held for review ─────► ledger (under_review)           │
//! │     │                                                                   │
//! │     └── card_terminal                                                   │
//! │            order (OPEN) ──► ledger (pending) ──► push ──► session       │
//! │            ──► poll task ──► { pending: true, transactionId }           │
//! │               push refused (4xx / invalid) ──► order DECLINED           │
//! │               push outcome unknown ──────────► order stays OPEN         │
//! │                                 │                                       │
//! │                                 ▼ later                                 │
//! │                     poller / reconciliation settles the order           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Order Actions
//!
//! Void and refund check the order lifecycle before the provider is
//! called, so an illegal transition never reaches the network.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::accounting::{AccountingClient, ZohoBooksClient};
use crate::adapter::{AdapterRegistry, CashAdapter};
use crate::bulk::{BulkChargeReport, BulkChargeRequest, BulkCharger};
use crate::cache::TtlCache;
use crate::config::PaymentsConfig;
use crate::error::{ErrorKind, PaymentError, PaymentResult};
use crate::gateway::{AuthorizeNetGateway, GatewayClient};
use crate::poller::{CancelReport, TerminalService};
use crate::terminal_client::{HttpTerminalClient, TerminalClient};
use tender_core::validation::{validate_device_id, validate_payment_amount, validate_tax_rate_bps};
use tender_core::{
    FeeBreakdown, FeeCalculator, FeeInput, LineItem, Money, Order, OrderStatus, OutcomeStatus, Payment,
    PaymentInstrument, PaymentMethod, PaymentOutcome, PaymentRequest, Sale, SaleItem, SaleStatus, SaleTender,
    TaxRate, TerminalEvent, TerminalSession, TerminalState, ValidationError, MAX_LINE_ITEMS,
};
use tender_db::repository::sale::generate_id;
use tender_db::repository::{generate_invoice_number, INVOICE_NUMBER_ATTEMPTS};
use tender_db::{Database, LedgerEntry, LedgerWrite, NewOrder};

/// Token cache size. One entry per accounting organization.
const TOKEN_CACHE_ENTRIES: usize = 8;

// =============================================================================
// Provider Wiring
// =============================================================================

/// The external systems the engine talks to.
#[derive(Clone)]
pub struct ProviderClients {
    pub gateway: Arc<dyn GatewayClient>,
    pub terminal: Arc<dyn TerminalClient>,
    pub accounting: Option<Arc<dyn AccountingClient>>,
}

impl ProviderClients {
    /// Builds the HTTP clients. The accounting token cache is created here,
    /// once per process, and owned by the accounting client.
    pub fn from_config(config: &PaymentsConfig) -> PaymentResult<Self> {
        let gateway: Arc<dyn GatewayClient> = Arc::new(AuthorizeNetGateway::new(&config.gateway)?);
        let terminal: Arc<dyn TerminalClient> = Arc::new(HttpTerminalClient::new(&config.terminal)?);

        let accounting = if config.accounting.enabled {
            let tokens = Arc::new(TtlCache::new(
                Duration::from_secs(config.accounting.token_ttl_secs),
                TOKEN_CACHE_ENTRIES,
            ));
            let client: Arc<dyn AccountingClient> = Arc::new(ZohoBooksClient::new(&config.accounting, tokens)?);
            Some(client)
        } else {
            None
        };

        Ok(ProviderClients {
            gateway,
            terminal,
            accounting,
        })
    }
}

// =============================================================================
// Requests / Results
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRequest {
    pub payment: PaymentInstrument,
    pub line_items: Vec<LineItem>,
    /// Falls back to the configured default rate.
    #[serde(default)]
    pub tax_rate_bps: Option<u32>,
    #[serde(default)]
    pub tax_exempt: bool,
    #[serde(default)]
    pub customer_ref: Option<String>,
    pub lane_id: String,
    pub cashier_id: String,
}

/// Direct device payment for an amount, no cart.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalPaymentRequest {
    pub device_id: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub tax_cents: i64,
    #[serde(default)]
    pub customer_ref: Option<String>,
    pub lane_id: String,
    pub cashier_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleResult {
    pub sale_id: String,
    pub invoice_number: String,
    pub status: SaleStatus,
    /// True for device payments still waiting on the terminal.
    pub pending: bool,
    /// Provider transaction id, or the polling reference while pending.
    pub transaction_id: Option<String>,
    pub order_id: Option<String>,
    pub under_review: bool,
    pub fees: FeeBreakdown,
    pub change_cents: i64,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub reference: String,
    pub state: TerminalState,
    pub pending: bool,
    pub approved: bool,
    pub declined: bool,
    pub attempts: i64,
    pub message: Option<String>,
    pub order_id: String,
    pub order_status: Option<OrderStatus>,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPaymentStatus {
    pub order: Order,
    pub paid: bool,
    pub payment: Option<Payment>,
    pub terminal: Option<TerminalSession>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderActionResult {
    pub order_id: String,
    pub status: OrderStatus,
    pub transaction_id: String,
    pub amount: Money,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub database: bool,
    pub open_orders: i64,
    pub pending_terminal_payments: usize,
    pub unresolved_conflicts: usize,
}

// =============================================================================
// Orchestrator
// =============================================================================

#[derive(Clone)]
pub struct PaymentOrchestrator {
    db: Database,
    registry: AdapterRegistry,
    fees: FeeCalculator,
    default_tax_rate: TaxRate,
    terminal: TerminalService,
    bulk: Arc<BulkCharger>,
}

impl PaymentOrchestrator {
    pub fn new(
        db: Database,
        registry: AdapterRegistry,
        terminal: TerminalService,
        bulk: BulkCharger,
        fees: FeeCalculator,
        default_tax_rate: TaxRate,
    ) -> Self {
        PaymentOrchestrator {
            db,
            registry,
            fees,
            default_tax_rate,
            terminal,
            bulk: Arc::new(bulk),
        }
    }

    /// Standard wiring: every method registered against the given providers.
    pub fn from_clients(db: Database, clients: &ProviderClients, config: &PaymentsConfig) -> PaymentResult<Self> {
        let registry = AdapterRegistry::standard(clients.gateway.clone(), clients.terminal.clone());
        let fees = FeeCalculator::new(config.fees.surcharge_bps);
        let terminal = TerminalService::from_settings(db.clone(), clients.terminal.clone(), &config.terminal);
        let bulk = BulkCharger::new(
            db.clone(),
            registry.get(PaymentMethod::CardStoredProfile)?,
            registry.get(PaymentMethod::AchStoredProfile)?,
            fees,
            clients.accounting.clone(),
        );

        Ok(Self::new(
            db,
            registry,
            terminal,
            bulk,
            fees,
            TaxRate::from_bps(config.fees.default_tax_rate_bps),
        ))
    }

    pub fn terminal(&self) -> &TerminalService {
        &self.terminal
    }

    // =========================================================================
    // Sales
    // =========================================================================

    pub async fn process_sale(&self, request: &SaleRequest) -> PaymentResult<SaleResult> {
        validate_lines(&request.line_items)?;
        let tax_rate = match request.tax_rate_bps {
            Some(bps) => {
                validate_tax_rate_bps(bps)?;
                TaxRate::from_bps(bps)
            }
            None => self.default_tax_rate,
        };

        let method = request.payment.method();
        let fees = self.fees.calculate(&FeeInput {
            subtotal: FeeCalculator::subtotal(&request.line_items),
            tax_rate,
            tax_exempt: request.tax_exempt,
            method,
        });

        info!(
            method = %method,
            lane_id = %request.lane_id,
            subtotal = %fees.subtotal,
            total = %fees.total,
            "Processing sale"
        );

        let sale = SaleContext {
            fees,
            line_items: &request.line_items,
            tax_exempt: request.tax_exempt,
            customer_ref: request.customer_ref.clone(),
            lane_id: &request.lane_id,
            cashier_id: &request.cashier_id,
        };

        match &request.payment {
            PaymentInstrument::CardTerminal { device_id } => self.begin_terminal_sale(device_id, sale).await,
            instrument => self.complete_sync_sale(instrument.clone(), sale).await,
        }
    }

    /// Pushes a bare amount to a terminal.
    pub async fn start_terminal_payment(&self, request: &TerminalPaymentRequest) -> PaymentResult<SaleResult> {
        let subtotal = Money::from_cents(request.amount_cents);
        let tax = Money::from_cents(request.tax_cents);
        validate_payment_amount(subtotal)?;
        if tax.is_negative() {
            return Err(ValidationError::MustBePositive {
                field: "tax_cents".to_string(),
            }
            .into());
        }

        let surcharge = self.fees.surcharge_for(PaymentMethod::CardTerminal, subtotal + tax);
        let sale = SaleContext {
            fees: FeeBreakdown {
                subtotal,
                tax,
                surcharge,
                total: subtotal + tax + surcharge,
            },
            line_items: &[],
            tax_exempt: false,
            customer_ref: request.customer_ref.clone(),
            lane_id: &request.lane_id,
            cashier_id: &request.cashier_id,
        };
        self.begin_terminal_sale(&request.device_id, sale).await
    }

    async fn complete_sync_sale(
        &self,
        instrument: PaymentInstrument,
        sale: SaleContext<'_>,
    ) -> PaymentResult<SaleResult> {
        let method = instrument.method();
        let adapter = self.registry.get(method)?;
        let invoice_number = self.reserve_invoice_number().await?;

        let request = PaymentRequest {
            instrument,
            amount: sale.fees.subtotal,
            tax: sale.fees.tax,
            surcharge: sale.fees.surcharge,
            customer_ref: sale.customer_ref.clone(),
            invoice_number: Some(invoice_number.clone()),
            line_items: sale.line_items.to_vec(),
        };

        let outcome = adapter.authorize(&request).await?;
        if outcome.status != OutcomeStatus::Approved {
            // Only device adapters report anything else.
            return Err(PaymentError::InvalidState(format!(
                "{} adapter returned {:?}",
                method, outcome.status
            )));
        }

        let change = if method == PaymentMethod::Cash {
            CashAdapter::change_due(&request)?
        } else {
            Money::zero()
        };
        let status = if outcome.under_review {
            SaleStatus::UnderReview
        } else {
            SaleStatus::Completed
        };

        let mut entry = sale.ledger_entry(&invoice_number, method, status, None, &outcome, change);
        let sale_id = entry.sale.id.clone();

        match self.db.sales().record_renumbering(&mut entry).await {
            Ok(LedgerWrite::Recorded) => {}
            Ok(LedgerWrite::AlreadyRecorded) => {
                warn!(transaction_id = ?outcome.provider_transaction_id, "Sale already in ledger");
            }
            Err(e) => {
                error!(
                    ?e,
                    invoice_number = %invoice_number,
                    transaction_id = ?outcome.provider_transaction_id,
                    "Payment captured but ledger write failed"
                );
                return Err(e.into());
            }
        }
        let invoice_number = entry.sale.invoice_number;

        info!(
            sale_id = %sale_id,
            invoice_number = %invoice_number,
            method = %method,
            status = ?status,
            "Sale completed"
        );

        Ok(SaleResult {
            sale_id,
            invoice_number,
            status,
            pending: false,
            transaction_id: outcome.provider_transaction_id,
            order_id: None,
            under_review: outcome.under_review,
            fees: sale.fees,
            change_cents: change.cents(),
            card_last4: outcome.card_last4,
            card_brand: outcome.card_brand,
            message: outcome.message,
        })
    }

    async fn begin_terminal_sale(&self, device_id: &str, sale: SaleContext<'_>) -> PaymentResult<SaleResult> {
        validate_device_id(device_id)?;
        validate_payment_amount(sale.fees.total)?;
        let adapter = self.registry.get(PaymentMethod::CardTerminal)?;

        // The order exists before the push so a device that completes
        // after a lost response can still be reconciled.
        let order = self.create_order(&sale).await?;
        let pending = PaymentOutcome::pending(String::new());
        let entry = sale.ledger_entry(
            &order.invoice_number,
            PaymentMethod::CardTerminal,
            SaleStatus::Pending,
            Some(order.id.clone()),
            &pending,
            Money::zero(),
        );
        let sale_id = entry.sale.id.clone();
        self.db.sales().record(&entry).await?;

        let request = PaymentRequest {
            instrument: PaymentInstrument::CardTerminal {
                device_id: device_id.to_string(),
            },
            amount: sale.fees.subtotal,
            tax: sale.fees.tax,
            surcharge: sale.fees.surcharge,
            customer_ref: sale.customer_ref.clone(),
            invoice_number: Some(order.invoice_number.clone()),
            line_items: sale.line_items.to_vec(),
        };
        let initiated = TerminalState::Idle.apply(TerminalEvent::Push)?;
        let outcome = match adapter.authorize(&request).await {
            Ok(outcome) => outcome,
            Err(e) if matches!(e.kind(), ErrorKind::Validation | ErrorKind::Declined) => {
                // The device never got the payment. Anything else may have
                // reached it, so the order stays OPEN for reconciliation.
                warn!(?e, order_id = %order.id, device_id, "Terminal push refused, closing order");
                if let Err(close) = self.db.orders().mark_declined(&order.id).await {
                    error!(?close, order_id = %order.id, "Failed to close refused terminal order");
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let reference = outcome
            .provider_transaction_id
            .clone()
            .ok_or_else(|| PaymentError::gateway("terminal accepted the push without a reference"))?;
        let state = initiated.apply(TerminalEvent::Acknowledged)?;

        let now = Utc::now();
        let session = TerminalSession {
            reference: reference.clone(),
            order_id: order.id.clone(),
            device_id: device_id.trim().to_string(),
            amount_cents: order.amount_cents,
            state,
            attempts: 0,
            message: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        };
        self.db.terminal_sessions().insert(&session).await?;
        let _poll = self.terminal.start(&session).await;

        info!(
            order_id = %order.id,
            invoice_number = %order.invoice_number,
            reference = %reference,
            "Terminal sale pending"
        );

        Ok(SaleResult {
            sale_id,
            invoice_number: order.invoice_number,
            status: SaleStatus::Pending,
            pending: true,
            transaction_id: Some(reference),
            order_id: Some(order.id),
            under_review: false,
            fees: sale.fees,
            change_cents: 0,
            card_last4: None,
            card_brand: None,
            message: outcome.message,
        })
    }

    async fn create_order(&self, sale: &SaleContext<'_>) -> PaymentResult<Order> {
        let orders = self.db.orders();
        let mut last_error = None;

        for _ in 0..INVOICE_NUMBER_ATTEMPTS {
            let new = NewOrder {
                invoice_number: generate_invoice_number(),
                amount_cents: sale.fees.total.cents(),
                lane_id: sale.lane_id.to_string(),
                created_by: sale.cashier_id.to_string(),
            };
            match orders.create_open(&new).await {
                Ok(order) => return Ok(order),
                Err(e) if e.is_unique_violation() => {
                    warn!(invoice_number = %new.invoice_number, "Invoice number taken, regenerating");
                    last_error = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_error
            .map(PaymentError::from)
            .unwrap_or_else(|| PaymentError::InvalidState("no invoice number available".into())))
    }

    async fn reserve_invoice_number(&self) -> PaymentResult<String> {
        for _ in 0..INVOICE_NUMBER_ATTEMPTS {
            let candidate = generate_invoice_number();
            let taken = self.db.sales().get_by_invoice(&candidate).await?.is_some()
                || self.db.orders().get_by_invoice(&candidate).await?.is_some();
            if !taken {
                return Ok(candidate);
            }
        }
        Err(PaymentError::InvalidState("no invoice number available".into()))
    }

    // =========================================================================
    // Terminal Status
    // =========================================================================

    /// Reads the persisted session, so it works after a restart.
    pub async fn payment_status(&self, reference: &str) -> PaymentResult<PaymentStatusView> {
        let session = self.terminal.status(reference).await?;
        let order = self.db.orders().get_by_id(&session.order_id).await?;
        let payment = self.db.orders().payment_for_order(&session.order_id).await?;

        Ok(PaymentStatusView {
            pending: session.state == TerminalState::Pending,
            approved: session.state == TerminalState::Approved,
            declined: session.state == TerminalState::Declined,
            reference: session.reference,
            state: session.state,
            attempts: session.attempts,
            message: session.message,
            order_id: session.order_id,
            order_status: order.map(|o| o.status),
            transaction_id: payment.map(|p| p.provider_transaction_id),
        })
    }

    pub async fn cancel_terminal_payment(&self, reference: &str) -> PaymentResult<CancelReport> {
        self.terminal.cancel(reference).await
    }

    /// Restarts polling for device payments a previous process left pending.
    pub async fn resume(&self) -> PaymentResult<usize> {
        self.terminal.resume_pending().await
    }

    // =========================================================================
    // Orders
    // =========================================================================

    pub async fn order_payment_status(&self, order_id: &str) -> PaymentResult<OrderPaymentStatus> {
        let order = self.load_order(order_id).await?;
        let payment = self.db.orders().payment_for_order(order_id).await?;
        let terminal = self.db.terminal_sessions().get_by_order(order_id).await?;

        Ok(OrderPaymentStatus {
            paid: order.status == OrderStatus::Paid,
            order,
            payment,
            terminal,
        })
    }

    pub async fn list_orders(&self, status: OrderStatus, limit: i64) -> PaymentResult<Vec<Order>> {
        Ok(self.db.orders().list_by_status(status, limit).await?)
    }

    pub async fn void_order(&self, order_id: &str) -> PaymentResult<OrderActionResult> {
        let order = self.load_order(order_id).await?;
        order.ensure_transition(OrderStatus::Voided)?;
        let payment = self.settled_payment(&order).await?;
        let adapter = self.registry.get(self.order_method(order_id).await?)?;

        if !adapter.void(&payment.provider_transaction_id).await? {
            return Err(PaymentError::declined("provider refused the void"));
        }
        if !self.db.orders().mark_voided(order_id).await? {
            return Err(PaymentError::InvalidState(format!(
                "order {} changed while voiding; provider void {} succeeded",
                order_id, payment.provider_transaction_id
            )));
        }

        info!(order_id, transaction_id = %payment.provider_transaction_id, "Order voided");
        Ok(OrderActionResult {
            order_id: order_id.to_string(),
            status: OrderStatus::Voided,
            transaction_id: payment.provider_transaction_id.clone(),
            amount: payment.amount(),
        })
    }

    /// Refunds the full payment. REFUNDED is final, so an explicit
    /// `amount` must equal the settled amount.
    pub async fn refund_order(&self, order_id: &str, amount: Option<Money>) -> PaymentResult<OrderActionResult> {
        let order = self.load_order(order_id).await?;
        order.ensure_transition(OrderStatus::Refunded)?;
        let payment = self.settled_payment(&order).await?;

        let amount = amount.unwrap_or_else(|| payment.amount());
        if amount != payment.amount() {
            return Err(ValidationError::InvalidFormat {
                field: "amount".to_string(),
                reason: format!(
                    "partial refunds are not supported, refund the full {}",
                    payment.amount()
                ),
            }
            .into());
        }

        let adapter = self.registry.get(self.order_method(order_id).await?)?;
        if !adapter.refund(&payment.provider_transaction_id, amount).await? {
            return Err(PaymentError::declined("provider refused the refund"));
        }
        if !self.db.orders().mark_refunded(order_id).await? {
            return Err(PaymentError::InvalidState(format!(
                "order {} changed while refunding; provider refund {} succeeded",
                order_id, payment.provider_transaction_id
            )));
        }

        info!(order_id, transaction_id = %payment.provider_transaction_id, amount = %amount, "Order refunded");
        Ok(OrderActionResult {
            order_id: order_id.to_string(),
            status: OrderStatus::Refunded,
            transaction_id: payment.provider_transaction_id.clone(),
            amount,
        })
    }

    async fn load_order(&self, order_id: &str) -> PaymentResult<Order> {
        self.db
            .orders()
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound {
                entity: "Order",
                id: order_id.to_string(),
            })
    }

    async fn settled_payment(&self, order: &Order) -> PaymentResult<Payment> {
        self.db
            .orders()
            .payment_for_order(&order.id)
            .await?
            .ok_or_else(|| PaymentError::InvalidState(format!("order {} has no settled payment", order.id)))
    }

    /// Orders are created by device sales; the ledger row names the method.
    async fn order_method(&self, order_id: &str) -> PaymentResult<PaymentMethod> {
        Ok(self
            .db
            .sales()
            .get_by_order(order_id)
            .await?
            .map(|s| s.method)
            .unwrap_or(PaymentMethod::CardTerminal))
    }

    // =========================================================================
    // Bulk / Health
    // =========================================================================

    pub async fn charge_invoices(&self, request: &BulkChargeRequest) -> PaymentResult<BulkChargeReport> {
        self.bulk.charge(request).await
    }

    pub async fn health(&self) -> PaymentResult<HealthReport> {
        let database = self.db.health_check().await;
        let open_orders = self.db.orders().count_by_status(OrderStatus::Open).await?;
        let pending = self
            .db
            .terminal_sessions()
            .list_by_state(TerminalState::Pending)
            .await?
            .len();
        let conflicts = self.db.conflicts().list_unresolved(1_000).await?.len();

        Ok(HealthReport {
            database,
            open_orders,
            pending_terminal_payments: pending,
            unresolved_conflicts: conflicts,
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Priced sale shared by the sync and device paths.
struct SaleContext<'a> {
    fees: FeeBreakdown,
    line_items: &'a [LineItem],
    tax_exempt: bool,
    customer_ref: Option<String>,
    lane_id: &'a str,
    cashier_id: &'a str,
}

impl SaleContext<'_> {
    fn ledger_entry(
        &self,
        invoice_number: &str,
        method: PaymentMethod,
        status: SaleStatus,
        order_id: Option<String>,
        outcome: &PaymentOutcome,
        change: Money,
    ) -> LedgerEntry {
        let now = Utc::now();
        let sale_id = generate_id();
        let settled = status == SaleStatus::Completed;

        let sale = Sale {
            id: sale_id.clone(),
            invoice_number: invoice_number.to_string(),
            order_id,
            status,
            method,
            subtotal_cents: self.fees.subtotal.cents(),
            tax_cents: self.fees.tax.cents(),
            surcharge_cents: self.fees.surcharge.cents(),
            total_cents: self.fees.total.cents(),
            tax_exempt: self.tax_exempt,
            customer_ref: self.customer_ref.clone(),
            lane_id: self.lane_id.to_string(),
            created_by: self.cashier_id.to_string(),
            created_at: now,
            updated_at: now,
            completed_at: settled.then_some(now),
        };

        let items = self
            .line_items
            .iter()
            .map(|line| SaleItem {
                id: generate_id(),
                sale_id: sale_id.clone(),
                item_id: line.item_id.clone(),
                name_snapshot: line.name.clone(),
                unit_price_cents: line.unit_price_cents,
                quantity_milli: line.quantity_milli,
                uom_multiplier_milli: line.uom_multiplier_milli,
                line_total_cents: line.line_total().cents(),
            })
            .collect();

        // A pending device sale gets its transaction id at settlement.
        let provider_transaction_id = match status {
            SaleStatus::Pending => None,
            _ => outcome.provider_transaction_id.clone(),
        };

        let tender = SaleTender {
            id: generate_id(),
            sale_id,
            method,
            amount_cents: self.fees.total.cents(),
            provider_transaction_id,
            auth_code: outcome.auth_code.clone(),
            card_last4: outcome.card_last4.clone(),
            card_brand: outcome.card_brand.clone(),
            change_cents: change.cents(),
            created_at: now,
        };

        LedgerEntry {
            sale,
            items,
            tenders: vec![tender],
        }
    }
}

fn validate_lines(lines: &[LineItem]) -> PaymentResult<()> {
    if lines.is_empty() {
        return Err(ValidationError::Required {
            field: "line_items".to_string(),
        }
        .into());
    }
    if lines.len() > MAX_LINE_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: "line_items".to_string(),
            min: 1,
            max: MAX_LINE_ITEMS as i64,
        }
        .into());
    }
    for line in lines {
        if line.quantity_milli <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "quantity".to_string(),
            }
            .into());
        }
        if line.unit_price_cents < 0 || line.uom_multiplier_milli <= 0 {
            return Err(ValidationError::InvalidFormat {
                field: "line_items".to_string(),
                reason: format!("line {} has a negative price or multiplier", line.item_id),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::StoredProfileAdapter;
    use crate::poller::PollPolicy;
    use crate::testing::{PollStep, PushFailure, Scripted, StubGateway, StubTerminal};
    use tender_core::CardDetails;
    use tender_db::DbConfig;

    struct Harness {
        orchestrator: PaymentOrchestrator,
        db: Database,
        gateway: Arc<StubGateway>,
        terminal: Arc<StubTerminal>,
    }

    async fn harness(gateway: StubGateway, terminal: StubTerminal) -> Harness {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let gateway = Arc::new(gateway);
        let terminal = Arc::new(terminal);

        let registry = AdapterRegistry::standard(gateway.clone(), terminal.clone());
        let fast = PollPolicy::new(Duration::from_millis(10), 5);
        let service = TerminalService::new(db.clone(), terminal.clone(), fast, fast);
        let bulk = BulkCharger::new(
            db.clone(),
            Arc::new(StoredProfileAdapter::card(gateway.clone())),
            Arc::new(StoredProfileAdapter::ach(gateway.clone())),
            FeeCalculator::default(),
            None,
        );
        let orchestrator = PaymentOrchestrator::new(
            db.clone(),
            registry,
            service,
            bulk,
            FeeCalculator::default(),
            TaxRate::zero(),
        );

        Harness {
            orchestrator,
            db,
            gateway,
            terminal,
        }
    }

    fn line(price: i64) -> LineItem {
        LineItem {
            item_id: "SKU-1".to_string(),
            name: "Shop towels".to_string(),
            unit_price_cents: price,
            quantity_milli: 1_000,
            uom_multiplier_milli: 1_000,
        }
    }

    fn sale(payment: PaymentInstrument, price: i64, tax_bps: u32) -> SaleRequest {
        SaleRequest {
            payment,
            line_items: vec![line(price)],
            tax_rate_bps: Some(tax_bps),
            tax_exempt: false,
            customer_ref: None,
            lane_id: "lane-1".to_string(),
            cashier_id: "cashier-7".to_string(),
        }
    }

    fn card() -> PaymentInstrument {
        PaymentInstrument::CardManual(CardDetails {
            number: "4111111111111111".to_string(),
            expiry: "12/30".to_string(),
            cvv: "123".to_string(),
            zip: None,
        })
    }

    async fn wait_for_order(db: &Database, order_id: &str, status: OrderStatus) {
        for _ in 0..200 {
            let order = db.orders().get_by_id(order_id).await.unwrap().unwrap();
            if order.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("order {} never reached {}", order_id, status);
    }

    #[tokio::test]
    async fn test_card_sale_writes_completed_ledger() {
        let h = harness(StubGateway::approving(), StubTerminal::new()).await;

        let result = h.orchestrator.process_sale(&sale(card(), 10_000, 750)).await.unwrap();

        assert_eq!(result.status, SaleStatus::Completed);
        assert!(!result.pending);
        assert_eq!(result.fees.total, Money::from_cents(11_073));
        assert_eq!(h.gateway.charged(), vec![Money::from_cents(11_073)]);
        assert_eq!(result.card_last4.as_deref(), Some("1111"));

        let stored = h.db.sales().get_by_id(&result.sale_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SaleStatus::Completed);
        assert_eq!(stored.surcharge_cents, 323);
        let items = h.db.sales().get_items(&result.sale_id).await.unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_cash_sale_returns_change() {
        let h = harness(StubGateway::approving(), StubTerminal::new()).await;

        let result = h
            .orchestrator
            .process_sale(&sale(PaymentInstrument::Cash { cash_received_cents: 2_000 }, 1_500, 0))
            .await
            .unwrap();

        assert_eq!(result.fees.surcharge, Money::zero());
        assert_eq!(result.change_cents, 500);
        assert_eq!(h.gateway.charge_count(), 0);

        let tenders = h.db.sales().get_tenders(&result.sale_id).await.unwrap();
        assert_eq!(tenders[0].change_cents, 500);
    }

    #[tokio::test]
    async fn test_declined_sale_writes_nothing() {
        let h = harness(
            StubGateway::scripted(vec![Scripted::Decline("This transaction has been declined.")]),
            StubTerminal::new(),
        )
        .await;

        let err = h.orchestrator.process_sale(&sale(card(), 10_000, 0)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Declined { .. }));
        assert!(err.is_retry_safe());

        assert_eq!(sale_count(&h.db).await, 0);
    }

    #[tokio::test]
    async fn test_under_review_is_not_completed() {
        let h = harness(StubGateway::scripted(vec![Scripted::Review]), StubTerminal::new()).await;

        let result = h.orchestrator.process_sale(&sale(card(), 10_000, 0)).await.unwrap();
        assert!(result.under_review);
        assert_eq!(result.status, SaleStatus::UnderReview);

        let stored = h.db.sales().get_by_id(&result.sale_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SaleStatus::UnderReview);
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cart_is_rejected_before_any_call() {
        let h = harness(StubGateway::approving(), StubTerminal::new()).await;

        let mut request = sale(card(), 10_000, 0);
        request.line_items.clear();
        let err = h.orchestrator.process_sale(&request).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(_)));

        let err = h.orchestrator.process_sale(&sale(card(), 10_000, 10_001)).await.unwrap_err();
        assert!(matches!(err, PaymentError::Validation(ValidationError::OutOfRange { .. })));
        assert_eq!(h.gateway.charge_count(), 0);
    }

    #[tokio::test]
    async fn test_terminal_sale_settles_through_poller() {
        let h = harness(
            StubGateway::approving(),
            StubTerminal::with_statuses(vec![PollStep::Pending, PollStep::Approve]),
        )
        .await;

        let request = sale(
            PaymentInstrument::CardTerminal {
                device_id: "EPI-0042".to_string(),
            },
            2_000,
            750,
        );
        let result = h.orchestrator.process_sale(&request).await.unwrap();

        assert!(result.pending);
        assert_eq!(result.status, SaleStatus::Pending);
        let reference = result.transaction_id.clone().unwrap();
        let order_id = result.order_id.clone().unwrap();
        assert_eq!(h.terminal.pushes()[0].invoice_number, result.invoice_number);

        wait_for_order(&h.db, &order_id, OrderStatus::Paid).await;

        let sale = h.db.sales().get_by_id(&result.sale_id).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);

        let status = h.orchestrator.payment_status(&reference).await.unwrap();
        assert!(status.approved);
        assert_eq!(status.order_status, Some(OrderStatus::Paid));
        assert_eq!(status.transaction_id.as_deref(), Some("T-ref-1"));

        let order_status = h.orchestrator.order_payment_status(&order_id).await.unwrap();
        assert!(order_status.paid);
    }

    fn device_sale() -> SaleRequest {
        sale(
            PaymentInstrument::CardTerminal {
                device_id: "EPI-0042".to_string(),
            },
            2_000,
            0,
        )
    }

    #[tokio::test]
    async fn test_terminal_session_starts_pending() {
        let h = harness(StubGateway::approving(), StubTerminal::new()).await;

        let result = h.orchestrator.process_sale(&device_sale()).await.unwrap();

        let session = h
            .db
            .terminal_sessions()
            .get(result.transaction_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.state, TerminalState::Pending);
        assert_eq!(session.order_id, result.order_id.unwrap());
    }

    #[tokio::test]
    async fn test_refused_push_closes_order() {
        let terminal = StubTerminal::new();
        terminal.fail_pushes(PushFailure::Rejected);
        let h = harness(StubGateway::approving(), terminal).await;

        let err = h.orchestrator.process_sale(&device_sale()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Declined { .. }));

        let invoice = h.terminal.pushes()[0].invoice_number.clone();
        let order = h.db.orders().get_by_invoice(&invoice).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Declined);
        let sale = h.db.sales().get_by_order(&order.id).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Declined);
        assert!(h.db.terminal_sessions().get_by_order(&order.id).await.unwrap().is_none());
        assert!(h.db.orders().list_open(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_push_outcome_keeps_order_open() {
        let terminal = StubTerminal::new();
        terminal.fail_pushes(PushFailure::Unreachable);
        let h = harness(StubGateway::approving(), terminal).await;

        let err = h.orchestrator.process_sale(&device_sale()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Gateway { .. }));
        assert!(!err.is_retry_safe());

        let invoice = h.terminal.pushes()[0].invoice_number.clone();
        let order = h.db.orders().get_by_invoice(&invoice).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        let sale = h.db.sales().get_by_order(&order.id).await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Pending);
    }

    #[tokio::test]
    async fn test_void_and_refund_follow_order_lifecycle() {
        let h = harness(
            StubGateway::approving(),
            StubTerminal::with_statuses(vec![PollStep::Approve, PollStep::Approve]),
        )
        .await;

        let push = |device: &str| TerminalPaymentRequest {
            device_id: device.to_string(),
            amount_cents: 5_000,
            tax_cents: 0,
            customer_ref: None,
            lane_id: "lane-1".to_string(),
            cashier_id: "cashier-7".to_string(),
        };

        let first = h.orchestrator.start_terminal_payment(&push("EPI-1")).await.unwrap();
        let first_order = first.order_id.unwrap();
        wait_for_order(&h.db, &first_order, OrderStatus::Paid).await;

        let voided = h.orchestrator.void_order(&first_order).await.unwrap();
        assert_eq!(voided.status, OrderStatus::Voided);
        assert_eq!(h.terminal.void_count(), 1);

        // Voided is final: the provider is not called again.
        let err = h.orchestrator.refund_order(&first_order, None).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
        assert_eq!(h.terminal.refund_count(), 0);

        let second = h.orchestrator.start_terminal_payment(&push("EPI-2")).await.unwrap();
        let second_order = second.order_id.unwrap();
        wait_for_order(&h.db, &second_order, OrderStatus::Paid).await;

        for cents in [999_999, 1_000] {
            let err = h
                .orchestrator
                .refund_order(&second_order, Some(Money::from_cents(cents)))
                .await
                .unwrap_err();
            assert!(matches!(err, PaymentError::Validation(ValidationError::InvalidFormat { .. })));
        }
        assert_eq!(h.terminal.refund_count(), 0);

        let refunded = h.orchestrator.refund_order(&second_order, None).await.unwrap();
        assert_eq!(refunded.status, OrderStatus::Refunded);
        let settled = h.db.orders().payment_for_order(&second_order).await.unwrap().unwrap();
        assert_eq!(refunded.amount, settled.amount());
        assert_eq!(h.terminal.refund_count(), 1);
    }

    #[tokio::test]
    async fn test_void_open_order_never_calls_provider() {
        let h = harness(StubGateway::approving(), StubTerminal::new()).await;

        let order = h
            .db
            .orders()
            .create_open(&NewOrder {
                invoice_number: "2610189999".to_string(),
                amount_cents: 1_000,
                lane_id: "lane-1".to_string(),
                created_by: "cashier-7".to_string(),
            })
            .await
            .unwrap();

        let err = h.orchestrator.void_order(&order.id).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidState(_)));
        assert_eq!(h.terminal.void_count(), 0);

        let err = h.orchestrator.void_order("missing").await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_health_counts_open_orders() {
        let h = harness(StubGateway::approving(), StubTerminal::new()).await;

        let request = sale(
            PaymentInstrument::CardTerminal {
                device_id: "EPI-0042".to_string(),
            },
            2_000,
            0,
        );
        h.orchestrator.process_sale(&request).await.unwrap();

        let health = h.orchestrator.health().await.unwrap();
        assert!(health.database);
        assert_eq!(health.open_orders, 1);
        assert_eq!(health.unresolved_conflicts, 0);
    }

    async fn sale_count(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }
}
