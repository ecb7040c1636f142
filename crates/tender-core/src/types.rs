//! # Domain Types
//!
//! Core domain types for the Tender payment engine.
//!
//! ## Type Relationships
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Payment Domain Model                               │
//! │                                                                         │
//! │  PaymentRequest ──(one adapter)──► PaymentOutcome                      │
//! │   ├─ PaymentInstrument (tagged by method)                              │
//! │   └─ LineItem[]                                                        │
//! │                                                                         │
//! │  ┌─────────────┐ 1      0..1 ┌──────────────┐                          │
//! │  │    Order    │─────────────│   Payment    │  unique provider txn id  │
//! │  │ OPEN → PAID │             │  (settled)   │                          │
//! │  │ → VOIDED    │             └──────────────┘                          │
//! │  │ → REFUNDED  │                                                       │
//! │  └──────┬──────┘                                                       │
//! │         │ 0..1                                                         │
//! │  ┌──────▼──────┐ 1        * ┌──────────────┐ 1       * ┌────────────┐  │
//! │  │    Sale     │────────────│   SaleItem   │           │ SaleTender │  │
//! │  │  (ledger)   │────────────────────────────────────────│            │  │
//! │  └─────────────┘            └──────────────┘           └────────────┘  │
//! │                                                                         │
//! │  InvoicePaymentRecord   append-only, one per charged document          │
//! │  TerminalSession        persisted polling key for device payments      │
//! │  ReconciliationConflict operator alert record                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sensitive Data
//! [`CardDetails`], [`OpaqueData`] and [`BankAccount`] are deserialize-only
//! and print `[REDACTED]` from `Debug`. They live for one authorization call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

use crate::error::{CoreError, ValidationError};
use crate::money::Money;
use crate::terminal::TerminalState;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// 1 basis point = 0.01%, so 750 bps = 7.5%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

/// Parses a percentage string from the catalog ("7.5", "8.25", "0").
///
/// Parsed digit by digit so no float ever touches the rate.
impl FromStr for TaxRate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFormat {
            field: "tax_rate".to_string(),
            reason: format!("'{}' is not a percentage", s),
        };

        let s = s.trim().trim_end_matches('%');
        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty()
            || frac.len() > 2
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !frac.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: u32 = whole.parse().map_err(|_| invalid())?;
        let frac: u32 = match frac.len() {
            0 => 0,
            1 => frac.parse::<u32>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };

        let bps = whole * 100 + frac;
        if bps > 10_000 {
            return Err(ValidationError::OutOfRange {
                field: "tax_rate".to_string(),
                min: 0,
                max: 100,
            });
        }
        Ok(TaxRate(bps))
    }
}

// =============================================================================
// Payment Method
// =============================================================================

/// How the customer is paying. Selects exactly one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    CardManual,
    CardTerminal,
    CardReaderToken,
    CardStoredProfile,
    AchStoredProfile,
    Ach,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 7] = [
        PaymentMethod::Cash,
        PaymentMethod::CardManual,
        PaymentMethod::CardTerminal,
        PaymentMethod::CardReaderToken,
        PaymentMethod::CardStoredProfile,
        PaymentMethod::AchStoredProfile,
        PaymentMethod::Ach,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::CardManual => "card_manual",
            PaymentMethod::CardTerminal => "card_terminal",
            PaymentMethod::CardReaderToken => "card_reader_token",
            PaymentMethod::CardStoredProfile => "card_stored_profile",
            PaymentMethod::AchStoredProfile => "ach_stored_profile",
            PaymentMethod::Ach => "ach",
        }
    }

    /// Card methods carry the card-network surcharge.
    pub const fn is_card(&self) -> bool {
        matches!(
            self,
            PaymentMethod::CardManual
                | PaymentMethod::CardTerminal
                | PaymentMethod::CardReaderToken
                | PaymentMethod::CardStoredProfile
        )
    }

    /// Device-driven methods whose outcome arrives via polling.
    pub const fn is_async(&self) -> bool {
        matches!(self, PaymentMethod::CardTerminal)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Instruments (sensitive)
// =============================================================================

/// Manually keyed card. Never persisted, never logged.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub number: String,
    /// `MM/YY`, `MMYY` or `MM/YYYY`.
    pub expiry: String,
    pub cvv: String,
    pub zip: Option<String>,
}

impl CardDetails {
    /// Last four digits for receipts and display.
    pub fn last4(&self) -> String {
        let digits: Vec<char> = self.number.chars().filter(|c| c.is_ascii_digit()).collect();
        let start = digits.len().saturating_sub(4);
        digits[start..].iter().collect()
    }
}

impl fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &format_args!("****{}", self.last4()))
            .field("expiry", &"[REDACTED]")
            .field("cvv", &"[REDACTED]")
            .field("zip", &self.zip.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Client-side tokenized card data from a USB/Bluetooth reader.
///
/// Forwarded to the gateway verbatim; its contents are never parsed.
#[derive(Clone, Deserialize)]
pub struct OpaqueData {
    pub descriptor: String,
    pub value: String,
}

impl fmt::Debug for OpaqueData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpaqueData")
            .field("descriptor", &"[REDACTED]")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Gateway-held CIM profile reference. Safe to store and log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StoredPaymentProfile {
    pub customer_profile_id: String,
    pub payment_profile_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
}

impl AccountType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
        }
    }
}

/// Bank account for a one-off ACH debit. Never persisted, never logged.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub routing_number: String,
    pub account_number: String,
    pub account_type: AccountType,
    pub name_on_account: String,
}

impl fmt::Debug for BankAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BankAccount")
            .field("routing_number", &"[REDACTED]")
            .field("account_number", &"[REDACTED]")
            .field("account_type", &self.account_type)
            .finish()
    }
}

/// The payment instrument, tagged by method.
///
/// The method lives in the tag, so a request can never carry card data
/// for a cash sale or a device id for an ACH debit.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum PaymentInstrument {
    Cash { cash_received_cents: i64 },
    CardManual(CardDetails),
    CardTerminal { device_id: String },
    CardReaderToken(OpaqueData),
    CardStoredProfile(StoredPaymentProfile),
    AchStoredProfile(StoredPaymentProfile),
    Ach(BankAccount),
}

impl PaymentInstrument {
    pub const fn method(&self) -> PaymentMethod {
        match self {
            PaymentInstrument::Cash { .. } => PaymentMethod::Cash,
            PaymentInstrument::CardManual(_) => PaymentMethod::CardManual,
            PaymentInstrument::CardTerminal { .. } => PaymentMethod::CardTerminal,
            PaymentInstrument::CardReaderToken(_) => PaymentMethod::CardReaderToken,
            PaymentInstrument::CardStoredProfile(_) => PaymentMethod::CardStoredProfile,
            PaymentInstrument::AchStoredProfile(_) => PaymentMethod::AchStoredProfile,
            PaymentInstrument::Ach(_) => PaymentMethod::Ach,
        }
    }
}

// =============================================================================
// Line Item
// =============================================================================

fn default_milli() -> i64 {
    1_000
}

/// A priced line supplied by the catalog collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub item_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    /// Quantity in thousandths (1 each = 1000, 2.5 lb = 2500).
    #[serde(default = "default_milli")]
    pub quantity_milli: i64,
    /// Unit-of-measure price multiplier in thousandths (case of 12 = 12000).
    #[serde(default = "default_milli")]
    pub uom_multiplier_milli: i64,
}

impl LineItem {
    /// price × uom multiplier × quantity, rounded half up once.
    pub fn line_total(&self) -> Money {
        let product = self.unit_price_cents as i128
            * self.uom_multiplier_milli as i128
            * self.quantity_milli as i128;
        let rounded = if product >= 0 {
            (product + 500_000) / 1_000_000
        } else {
            (product - 500_000) / 1_000_000
        };
        Money::from_cents(rounded as i64)
    }
}

// =============================================================================
// Payment Request / Outcome
// =============================================================================

/// One immutable payment attempt, consumed by exactly one adapter.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub instrument: PaymentInstrument,
    /// Subtotal before tax and surcharge.
    pub amount: Money,
    pub tax: Money,
    pub surcharge: Money,
    pub customer_ref: Option<String>,
    /// Invoice number sent to the provider as reconciliation metadata.
    pub invoice_number: Option<String>,
    pub line_items: Vec<LineItem>,
}

impl PaymentRequest {
    #[inline]
    pub fn method(&self) -> PaymentMethod {
        self.instrument.method()
    }

    /// Amount actually charged to the instrument.
    #[inline]
    pub fn total(&self) -> Money {
        self.amount + self.tax + self.surcharge
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Approved,
    Declined,
    /// Only produced by device methods.
    Pending,
    Timeout,
    Error,
}

/// What an adapter reports back.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub status: OutcomeStatus,
    pub provider_transaction_id: Option<String>,
    pub auth_code: Option<String>,
    /// Gateway accepted but held for fraud review. Funds not guaranteed.
    pub under_review: bool,
    pub message: String,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
}

impl PaymentOutcome {
    pub fn approved(provider_transaction_id: Option<String>, message: impl Into<String>) -> Self {
        PaymentOutcome {
            status: OutcomeStatus::Approved,
            provider_transaction_id,
            auth_code: None,
            under_review: false,
            message: message.into(),
            card_last4: None,
            card_brand: None,
        }
    }

    pub fn pending(reference: impl Into<String>) -> Self {
        PaymentOutcome {
            status: OutcomeStatus::Pending,
            provider_transaction_id: Some(reference.into()),
            auth_code: None,
            under_review: false,
            message: "Waiting for terminal".to_string(),
            card_last4: None,
            card_brand: None,
        }
    }

    pub fn with_auth_code(mut self, auth_code: Option<String>) -> Self {
        self.auth_code = auth_code;
        self
    }

    pub fn with_card(mut self, last4: Option<String>, brand: Option<String>) -> Self {
        self.card_last4 = last4;
        self.card_brand = brand;
        self
    }

    pub fn under_review(mut self) -> Self {
        self.under_review = true;
        self
    }

    /// Approved and not held for review: funds are captured.
    pub fn is_settled(&self) -> bool {
        self.status == OutcomeStatus::Approved && !self.under_review
    }
}

// =============================================================================
// Order
// =============================================================================

/// Order lifecycle.
///
/// ```text
/// OPEN ──(reconciliation)──► PAID ──(cashier)──► VOIDED
///   │                          └────(cashier)──► REFUNDED
///   └──(device/push declined)──► DECLINED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    Paid,
    Voided,
    Refunded,
    /// The provider definitively refused the payment. Never reconciled.
    Declined,
}

impl OrderStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::Paid => "paid",
            OrderStatus::Voided => "voided",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Declined => "declined",
        }
    }

    /// VOIDED, REFUNDED and DECLINED accept no further transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Voided | OrderStatus::Refunded | OrderStatus::Declined)
    }

    pub const fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Open, OrderStatus::Paid)
                | (OrderStatus::Open, OrderStatus::Declined)
                | (OrderStatus::Paid, OrderStatus::Voided)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(OrderStatus::Open),
            "paid" => Ok(OrderStatus::Paid),
            "voided" => Ok(OrderStatus::Voided),
            "refunded" => Ok(OrderStatus::Refunded),
            "declined" => Ok(OrderStatus::Declined),
            _ => Err(ValidationError::InvalidFormat {
                field: "status".to_string(),
                reason: format!("unknown order status '{}'", s),
            }),
        }
    }
}

/// A terminal sale awaiting (or past) provider settlement.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    /// 10-digit number the cashier can key into a terminal.
    pub invoice_number: String,
    pub amount_cents: i64,
    pub status: OrderStatus,
    pub lane_id: String,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    /// Checks the lifecycle before any side effect is attempted.
    pub fn ensure_transition(&self, next: OrderStatus) -> Result<(), CoreError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(CoreError::InvalidOrderTransition {
                order_id: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            })
        }
    }
}

// =============================================================================
// Payment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Authorized,
    Captured,
    Voided,
    Refunded,
}

/// Provider settlement matched to an order. Owned by its order.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub provider_transaction_id: String,
    pub auth_code: Option<String>,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    #[ts(as = "Option<String>")]
    pub settled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Sale Ledger
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Terminal sale waiting for settlement.
    Pending,
    /// Gateway accepted but held for review.
    UnderReview,
    /// Funds captured.
    Completed,
    Voided,
    Refunded,
    /// Terminal sale the provider refused.
    Declined,
}

/// A finalized (or awaiting) transaction in the sale ledger.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: String,
    pub invoice_number: String,
    pub order_id: Option<String>,
    pub status: SaleStatus,
    pub method: PaymentMethod,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub surcharge_cents: i64,
    pub total_cents: i64,
    pub tax_exempt: bool,
    pub customer_ref: Option<String>,
    pub lane_id: String,
    pub created_by: String,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// A line item in a sale.
/// Snapshot of the catalog line at the time of sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub item_id: String,
    pub name_snapshot: String,
    pub unit_price_cents: i64,
    pub quantity_milli: i64,
    pub uom_multiplier_milli: i64,
    pub line_total_cents: i64,
}

/// How the sale was paid.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SaleTender {
    pub id: String,
    pub sale_id: String,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    pub provider_transaction_id: Option<String>,
    pub auth_code: Option<String>,
    pub card_last4: Option<String>,
    pub card_brand: Option<String>,
    /// Cash only.
    pub change_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Invoice Payment Record
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    SalesOrder,
}

impl DocumentType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "invoice",
            DocumentType::SalesOrder => "sales_order",
        }
    }
}

/// Outcome of charging one accounting document. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct InvoicePaymentRecord {
    pub id: String,
    pub customer_ref: String,
    pub document_type: DocumentType,
    pub document_id: String,
    pub amount_cents: i64,
    /// Amount plus surcharge.
    pub amount_charged_cents: i64,
    pub cc_fee_cents: i64,
    pub transaction_id: String,
    pub under_review: bool,
    pub recorded_in_accounting: bool,
    pub card_last4: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Terminal Session
// =============================================================================

/// Persisted polling key for a device payment.
///
/// The reference alone is enough to resume polling after a restart.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSession {
    pub reference: String,
    pub order_id: String,
    pub device_id: String,
    pub amount_cents: i64,
    pub state: TerminalState,
    pub attempts: i64,
    pub message: Option<String>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Reconciliation Conflict
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// A settlement arrived for an order that is not OPEN.
    OrderNotOpen,
    /// The provider transaction id is already recorded against another order.
    DuplicateTransaction,
    /// The terminal approved a payment the cashier had cancelled.
    ApprovedAfterCancel,
}

impl ConflictKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::OrderNotOpen => "order_not_open",
            ConflictKind::DuplicateTransaction => "duplicate_transaction",
            ConflictKind::ApprovedAfterCancel => "approved_after_cancel",
        }
    }
}

/// Operator-facing record of a settlement that could not be applied.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationConflict {
    pub id: String,
    pub kind: ConflictKind,
    pub order_id: Option<String>,
    pub provider_transaction_id: Option<String>,
    pub detail: String,
    pub resolved: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub resolved_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Unit Tests
// =============================================================================
