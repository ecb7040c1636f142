//! # Card / ACH Gateway Client
//!
//! One synchronous authorize+capture call per charge, plus void and refund.
//! The HTTP implementation speaks the Authorize.Net JSON API.
//!
//! ## Response Codes
//! ```text
//! ┌──────────────┬────────────────────┬──────────────────────────────────┐
//! │ responseCode │ ResponseCode       │ Adapter result                   │
//! ├──────────────┼────────────────────┼──────────────────────────────────┤
//! │ "1"          │ Approved           │ Ok(approved)                     │
//! │ "4"          │ HeldForReview      │ Ok(approved, under_review)       │
//! │ "2"          │ Declined           │ Err(Declined)                    │
//! │ "3"          │ Error              │ Err(Declined) - no funds moved   │
//! │ no response  │ -                  │ Err(Gateway) - outcome unknown   │
//! └──────────────┴────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Field order inside `transactionRequest` is significant to the gateway,
//! so requests are typed structs rather than ad hoc JSON maps.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::GatewaySettings;
use crate::error::{PaymentError, PaymentResult};
use tender_core::validation::validate_expiry;
use tender_core::{
    BankAccount, CardDetails, LineItem, Money, OpaqueData, PaymentOutcome, PaymentRequest,
    StoredPaymentProfile,
};

/// Authorize.Net limits.
const MAX_LINE_ITEMS: usize = 30;
const MAX_NAME_LEN: usize = 31;
const MAX_CUSTOMER_ID_LEN: usize = 20;

// =============================================================================
// Client Contract
// =============================================================================

/// What is being charged. Borrowed for the duration of one call only.
#[derive(Debug, Clone, Copy)]
pub enum GatewayPayment<'a> {
    Card(&'a CardDetails),
    Opaque(&'a OpaqueData),
    Profile(&'a StoredPaymentProfile),
    Bank(&'a BankAccount),
}

#[derive(Debug, Clone, Copy)]
pub struct GatewayCharge<'a> {
    pub payment: GatewayPayment<'a>,
    /// Amount captured, tax and surcharge included.
    pub amount: Money,
    pub tax: Money,
    pub invoice_number: Option<&'a str>,
    pub customer_ref: Option<&'a str>,
    pub line_items: &'a [LineItem],
}

impl<'a> GatewayCharge<'a> {
    pub fn from_request(request: &'a PaymentRequest, payment: GatewayPayment<'a>) -> Self {
        GatewayCharge {
            payment,
            amount: request.total(),
            tax: request.tax,
            invoice_number: request.invoice_number.as_deref(),
            customer_ref: request.customer_ref.as_deref(),
            line_items: &request.line_items,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Approved,
    Declined,
    Error,
    HeldForReview,
}

impl ResponseCode {
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(ResponseCode::Approved),
            "2" => Some(ResponseCode::Declined),
            "3" => Some(ResponseCode::Error),
            "4" => Some(ResponseCode::HeldForReview),
            _ => None,
        }
    }
}

/// A definitive gateway answer.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub code: ResponseCode,
    pub transaction_id: Option<String>,
    pub auth_code: Option<String>,
    /// Masked, e.g. `XXXX1111`.
    pub account_number: Option<String>,
    /// Card brand or `eCheck`.
    pub account_type: Option<String>,
    pub message: String,
}

impl GatewayResponse {
    pub fn card_last4(&self) -> Option<String> {
        let digits: String = self
            .account_number
            .as_deref()?
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect();
        let start = digits.len().checked_sub(4)?;
        Some(digits[start..].to_string())
    }

    /// Whether a void or refund went through.
    pub fn is_accepted(&self) -> bool {
        matches!(self.code, ResponseCode::Approved | ResponseCode::HeldForReview)
    }

    /// Maps a charge response onto the adapter result.
    pub fn into_outcome(self) -> PaymentResult<PaymentOutcome> {
        let last4 = self.card_last4();
        match self.code {
            ResponseCode::Approved | ResponseCode::HeldForReview => {
                let outcome = PaymentOutcome::approved(self.transaction_id, self.message)
                    .with_auth_code(self.auth_code)
                    .with_card(last4, self.account_type);
                if self.code == ResponseCode::HeldForReview {
                    Ok(outcome.under_review())
                } else {
                    Ok(outcome)
                }
            }
            ResponseCode::Declined | ResponseCode::Error => Err(PaymentError::declined(self.message)),
        }
    }
}

#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Authorize and capture in one call.
    async fn charge(&self, charge: &GatewayCharge<'_>) -> PaymentResult<GatewayResponse>;

    async fn void(&self, transaction_id: &str) -> PaymentResult<GatewayResponse>;

    async fn refund(&self, transaction_id: &str, amount: Money) -> PaymentResult<GatewayResponse>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MerchantAuthentication<'a> {
    name: &'a str,
    transaction_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionEnvelope<'a> {
    create_transaction_request: CreateTransactionRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionRequest<'a> {
    merchant_authentication: MerchantAuthentication<'a>,
    transaction_request: TransactionRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionRequest<'a> {
    transaction_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payment: Option<WirePayment<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    profile: Option<WireProfile<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ref_trans_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    order: Option<WireOrder<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    line_items: Option<WireLineItems>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tax: Option<WireAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer: Option<WireCustomer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bill_to: Option<WireBillTo<'a>>,
}

impl<'a> TransactionRequest<'a> {
    fn new(transaction_type: &'static str) -> Self {
        TransactionRequest {
            transaction_type,
            amount: None,
            payment: None,
            profile: None,
            ref_trans_id: None,
            order: None,
            line_items: None,
            tax: None,
            customer: None,
            bill_to: None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum WirePayment<'a> {
    CreditCard(WireCard<'a>),
    OpaqueData(WireOpaque<'a>),
    BankAccount(WireBank),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireCard<'a> {
    card_number: String,
    expiration_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    card_code: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOpaque<'a> {
    data_descriptor: &'a str,
    data_value: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBank {
    account_type: String,
    routing_number: String,
    account_number: String,
    name_on_account: String,
    #[serde(rename = "echeckType", skip_serializing_if = "Option::is_none")]
    echeck_type: Option<&'static str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireProfile<'a> {
    customer_profile_id: &'a str,
    payment_profile: WirePaymentProfile<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePaymentProfile<'a> {
    payment_profile_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOrder<'a> {
    invoice_number: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireLineItems {
    line_item: Vec<WireLineItem>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireLineItem {
    item_id: String,
    name: String,
    quantity: String,
    unit_price: String,
}

#[derive(Serialize)]
struct WireAmount {
    amount: String,
    name: &'static str,
}

#[derive(Serialize)]
struct WireCustomer {
    id: String,
}

#[derive(Serialize)]
struct WireBillTo<'a> {
    zip: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionDetailsEnvelope<'a> {
    get_transaction_details_request: TransactionDetailsRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionDetailsRequest<'a> {
    merchant_authentication: MerchantAuthentication<'a>,
    trans_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateTransactionResponse {
    transaction_response: Option<WireTransactionResponse>,
    messages: WireMessages,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransactionResponse {
    response_code: Option<String>,
    auth_code: Option<String>,
    trans_id: Option<String>,
    account_number: Option<String>,
    account_type: Option<String>,
    #[serde(default)]
    messages: Vec<WireTxMessage>,
    #[serde(default)]
    errors: Vec<WireTxError>,
}

#[derive(Debug, Deserialize)]
struct WireTxMessage {
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTxError {
    error_code: String,
    error_text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessages {
    result_code: String,
    #[serde(default)]
    message: Vec<WireMessage>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    code: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct TransactionDetailsResponse {
    transaction: Option<WireTransactionDetails>,
    messages: WireMessages,
}

#[derive(Debug, Deserialize)]
struct WireTransactionDetails {
    payment: Option<WireMaskedPayment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMaskedPayment {
    credit_card: Option<WireMaskedCard>,
    bank_account: Option<WireMaskedBank>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMaskedCard {
    card_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMaskedBank {
    routing_number: String,
    account_number: String,
    #[serde(default)]
    name_on_account: String,
    #[serde(default)]
    account_type: Option<String>,
}

// =============================================================================
// Request Building / Response Parsing
// =============================================================================

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn quantity_string(quantity_milli: i64) -> String {
    format!("{}.{:03}", quantity_milli / 1_000, (quantity_milli % 1_000).abs())
}

fn wire_payment<'a>(payment: GatewayPayment<'a>) -> PaymentResult<(Option<WirePayment<'a>>, Option<WireProfile<'a>>)> {
    Ok(match payment {
        GatewayPayment::Card(card) => {
            let (month, year) = validate_expiry(&card.expiry)?;
            let number: String = card.number.chars().filter(|c| c.is_ascii_digit()).collect();
            let wire = WireCard {
                card_number: number,
                expiration_date: format!("20{:02}-{:02}", year, month),
                card_code: Some(card.cvv.trim()),
            };
            (Some(WirePayment::CreditCard(wire)), None)
        }
        GatewayPayment::Opaque(opaque) => {
            let wire = WireOpaque {
                data_descriptor: &opaque.descriptor,
                data_value: &opaque.value,
            };
            (Some(WirePayment::OpaqueData(wire)), None)
        }
        GatewayPayment::Bank(bank) => {
            let wire = WireBank {
                account_type: bank.account_type.as_str().to_string(),
                routing_number: bank.routing_number.trim().to_string(),
                account_number: bank.account_number.trim().to_string(),
                name_on_account: truncate(bank.name_on_account.trim(), 22),
                echeck_type: Some("WEB"),
            };
            (Some(WirePayment::BankAccount(wire)), None)
        }
        GatewayPayment::Profile(profile) => {
            let wire = WireProfile {
                customer_profile_id: &profile.customer_profile_id,
                payment_profile: WirePaymentProfile {
                    payment_profile_id: &profile.payment_profile_id,
                },
            };
            (None, Some(wire))
        }
    })
}

fn charge_request<'a>(charge: &GatewayCharge<'a>) -> PaymentResult<TransactionRequest<'a>> {
    let (payment, profile) = wire_payment(charge.payment)?;

    let mut request = TransactionRequest::new("authCaptureTransaction");
    request.amount = Some(charge.amount.to_decimal_string());
    request.payment = payment;
    request.profile = profile;
    request.order = charge.invoice_number.map(|invoice_number| WireOrder { invoice_number });

    if !charge.line_items.is_empty() {
        let line_item = charge
            .line_items
            .iter()
            .take(MAX_LINE_ITEMS)
            .map(|line| WireLineItem {
                item_id: truncate(&line.item_id, MAX_NAME_LEN),
                name: truncate(&line.name, MAX_NAME_LEN),
                quantity: quantity_string(line.quantity_milli),
                unit_price: Money::from_cents(line.unit_price_cents)
                    .multiply_milli(line.uom_multiplier_milli)
                    .to_decimal_string(),
            })
            .collect();
        request.line_items = Some(WireLineItems { line_item });
    }

    if charge.tax.is_positive() {
        request.tax = Some(WireAmount {
            amount: charge.tax.to_decimal_string(),
            name: "Sales tax",
        });
    }

    request.customer = charge.customer_ref.map(|id| WireCustomer {
        id: truncate(id, MAX_CUSTOMER_ID_LEN),
    });

    if let GatewayPayment::Card(card) = charge.payment {
        request.bill_to = card
            .zip
            .as_deref()
            .map(str::trim)
            .filter(|z| !z.is_empty())
            .map(|zip| WireBillTo { zip });
    }

    Ok(request)
}

fn request_error_message(messages: &WireMessages) -> String {
    messages
        .message
        .iter()
        .map(|m| format!("{}: {}", m.code, m.text))
        .collect::<Vec<_>>()
        .join("; ")
}

fn parse_transaction_response(body: &str) -> PaymentResult<GatewayResponse> {
    let parsed: CreateTransactionResponse = serde_json::from_str(body.trim_start_matches('\u{feff}'))
        .map_err(|e| PaymentError::gateway(format!("unreadable gateway response: {}", e)))?;

    let Some(tx) = parsed.transaction_response else {
        // Request-level rejection (bad credentials, malformed field). No
        // transaction was created.
        if parsed.messages.result_code.eq_ignore_ascii_case("error") {
            return Ok(GatewayResponse {
                code: ResponseCode::Error,
                transaction_id: None,
                auth_code: None,
                account_number: None,
                account_type: None,
                message: request_error_message(&parsed.messages),
            });
        }
        return Err(PaymentError::gateway("gateway response carried no transaction result"));
    };

    let code = tx
        .response_code
        .as_deref()
        .and_then(ResponseCode::parse)
        .ok_or_else(|| PaymentError::gateway("gateway response carried no response code"))?;

    let message = if let Some(err) = tx.errors.first() {
        format!("{} ({})", err.error_text, err.error_code)
    } else if let Some(msg) = tx.messages.first() {
        msg.description.clone()
    } else {
        request_error_message(&parsed.messages)
    };

    Ok(GatewayResponse {
        code,
        transaction_id: tx.trans_id.filter(|id| !id.is_empty() && id != "0"),
        auth_code: tx.auth_code.filter(|c| !c.trim().is_empty() && c != "000000"),
        account_number: tx.account_number,
        account_type: tx.account_type,
        message,
    })
}

// =============================================================================
// HTTP Implementation
// =============================================================================

pub struct AuthorizeNetGateway {
    client: reqwest::Client,
    endpoint: Url,
    api_login_id: String,
    transaction_key: String,
}

impl AuthorizeNetGateway {
    pub fn new(settings: &GatewaySettings) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| PaymentError::InvalidConfig(format!("gateway client: {}", e)))?;

        Ok(AuthorizeNetGateway {
            client,
            endpoint: Url::parse(&settings.endpoint)?,
            api_login_id: settings.api_login_id.clone(),
            transaction_key: settings.transaction_key.clone(),
        })
    }

    fn auth(&self) -> MerchantAuthentication<'_> {
        MerchantAuthentication {
            name: &self.api_login_id,
            transaction_key: &self.transaction_key,
        }
    }

    async fn post_text<B: Serialize + Sync>(&self, body: &B) -> PaymentResult<String> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            error!(%status, "Gateway returned HTTP error");
            return Err(PaymentError::gateway(format!("gateway returned HTTP {}", status)));
        }

        Ok(response.text().await?)
    }

    async fn post_json<B: Serialize + Sync, R: DeserializeOwned>(&self, body: &B) -> PaymentResult<R> {
        let text = self.post_text(body).await?;
        serde_json::from_str(text.trim_start_matches('\u{feff}'))
            .map_err(|e| PaymentError::gateway(format!("unreadable gateway response: {}", e)))
    }

    async fn transaction(&self, request: TransactionRequest<'_>) -> PaymentResult<GatewayResponse> {
        let envelope = CreateTransactionEnvelope {
            create_transaction_request: CreateTransactionRequest {
                merchant_authentication: self.auth(),
                transaction_request: request,
            },
        };
        let text = self.post_text(&envelope).await?;
        parse_transaction_response(&text)
    }

    /// Masked payment of an earlier transaction, needed to refund it.
    async fn masked_payment(&self, transaction_id: &str) -> PaymentResult<WireMaskedPayment> {
        let envelope = TransactionDetailsEnvelope {
            get_transaction_details_request: TransactionDetailsRequest {
                merchant_authentication: self.auth(),
                trans_id: transaction_id,
            },
        };
        let details: TransactionDetailsResponse = self.post_json(&envelope).await?;

        details
            .transaction
            .and_then(|t| t.payment)
            .ok_or_else(|| PaymentError::declined(request_error_message(&details.messages)))
    }
}

#[async_trait]
impl GatewayClient for AuthorizeNetGateway {
    async fn charge(&self, charge: &GatewayCharge<'_>) -> PaymentResult<GatewayResponse> {
        let request = charge_request(charge)?;
        info!(
            amount = %charge.amount,
            invoice_number = ?charge.invoice_number,
            "Submitting gateway charge"
        );

        let response = self.transaction(request).await?;
        debug!(code = ?response.code, transaction_id = ?response.transaction_id, "Gateway charge answered");
        Ok(response)
    }

    async fn void(&self, transaction_id: &str) -> PaymentResult<GatewayResponse> {
        info!(transaction_id, "Voiding gateway transaction");
        let mut request = TransactionRequest::new("voidTransaction");
        request.ref_trans_id = Some(transaction_id);
        self.transaction(request).await
    }

    async fn refund(&self, transaction_id: &str, amount: Money) -> PaymentResult<GatewayResponse> {
        info!(transaction_id, amount = %amount, "Refunding gateway transaction");
        let masked = self.masked_payment(transaction_id).await?;

        let payment = match (masked.credit_card, masked.bank_account) {
            (Some(card), _) => WirePayment::CreditCard(WireCard {
                card_number: card.card_number.chars().filter(|c| c.is_ascii_digit()).collect(),
                expiration_date: "XXXX".to_string(),
                card_code: None,
            }),
            (None, Some(bank)) => WirePayment::BankAccount(WireBank {
                account_type: bank.account_type.unwrap_or_else(|| "checking".to_string()),
                routing_number: bank.routing_number,
                account_number: bank.account_number,
                name_on_account: bank.name_on_account,
                echeck_type: None,
            }),
            (None, None) => {
                warn!(transaction_id, "Transaction details carried no payment");
                return Err(PaymentError::declined("original payment not found"));
            }
        };

        let mut request = TransactionRequest::new("refundTransaction");
        request.amount = Some(amount.to_decimal_string());
        request.payment = Some(payment);
        request.ref_trans_id = Some(transaction_id);
        self.transaction(request).await
    }
}
