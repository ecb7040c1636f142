//! # Accounting System Client
//!
//! Records a customer payment in Zoho Books after a document was charged.
//! The charge and this record are not one atomic unit: a failure here is
//! reported on the item result and retried later, never by reversing the
//! charge.
//!
//! ## Token Handling
//! ```text
//! record_payment()
//!     │
//!     ▼
//! access_token() ── cache hit ──────────────────────────► use token
//!     │
//!   miss
//!     ▼
//! refresh lock ── re-check cache (another task refreshed) ─► use token
//!     │
//!     ▼
//! POST token_url (refresh_token grant) ──► cache for min(expires_in, ttl)
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::TtlCache;
use crate::config::AccountingSettings;
use crate::error::{PaymentError, PaymentResult};
use tender_core::{DocumentType, Money};

const TOKEN_KEY: &str = "zoho_access_token";

/// One payment to record against an accounting document.
#[derive(Debug, Clone)]
pub struct AccountingPayment {
    pub customer_ref: String,
    pub document_type: DocumentType,
    pub document_id: String,
    /// Document amount, surcharge excluded.
    pub amount: Money,
    pub transaction_id: String,
}

#[async_trait]
pub trait AccountingClient: Send + Sync {
    async fn record_payment(&self, payment: &AccountingPayment) -> PaymentResult<()>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct CustomerPaymentBody<'a> {
    customer_id: &'a str,
    payment_mode: &'static str,
    amount: f64,
    date: String,
    reference_number: &'a str,
    description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    invoices: Vec<InvoiceApplication<'a>>,
}

#[derive(Serialize)]
struct InvoiceApplication<'a> {
    invoice_id: &'a str,
    amount_applied: f64,
}

#[derive(Deserialize)]
struct ZohoResponse {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Zoho's JSON API takes decimal numbers; converted only at the wire edge.
fn wire_amount(amount: Money) -> f64 {
    amount.cents() as f64 / 100.0
}

// =============================================================================
// Zoho Books Implementation
// =============================================================================

pub struct ZohoBooksClient {
    client: reqwest::Client,
    endpoint: Url,
    token_url: Url,
    organization_id: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    tokens: Arc<TtlCache<&'static str, String>>,
    refresh_lock: Mutex<()>,
}

impl ZohoBooksClient {
    /// `tokens` is the process-wide token cache built at startup.
    pub fn new(settings: &AccountingSettings, tokens: Arc<TtlCache<&'static str, String>>) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| PaymentError::InvalidConfig(format!("accounting client: {}", e)))?;

        let mut endpoint = Url::parse(&settings.endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        Ok(ZohoBooksClient {
            client,
            endpoint,
            token_url: Url::parse(&settings.token_url)?,
            organization_id: settings.organization_id.clone(),
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            refresh_token: settings.refresh_token.clone(),
            tokens,
            refresh_lock: Mutex::new(()),
        })
    }

    async fn access_token(&self) -> PaymentResult<String> {
        if let Some(token) = self.tokens.get(&TOKEN_KEY).await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(token) = self.tokens.get(&TOKEN_KEY).await {
            return Ok(token);
        }

        debug!("Refreshing accounting access token");
        let mut url = self.token_url.clone();
        url.query_pairs_mut()
            .append_pair("refresh_token", &self.refresh_token)
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("grant_type", "refresh_token");

        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| PaymentError::Accounting(format!("token refresh failed: {}", e)))?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Accounting(format!("unreadable token response: {}", e)))?;

        let access_token = match (token.access_token, token.error) {
            (Some(t), _) => t,
            (None, err) => {
                return Err(PaymentError::Accounting(format!(
                    "token refresh rejected: {}",
                    err.unwrap_or_else(|| "no access_token".to_string())
                )))
            }
        };

        let ttl = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.tokens.ttl());
        self.tokens.insert_with_ttl(TOKEN_KEY, access_token.clone(), ttl).await;
        info!("Accounting access token refreshed");

        Ok(access_token)
    }
}

#[async_trait]
impl AccountingClient for ZohoBooksClient {
    async fn record_payment(&self, payment: &AccountingPayment) -> PaymentResult<()> {
        let token = self.access_token().await?;

        let invoices = match payment.document_type {
            DocumentType::Invoice => vec![InvoiceApplication {
                invoice_id: &payment.document_id,
                amount_applied: wire_amount(payment.amount),
            }],
            DocumentType::SalesOrder => Vec::new(),
        };
        let body = CustomerPaymentBody {
            customer_id: &payment.customer_ref,
            payment_mode: "creditcard",
            amount: wire_amount(payment.amount),
            date: Utc::now().format("%Y-%m-%d").to_string(),
            reference_number: &payment.transaction_id,
            description: format!("{} {}", payment.document_type.as_str(), payment.document_id),
            invoices,
        };

        let mut url = self.endpoint.join("customerpayments")?;
        url.query_pairs_mut()
            .append_pair("organization_id", &self.organization_id);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Zoho-oauthtoken {}", token))
            .json(&body)
            .send()
            .await
            .map_err(|e| PaymentError::Accounting(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(&TOKEN_KEY).await;
        }

        let parsed: ZohoResponse = response
            .json()
            .await
            .map_err(|e| PaymentError::Accounting(format!("unreadable response ({}): {}", status, e)))?;

        if !status.is_success() || parsed.code != 0 {
            warn!(
                document_id = %payment.document_id,
                code = parsed.code,
                message = %parsed.message,
                "Accounting system rejected payment record"
            );
            return Err(PaymentError::Accounting(parsed.message));
        }

        info!(
            document_id = %payment.document_id,
            transaction_id = %payment.transaction_id,
            "Payment recorded in accounting system"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_payment_body_applies_amount() {
        let payment = AccountingPayment {
            customer_ref: "cust-1".into(),
            document_type: DocumentType::Invoice,
            document_id: "INV-0042".into(),
            amount: Money::from_cents(5_000),
            transaction_id: "60012".into(),
        };
        let body = CustomerPaymentBody {
            customer_id: &payment.customer_ref,
            payment_mode: "creditcard",
            amount: wire_amount(payment.amount),
            date: "2026-10-18".into(),
            reference_number: &payment.transaction_id,
            description: "invoice INV-0042".into(),
            invoices: vec![InvoiceApplication {
                invoice_id: &payment.document_id,
                amount_applied: wire_amount(payment.amount),
            }],
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["amount"], 50.0);
        assert_eq!(json["invoices"][0]["invoice_id"], "INV-0042");
        assert_eq!(json["reference_number"], "60012");
    }

    #[tokio::test]
    async fn test_cached_token_skips_refresh() {
        let settings = AccountingSettings {
            enabled: true,
            organization_id: "org".into(),
            refresh_token: "refresh".into(),
            // Unroutable: any refresh attempt would fail.
            token_url: "http://127.0.0.1:9/oauth".into(),
            ..AccountingSettings::default()
        };
        let tokens = Arc::new(TtlCache::new(Duration::from_secs(60), 4));
        tokens.insert(TOKEN_KEY, "cached-token".to_string()).await;

        let client = ZohoBooksClient::new(&settings, tokens).unwrap();
        assert_eq!(client.access_token().await.unwrap(), "cached-token");
    }
}
