//! # Terminal Provider Client
//!
//! Cloud-to-device card terminal API: push a payment to a device by its
//! EPI/serial, poll the returned reference, cancel, and look up settled
//! transactions by invoice number for reconciliation.
//!
//! ```text
//! POST {endpoint}/v1/payments                     push    → { reference }
//! GET  {endpoint}/v1/payments/{reference}          status  → { pending, approved, declined, ... }
//! POST {endpoint}/v1/payments/{reference}/cancel   cancel
//! POST {endpoint}/v1/transactions/{id}/void        void    → { success }
//! POST {endpoint}/v1/transactions/{id}/refund      refund  → { success }
//! GET  {endpoint}/v1/transactions?invoice_number=&status=settled
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;

use crate::config::TerminalSettings;
use crate::error::{PaymentError, PaymentResult};
use tender_core::{Money, PollResult};

// =============================================================================
// Client Contract
// =============================================================================

#[derive(Debug, Clone)]
pub struct TerminalPush {
    pub device_id: String,
    pub amount: Money,
    pub invoice_number: String,
}

/// One status check.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TerminalStatus {
    #[serde(flatten)]
    pub result: PollResult,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub auth_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub card_last4: Option<String>,
    #[serde(default)]
    pub card_brand: Option<String>,
}

/// A provider-side transaction that has settled.
#[derive(Debug, Clone, Deserialize)]
pub struct SettledTransaction {
    pub transaction_id: String,
    #[serde(default)]
    pub auth_code: Option<String>,
    pub amount_cents: i64,
    pub invoice_number: String,
    pub settled_at: DateTime<Utc>,
}

#[async_trait]
pub trait TerminalClient: Send + Sync {
    /// Sends the payment to the device. Returns the polling reference.
    async fn push_payment(&self, push: &TerminalPush) -> PaymentResult<String>;

    async fn status(&self, reference: &str) -> PaymentResult<TerminalStatus>;

    async fn cancel(&self, reference: &str) -> PaymentResult<()>;

    async fn void(&self, transaction_id: &str) -> PaymentResult<bool>;

    async fn refund(&self, transaction_id: &str, amount: Money) -> PaymentResult<bool>;

    /// Settled transaction whose invoice metadata matches, if any.
    async fn find_settled(&self, invoice_number: &str) -> PaymentResult<Option<SettledTransaction>>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Serialize)]
struct PushBody<'a> {
    device_id: &'a str,
    amount: String,
    invoice_number: &'a str,
}

#[derive(Deserialize)]
struct PushResponse {
    reference: String,
}

#[derive(Serialize)]
struct RefundBody {
    amount: String,
}

#[derive(Deserialize)]
struct ActionResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct TransactionList {
    #[serde(default)]
    transactions: Vec<SettledTransaction>,
}

// =============================================================================
// HTTP Implementation
// =============================================================================

pub struct HttpTerminalClient {
    client: reqwest::Client,
    base: Url,
    api_key: String,
}

impl HttpTerminalClient {
    pub fn new(settings: &TerminalSettings) -> PaymentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| PaymentError::InvalidConfig(format!("terminal client: {}", e)))?;

        let mut base = Url::parse(&settings.endpoint)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(HttpTerminalClient {
            client,
            base,
            api_key: settings.api_key.clone(),
        })
    }

    fn url(&self, path: &str) -> PaymentResult<Url> {
        Ok(self.base.join(path)?)
    }

    async fn send<R: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> PaymentResult<R> {
        let response = request.bearer_auth(&self.api_key).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Terminal provider returned an error");
            if status.is_client_error() {
                return Err(PaymentError::declined(format!("terminal provider rejected request: {}", status)));
            }
            return Err(PaymentError::gateway(format!("terminal provider returned HTTP {}", status)));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| PaymentError::gateway(format!("unreadable terminal response: {}", e)))
    }
}

#[async_trait]
impl TerminalClient for HttpTerminalClient {
    async fn push_payment(&self, push: &TerminalPush) -> PaymentResult<String> {
        info!(
            device_id = %push.device_id,
            invoice_number = %push.invoice_number,
            amount = %push.amount,
            "Pushing payment to terminal"
        );

        let body = PushBody {
            device_id: &push.device_id,
            amount: push.amount.to_decimal_string(),
            invoice_number: &push.invoice_number,
        };
        let request = self.client.post(self.url("v1/payments")?).json(&body);
        let response: PushResponse = self.send(request).await?;

        debug!(reference = %response.reference, "Terminal acknowledged push");
        Ok(response.reference)
    }

    async fn status(&self, reference: &str) -> PaymentResult<TerminalStatus> {
        let request = self.client.get(self.url(&format!("v1/payments/{}", reference))?);
        self.send(request).await
    }

    async fn cancel(&self, reference: &str) -> PaymentResult<()> {
        info!(reference, "Cancelling terminal payment");
        let request = self
            .client
            .post(self.url(&format!("v1/payments/{}/cancel", reference))?);
        let response: ActionResponse = self.send(request).await?;
        if response.success {
            Ok(())
        } else {
            Err(PaymentError::declined(
                response.message.unwrap_or_else(|| "cancel rejected".to_string()),
            ))
        }
    }

    async fn void(&self, transaction_id: &str) -> PaymentResult<bool> {
        info!(transaction_id, "Voiding terminal transaction");
        let request = self
            .client
            .post(self.url(&format!("v1/transactions/{}/void", transaction_id))?);
        let response: ActionResponse = self.send(request).await?;
        Ok(response.success)
    }

    async fn refund(&self, transaction_id: &str, amount: Money) -> PaymentResult<bool> {
        info!(transaction_id, amount = %amount, "Refunding terminal transaction");
        let request = self
            .client
            .post(self.url(&format!("v1/transactions/{}/refund", transaction_id))?)
            .json(&RefundBody {
                amount: amount.to_decimal_string(),
            });
        let response: ActionResponse = self.send(request).await?;
        Ok(response.success)
    }

    async fn find_settled(&self, invoice_number: &str) -> PaymentResult<Option<SettledTransaction>> {
        let mut url = self.url("v1/transactions")?;
        url.query_pairs_mut()
            .append_pair("invoice_number", invoice_number)
            .append_pair("status", "settled");

        let list: TransactionList = self.send(self.client.get(url)).await?;
        Ok(list
            .transactions
            .into_iter()
            .find(|t| t.invoice_number == invoice_number))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flattens_poll_flags() {
        let status: TerminalStatus = serde_json::from_str(
            r#"{"pending":false,"declined":false,"approved":true,
                "transaction_id":"T-1","auth_code":"OK42","card_last4":"4242"}"#,
        )
        .unwrap();
        assert_eq!(status.result, PollResult::APPROVED);
        assert_eq!(status.transaction_id.as_deref(), Some("T-1"));

        let pending: TerminalStatus =
            serde_json::from_str(r#"{"pending":true,"declined":false,"approved":false}"#).unwrap();
        assert!(!pending.result.is_definitive());
    }

    #[test]
    fn test_base_url_keeps_path_prefix() {
        let settings = TerminalSettings {
            endpoint: "https://terminal.example.com/api".into(),
            ..TerminalSettings::default()
        };
        let client = HttpTerminalClient::new(&settings).unwrap();
        assert_eq!(
            client.url("v1/payments/ref-1").unwrap().as_str(),
            "https://terminal.example.com/api/v1/payments/ref-1"
        );
    }
}
