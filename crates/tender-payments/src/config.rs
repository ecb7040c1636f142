//! # Payments Configuration
//!
//! Provider endpoints, credentials and timing for the payments engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TENDER_GATEWAY_URL=https://apitest.authorize.net/xml/v1/request.api│
//! │     TENDER_TERMINAL_API_KEY=...                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tender-pos/payments.toml (Linux)                         │
//! │     ~/Library/Application Support/com.tender.pos/payments.toml (macOS) │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [gateway]
//! endpoint = "https://apitest.authorize.net/xml/v1/request.api"
//! api_login_id = "..."
//! transaction_key = "..."
//! request_timeout_secs = 30
//!
//! [terminal]
//! endpoint = "https://terminal.example.com/"
//! api_key = "..."
//! poll_interval_ms = 2000
//! max_attempts = 60
//!
//! [reconciliation]
//! enabled = true
//! interval_secs = 12
//!
//! [fees]
//! surcharge_bps = 300
//! default_tax_rate_bps = 750
//!
//! [accounting]
//! enabled = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{PaymentError, PaymentResult};
use tender_core::DEFAULT_SURCHARGE_BPS;

// =============================================================================
// Gateway Settings
// =============================================================================

/// Card/ACH gateway (Authorize.Net JSON API).
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_login_id: String,

    #[serde(default)]
    pub transaction_key: String,

    /// Network timeout for one gateway call.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_gateway_endpoint() -> String {
    "https://apitest.authorize.net/xml/v1/request.api".to_string()
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for GatewaySettings {
    fn default() -> Self {
        GatewaySettings {
            endpoint: default_gateway_endpoint(),
            api_login_id: String::new(),
            transaction_key: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("endpoint", &self.endpoint)
            .field("api_login_id", &self.api_login_id)
            .field("transaction_key", &"[REDACTED]")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

// =============================================================================
// Terminal Settings
// =============================================================================

/// Cloud-to-device terminal provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    #[serde(default = "default_terminal_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Interval between status polls for a live device payment.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Interval used when polling resumes after a restart.
    #[serde(default = "default_back_office_interval")]
    pub back_office_interval_secs: u64,

    #[serde(default = "default_back_office_attempts")]
    pub back_office_max_attempts: u32,
}

fn default_terminal_endpoint() -> String {
    "https://terminal.example.com/".to_string()
}
fn default_poll_interval_ms() -> u64 {
    2_000
}
fn default_max_attempts() -> u32 {
    60
}
fn default_back_office_interval() -> u64 {
    12
}
fn default_back_office_attempts() -> u32 {
    120
}

impl Default for TerminalSettings {
    fn default() -> Self {
        TerminalSettings {
            endpoint: default_terminal_endpoint(),
            api_key: String::new(),
            request_timeout_secs: default_request_timeout(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            back_office_interval_secs: default_back_office_interval(),
            back_office_max_attempts: default_back_office_attempts(),
        }
    }
}

impl std::fmt::Debug for TerminalSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

// =============================================================================
// Reconciliation Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// OPEN orders examined per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,

    /// OPEN orders older than this are logged as stale. They are still retried.
    #[serde(default = "default_stale_after")]
    pub stale_after_hours: i64,
}

fn default_true() -> bool {
    true
}
fn default_reconcile_interval() -> u64 {
    12
}
fn default_batch_size() -> i64 {
    100
}
fn default_stale_after() -> i64 {
    24
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            batch_size: default_batch_size(),
            stale_after_hours: default_stale_after(),
        }
    }
}

// =============================================================================
// Fee Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSettings {
    #[serde(default = "default_surcharge_bps")]
    pub surcharge_bps: u32,

    /// Used when a sale request carries no tax rate.
    #[serde(default)]
    pub default_tax_rate_bps: u32,
}

fn default_surcharge_bps() -> u32 {
    DEFAULT_SURCHARGE_BPS
}

impl Default for FeeSettings {
    fn default() -> Self {
        FeeSettings {
            surcharge_bps: DEFAULT_SURCHARGE_BPS,
            default_tax_rate_bps: 0,
        }
    }
}

// =============================================================================
// Accounting Settings
// =============================================================================

/// Zoho Books customer-payment recording.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountingSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_accounting_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default)]
    pub organization_id: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default)]
    pub refresh_token: String,

    /// Access tokens live for an hour; refresh a little before that.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_accounting_endpoint() -> String {
    "https://www.zohoapis.com/books/v3/".to_string()
}
fn default_token_url() -> String {
    "https://accounts.zoho.com/oauth/v2/token".to_string()
}
fn default_token_ttl() -> u64 {
    3_300
}

impl Default for AccountingSettings {
    fn default() -> Self {
        AccountingSettings {
            enabled: false,
            endpoint: default_accounting_endpoint(),
            token_url: default_token_url(),
            organization_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            token_ttl_secs: default_token_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for AccountingSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountingSettings")
            .field("enabled", &self.enabled)
            .field("endpoint", &self.endpoint)
            .field("organization_id", &self.organization_id)
            .field("client_secret", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_ttl_secs", &self.token_ttl_secs)
            .finish()
    }
}

// =============================================================================
// Main Payments Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentsConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub terminal: TerminalSettings,

    #[serde(default)]
    pub reconciliation: ReconciliationSettings,

    #[serde(default)]
    pub fees: FeeSettings,

    #[serde(default)]
    pub accounting: AccountingSettings,
}

impl PaymentsConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (payments.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> PaymentResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading payments config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load payments config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn validate(&self) -> PaymentResult<()> {
        Url::parse(&self.gateway.endpoint)?;
        Url::parse(&self.terminal.endpoint)?;

        if self.gateway.request_timeout_secs == 0 || self.terminal.request_timeout_secs == 0 {
            return Err(PaymentError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.terminal.poll_interval_ms == 0 || self.terminal.max_attempts == 0 {
            return Err(PaymentError::InvalidConfig(
                "terminal polling needs a non-zero interval and attempt bound".into(),
            ));
        }

        if self.reconciliation.interval_secs == 0 || self.reconciliation.batch_size <= 0 {
            return Err(PaymentError::InvalidConfig(
                "reconciliation interval and batch_size must be greater than 0".into(),
            ));
        }

        if self.fees.surcharge_bps > 10_000 || self.fees.default_tax_rate_bps > 10_000 {
            return Err(PaymentError::InvalidConfig(
                "fee rates cannot exceed 100%".into(),
            ));
        }

        if self.accounting.enabled {
            Url::parse(&self.accounting.endpoint)?;
            Url::parse(&self.accounting.token_url)?;
            if self.accounting.organization_id.is_empty() || self.accounting.refresh_token.is_empty() {
                return Err(PaymentError::InvalidConfig(
                    "accounting is enabled but organization_id or refresh_token is missing".into(),
                ));
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("TENDER_GATEWAY_URL") {
            debug!(url = %url, "Overriding gateway endpoint from environment");
            self.gateway.endpoint = url;
        }
        if let Ok(login) = std::env::var("TENDER_GATEWAY_LOGIN_ID") {
            self.gateway.api_login_id = login;
        }
        if let Ok(key) = std::env::var("TENDER_GATEWAY_TRANSACTION_KEY") {
            self.gateway.transaction_key = key;
        }

        if let Ok(url) = std::env::var("TENDER_TERMINAL_URL") {
            debug!(url = %url, "Overriding terminal endpoint from environment");
            self.terminal.endpoint = url;
        }
        if let Ok(key) = std::env::var("TENDER_TERMINAL_API_KEY") {
            self.terminal.api_key = key;
        }

        if let Ok(secs) = std::env::var("TENDER_RECONCILE_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.reconciliation.interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid TENDER_RECONCILE_INTERVAL_SECS"),
            }
        }

        if let Ok(bps) = std::env::var("TENDER_SURCHARGE_BPS") {
            match bps.parse::<u32>() {
                Ok(b) => self.fees.surcharge_bps = b,
                Err(_) => warn!(value = %bps, "Ignoring invalid TENDER_SURCHARGE_BPS"),
            }
        }

        if let Ok(token) = std::env::var("TENDER_ZOHO_REFRESH_TOKEN") {
            self.accounting.refresh_token = token;
        }
        if let Ok(secret) = std::env::var("TENDER_ZOHO_CLIENT_SECRET") {
            self.accounting.client_secret = secret;
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "tender", "pos")
            .map(|dirs| dirs.config_dir().join("payments.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway.request_timeout_secs)
    }

    pub fn terminal_timeout(&self) -> Duration {
        Duration::from_secs(self.terminal.request_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconciliation.interval_secs)
    }
}
