//! API process configuration.
//!
//! Loaded from environment variables with fallback to defaults. Provider and
//! worker settings live in `payments.toml`, whose path is given here.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// API server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// HTTP listen port
    pub http_port: u16,

    /// SQLite database file
    pub db_path: PathBuf,

    /// payments.toml location (optional, platform default when unset)
    pub config_path: Option<PathBuf>,

    /// Request body limit in bytes (default: 1MB)
    pub body_limit_bytes: usize,
}

impl ApiConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = ApiConfig {
            http_port: lookup("TENDER_HTTP_PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("TENDER_HTTP_PORT".to_string()))?,

            db_path: lookup("TENDER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("tender.db")),

            config_path: lookup("TENDER_CONFIG_PATH").map(PathBuf::from),

            body_limit_bytes: lookup("TENDER_BODY_LIMIT_BYTES")
                .unwrap_or_else(|| "1048576".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("TENDER_BODY_LIMIT_BYTES".to_string()))?,
        };

        if config.http_port == 0 {
            return Err(ConfigError::InvalidValue("TENDER_HTTP_PORT".to_string()));
        }
        if config.db_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired("TENDER_DB_PATH".to_string()));
        }

        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.db_path, PathBuf::from("tender.db"));
        assert!(config.config_path.is_none());
        assert_eq!(config.body_limit_bytes, 1024 * 1024);
    }

    #[test]
    fn test_env_values() {
        let config = ApiConfig::from_lookup(lookup(&[
            ("TENDER_HTTP_PORT", "9090"),
            ("TENDER_DB_PATH", "/var/lib/tender/tender.db"),
            ("TENDER_CONFIG_PATH", "/etc/tender/payments.toml"),
        ]))
        .unwrap();

        assert_eq!(config.http_port, 9090);
        assert_eq!(config.db_path, PathBuf::from("/var/lib/tender/tender.db"));
        assert_eq!(config.config_path, Some(PathBuf::from("/etc/tender/payments.toml")));
    }

    #[test]
    fn test_invalid_port() {
        let err = ApiConfig::from_lookup(lookup(&[("TENDER_HTTP_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key) if key == "TENDER_HTTP_PORT"));

        let err = ApiConfig::from_lookup(lookup(&[("TENDER_HTTP_PORT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn test_empty_db_path() {
        let err = ApiConfig::from_lookup(lookup(&[("TENDER_DB_PATH", "")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired(_)));
    }
}
