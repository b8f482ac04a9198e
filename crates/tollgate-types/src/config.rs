//! Typed service configuration.
//!
//! Deserialized from TOML by the CLI; every field has a default so an empty
//! file (or no file) yields a runnable local configuration. Secrets may be
//! overridden from the environment after loading.

use serde::{Deserialize, Serialize};

use crate::monitor::Thresholds;

/// Top-level configuration for the tollgate server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the RPC surface binds to.
    pub listen_addr: String,
    /// Ledger substrate connection string.
    pub redis_url: String,
    pub auth: AuthConfig,
    /// TTL for reservations in state `reserved`.
    pub reservation_ttl_secs: u64,
    /// Audit TTL for reservations after commit.
    pub committed_ttl_secs: u64,
    pub exchange: ExchangeConfig,
    /// Optional pricing feed for admin-triggered refresh.
    pub pricing_feed_url: Option<String>,
    pub thresholds: Thresholds,
    /// Emit logs as JSON instead of human-readable lines.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50052".into(),
            redis_url: "redis://127.0.0.1:6379".into(),
            auth: AuthConfig::default(),
            reservation_ttl_secs: 600,
            committed_ttl_secs: 86_400,
            exchange: ExchangeConfig::default(),
            pricing_feed_url: None,
            thresholds: Thresholds::default(),
            log_json: false,
        }
    }
}

/// Bearer-token and admin-key settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret the bearer token's HS256 signature is verified against.
    pub secret: String,
    /// Preshared key required by administrative calls.
    pub admin_key: String,
}

/// Exchange-rate feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Feed endpoint returning `{"rates": {"EUR": 0.92, ...}}`.
    pub feed_url: Option<String>,
    /// Seconds between successful refreshes.
    pub refresh_secs: u64,
    /// Seconds before retrying after a failed refresh.
    pub retry_secs: u64,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            feed_url: None,
            refresh_secs: 3600,
            retry_secs: 60,
            timeout_secs: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:50052");
        assert_eq!(config.reservation_ttl_secs, 600);
        assert_eq!(config.committed_ttl_secs, 86_400);
        assert_eq!(config.exchange.refresh_secs, 3600);
        assert_eq!(config.exchange.retry_secs, 60);
        assert!(config.pricing_feed_url.is_none());
        assert!(!config.log_json);
    }

    #[test]
    fn partial_toml_overrides() {
        let config: Config = toml::from_str(
            r#"
            listen_addr = "0.0.0.0:9000"

            [auth]
            secret = "s3cret"
            admin_key = "admin"

            [exchange]
            feed_url = "https://rates.example.com/latest"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.auth.secret, "s3cret");
        assert_eq!(
            config.exchange.feed_url.as_deref(),
            Some("https://rates.example.com/latest")
        );
        // untouched sections keep their defaults
        assert_eq!(config.exchange.refresh_secs, 3600);
    }
}
