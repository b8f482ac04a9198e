//! Monitoring types: thresholds, metric snapshots, and alerts.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Alert thresholds, mutable at runtime via `UpdateThresholds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Alert when `failed / total` exceeds this ratio.
    pub error_rate: f64,
    /// Alert when a balance read falls below this many USD.
    pub low_balance_usd: Decimal,
    /// Alert when a user's token counter exceeds this.
    pub high_usage_tokens: u64,
    /// Alert when the configured reservation TTL is below this many seconds.
    pub min_reservation_ttl_secs: u64,
    /// Minimum seconds between alert emissions.
    pub alert_cooldown_secs: u64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            error_rate: 0.05,
            low_balance_usd: dec!(10.00),
            high_usage_tokens: 1_000_000,
            min_reservation_ttl_secs: 300,
            alert_cooldown_secs: 3600,
        }
    }
}

/// Point-in-time view of the monitoring counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_charges_usd: Decimal,
    pub total_reservations: u64,
    pub total_commits: u64,
    /// `failed / total_requests`, zero when no requests yet.
    pub error_rate: f64,
}

/// One entry in the `billing:alerts` stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: MetricsSnapshot,
}

impl Alert {
    /// Serialize for the alerts stream. The snapshot travels as one JSON
    /// field; alerts are read back whole, never queried by sub-field.
    pub fn to_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            ("message".into(), self.message.clone()),
            ("timestamp".into(), self.timestamp.timestamp().to_string()),
            (
                "metrics".into(),
                serde_json::to_string(&self.metrics).unwrap_or_default(),
            ),
        ])
    }

    /// Parse an alerts-stream entry. Lenient: a missing or corrupt metrics
    /// field yields a default snapshot rather than dropping the alert.
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let message = fields.get("message")?.clone();
        let secs: i64 = fields.get("timestamp")?.parse().ok()?;
        let metrics = fields
            .get("metrics")
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        Some(Self {
            message,
            timestamp: DateTime::from_timestamp(secs, 0)?,
            metrics,
        })
    }
}
