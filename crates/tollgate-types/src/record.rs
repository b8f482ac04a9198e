//! Ledger records: reservations and the append-only log entries.
//!
//! The substrate stores records as string-to-string maps (hashes and stream
//! entries), so every record converts through explicit `to_fields` /
//! `from_fields` rather than relying on a reflective codec. Missing or
//! malformed fields surface as [`BillingError::External`] -- a corrupt record
//! is a substrate fault, not a caller fault.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Which pricing leg a call bills against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Separate input and output token counts and unit prices.
    Chat,
    /// A single input token count and unit price.
    Embed,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Chat => write!(f, "chat"),
            Endpoint::Embed => write!(f, "embed"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(Endpoint::Chat),
            "embed" => Ok(Endpoint::Embed),
            other => Err(BillingError::invalid(
                "endpoint",
                format!("{other:?} is not one of chat, embed"),
            )),
        }
    }
}

/// Reservation lifecycle state.
///
/// The only legal transition is `Reserved` to `Committed`; everything else is
/// handled by TTL expiry dropping the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Funds are held against the estimate.
    Reserved,
    /// Actuals are recorded and the difference settled.
    Committed,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationStatus::Reserved => write!(f, "reserved"),
            ReservationStatus::Committed => write!(f, "committed"),
        }
    }
}

impl FromStr for ReservationStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reserved" => Ok(ReservationStatus::Reserved),
            "committed" => Ok(ReservationStatus::Committed),
            other => Err(BillingError::External(format!(
                "corrupt reservation status {other:?}"
            ))),
        }
    }
}

/// A tentative debit against a user's balance, bounded by a TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub user_id: String,
    pub model: String,
    pub endpoint: Endpoint,
    pub input_tokens_estimate: u64,
    pub output_tokens_estimate: u64,
    pub estimated_cost: Decimal,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    /// Set on commit.
    pub actual_cost: Option<Decimal>,
    /// Set on commit.
    pub input_tokens_actual: Option<u64>,
    /// Set on commit.
    pub output_tokens_actual: Option<u64>,
}

impl Reservation {
    /// Build the reservation id: `res:<user>:<request>:<epoch_seconds>`.
    pub fn make_id(user_id: &str, request_id: &str, created_at: DateTime<Utc>) -> String {
        format!("res:{user_id}:{request_id}:{}", created_at.timestamp())
    }

    /// Serialize to the substrate's string-map representation.
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::from([
            ("user_id".into(), self.user_id.clone()),
            ("model".into(), self.model.clone()),
            ("endpoint".into(), self.endpoint.to_string()),
            (
                "input_tokens_estimate".into(),
                self.input_tokens_estimate.to_string(),
            ),
            (
                "output_tokens_estimate".into(),
                self.output_tokens_estimate.to_string(),
            ),
            ("estimated_cost".into(), self.estimated_cost.to_string()),
            ("status".into(), self.status.to_string()),
            ("created_at".into(), self.created_at.timestamp().to_string()),
        ]);
        if let Some(cost) = self.actual_cost {
            fields.insert("actual_cost".into(), cost.to_string());
        }
        if let Some(tokens) = self.input_tokens_actual {
            fields.insert("input_tokens_actual".into(), tokens.to_string());
        }
        if let Some(tokens) = self.output_tokens_actual {
            fields.insert("output_tokens_actual".into(), tokens.to_string());
        }
        fields
    }

    /// Deserialize from the substrate's string-map representation.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            user_id: require(fields, "user_id")?.to_string(),
            model: require(fields, "model")?.to_string(),
            endpoint: require(fields, "endpoint")?.parse()?,
            input_tokens_estimate: parse_u64(fields, "input_tokens_estimate")?,
            output_tokens_estimate: parse_u64(fields, "output_tokens_estimate")?,
            estimated_cost: parse_decimal(fields, "estimated_cost")?,
            status: require(fields, "status")?.parse()?,
            created_at: parse_timestamp(fields, "created_at")?,
            actual_cost: fields
                .get("actual_cost")
                .map(|v| parse_decimal_value(v, "actual_cost"))
                .transpose()?,
            input_tokens_actual: fields
                .get("input_tokens_actual")
                .map(|v| parse_u64_value(v, "input_tokens_actual"))
                .transpose()?,
            output_tokens_actual: fields
                .get("output_tokens_actual")
                .map(|v| parse_u64_value(v, "output_tokens_actual"))
                .transpose()?,
        })
    }
}

/// One entry in the `billing:log` stream. Appended by Charge and Commit,
/// never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    pub user_id: String,
    pub model: String,
    pub endpoint: Option<Endpoint>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    /// Total tokens for the Charge fast path.
    pub tokens_used: Option<u64>,
    pub cost_usd: Decimal,
    /// Balance immediately after the debit/credit.
    pub balance_usd: Decimal,
    pub reservation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TransactionLogEntry {
    pub fn to_fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::from([
            ("user_id".into(), self.user_id.clone()),
            ("model".into(), self.model.clone()),
            ("cost_usd".into(), self.cost_usd.to_string()),
            ("balance_usd".into(), self.balance_usd.to_string()),
            ("timestamp".into(), self.timestamp.timestamp().to_string()),
        ]);
        if let Some(endpoint) = self.endpoint {
            fields.insert("endpoint".into(), endpoint.to_string());
        }
        if let Some(tokens) = self.input_tokens {
            fields.insert("input_tokens".into(), tokens.to_string());
        }
        if let Some(tokens) = self.output_tokens {
            fields.insert("output_tokens".into(), tokens.to_string());
        }
        if let Some(tokens) = self.tokens_used {
            fields.insert("tokens_used".into(), tokens.to_string());
        }
        if let Some(id) = &self.reservation_id {
            fields.insert("reservation_id".into(), id.clone());
        }
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            user_id: require(fields, "user_id")?.to_string(),
            model: require(fields, "model")?.to_string(),
            endpoint: fields
                .get("endpoint")
                .map(|v| v.parse())
                .transpose()?,
            input_tokens: fields
                .get("input_tokens")
                .map(|v| parse_u64_value(v, "input_tokens"))
                .transpose()?,
            output_tokens: fields
                .get("output_tokens")
                .map(|v| parse_u64_value(v, "output_tokens"))
                .transpose()?,
            tokens_used: fields
                .get("tokens_used")
                .map(|v| parse_u64_value(v, "tokens_used"))
                .transpose()?,
            cost_usd: parse_decimal(fields, "cost_usd")?,
            balance_usd: parse_decimal(fields, "balance_usd")?,
            reservation_id: fields.get("reservation_id").cloned(),
            timestamp: parse_timestamp(fields, "timestamp")?,
        })
    }
}

/// One entry in the `billing:adjustments` stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentLogEntry {
    pub user_id: String,
    /// Signed delta applied to the balance.
    pub amount_usd: Decimal,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl AdjustmentLogEntry {
    pub fn to_fields(&self) -> HashMap<String, String> {
        HashMap::from([
            ("user_id".into(), self.user_id.clone()),
            ("amount_usd".into(), self.amount_usd.to_string()),
            ("reason".into(), self.reason.clone()),
            ("timestamp".into(), self.timestamp.timestamp().to_string()),
        ])
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            user_id: require(fields, "user_id")?.to_string(),
            amount_usd: parse_decimal(fields, "amount_usd")?,
            reason: require(fields, "reason")?.to_string(),
            timestamp: parse_timestamp(fields, "timestamp")?,
        })
    }
}

/// One entry in the `billing:deposits` stream. Written by the payment
/// collaborator; the core only reads these for stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositLogEntry {
    pub user_id: String,
    pub amount_usd: Decimal,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

impl DepositLogEntry {
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            user_id: require(fields, "user_id")?.to_string(),
            amount_usd: parse_decimal(fields, "amount_usd")?,
            source: require(fields, "source")?.to_string(),
            timestamp: parse_timestamp(fields, "timestamp")?,
        })
    }
}

// ── Field parsing helpers ──────────────────────────────────────────

fn require<'a>(fields: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| BillingError::External(format!("record missing field {key:?}")))
}

fn parse_u64(fields: &HashMap<String, String>, key: &str) -> Result<u64> {
    parse_u64_value(require(fields, key)?, key)
}

fn parse_u64_value(value: &str, key: &str) -> Result<u64> {
    value
        .parse()
        .map_err(|_| BillingError::External(format!("record field {key:?} is not an integer")))
}

fn parse_decimal(fields: &HashMap<String, String>, key: &str) -> Result<Decimal> {
    parse_decimal_value(require(fields, key)?, key)
}

fn parse_decimal_value(value: &str, key: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|_| BillingError::External(format!("record field {key:?} is not a decimal")))
}

fn parse_timestamp(fields: &HashMap<String, String>, key: &str) -> Result<DateTime<Utc>> {
    let secs: i64 = require(fields, key)?
        .parse()
        .map_err(|_| BillingError::External(format!("record field {key:?} is not a timestamp")))?;
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| BillingError::External(format!("record field {key:?} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_reservation() -> Reservation {
        Reservation {
            user_id: "u1a".into(),
            model: "gpt-4o".into(),
            endpoint: Endpoint::Chat,
            input_tokens_estimate: 1000,
            output_tokens_estimate: 500,
            estimated_cost: dec!(0.0125),
            status: ReservationStatus::Reserved,
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            actual_cost: None,
            input_tokens_actual: None,
            output_tokens_actual: None,
        }
    }

    #[test]
    fn reservation_id_format() {
        let created = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(
            Reservation::make_id("u1a", "0f9e8d7c", created),
            "res:u1a:0f9e8d7c:1700000000"
        );
    }

    #[test]
    fn reservation_fields_round_trip() {
        let res = sample_reservation();
        let parsed = Reservation::from_fields(&res.to_fields()).unwrap();
        assert_eq!(parsed, res);
    }

    #[test]
    fn committed_reservation_carries_actuals() {
        let mut res = sample_reservation();
        res.status = ReservationStatus::Committed;
        res.actual_cost = Some(dec!(0.01195));
        res.input_tokens_actual = Some(950);
        res.output_tokens_actual = Some(480);

        let fields = res.to_fields();
        assert_eq!(fields["status"], "committed");
        assert_eq!(fields["actual_cost"], "0.01195");

        let parsed = Reservation::from_fields(&fields).unwrap();
        assert_eq!(parsed, res);
    }

    #[test]
    fn reserved_reservation_omits_actuals() {
        let fields = sample_reservation().to_fields();
        assert!(!fields.contains_key("actual_cost"));
        assert!(!fields.contains_key("input_tokens_actual"));
    }

    #[test]
    fn corrupt_status_is_substrate_error() {
        let mut fields = sample_reservation().to_fields();
        fields.insert("status".into(), "pending".into());
        let err = Reservation::from_fields(&fields).unwrap_err();
        assert!(matches!(err, BillingError::External(_)));
    }

    #[test]
    fn missing_field_is_substrate_error() {
        let mut fields = sample_reservation().to_fields();
        fields.remove("estimated_cost");
        let err = Reservation::from_fields(&fields).unwrap_err();
        assert!(err.to_string().contains("estimated_cost"));
    }

    #[test]
    fn transaction_entry_round_trip() {
        let entry = TransactionLogEntry {
            user_id: "u1a".into(),
            model: "gpt-4o".into(),
            endpoint: Some(Endpoint::Chat),
            input_tokens: Some(950),
            output_tokens: Some(480),
            tokens_used: None,
            cost_usd: dec!(0.01195),
            balance_usd: dec!(9.98805),
            reservation_id: Some("res:u1a:abc:1700000000".into()),
            timestamp: DateTime::from_timestamp(1_700_000_600, 0).unwrap(),
        };
        let parsed = TransactionLogEntry::from_fields(&entry.to_fields()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn charge_entry_round_trip() {
        let entry = TransactionLogEntry {
            user_id: "u1a".into(),
            model: "gpt-4o".into(),
            endpoint: None,
            input_tokens: None,
            output_tokens: None,
            tokens_used: Some(1500),
            cost_usd: dec!(0.05),
            balance_usd: dec!(9.95),
            reservation_id: None,
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let parsed = TransactionLogEntry::from_fields(&entry.to_fields()).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn endpoint_parsing() {
        assert_eq!("chat".parse::<Endpoint>().unwrap(), Endpoint::Chat);
        assert_eq!("embed".parse::<Endpoint>().unwrap(), Endpoint::Embed);
        assert!("completions".parse::<Endpoint>().is_err());
    }

    #[test]
    fn adjustment_entry_round_trip() {
        let entry = AdjustmentLogEntry {
            user_id: "u1a".into(),
            amount_usd: dec!(-5.00),
            reason: "refund dispute".into(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let parsed = AdjustmentLogEntry::from_fields(&entry.to_fields()).unwrap();
        assert_eq!(parsed, entry);
    }
}
