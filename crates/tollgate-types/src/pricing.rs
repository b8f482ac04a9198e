//! Pricing records: per-model unit prices quoted per 1,000,000 tokens.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Unit prices for one model. A model may lack any subset of the three legs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPrices {
    /// Price per million input tokens on the chat endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_input: Option<Decimal>,
    /// Price per million output tokens on the chat endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_output: Option<Decimal>,
    /// Price per million tokens on the embed endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Decimal>,
}

impl ModelPrices {
    /// Prices for a chat-only model.
    pub fn chat(input: Decimal, output: Decimal) -> Self {
        Self {
            chat_input: Some(input),
            chat_output: Some(output),
            embed: None,
        }
    }

    /// Prices for an embedding-only model.
    pub fn embedding(price: Decimal) -> Self {
        Self {
            chat_input: None,
            chat_output: None,
            embed: Some(price),
        }
    }
}

/// The full model-to-prices mapping. A `BTreeMap` keeps listings stable.
pub type PricingTable = BTreeMap<String, ModelPrices>;

/// Pricing metadata exposed by `GetPricingInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingInfo {
    /// Where the current table came from (`builtin`, `store`, a feed URL,
    /// or an admin-supplied tag).
    pub source: String,
    pub last_updated: DateTime<Utc>,
    pub table: PricingTable,
}

/// Built-in price list used when the store has no persisted table.
pub fn default_table() -> PricingTable {
    BTreeMap::from([
        ("gpt-4o".into(), ModelPrices::chat(dec!(5.00), dec!(15.00))),
        ("gpt-4o-mini".into(), ModelPrices::chat(dec!(0.15), dec!(0.60))),
        ("gpt-4-turbo".into(), ModelPrices::chat(dec!(10.00), dec!(30.00))),
        (
            "claude-3-5-sonnet".into(),
            ModelPrices::chat(dec!(3.00), dec!(15.00)),
        ),
        (
            "claude-3-haiku".into(),
            ModelPrices::chat(dec!(0.25), dec!(1.25)),
        ),
        (
            "text-embedding-3-large".into(),
            ModelPrices::embedding(dec!(0.13)),
        ),
        (
            "text-embedding-3-small".into(),
            ModelPrices::embedding(dec!(0.02)),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_reference_models() {
        let table = default_table();
        let gpt4o = &table["gpt-4o"];
        assert_eq!(gpt4o.chat_input, Some(dec!(5.00)));
        assert_eq!(gpt4o.chat_output, Some(dec!(15.00)));
        assert_eq!(gpt4o.embed, None);

        let embed = &table["text-embedding-3-large"];
        assert_eq!(embed.embed, Some(dec!(0.13)));
        assert_eq!(embed.chat_input, None);
    }

    #[test]
    fn serde_omits_missing_legs() {
        let json = serde_json::to_string(&ModelPrices::embedding(dec!(0.13))).unwrap();
        assert!(!json.contains("chat_input"));
        assert!(json.contains("embed"));
    }

    #[test]
    fn table_round_trips_through_json() {
        let table = default_table();
        let json = serde_json::to_string(&table).unwrap();
        let parsed: PricingTable = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, table);
    }
}
