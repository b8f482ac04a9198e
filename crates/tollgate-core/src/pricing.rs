//! Pricing table service.
//!
//! Holds the current `(source, last_updated, table)` snapshot behind an
//! rw-lock. Lookups never block on updates for longer than the lock; the
//! authoritative cost formula lives here so Reserve and Commit cannot
//! disagree.
//!
//! An unknown model/endpoint is an error. The table carries no silent
//! fallback prices: charging a made-up rate is worse than refusing the call.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{info, warn};

use tollgate_ledger::LedgerStore;
use tollgate_types::money;
use tollgate_types::pricing::{self, PricingInfo, PricingTable};
use tollgate_types::record::Endpoint;
use tollgate_types::{BillingError, Result, validate};

/// Store key the current table is persisted under.
const PRICING_KEY: &str = "pricing:current";

/// In-process pricing service.
pub struct PricingService {
    ledger: Arc<dyn LedgerStore>,
    http: reqwest::Client,
    state: RwLock<PricingInfo>,
}

impl PricingService {
    /// Load the table from the store's `pricing:current` key, falling back
    /// to the built-in default list.
    pub async fn load(ledger: Arc<dyn LedgerStore>) -> Result<Self> {
        let state = match ledger.kv_get(PRICING_KEY).await? {
            Some(raw) => match serde_json::from_str::<PricingInfo>(&raw) {
                Ok(info) => {
                    info!(models = info.table.len(), source = %info.source, "loaded pricing from store");
                    info
                }
                Err(err) => {
                    warn!(error = %err, "persisted pricing is corrupt, using builtin table");
                    builtin_info()
                }
            },
            None => {
                info!("no persisted pricing, using builtin table");
                builtin_info()
            }
        };

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| BillingError::External(format!("http client: {e}")))?;

        Ok(Self {
            ledger,
            http,
            state: RwLock::new(state),
        })
    }

    /// Unit prices and metadata as currently configured.
    pub fn info(&self) -> PricingInfo {
        self.state.read().clone()
    }

    /// The bare model-to-prices table.
    pub fn table(&self) -> PricingTable {
        self.state.read().table.clone()
    }

    /// The authoritative cost formula: price the call and quantize to the
    /// ledger quantum. Fails when the model lacks the endpoint's prices.
    pub fn compute_cost(
        &self,
        model: &str,
        endpoint: Endpoint,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<Decimal> {
        let state = self.state.read();
        let prices = state
            .table
            .get(model)
            .ok_or_else(|| BillingError::Pricing("unknown model or endpoint".into()))?;
        match endpoint {
            Endpoint::Chat => match (prices.chat_input, prices.chat_output) {
                (Some(input), Some(output)) => {
                    Ok(money::chat_cost(input, output, input_tokens, output_tokens))
                }
                _ => Err(BillingError::Pricing("unknown model or endpoint".into())),
            },
            Endpoint::Embed => match prices.embed {
                Some(price) => Ok(money::embed_cost(price, input_tokens)),
                None => Err(BillingError::Pricing("unknown model or endpoint".into())),
            },
        }
    }

    /// Replace the table. Validates every entry, persists, then swaps the
    /// snapshot -- a crash between persist and swap loses nothing.
    pub async fn update(&self, table: PricingTable, source: &str) -> Result<()> {
        validate_table(&table)?;

        let next = PricingInfo {
            source: source.to_string(),
            last_updated: Utc::now(),
            table,
        };
        let raw = serde_json::to_string(&next)
            .map_err(|e| BillingError::External(format!("serialize pricing: {e}")))?;
        self.ledger.kv_set(PRICING_KEY, &raw).await?;

        let models = next.table.len();
        *self.state.write() = next;
        info!(models, source, "pricing table updated");
        Ok(())
    }

    /// Pull a full table from an external feed (admin-triggered).
    /// Returns the number of models loaded.
    pub async fn refresh_from_feed(&self, url: &str) -> Result<usize> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(BillingError::Pricing(format!(
                "feed url must be http or https, got {url:?}"
            )));
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BillingError::External(format!("pricing feed fetch: {e}")))?;
        let table: PricingTable = response
            .json()
            .await
            .map_err(|e| BillingError::Pricing(format!("invalid pricing feed payload: {e}")))?;

        let models = table.len();
        self.update(table, url).await?;
        Ok(models)
    }
}

fn builtin_info() -> PricingInfo {
    PricingInfo {
        source: "builtin".into(),
        last_updated: Utc::now(),
        table: pricing::default_table(),
    }
}

fn validate_table(table: &PricingTable) -> Result<()> {
    if table.is_empty() {
        return Err(BillingError::Pricing("pricing table is empty".into()));
    }
    for (model, prices) in table {
        validate::model_id(model)?;
        for price in [prices.chat_input, prices.chat_output, prices.embed]
            .into_iter()
            .flatten()
        {
            if price < Decimal::ZERO {
                return Err(BillingError::Pricing(format!(
                    "negative price for model {model}"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use tollgate_ledger::MemoryLedger;
    use tollgate_types::pricing::ModelPrices;

    async fn service() -> PricingService {
        PricingService::load(Arc::new(MemoryLedger::new())).await.unwrap()
    }

    #[tokio::test]
    async fn loads_builtin_when_store_empty() {
        let svc = service().await;
        let info = svc.info();
        assert_eq!(info.source, "builtin");
        assert!(info.table.contains_key("gpt-4o"));
    }

    #[tokio::test]
    async fn loads_persisted_table() {
        let ledger = Arc::new(MemoryLedger::new());
        let persisted = PricingInfo {
            source: "ops".into(),
            last_updated: Utc::now(),
            table: BTreeMap::from([(
                "custom-model".to_string(),
                ModelPrices::chat(dec!(1), dec!(2)),
            )]),
        };
        ledger
            .kv_set(PRICING_KEY, &serde_json::to_string(&persisted).unwrap())
            .await
            .unwrap();

        let svc = PricingService::load(ledger).await.unwrap();
        assert_eq!(svc.info().source, "ops");
        assert!(svc.table().contains_key("custom-model"));
        assert!(!svc.table().contains_key("gpt-4o"));
    }

    #[tokio::test]
    async fn corrupt_persisted_table_falls_back() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger.kv_set(PRICING_KEY, "not json").await.unwrap();
        let svc = PricingService::load(ledger).await.unwrap();
        assert_eq!(svc.info().source, "builtin");
    }

    #[tokio::test]
    async fn chat_cost_reference_values() {
        let svc = service().await;
        assert_eq!(
            svc.compute_cost("gpt-4o", Endpoint::Chat, 1000, 500).unwrap(),
            dec!(0.0125)
        );
        assert_eq!(
            svc.compute_cost("gpt-4o", Endpoint::Chat, 950, 480).unwrap(),
            dec!(0.01195)
        );
    }

    #[tokio::test]
    async fn embed_cost_reference_values() {
        let svc = service().await;
        assert_eq!(
            svc.compute_cost("text-embedding-3-large", Endpoint::Embed, 1_000_000, 0)
                .unwrap(),
            dec!(0.13)
        );
    }

    #[tokio::test]
    async fn unknown_model_is_an_error_not_a_default() {
        let svc = service().await;
        let err = svc
            .compute_cost("never-heard-of-it", Endpoint::Chat, 100, 100)
            .unwrap_err();
        assert!(matches!(err, BillingError::Pricing(_)));
        assert_eq!(err.to_string(), "pricing error: unknown model or endpoint");
    }

    #[tokio::test]
    async fn chat_model_has_no_embed_leg() {
        let svc = service().await;
        let err = svc
            .compute_cost("gpt-4o", Endpoint::Embed, 100, 0)
            .unwrap_err();
        assert!(matches!(err, BillingError::Pricing(_)));
    }

    #[tokio::test]
    async fn update_persists_before_swap() {
        let ledger = Arc::new(MemoryLedger::new());
        let svc = PricingService::load(ledger.clone()).await.unwrap();

        let table = BTreeMap::from([(
            "my-model".to_string(),
            ModelPrices::chat(dec!(2), dec!(4)),
        )]);
        svc.update(table, "admin").await.unwrap();

        assert_eq!(svc.info().source, "admin");
        let raw = ledger.kv_get(PRICING_KEY).await.unwrap().unwrap();
        let persisted: PricingInfo = serde_json::from_str(&raw).unwrap();
        assert!(persisted.table.contains_key("my-model"));
    }

    #[tokio::test]
    async fn update_rejects_bad_model_ids() {
        let svc = service().await;
        let table = BTreeMap::from([(
            "bad model!".to_string(),
            ModelPrices::chat(dec!(1), dec!(1)),
        )]);
        let err = svc.update(table, "admin").await.unwrap_err();
        assert!(matches!(err, BillingError::Validation { .. }));
        // snapshot untouched
        assert_eq!(svc.info().source, "builtin");
    }

    #[tokio::test]
    async fn update_rejects_negative_prices() {
        let svc = service().await;
        let table = BTreeMap::from([(
            "my-model".to_string(),
            ModelPrices::chat(dec!(-1), dec!(1)),
        )]);
        assert!(svc.update(table, "admin").await.is_err());
    }

    #[tokio::test]
    async fn feed_url_scheme_is_checked() {
        let svc = service().await;
        let err = svc.refresh_from_feed("ftp://feed.example.com").await.unwrap_err();
        assert!(matches!(err, BillingError::Pricing(_)));
    }
}
