//! Exchange-rate service.
//!
//! Presentation-only: ledger math never leaves USD. The snapshot sits behind
//! an rw-lock, refreshed hourly from an external feed by a background task
//! that backs off for 60 s on failure and keeps the previous snapshot. USD
//! and USDT stay pinned to 1 no matter what the feed says.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tollgate_ledger::LedgerStore;
use tollgate_types::config::ExchangeConfig;
use tollgate_types::rates::RateTable;
use tollgate_types::{BillingError, Result, validate};

/// Store key the current snapshot is persisted under.
const RATES_KEY: &str = "exchange:rates";

/// Shape of the external feed document.
#[derive(Debug, Deserialize)]
struct FeedDocument {
    rates: BTreeMap<String, Decimal>,
}

/// In-process exchange-rate service.
pub struct ExchangeService {
    ledger: Arc<dyn LedgerStore>,
    http: reqwest::Client,
    config: ExchangeConfig,
    state: RwLock<RateTable>,
}

impl ExchangeService {
    /// Load the snapshot from the store, falling back to the builtin table.
    pub async fn load(ledger: Arc<dyn LedgerStore>, config: ExchangeConfig) -> Result<Self> {
        let state = match ledger.kv_get(RATES_KEY).await? {
            Some(raw) => match serde_json::from_str::<RateTable>(&raw) {
                Ok(mut table) => {
                    table.repin();
                    info!(currencies = table.rates.len(), "loaded exchange rates from store");
                    table
                }
                Err(err) => {
                    warn!(error = %err, "persisted rates are corrupt, using builtin snapshot");
                    RateTable::builtin(Utc::now())
                }
            },
            None => RateTable::builtin(Utc::now()),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BillingError::External(format!("http client: {e}")))?;

        Ok(Self {
            ledger,
            http,
            config,
            state: RwLock::new(state),
        })
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> RateTable {
        self.state.read().clone()
    }

    /// Add a currency that is not yet listed.
    pub async fn add_currency(&self, code: &str, rate: Decimal) -> Result<()> {
        let code = normalize(code)?;
        check_rate(rate)?;
        {
            let state = self.state.read();
            if state.rates.contains_key(&code) {
                return Err(BillingError::invalid(
                    "currency",
                    format!("{code} is already listed"),
                ));
            }
        }
        self.mutate(|table| {
            table.rates.insert(code.clone(), rate);
        })
        .await?;
        info!(currency = %code, %rate, "currency added");
        Ok(())
    }

    /// Remove a currency. USD and USDT are pinned and cannot be removed.
    pub async fn remove_currency(&self, code: &str) -> Result<()> {
        let code = normalize(code)?;
        if RateTable::is_pinned(&code) {
            return Err(BillingError::invalid(
                "currency",
                format!("{code} is pinned and cannot be removed"),
            ));
        }
        if !self.state.read().rates.contains_key(&code) {
            return Err(BillingError::invalid(
                "currency",
                format!("{code} is not listed"),
            ));
        }
        self.mutate(|table| {
            table.rates.remove(&code);
        })
        .await?;
        info!(currency = %code, "currency removed");
        Ok(())
    }

    /// Update one currency's rate.
    pub async fn update_rate(&self, code: &str, rate: Decimal) -> Result<()> {
        let code = normalize(code)?;
        check_rate(rate)?;
        if RateTable::is_pinned(&code) {
            return Err(BillingError::invalid(
                "currency",
                format!("{code} is pinned at 1"),
            ));
        }
        if !self.state.read().rates.contains_key(&code) {
            return Err(BillingError::invalid(
                "currency",
                format!("{code} is not listed"),
            ));
        }
        self.mutate(|table| {
            table.rates.insert(code.clone(), rate);
        })
        .await?;
        info!(currency = %code, %rate, "currency rate updated");
        Ok(())
    }

    /// Replace every non-pinned rate at once.
    pub async fn update_all(&self, rates: BTreeMap<String, Decimal>) -> Result<()> {
        let mut normalized = BTreeMap::new();
        for (code, rate) in rates {
            let code = normalize(&code)?;
            check_rate(rate)?;
            normalized.insert(code, rate);
        }
        self.mutate(move |table| {
            table.rates = normalized;
            table.repin();
        })
        .await?;
        info!("exchange rates replaced");
        Ok(())
    }

    /// Fetch the feed once and swap the snapshot on success.
    pub async fn refresh(&self) -> Result<()> {
        let url = self
            .config
            .feed_url
            .as_deref()
            .ok_or_else(|| BillingError::External("no exchange feed configured".into()))?;

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BillingError::External(format!("exchange feed fetch: {e}")))?;
        let document: FeedDocument = response
            .json()
            .await
            .map_err(|e| BillingError::External(format!("invalid exchange feed payload: {e}")))?;

        let mut normalized = BTreeMap::new();
        for (code, rate) in document.rates {
            // Skip junk entries instead of failing the whole refresh.
            let Ok(code) = normalize(&code) else {
                debug!(%code, "skipping malformed currency code from feed");
                continue;
            };
            if rate <= Decimal::ZERO {
                debug!(code = %code, %rate, "skipping non-positive rate from feed");
                continue;
            }
            normalized.insert(code, rate);
        }
        if normalized.is_empty() {
            return Err(BillingError::External("exchange feed returned no usable rates".into()));
        }

        self.mutate(move |table| {
            table.rates = normalized;
            table.repin();
        })
        .await?;
        info!(currencies = self.state.read().rates.len(), "exchange rates refreshed from feed");
        Ok(())
    }

    /// Background refresher. Polls at the configured interval, retries
    /// sooner after a failure, and exits when the token is cancelled.
    pub async fn run_refresher(self: Arc<Self>, shutdown: CancellationToken) {
        if self.config.feed_url.is_none() {
            debug!("no exchange feed configured, refresher not running");
            return;
        }
        let interval = Duration::from_secs(self.config.refresh_secs);
        let retry = Duration::from_secs(self.config.retry_secs);

        loop {
            let delay = match self.refresh().await {
                Ok(()) => interval,
                Err(err) => {
                    warn!(error = %err, retry_secs = retry.as_secs(), "exchange refresh failed, keeping previous snapshot");
                    retry
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("exchange refresher stopping");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Apply a mutation, stamp `last_updated`, persist the snapshot.
    async fn mutate(&self, apply: impl FnOnce(&mut RateTable)) -> Result<()> {
        let next = {
            let mut state = self.state.write();
            apply(&mut state);
            state.last_updated = Utc::now();
            state.clone()
        };
        let raw = serde_json::to_string(&next)
            .map_err(|e| BillingError::External(format!("serialize rates: {e}")))?;
        self.ledger.kv_set(RATES_KEY, &raw).await?;
        Ok(())
    }
}

fn normalize(code: &str) -> Result<String> {
    validate::currency(code)?;
    Ok(code.to_ascii_uppercase())
}

fn check_rate(rate: Decimal) -> Result<()> {
    if rate <= Decimal::ZERO {
        return Err(BillingError::invalid("rate", format!("{rate} must be positive")));
    }
    Ok(())
}
