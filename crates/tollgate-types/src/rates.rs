//! Exchange-rate table.
//!
//! Rates are multipliers from the base currency (USD) to the target and are
//! presentation-only: ledger math never leaves USD. USD and USDT are pinned
//! to 1 and cannot be removed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Currencies that are always present with rate 1.
pub const PINNED: [&str; 2] = ["USD", "USDT"];

/// A snapshot of the exchange-rate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateTable {
    /// `currency -> rate vs USD`. Keys are uppercase three-letter codes.
    pub rates: BTreeMap<String, Decimal>,
    pub last_updated: DateTime<Utc>,
}

impl RateTable {
    /// Built-in snapshot used before the first successful feed refresh.
    pub fn builtin(now: DateTime<Utc>) -> Self {
        Self {
            rates: BTreeMap::from([
                ("USD".into(), Decimal::ONE),
                ("USDT".into(), Decimal::ONE),
                ("RUB".into(), dec!(92.5)),
                ("EUR".into(), dec!(0.92)),
            ]),
            last_updated: now,
        }
    }

    /// Whether a currency is pinned (rate fixed at 1, not removable).
    pub fn is_pinned(code: &str) -> bool {
        PINNED.contains(&code)
    }

    /// Rate for a currency, or `None` when unknown.
    pub fn rate(&self, code: &str) -> Option<Decimal> {
        self.rates.get(code).copied()
    }

    /// Convert a USD amount for presentation. Unknown currencies yield zero
    /// rather than failing the call.
    pub fn present(&self, usd: Decimal, code: &str) -> Decimal {
        match self.rate(code) {
            Some(rate) => usd * rate,
            None => Decimal::ZERO,
        }
    }

    /// Force the pinned currencies back to rate 1. Applied after every feed
    /// refresh so a bad feed cannot unpin the base.
    pub fn repin(&mut self) {
        for code in PINNED {
            self.rates.insert(code.into(), Decimal::ONE);
        }
    }
}
