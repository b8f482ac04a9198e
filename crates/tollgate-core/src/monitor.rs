//! Monitoring aggregator.
//!
//! In-memory counters updated inline with every billing operation, threshold
//! evaluation, and cooldown-throttled alerts appended to the
//! `billing:alerts` stream. Alert emission is spawned onto the runtime so
//! the billing path never waits on the substrate for observability.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use tollgate_ledger::LedgerStore;
use tollgate_types::monitor::{Alert, MetricsSnapshot, Thresholds};

/// Stream alerts are appended to.
const ALERTS_STREAM: &str = "billing:alerts";

#[derive(Default)]
struct Counters {
    total_requests: u64,
    successful: u64,
    failed: u64,
    total_charges_usd: Decimal,
    total_reservations: u64,
    total_commits: u64,
}

/// Process-wide monitoring state.
pub struct Monitor {
    ledger: Arc<dyn LedgerStore>,
    counters: Mutex<Counters>,
    thresholds: RwLock<Thresholds>,
    last_alert: Mutex<Option<Instant>>,
}

impl Monitor {
    pub fn new(ledger: Arc<dyn LedgerStore>, thresholds: Thresholds) -> Self {
        Self {
            ledger,
            counters: Mutex::new(Counters::default()),
            thresholds: RwLock::new(thresholds),
            last_alert: Mutex::new(None),
        }
    }

    /// Record an operation outcome and re-evaluate the error rate.
    pub fn record_outcome(&self, operation: &str, success: bool) {
        let (rate, threshold) = {
            let mut counters = self.counters.lock();
            counters.total_requests += 1;
            if success {
                counters.successful += 1;
            } else {
                counters.failed += 1;
            }
            (
                counters.failed as f64 / counters.total_requests as f64,
                self.thresholds.read().error_rate,
            )
        };
        if !success {
            debug!(operation, "operation failed");
        }
        if rate > threshold {
            self.emit(format!(
                "error rate {rate:.3} above threshold {threshold:.3}"
            ));
        }
    }

    /// Add a successful Charge's amount to the running total.
    pub fn add_charge(&self, amount: Decimal) {
        self.counters.lock().total_charges_usd += amount;
    }

    /// Count a successful Reserve.
    pub fn add_reservation(&self) {
        self.counters.lock().total_reservations += 1;
    }

    /// Count a successful Commit and add its amount to the charge total.
    pub fn add_commit(&self, amount: Decimal) {
        let mut counters = self.counters.lock();
        counters.total_commits += 1;
        counters.total_charges_usd += amount;
    }

    /// Low-balance check, evaluated when a balance is read.
    pub fn check_balance(&self, user_id: &str, balance: Decimal) {
        let threshold = self.thresholds.read().low_balance_usd;
        if balance < threshold {
            self.emit(format!(
                "balance {balance} for user {user_id} below threshold {threshold}"
            ));
        }
    }

    /// High-usage check, evaluated when a usage counter is read.
    pub fn check_usage(&self, user_id: &str, tokens: u64) {
        let threshold = self.thresholds.read().high_usage_tokens;
        if tokens > threshold {
            self.emit(format!(
                "usage {tokens} tokens for user {user_id} above threshold {threshold}"
            ));
        }
    }

    /// Configuration sanity check: a reservation TTL below the floor makes
    /// commits race their own expiry.
    pub fn check_reservation_ttl(&self, configured_ttl_secs: u64) {
        let floor = self.thresholds.read().min_reservation_ttl_secs;
        if configured_ttl_secs < floor {
            self.emit(format!(
                "reservation ttl {configured_ttl_secs}s below threshold {floor}s"
            ));
        }
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.lock();
        let error_rate = if counters.total_requests == 0 {
            0.0
        } else {
            counters.failed as f64 / counters.total_requests as f64
        };
        MetricsSnapshot {
            total_requests: counters.total_requests,
            successful: counters.successful,
            failed: counters.failed,
            total_charges_usd: counters.total_charges_usd,
            total_reservations: counters.total_reservations,
            total_commits: counters.total_commits,
            error_rate,
        }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds.read().clone()
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) {
        *self.thresholds.write() = thresholds;
    }

    /// Append an alert unless still inside the cooldown window. The append
    /// itself runs on a spawned task; the caller never blocks on it.
    fn emit(&self, message: String) {
        {
            let mut last = self.last_alert.lock();
            let cooldown = self.thresholds.read().alert_cooldown_secs;
            if let Some(at) = *last {
                if at.elapsed().as_secs() < cooldown {
                    debug!(%message, "alert suppressed by cooldown");
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let alert = Alert {
            message,
            timestamp: Utc::now(),
            metrics: self.snapshot(),
        };
        warn!(message = %alert.message, "billing alert");

        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            if let Err(err) = ledger.stream_append(ALERTS_STREAM, alert.to_fields()).await {
                warn!(error = %err, "failed to append alert");
            }
        });
    }

    /// Recent alerts, newest first.
    pub async fn recent_alerts(&self, count: usize) -> tollgate_types::Result<Vec<Alert>> {
        let entries = self.ledger.stream_range(ALERTS_STREAM, count).await?;
        Ok(entries.iter().filter_map(Alert::from_fields).collect())
    }
}
