//! Billing engine: Charge, Reserve, Commit, GetBalance, AdjustBalance.
//!
//! The reservation record is the state object; the only legal transition is
//! `reserved` to `committed`, guarded by the store's conditional update so it
//! happens at most once. Balance moves go through the store's CAS debit, so
//! concurrent reserves against one user either all fit or the losers get
//! `insufficient balance` -- the engine itself holds no locks.
//!
//! Ordering per operation: ledger write, then usage counters, then the log
//! append, then the reply. Counter and log writes after a successful ledger
//! write are best-effort observability; their failure is logged and the call
//! still succeeds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tollgate_ledger::LedgerStore;
use tollgate_types::money::quantize;
use tollgate_types::record::{
    AdjustmentLogEntry, DepositLogEntry, Endpoint, Reservation, ReservationStatus,
    TransactionLogEntry,
};
use tollgate_types::{BillingError, Result, validate};

use crate::exchange::ExchangeService;
use crate::monitor::Monitor;
use crate::pricing::PricingService;

/// Transaction log stream.
pub const LOG_STREAM: &str = "billing:log";
/// Adjustment log stream.
pub const ADJUSTMENTS_STREAM: &str = "billing:adjustments";
/// Deposit stream, written by the payment collaborator and only read here.
pub const DEPOSITS_STREAM: &str = "billing:deposits";

/// Fast-path debit for callers that have already priced the request.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub user_id: String,
    pub model: String,
    pub tokens_used: u64,
    /// Caller-supplied cost, recorded verbatim (quantized), never repriced.
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChargeOutcome {
    pub new_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct ReserveRequest {
    pub user_id: String,
    /// Generated (uniform random, 128-bit) when absent.
    pub request_id: Option<String>,
    pub model: String,
    pub endpoint: Endpoint,
    pub input_tokens_estimate: u64,
    pub output_tokens_estimate: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReserveOutcome {
    pub reservation_id: String,
    pub reserved_amount: Decimal,
    pub remaining_balance: Decimal,
}

#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub reservation_id: String,
    pub input_tokens_actual: u64,
    pub output_tokens_actual: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub final_cost: Decimal,
    pub remaining_balance: Decimal,
}

/// Balance presented in the base currency plus the two display currencies.
/// Missing rates read as zero without failing the call.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceOutcome {
    pub usd: Decimal,
    pub rub: Decimal,
    pub eur: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustOutcome {
    pub new_balance: Decimal,
}

/// Admin stats assembled from the store.
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub total_users: usize,
    pub recent_transactions: Vec<TransactionLogEntry>,
    pub recent_deposit_count: usize,
    pub recent_deposits_usd: Decimal,
}

/// The billing core.
pub struct BillingEngine {
    ledger: Arc<dyn LedgerStore>,
    pricing: Arc<PricingService>,
    exchange: Arc<ExchangeService>,
    monitor: Arc<Monitor>,
    reservation_ttl: Duration,
    committed_ttl: Duration,
}

impl BillingEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        pricing: Arc<PricingService>,
        exchange: Arc<ExchangeService>,
        monitor: Arc<Monitor>,
        reservation_ttl_secs: u64,
        committed_ttl_secs: u64,
    ) -> Self {
        monitor.check_reservation_ttl(reservation_ttl_secs);
        Self {
            ledger,
            pricing,
            exchange,
            monitor,
            reservation_ttl: Duration::from_secs(reservation_ttl_secs),
            committed_ttl: Duration::from_secs(committed_ttl_secs),
        }
    }

    // ── Operations ───────────────────────────────────────────────────

    pub async fn charge(&self, req: ChargeRequest) -> Result<ChargeOutcome> {
        let result = self.charge_inner(&req).await;
        self.monitor.record_outcome("charge", result.is_ok());
        result
    }

    async fn charge_inner(&self, req: &ChargeRequest) -> Result<ChargeOutcome> {
        validate::user_id(&req.user_id)?;
        validate::model_id(&req.model)?;
        validate::positive_tokens("tokens_used", req.tokens_used)?;
        if req.cost <= Decimal::ZERO {
            return Err(BillingError::invalid("cost", "must be positive"));
        }
        validate::amount(req.cost)?;

        let cost = quantize(req.cost);
        let new_balance = self.ledger.cas_debit(&req.user_id, cost).await?;

        self.bump_usage(&req.user_id, &req.model, "direct", req.tokens_used)
            .await;
        self.append_log(TransactionLogEntry {
            user_id: req.user_id.clone(),
            model: req.model.clone(),
            endpoint: None,
            input_tokens: None,
            output_tokens: None,
            tokens_used: Some(req.tokens_used),
            cost_usd: cost,
            balance_usd: new_balance,
            reservation_id: None,
            timestamp: Utc::now(),
        })
        .await;
        self.monitor.add_charge(cost);

        info!(user_id = %req.user_id, model = %req.model, %cost, %new_balance, "charge applied");
        Ok(ChargeOutcome { new_balance })
    }

    pub async fn reserve(&self, req: ReserveRequest) -> Result<ReserveOutcome> {
        let result = self.reserve_inner(&req).await;
        self.monitor.record_outcome("reserve", result.is_ok());
        result
    }

    async fn reserve_inner(&self, req: &ReserveRequest) -> Result<ReserveOutcome> {
        validate::user_id(&req.user_id)?;
        validate::model_id(&req.model)?;
        if let Some(request_id) = &req.request_id {
            validate::request_id(request_id)?;
        }
        validate::positive_tokens("input_tokens", req.input_tokens_estimate)?;

        let estimated_cost = self.pricing.compute_cost(
            &req.model,
            req.endpoint,
            req.input_tokens_estimate,
            req.output_tokens_estimate,
        )?;

        let request_id = req
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let created_at = Utc::now();
        let reservation_id = Reservation::make_id(&req.user_id, &request_id, created_at);

        let remaining_balance = self.ledger.cas_debit(&req.user_id, estimated_cost).await?;

        let record = Reservation {
            user_id: req.user_id.clone(),
            model: req.model.clone(),
            endpoint: req.endpoint,
            input_tokens_estimate: req.input_tokens_estimate,
            output_tokens_estimate: req.output_tokens_estimate,
            estimated_cost,
            status: ReservationStatus::Reserved,
            created_at,
            actual_cost: None,
            input_tokens_actual: None,
            output_tokens_actual: None,
        };
        if let Err(err) = self
            .ledger
            .reservation_put(&reservation_id, record.to_fields(), self.reservation_ttl)
            .await
        {
            // Debit and record must land together; give the money back.
            if let Err(refund_err) = self.ledger.credit(&req.user_id, estimated_cost).await {
                error!(
                    user_id = %req.user_id,
                    %estimated_cost,
                    error = %refund_err,
                    "failed to reverse debit after reservation_put failure"
                );
            }
            warn!(%reservation_id, error = %err, "reservation create failed");
            return Err(err.into());
        }

        self.monitor.add_reservation();
        debug!(
            %reservation_id,
            user_id = %req.user_id,
            model = %req.model,
            endpoint = %req.endpoint,
            %estimated_cost,
            "reservation created"
        );
        Ok(ReserveOutcome {
            reservation_id,
            reserved_amount: estimated_cost,
            remaining_balance,
        })
    }

    pub async fn commit(&self, req: CommitRequest) -> Result<CommitOutcome> {
        let result = self.commit_inner(&req).await;
        self.monitor.record_outcome("commit", result.is_ok());
        result
    }

    async fn commit_inner(&self, req: &CommitRequest) -> Result<CommitOutcome> {
        validate::reservation_id(&req.reservation_id)?;
        validate::positive_tokens("input_tokens", req.input_tokens_actual)?;

        let fields = self
            .ledger
            .reservation_get(&req.reservation_id)
            .await?
            .ok_or_else(|| BillingError::ReservationNotFound(req.reservation_id.clone()))?;
        let reservation = Reservation::from_fields(&fields)?;
        if reservation.status == ReservationStatus::Committed {
            return Err(BillingError::ReservationConflict("already committed".into()));
        }

        let actual_cost = self.pricing.compute_cost(
            &reservation.model,
            reservation.endpoint,
            req.input_tokens_actual,
            req.output_tokens_actual,
        )?;

        // Settle the difference first; the status flip below is the commit
        // point and may still lose to a concurrent committer, in which case
        // the settlement is reversed.
        let refund = reservation.estimated_cost - actual_cost;
        let new_balance = if refund >= Decimal::ZERO {
            self.ledger.credit(&reservation.user_id, refund).await?
        } else {
            self.ledger.cas_debit(&reservation.user_id, -refund).await?
        };

        let patch = HashMap::from([
            ("status".to_string(), ReservationStatus::Committed.to_string()),
            ("actual_cost".to_string(), actual_cost.to_string()),
            (
                "input_tokens_actual".to_string(),
                req.input_tokens_actual.to_string(),
            ),
            (
                "output_tokens_actual".to_string(),
                req.output_tokens_actual.to_string(),
            ),
        ]);
        if let Err(err) = self
            .ledger
            .reservation_update(
                &req.reservation_id,
                patch,
                self.committed_ttl,
                &ReservationStatus::Reserved.to_string(),
            )
            .await
        {
            let reversal = if refund >= Decimal::ZERO {
                self.ledger.cas_debit(&reservation.user_id, refund).await
            } else {
                self.ledger.credit(&reservation.user_id, -refund).await
            };
            if let Err(reversal_err) = reversal {
                error!(
                    reservation_id = %req.reservation_id,
                    %refund,
                    error = %reversal_err,
                    "failed to reverse settlement after losing commit race"
                );
            }
            return Err(err.into());
        }

        let tokens = req.input_tokens_actual + req.output_tokens_actual;
        self.bump_usage(
            &reservation.user_id,
            &reservation.model,
            &reservation.endpoint.to_string(),
            tokens,
        )
        .await;
        self.append_log(TransactionLogEntry {
            user_id: reservation.user_id.clone(),
            model: reservation.model.clone(),
            endpoint: Some(reservation.endpoint),
            input_tokens: Some(req.input_tokens_actual),
            output_tokens: Some(req.output_tokens_actual),
            tokens_used: None,
            cost_usd: actual_cost,
            balance_usd: new_balance,
            reservation_id: Some(req.reservation_id.clone()),
            timestamp: Utc::now(),
        })
        .await;
        self.monitor.add_commit(actual_cost);

        info!(
            reservation_id = %req.reservation_id,
            user_id = %reservation.user_id,
            %actual_cost,
            %new_balance,
            "reservation committed"
        );
        Ok(CommitOutcome {
            final_cost: actual_cost,
            remaining_balance: new_balance,
        })
    }

    pub async fn get_balance(&self, user_id: &str) -> Result<BalanceOutcome> {
        let result = self.get_balance_inner(user_id).await;
        self.monitor.record_outcome("get_balance", result.is_ok());
        result
    }

    async fn get_balance_inner(&self, user_id: &str) -> Result<BalanceOutcome> {
        validate::user_id(user_id)?;
        let usd = self.ledger.get_balance(user_id).await?;

        self.monitor.check_balance(user_id, usd);
        if let Ok(tokens) = self.total_usage(user_id).await {
            self.monitor.check_usage(user_id, tokens);
        }

        let rates = self.exchange.snapshot();
        Ok(BalanceOutcome {
            usd,
            rub: rates.present(usd, "RUB"),
            eur: rates.present(usd, "EUR"),
        })
    }

    pub async fn adjust_balance(
        &self,
        user_id: &str,
        amount_usd: Decimal,
        reason: &str,
    ) -> Result<AdjustOutcome> {
        let result = self.adjust_inner(user_id, amount_usd, reason).await;
        self.monitor.record_outcome("adjust_balance", result.is_ok());
        result
    }

    async fn adjust_inner(
        &self,
        user_id: &str,
        amount_usd: Decimal,
        reason: &str,
    ) -> Result<AdjustOutcome> {
        validate::user_id(user_id)?;
        validate::amount(amount_usd)?;

        let amount = quantize(amount_usd);
        let new_balance = if amount >= Decimal::ZERO {
            self.ledger.credit(user_id, amount).await?
        } else {
            self.ledger.cas_debit(user_id, -amount).await?
        };

        let entry = AdjustmentLogEntry {
            user_id: user_id.to_string(),
            amount_usd: amount,
            reason: reason.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(err) = self
            .ledger
            .stream_append(ADJUSTMENTS_STREAM, entry.to_fields())
            .await
        {
            warn!(user_id, error = %err, "adjustment log append failed");
        }

        info!(user_id, %amount, reason, %new_balance, "balance adjusted");
        Ok(AdjustOutcome { new_balance })
    }

    /// Admin stats assembled from balances, the transaction log, and the
    /// deposit stream.
    pub async fn stats(&self) -> Result<ServiceStats> {
        let total_users = self.ledger.keys_match("balance:").await?.len();

        let mut recent_transactions = Vec::new();
        for fields in self.ledger.stream_range(LOG_STREAM, 100).await? {
            match TransactionLogEntry::from_fields(&fields) {
                Ok(entry) => recent_transactions.push(entry),
                Err(err) => warn!(error = %err, "skipping corrupt transaction log entry"),
            }
        }

        let mut recent_deposit_count = 0;
        let mut recent_deposits_usd = Decimal::ZERO;
        for fields in self.ledger.stream_range(DEPOSITS_STREAM, 1000).await? {
            match DepositLogEntry::from_fields(&fields) {
                Ok(entry) => {
                    recent_deposit_count += 1;
                    recent_deposits_usd += entry.amount_usd;
                }
                Err(err) => warn!(error = %err, "skipping corrupt deposit entry"),
            }
        }

        Ok(ServiceStats {
            total_users,
            recent_transactions,
            recent_deposit_count,
            recent_deposits_usd,
        })
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Per-user-per-model and per-day usage counters. Best-effort after the
    /// ledger write.
    async fn bump_usage(&self, user_id: &str, model: &str, bucket: &str, tokens: u64) {
        let tokens = tokens as i64;
        let user_key = format!("usage:{user_id}:model:{model}");
        if let Err(err) = self.ledger.counter_incr(&user_key, bucket, tokens).await {
            warn!(user_id, model, error = %err, "usage counter update failed");
        }
        let daily_key = format!("usage:daily:{}", Utc::now().format("%Y-%m-%d"));
        if let Err(err) = self.ledger.counter_incr(&daily_key, model, tokens).await {
            warn!(model, error = %err, "daily usage counter update failed");
        }
    }

    /// Sum of every usage bucket for a user, for the high-usage check.
    async fn total_usage(&self, user_id: &str) -> Result<u64> {
        let mut total = 0i64;
        for key in self
            .ledger
            .keys_match(&format!("usage:{user_id}:model:"))
            .await?
        {
            for count in self.ledger.counter_get_all(&key).await?.values() {
                total += *count;
            }
        }
        Ok(total.max(0) as u64)
    }

    /// Best-effort transaction log append after a successful ledger write.
    async fn append_log(&self, entry: TransactionLogEntry) {
        if let Err(err) = self.ledger.stream_append(LOG_STREAM, entry.to_fields()).await {
            warn!(
                user_id = %entry.user_id,
                cost = %entry.cost_usd,
                error = %err,
                "transaction log append failed"
            );
        }
    }
}
