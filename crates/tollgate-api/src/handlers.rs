//! Typed request/response handlers for every billing operation.
//!
//! Each handler authenticates, parses, delegates to the core, and returns a
//! JSON body. No billing logic lives here; errors pass through
//! [`ApiError`](crate::error::ApiError) for status mapping.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tollgate_core::engine::{ChargeRequest, CommitRequest, ReserveRequest};
use tollgate_types::BillingError;
use tollgate_types::monitor::{Alert, MetricsSnapshot, Thresholds};
use tollgate_types::pricing::{PricingInfo, PricingTable};
use tollgate_types::rates::RateTable;
use tollgate_types::record::{Endpoint, TransactionLogEntry};

use crate::ApiState;
use crate::error::ApiError;

type ApiResult<T> = Result<Json<T>, ApiError>;

// ── Billing operations ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChargeBody {
    pub user_id: String,
    pub model: String,
    pub tokens_used: u64,
    pub cost: Decimal,
}

#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    pub new_balance: Decimal,
}

pub async fn charge(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ChargeBody>,
) -> ApiResult<ChargeResponse> {
    state.auth.verify_bearer(&headers)?;
    let outcome = state
        .engine
        .charge(ChargeRequest {
            user_id: body.user_id,
            model: body.model,
            tokens_used: body.tokens_used,
            cost: body.cost,
        })
        .await?;
    Ok(Json(ChargeResponse {
        new_balance: outcome.new_balance,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ReserveBody {
    pub user_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub input_tokens_estimate: u64,
    #[serde(default)]
    pub output_tokens_estimate: u64,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub reservation_id: String,
    pub reserved_amount: Decimal,
    pub remaining_balance: Decimal,
}

pub async fn reserve(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ReserveBody>,
) -> ApiResult<ReserveResponse> {
    state.auth.verify_bearer(&headers)?;
    let endpoint: Endpoint = body.endpoint.parse()?;
    let outcome = state
        .engine
        .reserve(ReserveRequest {
            user_id: body.user_id,
            request_id: body.request_id,
            model: body.model,
            endpoint,
            input_tokens_estimate: body.input_tokens_estimate,
            output_tokens_estimate: body.output_tokens_estimate,
        })
        .await?;
    Ok(Json(ReserveResponse {
        reservation_id: outcome.reservation_id,
        reserved_amount: outcome.reserved_amount,
        remaining_balance: outcome.remaining_balance,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CommitBody {
    pub reservation_id: String,
    pub input_tokens_actual: u64,
    #[serde(default)]
    pub output_tokens_actual: u64,
}

#[derive(Debug, Serialize)]
pub struct CommitResponse {
    pub final_cost: Decimal,
    pub remaining_balance: Decimal,
}

pub async fn commit(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CommitBody>,
) -> ApiResult<CommitResponse> {
    state.auth.verify_bearer(&headers)?;
    let outcome = state
        .engine
        .commit(CommitRequest {
            reservation_id: body.reservation_id,
            input_tokens_actual: body.input_tokens_actual,
            output_tokens_actual: body.output_tokens_actual,
        })
        .await?;
    Ok(Json(CommitResponse {
        final_cost: outcome.final_cost,
        remaining_balance: outcome.remaining_balance,
    }))
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub usd: Decimal,
    pub rub: Decimal,
    pub eur: Decimal,
}

pub async fn balance(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<BalanceResponse> {
    state.auth.verify_bearer(&headers)?;
    let outcome = state.engine.get_balance(&user_id).await?;
    Ok(Json(BalanceResponse {
        usd: outcome.usd,
        rub: outcome.rub,
        eur: outcome.eur,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AdjustBody {
    pub user_id: String,
    pub amount_usd: Decimal,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct AdjustResponse {
    pub new_balance: Decimal,
}

pub async fn adjust(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<AdjustBody>,
) -> ApiResult<AdjustResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    let outcome = state
        .engine
        .adjust_balance(&body.user_id, body.amount_usd, &body.reason)
        .await?;
    Ok(Json(AdjustResponse {
        new_balance: outcome.new_balance,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_users: usize,
    pub recent_transactions: Vec<TransactionLogEntry>,
    pub recent_deposit_count: usize,
    pub recent_deposits_usd: Decimal,
}

pub async fn stats(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<StatsResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    let stats = state.engine.stats().await?;
    Ok(Json(StatsResponse {
        total_users: stats.total_users,
        recent_transactions: stats.recent_transactions,
        recent_deposit_count: stats.recent_deposit_count,
        recent_deposits_usd: stats.recent_deposits_usd,
    }))
}

// ── Pricing administration ─────────────────────────────────────────

pub async fn pricing_table(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<PricingTable> {
    state.auth.verify_bearer(&headers)?;
    Ok(Json(state.pricing.table()))
}

pub async fn pricing_info(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<PricingInfo> {
    state.auth.verify_bearer(&headers)?;
    Ok(Json(state.pricing.info()))
}

#[derive(Debug, Deserialize)]
pub struct PricingUpdateBody {
    pub table: PricingTable,
    #[serde(default = "default_pricing_source")]
    pub source: String,
}

fn default_pricing_source() -> String {
    "admin".into()
}

#[derive(Debug, Serialize)]
pub struct PricingUpdateResponse {
    pub models: usize,
}

pub async fn pricing_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<PricingUpdateBody>,
) -> ApiResult<PricingUpdateResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    let models = body.table.len();
    state.pricing.update(body.table, &body.source).await?;
    Ok(Json(PricingUpdateResponse { models }))
}

#[derive(Debug, Deserialize)]
pub struct PricingRefreshBody {
    #[serde(default)]
    pub url: Option<String>,
}

pub async fn pricing_refresh(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<PricingRefreshBody>,
) -> ApiResult<PricingUpdateResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    let url = body
        .url
        .or_else(|| state.pricing_feed_url.clone())
        .ok_or_else(|| BillingError::Pricing("no pricing feed configured".into()))?;
    let models = state.pricing.refresh_from_feed(&url).await?;
    Ok(Json(PricingUpdateResponse { models }))
}

// ── Exchange-rate administration ───────────────────────────────────

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

fn ok() -> Json<OkResponse> {
    Json(OkResponse { ok: true })
}

pub async fn rates_get(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<RateTable> {
    state.auth.verify_bearer(&headers)?;
    Ok(Json(state.exchange.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct RatesUpdateBody {
    pub rates: BTreeMap<String, Decimal>,
}

pub async fn rates_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<RatesUpdateBody>,
) -> ApiResult<OkResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    state.exchange.update_all(body.rates).await?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct CurrencyAddBody {
    pub currency: String,
    pub rate: Decimal,
}

pub async fn currency_add(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CurrencyAddBody>,
) -> ApiResult<OkResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    state.exchange.add_currency(&body.currency, body.rate).await?;
    Ok(ok())
}

pub async fn currency_remove(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> ApiResult<OkResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    state.exchange.remove_currency(&code).await?;
    Ok(ok())
}

#[derive(Debug, Deserialize)]
pub struct CurrencyRateBody {
    pub rate: Decimal,
}

pub async fn currency_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(body): Json<CurrencyRateBody>,
) -> ApiResult<OkResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    state.exchange.update_rate(&code, body.rate).await?;
    Ok(ok())
}

pub async fn rates_refresh(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<OkResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    state.exchange.refresh().await?;
    Ok(ok())
}

// ── Monitoring ─────────────────────────────────────────────────────

pub async fn metrics(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<MetricsSnapshot> {
    state.auth.verify_bearer(&headers)?;
    Ok(Json(state.monitor.snapshot()))
}

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    #[serde(default = "default_alert_count")]
    pub count: usize,
}

fn default_alert_count() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
}

pub async fn alerts(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<AlertsResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    let alerts = state.monitor.recent_alerts(query.count).await?;
    Ok(Json(AlertsResponse { alerts }))
}

pub async fn thresholds_update(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<Thresholds>,
) -> ApiResult<OkResponse> {
    state.auth.verify_bearer(&headers)?;
    state.auth.verify_admin(&headers)?;
    state.monitor.set_thresholds(body);
    Ok(ok())
}

// ── Health ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub substrate: &'static str,
}

/// Liveness plus a substrate ping. Unauthenticated.
pub async fn healthz(State(state): State<ApiState>) -> Json<HealthResponse> {
    let substrate = match state.ledger.ping().await {
        Ok(()) => "ok",
        Err(_) => "unreachable",
    };
    Json(HealthResponse {
        status: if substrate == "ok" { "ok" } else { "degraded" },
        service: "tollgate",
        version: env!("CARGO_PKG_VERSION"),
        substrate,
    })
}
