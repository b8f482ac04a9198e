//! HTTP RPC surface for tollgate.
//!
//! Typed JSON request/response messages in front of the billing core, with
//! bearer-token authentication on every call and an admin-key gate on the
//! administrative ones. Port choice is a deployment concern; the router is
//! the semantic surface.

pub mod auth;
pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tokio_util::sync::CancellationToken;
use tracing::info;

use tollgate_core::{BillingEngine, ExchangeService, Monitor, PricingService};
use tollgate_ledger::LedgerStore;

pub use auth::Authenticator;

/// Shared state behind every handler.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<BillingEngine>,
    pub pricing: Arc<PricingService>,
    pub exchange: Arc<ExchangeService>,
    pub monitor: Arc<Monitor>,
    pub ledger: Arc<dyn LedgerStore>,
    pub auth: Arc<Authenticator>,
    pub pricing_feed_url: Option<String>,
}

/// Build the full route table.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/charge", post(handlers::charge))
        .route("/v1/reserve", post(handlers::reserve))
        .route("/v1/commit", post(handlers::commit))
        .route("/v1/balance/{user_id}", get(handlers::balance))
        .route("/v1/adjust", post(handlers::adjust))
        .route("/v1/stats", get(handlers::stats))
        .route(
            "/v1/pricing",
            get(handlers::pricing_table).post(handlers::pricing_update),
        )
        .route("/v1/pricing/info", get(handlers::pricing_info))
        .route("/v1/pricing/refresh", post(handlers::pricing_refresh))
        .route("/v1/rates", get(handlers::rates_get).post(handlers::rates_update))
        .route("/v1/rates/currency", post(handlers::currency_add))
        .route(
            "/v1/rates/currency/{code}",
            delete(handlers::currency_remove).put(handlers::currency_update),
        )
        .route("/v1/rates/refresh", post(handlers::rates_refresh))
        .route("/v1/metrics", get(handlers::metrics))
        .route("/v1/alerts", get(handlers::alerts))
        .route("/v1/thresholds", post(handlers::thresholds_update))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
}

/// Bind and serve until the shutdown token fires.
pub async fn serve(
    state: ApiState,
    addr: SocketAddr,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "rpc surface listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
