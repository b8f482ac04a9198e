//! RPC surface tests: auth gating, status mapping, and the billing flow
//! end-to-end over the router with the in-memory substrate.

use std::str::FromStr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tower::ServiceExt;

use tollgate_api::auth::Claims;
use tollgate_api::{ApiState, Authenticator, router};
use tollgate_core::{BillingEngine, ExchangeService, Monitor, PricingService};
use tollgate_ledger::{LedgerStore, MemoryLedger};
use tollgate_types::config::ExchangeConfig;
use tollgate_types::monitor::Thresholds;

const SECRET: &str = "test-secret";
const ADMIN_KEY: &str = "test-admin-key";

async fn test_router() -> (Arc<MemoryLedger>, Router) {
    let ledger = Arc::new(MemoryLedger::new());
    let store: Arc<dyn LedgerStore> = ledger.clone();
    let pricing = Arc::new(PricingService::load(store.clone()).await.unwrap());
    let exchange = Arc::new(
        ExchangeService::load(store.clone(), ExchangeConfig::default())
            .await
            .unwrap(),
    );
    let monitor = Arc::new(Monitor::new(store.clone(), Thresholds::default()));
    let engine = Arc::new(BillingEngine::new(
        store.clone(),
        pricing.clone(),
        exchange.clone(),
        monitor.clone(),
        600,
        86_400,
    ));
    let state = ApiState {
        engine,
        pricing,
        exchange,
        monitor,
        ledger: store,
        auth: Arc::new(Authenticator::new(SECRET, ADMIN_KEY)),
        pricing_feed_url: None,
    };
    (ledger, router(state))
}

fn bearer() -> String {
    let claims = Claims {
        sub: Some("gateway".into()),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

fn post(uri: &str, body: serde_json::Value, admin: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", bearer());
    if admin {
        builder = builder.header("x-admin-key", ADMIN_KEY);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, admin: bool) -> Request<Body> {
    let mut builder = Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", bearer());
    if admin {
        builder = builder.header("x-admin-key", ADMIN_KEY);
    }
    builder.body(Body::empty()).unwrap()
}

fn decimal(value: &serde_json::Value) -> Decimal {
    Decimal::from_str(value.as_str().expect("decimal fields serialize as strings")).unwrap()
}

#[tokio::test]
async fn healthz_is_public() {
    let (_ledger, router) = test_router().await;
    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "tollgate");
    assert_eq!(body["substrate"], "ok");
}

#[tokio::test]
async fn missing_token_is_unauthenticated() {
    let (_ledger, router) = test_router().await;
    let request = Request::builder()
        .method("POST")
        .uri("/v1/charge")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"user_id":"u1a","model":"gpt-4o","tokens_used":1,"cost":"0.01"}"#))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
}

#[tokio::test]
async fn reserve_commit_flow_over_http() {
    let (ledger, router) = test_router().await;
    ledger.set_balance("u1a", dec!(10.00)).await.unwrap();

    let (status, body) = send(
        &router,
        post(
            "/v1/reserve",
            serde_json::json!({
                "user_id": "u1a",
                "model": "gpt-4o",
                "endpoint": "chat",
                "input_tokens_estimate": 1000,
                "output_tokens_estimate": 500,
            }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["reserved_amount"]), dec!(0.0125));
    assert_eq!(decimal(&body["remaining_balance"]), dec!(9.9875));
    let reservation_id = body["reservation_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        post(
            "/v1/commit",
            serde_json::json!({
                "reservation_id": reservation_id,
                "input_tokens_actual": 950,
                "output_tokens_actual": 480,
            }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["final_cost"]), dec!(0.01195));
    assert_eq!(decimal(&body["remaining_balance"]), dec!(9.98805));
}

#[tokio::test]
async fn insufficient_balance_maps_to_precondition_failed() {
    let (ledger, router) = test_router().await;
    ledger.set_balance("u1a", dec!(0.01)).await.unwrap();

    let (status, body) = send(
        &router,
        post(
            "/v1/reserve",
            serde_json::json!({
                "user_id": "u1a",
                "model": "gpt-4o",
                "endpoint": "chat",
                "input_tokens_estimate": 1000,
                "output_tokens_estimate": 500,
            }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert_eq!(body["error"]["code"], "FAILED_PRECONDITION");
    assert_eq!(body["error"]["message"], "insufficient_balance");
}

#[tokio::test]
async fn bad_endpoint_is_invalid_argument() {
    let (ledger, router) = test_router().await;
    ledger.set_balance("u1a", dec!(10.00)).await.unwrap();

    let (status, body) = send(
        &router,
        post(
            "/v1/reserve",
            serde_json::json!({
                "user_id": "u1a",
                "model": "gpt-4o",
                "endpoint": "completions",
                "input_tokens_estimate": 1000,
            }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn missing_reservation_is_not_found() {
    let (_ledger, router) = test_router().await;
    let (status, body) = send(
        &router,
        post(
            "/v1/commit",
            serde_json::json!({
                "reservation_id": "res:u1a:gone:1700000000",
                "input_tokens_actual": 10,
            }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn admin_calls_require_the_admin_key() {
    let (_ledger, router) = test_router().await;

    let body = serde_json::json!({
        "user_id": "u1a",
        "amount_usd": "25.00",
        "reason": "promo",
    });
    let (status, reply) = send(&router, post("/v1/adjust", body.clone(), false)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["error"]["code"], "UNAUTHENTICATED");

    let (status, reply) = send(&router, post("/v1/adjust", body, true)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&reply["new_balance"]), dec!(25.00));
}

#[tokio::test]
async fn charge_and_balance_over_http() {
    let (ledger, router) = test_router().await;
    ledger.set_balance("u1a", dec!(5.00)).await.unwrap();

    let (status, body) = send(
        &router,
        post(
            "/v1/charge",
            serde_json::json!({
                "user_id": "u1a",
                "model": "gpt-4o",
                "tokens_used": 1500,
                "cost": "0.05",
            }),
            false,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["new_balance"]), dec!(4.95));

    let (status, body) = send(&router, get("/v1/balance/u1a", false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["usd"]), dec!(4.95));
    assert_eq!(decimal(&body["rub"]), dec!(4.95) * dec!(92.5));
    assert_eq!(decimal(&body["eur"]), dec!(4.95) * dec!(0.92));
}

#[tokio::test]
async fn pricing_endpoints() {
    let (_ledger, router) = test_router().await;

    let (status, body) = send(&router, get("/v1/pricing", false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decimal(&body["gpt-4o"]["chat_input"]), dec!(5.00));

    let (status, body) = send(&router, get("/v1/pricing/info", false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "builtin");

    // admin update swaps the table
    let (status, body) = send(
        &router,
        post(
            "/v1/pricing",
            serde_json::json!({
                "table": {"my-model": {"chat_input": "1.00", "chat_output": "2.00"}},
                "source": "ops",
            }),
            true,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"], 1);

    let (_, body) = send(&router, get("/v1/pricing/info", false)).await;
    assert_eq!(body["source"], "ops");
}

#[tokio::test]
async fn metrics_reflect_operations() {
    let (ledger, router) = test_router().await;
    ledger.set_balance("u1a", dec!(5.00)).await.unwrap();

    send(
        &router,
        post(
            "/v1/charge",
            serde_json::json!({
                "user_id": "u1a",
                "model": "gpt-4o",
                "tokens_used": 100,
                "cost": "0.01",
            }),
            false,
        ),
    )
    .await;

    let (status, body) = send(&router, get("/v1/metrics", false)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 1);
    assert_eq!(body["successful"], 1);
    assert_eq!(decimal(&body["total_charges_usd"]), dec!(0.01));
}
