//! Integration tests for HTTP retry and ban handling against a local stub server

use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use perp_data_ingestor::fetcher::http::{ApiRequest, ExchangeHttpClient};
use perp_data_ingestor::fetcher::FetcherError;
use perp_data_ingestor::ingest::{RetryPolicy, TokenBucketLimiter};
use perp_data_ingestor::Platform;

use crate::integration::stub_server::{StubResponse, StubServer};

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_retries,
        Duration::from_millis(5),
        Duration::from_millis(20),
    )
}

fn http_client(server: &StubServer, max_retries: u32) -> ExchangeHttpClient {
    ExchangeHttpClient::new(
        Platform::Binance,
        Arc::new(Client::new()),
        server.base_url(),
        TokenBucketLimiter::new(100, Duration::from_secs(1)),
        fast_retry(max_retries),
    )
}

#[tokio::test]
async fn test_429_is_retried_until_success() {
    let server = StubServer::start().await;
    server.route(
        "/fapi/v1/fundingRate",
        vec![
            StubResponse::status(429),
            StubResponse::status(429),
            StubResponse::json(json!([{"fundingTime": 1, "fundingRate": "0.0001"}])),
        ],
    );
    let client = http_client(&server, 3);

    let body: Value = client
        .execute(&ApiRequest::get("/fapi/v1/fundingRate").param("symbol", "BTCUSDT"))
        .await
        .unwrap();

    assert_eq!(body[0]["fundingRate"], "0.0001");
    assert_eq!(server.hits("/fapi/v1/fundingRate"), 3);
    assert!(server.requests()[0].contains("symbol=BTCUSDT"));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = StubServer::start().await;
    server.route("/fapi/v1/klines", vec![StubResponse::status(429)]);
    let client = http_client(&server, 2);

    let err = client
        .execute::<Value>(&ApiRequest::get("/fapi/v1/klines"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::RateLimitExceeded));
    assert_eq!(server.hits("/fapi/v1/klines"), 3);
    assert!(!client.is_banned());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = StubServer::start().await;
    server.route(
        "/info",
        vec![StubResponse::status(503), StubResponse::json(json!({"ok": true}))],
    );
    let client = http_client(&server, 1);

    let body: Value = client
        .execute(&ApiRequest::post("/info", json!({"type": "meta"})))
        .await
        .unwrap();

    assert_eq!(body["ok"], true);
    assert_eq!(server.hits("/info"), 2);
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = StubServer::start().await;
    server.route("/fapi/v1/exchangeInfo", vec![StubResponse::status(400)]);
    let client = http_client(&server, 5);

    let err = client
        .execute::<Value>(&ApiRequest::get("/fapi/v1/exchangeInfo"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::HttpError(ref msg) if msg.contains("400")));
    assert_eq!(server.hits("/fapi/v1/exchangeInfo"), 1);
}

#[tokio::test]
async fn test_ban_is_sticky_and_stops_network_traffic() {
    let server = StubServer::start().await;
    server.route("/fapi/v1/fundingRate", vec![StubResponse::status(418)]);
    server.route("/fapi/v1/klines", vec![StubResponse::json(json!([]))]);
    let client = http_client(&server, 5);

    let err = client
        .execute::<Value>(&ApiRequest::get("/fapi/v1/fundingRate"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetcherError::Banned { status: 418 }));
    assert!(err.is_ban());
    assert!(client.is_banned());

    // Every later request fails without reaching the server, whatever the endpoint
    let err = client
        .execute::<Value>(&ApiRequest::get("/fapi/v1/klines"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetcherError::Banned { status: 418 }));
    assert_eq!(server.requests().len(), 1);

    // Clearing the flag lets the next run reach the exchange again
    client.reset_ban();
    assert!(!client.is_banned());
    let body: Value = client
        .execute(&ApiRequest::get("/fapi/v1/klines"))
        .await
        .unwrap();
    assert_eq!(body, json!([]));
    assert_eq!(server.hits("/fapi/v1/klines"), 1);
}

#[tokio::test]
async fn test_403_also_bans() {
    let server = StubServer::start().await;
    server.route("/api/v5/public/instruments", vec![StubResponse::status(403)]);
    let client = http_client(&server, 5);

    let err = client
        .execute::<Value>(&ApiRequest::get("/api/v5/public/instruments"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetcherError::Banned { status: 403 }));
    assert_eq!(server.hits("/api/v5/public/instruments"), 1);
}
