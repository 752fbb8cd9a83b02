//! End-to-end ingestion runs: REST client against a stub exchange, in-memory storage

use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use perp_data_ingestor::fetcher::{ExchangeClient, RestExchangeClient};
use perp_data_ingestor::ingest::progress::StageStatus;
use perp_data_ingestor::ingest::{
    EventKind, IngestConfig, IngestionOrchestrator, IngestionRegistry, ProgressMessage,
    RetryPolicy, RunKind, RunStatus, StageKey, TokenBucketLimiter,
};
use perp_data_ingestor::registry::{PlatformProfile, PlatformRegistry};
use perp_data_ingestor::storage::memory::MemoryStores;
use perp_data_ingestor::storage::AssetRegistry;
use perp_data_ingestor::{Platform, HOUR_MS};

use crate::integration::stub_server::{StubResponse, StubServer};

const SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

/// Start of the oldest stubbed funding point, aligned to the hour
fn base_time() -> i64 {
    let day_ago = Utc::now().timestamp_millis() - 24 * HOUR_MS;
    day_ago - day_ago.rem_euclid(HOUR_MS)
}

fn exchange_info() -> Value {
    let mut symbols: Vec<Value> = SYMBOLS
        .iter()
        .map(|s| {
            json!({
                "symbol": s,
                "baseAsset": s.trim_end_matches("USDT"),
                "quoteAsset": "USDT",
                "contractType": "PERPETUAL",
                "status": "TRADING"
            })
        })
        .collect();
    symbols.push(json!({
        "symbol": "BTCUSDT_250328",
        "baseAsset": "BTC",
        "quoteAsset": "USDT",
        "contractType": "CURRENT_QUARTER",
        "status": "TRADING"
    }));
    json!({ "symbols": symbols })
}

fn funding_body(points: i64) -> Value {
    let base = base_time();
    Value::Array(
        (0..points)
            .map(|i| json!({"fundingTime": base + i * 8 * HOUR_MS, "fundingRate": "0.00010000"}))
            .collect(),
    )
}

fn klines_body() -> Value {
    let base = base_time();
    json!([
        [base, "100.0", "110.0", "90.0", "105.0", "12.5"],
        [base + HOUR_MS, "105.0", "108.0", "101.0", "102.0", "8.0"]
    ])
}

fn aster_profile() -> PlatformProfile {
    PlatformRegistry::load()
        .unwrap()
        .profile(Platform::Aster)
        .unwrap()
        .clone()
}

fn test_config() -> IngestConfig {
    IngestConfig::default()
        .with_lookback_days(7)
        .with_inter_page_delay(Duration::ZERO)
        .with_retry(RetryPolicy::new(
            1,
            Duration::from_millis(5),
            Duration::from_millis(10),
        ))
}

fn orchestrator(
    server: &StubServer,
    profile: PlatformProfile,
    stores: &MemoryStores,
) -> (Arc<IngestionOrchestrator>, Arc<RestExchangeClient>) {
    let config = test_config();
    let client = Arc::new(RestExchangeClient::with_base_url(
        &profile,
        &config,
        Arc::new(Client::new()),
        server.base_url(),
        TokenBucketLimiter::new(1000, Duration::from_secs(1)),
    ));
    let orchestrator = Arc::new(IngestionOrchestrator::new(
        profile,
        client.clone(),
        stores.stores(),
        config,
    ));
    (orchestrator, client)
}

async fn collect(mut events: mpsc::Receiver<ProgressMessage>) -> Vec<ProgressMessage> {
    let mut messages = Vec::new();
    while let Some(message) = events.recv().await {
        let done = message.is_done();
        messages.push(message);
        if done {
            break;
        }
    }
    messages
}

#[tokio::test]
async fn test_initial_then_incremental_run() {
    let server = StubServer::start().await;
    server
        .route("/fapi/v1/exchangeInfo", vec![StubResponse::json(exchange_info())])
        .route(
            "/fapi/v1/fundingRate",
            vec![
                StubResponse::json(funding_body(3)),
                StubResponse::json(funding_body(3)),
                StubResponse::json(funding_body(3)),
                StubResponse::json(funding_body(4)),
            ],
        )
        .route("/fapi/v1/klines", vec![StubResponse::json(klines_body())]);

    let stores = MemoryStores::new();
    let (orchestrator, _) = orchestrator(&server, aster_profile(), &stores);

    let initial = orchestrator.run(RunKind::Initial).await.unwrap();
    assert_eq!(initial.status, RunStatus::Success, "{:?}", initial.errors);
    assert_eq!(initial.total_assets, 3);
    assert_eq!(initial.counts.funding, 9);
    assert_eq!(initial.counts.ohlcv, 6);
    assert_eq!(initial.counts.open_interest, 0);
    assert_eq!(stores.funding.len(), 9);
    assert_eq!(stores.candles.len(), 6);

    let assets = stores.assets.find_by_platform(Platform::Aster).await.unwrap();
    assert_eq!(assets.len(), 3);
    assert!(assets.iter().all(|a| a.is_active));

    let incremental = orchestrator.run(RunKind::Incremental).await.unwrap();
    assert_eq!(incremental.status, RunStatus::Success, "{:?}", incremental.errors);
    assert_eq!(incremental.kind, RunKind::Incremental);
    // One new funding point per symbol, candles unchanged
    assert_eq!(incremental.counts.funding, 3);
    assert_eq!(incremental.counts.ohlcv, 0);
    assert_eq!(stores.funding.len(), 12);

    // Incremental runs use the stored registry instead of rediscovering assets
    assert_eq!(server.hits("/fapi/v1/exchangeInfo"), 1);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_symbol_failure_yields_partial_run() {
    let server = StubServer::start().await;
    server
        .route("/fapi/v1/exchangeInfo", vec![StubResponse::json(exchange_info())])
        .route("/fapi/v1/fundingRate", vec![StubResponse::json(funding_body(3))])
        .route("/fapi/v1/klines", vec![StubResponse::json(klines_body())]);

    let stores = MemoryStores::new();
    stores.funding.reject_symbol("ETHUSDT");
    let (orchestrator, _) = orchestrator(&server, aster_profile(), &stores);
    let events = orchestrator.subscribe();
    let collector = tokio::spawn(collect(events));

    let summary = orchestrator.run(RunKind::Initial).await.unwrap();
    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("ETHUSDT: "));
    assert_eq!(summary.counts.funding, 6);
    assert_eq!(summary.counts.ohlcv, 6);

    let messages = collector.await.unwrap();
    assert!(matches!(&messages[0], ProgressMessage::Event(e) if e.kind == EventKind::Start));
    assert!(messages.last().unwrap().is_done());

    let ProgressMessage::Event(terminal) = &messages[messages.len() - 2] else {
        panic!("expected terminal event before done");
    };
    assert_eq!(terminal.kind, EventKind::Complete);
    assert_eq!(terminal.percentage, 100);
    assert_eq!(terminal.errors.len(), 1);
    assert_eq!(terminal.processed_assets, 3);

    let store_stage = terminal
        .stages
        .iter()
        .find(|s| s.key == StageKey::FundingStore)
        .unwrap();
    assert_eq!((store_stage.completed, store_stage.total), (3, 3));
    assert!(terminal.stages.iter().all(|s| s.status == StageStatus::Complete));
    assert!(terminal.stages.iter().all(|s| s.key != StageKey::OiFetch));

    // Percentages never go backwards within a run
    let percentages: Vec<u8> = messages
        .iter()
        .filter_map(|m| match m {
            ProgressMessage::Event(e) => Some(e.percentage),
            ProgressMessage::Done => None,
        })
        .collect();
    assert!(percentages.windows(2).all(|w| w[0] <= w[1]), "{percentages:?}");
}

#[tokio::test]
async fn test_ban_stops_the_platform() {
    let server = StubServer::start().await;
    server
        .route("/fapi/v1/exchangeInfo", vec![StubResponse::json(exchange_info())])
        .route("/fapi/v1/fundingRate", vec![StubResponse::status(418)])
        .route("/fapi/v1/klines", vec![StubResponse::status(418)]);

    let mut profile = aster_profile();
    profile.concurrency = 1;
    let stores = MemoryStores::new();
    let (orchestrator, client) = orchestrator(&server, profile, &stores);

    let summary = orchestrator.run(RunKind::Initial).await.unwrap();

    assert!(client.is_banned());
    // Nothing was stored before the ban, so the run has no partial success to report
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.counts.funding, 0);
    assert!(summary.errors.iter().any(|e| e.contains("ban")));
    // At most one in-flight request per pipeline reached the exchange
    let data_requests = server.hits("/fapi/v1/fundingRate") + server.hits("/fapi/v1/klines");
    assert!(data_requests <= 2, "{data_requests} data requests after ban");
}

#[tokio::test]
async fn test_ban_does_not_outlive_its_run() {
    let server = StubServer::start().await;
    server
        .route("/fapi/v1/exchangeInfo", vec![StubResponse::json(exchange_info())])
        .route(
            "/fapi/v1/fundingRate",
            vec![StubResponse::status(418), StubResponse::json(funding_body(3))],
        )
        .route("/fapi/v1/klines", vec![StubResponse::json(klines_body())]);

    let mut profile = aster_profile();
    profile.concurrency = 1;
    let stores = MemoryStores::new();
    let (orchestrator, client) = orchestrator(&server, profile, &stores);

    let banned = orchestrator.run(RunKind::Initial).await.unwrap();
    assert_ne!(banned.status, RunStatus::Success);
    assert!(banned.errors.iter().any(|e| e.contains("ban")));
    assert!(client.is_banned());
    let requests_after_ban = server.requests().len();

    let next = orchestrator.run(RunKind::Initial).await.unwrap();
    assert_eq!(next.status, RunStatus::Success, "{:?}", next.errors);
    assert_eq!(next.counts.funding, 9);
    assert!(!client.is_banned());
    assert!(server.requests().len() > requests_after_ban);
}

#[tokio::test]
async fn test_discovery_failure_fails_the_run() {
    let server = StubServer::start().await;
    server.route("/fapi/v1/exchangeInfo", vec![StubResponse::status(400)]);

    let stores = MemoryStores::new();
    let (orchestrator, _) = orchestrator(&server, aster_profile(), &stores);
    let collector = tokio::spawn(collect(orchestrator.subscribe()));

    let summary = orchestrator.run(RunKind::Initial).await.unwrap();
    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.total_assets, 0);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("aster: "));

    let messages = collector.await.unwrap();
    let ProgressMessage::Event(terminal) = &messages[messages.len() - 2] else {
        panic!("expected terminal event before done");
    };
    assert_eq!(terminal.kind, EventKind::Error);
    assert!(!orchestrator.is_running());
}

#[tokio::test]
async fn test_registry_drives_background_runs() {
    let server = StubServer::start().await;
    server
        .route("/fapi/v1/exchangeInfo", vec![StubResponse::json(exchange_info())])
        .route("/fapi/v1/fundingRate", vec![StubResponse::json(funding_body(2))])
        .route("/fapi/v1/klines", vec![StubResponse::json(klines_body())]);

    let stores = MemoryStores::new();
    let (orchestrator, _) = orchestrator(&server, aster_profile(), &stores);
    let mut registry = IngestionRegistry::new();
    registry.insert(Arc::try_unwrap(orchestrator).unwrap());
    assert_eq!(registry.platforms(), vec![Platform::Aster]);

    let events = registry.subscribe(Platform::Aster).unwrap();
    let handle = registry.start_initial(Platform::Aster).await.unwrap();
    let messages = collect(events).await;
    let summary = handle.await.unwrap();

    assert_eq!(summary.status, RunStatus::Success);
    assert_eq!(summary.counts.funding, 6);
    assert!(messages.last().unwrap().is_done());
    assert!(!registry.is_running(Platform::Aster));
    assert!(registry.current_progress(Platform::Aster).is_none());
}
