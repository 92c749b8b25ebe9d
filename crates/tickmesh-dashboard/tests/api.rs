use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tickmesh_core::{Exchange, ExchangeConfig, ManualClock, TickerUpdate};
use tickmesh_dashboard::{create_router, AppState, DashboardConfig, DashboardState};
use tickmesh_feed::{Aggregator, AggregatorConfig};
use tickmesh_ws::{ConnectionState, ExchangeStatus};
use tokio::sync::broadcast;
use tower::ServiceExt;

const T0: u64 = 1_700_000_000_000;

fn update(symbol: &str, price: f64, source: Exchange) -> TickerUpdate {
    TickerUpdate {
        symbol: symbol.to_string(),
        price,
        change_24h_percent: 0.5,
        high_24h: price * 1.01,
        low_24h: price * 0.99,
        volume_24h: 1_000.0,
        source,
        observed_at: T0,
        exchange_ts: Some(T0 - 15),
    }
}

fn router() -> axum::Router {
    let clock = Arc::new(ManualClock::new(T0));
    let aggregator = Arc::new(
        Aggregator::new(
            AggregatorConfig::default(),
            &ExchangeConfig::defaults(),
            clock,
        )
        .unwrap(),
    );
    aggregator.ingest(update("ETH", 2_500.0, Exchange::Kraken));
    aggregator.ingest(update("BTC", 42_000.0, Exchange::Binance));

    let status = || {
        vec![ExchangeStatus::from_connections(
            Exchange::Binance,
            vec![ConnectionState::Connected, ConnectionState::Reconnecting],
        )]
    };
    let state = DashboardState::new(aggregator, Arc::new(status));
    let (tx, _) = broadcast::channel(8);
    create_router(AppState::new(state, tx, DashboardConfig::default()))
}

async fn get(path: &str) -> (StatusCode, serde_json::Value) {
    let response = router()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn lists_tickers_sorted_by_symbol() {
    let (status, body) = get("/api/tickers").await;
    assert_eq!(status, StatusCode::OK);
    let tickers = body.as_array().unwrap();
    assert_eq!(tickers.len(), 2);
    assert_eq!(tickers[0]["symbol"], "BTC");
    assert_eq!(tickers[1]["symbol"], "ETH");
    assert_eq!(tickers[1]["source"], "kraken");
    assert_eq!(tickers[1]["is_live"], true);
}

#[tokio::test]
async fn single_ticker_lookup() {
    let (status, body) = get("/api/tickers/btc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["price"], 42_000.0);

    let (status, _) = get("/api/tickers/DOGE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_reports_best_connection_state() {
    let (status, body) = get("/api/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["exchange"], "binance");
    assert_eq!(body[0]["state"], "connected");
    assert_eq!(body[0]["connections"][1], "reconnecting");
}

#[tokio::test]
async fn metrics_are_plain_text() {
    let response = router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tickmesh_aggregated_live"));
}
