//! End-to-end: a local OKX-shaped server feeding the full subsystem.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tickmesh_app::{AppConfig, Subsystem};
use tickmesh_core::{Exchange, SystemClock};
use tickmesh_ws::ConnectionState;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Answers every OKX subscribe with one ticker frame per requested instrument.
async fn start_okx_mock() -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicU32::new(0));
    let count = connections.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            count.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    if text == "ping" {
                        let _ = ws.send(Message::Text("pong".to_string())).await;
                        continue;
                    }
                    let Ok(request) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    let args = request["args"].as_array().cloned().unwrap_or_default();
                    for arg in args {
                        let inst = arg["instId"].as_str().unwrap_or_default();
                        let frame = serde_json::json!({
                            "arg": {"channel": "tickers", "instId": inst},
                            "data": [{
                                "instId": inst,
                                "last": "50010",
                                "open24h": "49500",
                                "high24h": "50600",
                                "low24h": "49100",
                                "vol24h": "900",
                                "ts": "1700000001000"
                            }]
                        });
                        let _ = ws.send(Message::Text(frame.to_string())).await;
                    }
                }
            });
        }
    });

    (addr, connections)
}

fn config_for(addr: SocketAddr, symbols: &str, per_connection: usize) -> AppConfig {
    AppConfig::from_toml_str(&format!(
        r#"
        symbols = {symbols}

        [backoff]
        base_delay_ms = 50
        max_delay_ms = 200
        jitter_factor = 0.0

        [[exchanges]]
        name = "okx"
        priority = 1
        endpoint_url = "ws://{addr}"
        max_symbols_per_connection = {per_connection}
        "#
    ))
    .unwrap()
}

async fn eventually<F: Fn() -> bool>(check: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn ticks_flow_from_socket_to_aggregated_view() {
    tickmesh_ws::init_crypto();
    let (addr, _) = start_okx_mock().await;
    let subsystem = Subsystem::start(&config_for(addr, r#"["BTC"]"#, 10), SystemClock::shared())
        .unwrap();

    eventually(|| subsystem.get_aggregated("BTC").is_some()).await;
    let btc = subsystem.get_aggregated("BTC").unwrap();
    assert_eq!(btc.source, Exchange::Okx);
    assert_eq!(btc.price, 50_010.0);
    assert!(btc.is_live);
    assert_eq!(subsystem.snapshot().len(), 1);

    let status = subsystem.exchange_status();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].exchange, Exchange::Okx);
    assert_eq!(status[0].state, ConnectionState::Connected);

    subsystem.shutdown().await;
    assert_eq!(
        subsystem.exchange_status()[0].state,
        ConnectionState::Disconnected
    );
}

#[tokio::test]
async fn shards_and_disable() {
    tickmesh_ws::init_crypto();
    let (addr, connections) = start_okx_mock().await;
    let subsystem = Subsystem::start(
        &config_for(addr, r#"["BTC", "ETH", "SOL"]"#, 2),
        SystemClock::shared(),
    )
    .unwrap();

    eventually(|| subsystem.snapshot().len() == 3).await;
    assert_eq!(connections.load(Ordering::SeqCst), 2);
    assert_eq!(subsystem.exchange_status()[0].connections.len(), 2);

    assert!(!subsystem.disable_exchange(Exchange::Binance));
    assert!(subsystem.disable_exchange(Exchange::Okx));
    eventually(|| subsystem.exchange_status()[0].state == ConnectionState::Failed).await;

    subsystem.shutdown().await;
}
