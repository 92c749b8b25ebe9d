//! Fan-out of aggregated change events to WebSocket clients.
//!
//! Each event is serialized once here and shared by every connected client.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use tickmesh_feed::TickerEvent;

use crate::types::DashboardMessage;

pub async fn run_broadcaster(
    mut events: broadcast::Receiver<TickerEvent>,
    tx: broadcast::Sender<String>,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => break,
            result = events.recv() => result,
        };

        match event {
            Ok(event) => match serde_json::to_string(&DashboardMessage::Event(event)) {
                Ok(json) => {
                    // No receivers is normal when no client is connected.
                    if let Ok(n) = tx.send(json) {
                        trace!(receivers = n, "Ticker event broadcast");
                    }
                }
                Err(e) => debug!(error = %e, "Failed to serialize ticker event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Dashboard broadcaster lagged behind aggregator");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Aggregator event feed closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tickmesh_core::{Exchange, ExchangeConfig, ManualClock, TickerUpdate};
    use tickmesh_feed::{Aggregator, AggregatorConfig};

    #[tokio::test]
    async fn test_forwards_serialized_events() {
        let clock = Arc::new(ManualClock::new(1_000));
        let aggregator = Arc::new(
            Aggregator::new(
                AggregatorConfig::default(),
                &ExchangeConfig::defaults(),
                clock,
            )
            .unwrap(),
        );
        let (tx, mut rx) = broadcast::channel::<String>(16);
        let token = CancellationToken::new();
        let task = tokio::spawn(run_broadcaster(aggregator.subscribe(), tx, token.clone()));

        aggregator.ingest(TickerUpdate {
            symbol: "BTC".to_string(),
            price: 42_000.0,
            change_24h_percent: 1.0,
            high_24h: 43_000.0,
            low_24h: 41_000.0,
            volume_24h: 10.0,
            source: Exchange::Okx,
            observed_at: 1_000,
            exchange_ts: None,
        });

        let json = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["data"]["type"], "update");
        assert_eq!(value["data"]["symbol"], "BTC");
        assert_eq!(value["data"]["source"], "okx");

        token.cancel();
        task.await.unwrap();
    }
}
