#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};
use tidewire_config::{Config, PublisherConfig};
use tidewire_server::{
    AppState,
    infra::{
        pubsub::InMemoryBroker,
        startup::{self, BackgroundTasks, Brokers},
    },
};
use tokio_util::sync::CancellationToken;

pub struct Harness {
    pub state: AppState,
    pub broker: InMemoryBroker,
    pub cancel: CancellationToken,
    pub background: BackgroundTasks,
}

impl Harness {
    /// Fully wired relay over an in-memory broker with the outcome
    /// subscription already live.
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(config: Config) -> Self {
        let broker = InMemoryBroker::new();
        let state = startup::assemble(Arc::new(config), Brokers::in_memory(broker.clone()));
        let cancel = CancellationToken::new();
        let background = startup::spawn_background(&state, cancel.clone());
        tokio::time::timeout(Duration::from_secs(5), broker.wait_for_subscribers(1))
            .await
            .expect("router subscribed");
        Self {
            state,
            broker,
            cancel,
            background,
        }
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.background.join().await;
    }
}

pub fn test_config() -> Config {
    Config {
        server: Default::default(),
        redis: Default::default(),
        publisher: PublisherConfig {
            max_retries: 0,
            retry_delay: Duration::ZERO,
            ..Default::default()
        },
        gateway: Default::default(),
        upstream: None,
        dev_mode: true,
        metadata: Default::default(),
    }
}

pub fn scope() -> Value {
    json!({
        "symbol": "BTCUSDT",
        "interval": "1h",
        "startDate": "2024-01-01",
        "endDate": "2024-06-01",
        "leverage": 3,
        "commission": 0.0004,
        "principal": 10000
    })
}

pub fn with_scope(extra: Value) -> Value {
    let mut params = scope();
    if let (Some(target), Value::Object(fields)) = (params.as_object_mut(), extra) {
        target.extend(fields);
    }
    params
}

pub fn backtest_params() -> Value {
    with_scope(json!({
        "strategies": [{"name": "ema_cross", "params": {"fast": 12, "slow": 26}}]
    }))
}

pub fn optimization_params() -> Value {
    with_scope(json!({
        "strategies": [{
            "name": "ema_cross",
            "ranges": [{"parameter": "fast", "min": 5, "max": 20, "step": 1}]
        }],
        "targetMetric": "sharpeRatio"
    }))
}

pub fn walkforward_params() -> Value {
    with_scope(json!({
        "strategy": {"name": "ema_cross", "params": {}},
        "trainingWindowDays": 60,
        "testingWindowDays": 14,
        "stepDays": 14
    }))
}
