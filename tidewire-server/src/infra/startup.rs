//! Wiring between configuration, broker connections and the long-running
//! tasks behind the HTTP server.

use std::sync::Arc;

use anyhow::{Context, Result};
use tidewire_config::{Config, RedisConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::infra::{
    app_state::AppState,
    pubsub::{
        BrokerPublisher, BrokerSubscriber, EventRouter, InMemoryBroker, RedisPublisher,
        RedisSubscriber, RetryPolicy, TaskPublisher,
    },
    upstream::{ConsumerError, ReconnectPolicy, ReconnectingConsumer, TaskRelay, WebSocketSource},
    websocket::Gateway,
};

/// The two broker connections a process holds: one for publishing tasks and
/// one dedicated to the outcome subscription.
pub struct Brokers {
    pub publisher: Arc<dyn BrokerPublisher>,
    pub subscriber: Arc<dyn BrokerSubscriber>,
}

impl std::fmt::Debug for Brokers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brokers").finish_non_exhaustive()
    }
}

impl Brokers {
    pub async fn redis(config: &RedisConfig) -> Result<Self> {
        let publisher = RedisPublisher::connect(config)
            .await
            .context("failed to connect the redis publish connection")?;
        let subscriber =
            RedisSubscriber::new(config).context("invalid redis subscription settings")?;
        Ok(Self {
            publisher: Arc::new(publisher),
            subscriber: Arc::new(subscriber),
        })
    }

    /// Single-process broker; tasks published here are only visible to this
    /// process.
    pub fn in_memory(broker: InMemoryBroker) -> Self {
        Self {
            publisher: Arc::new(broker.clone()),
            subscriber: Arc::new(broker),
        }
    }
}

/// Builds the shared state and registers the gateway's outcome listeners.
/// Nothing runs until [`spawn_background`] is called.
pub fn assemble(config: Arc<Config>, brokers: Brokers) -> AppState {
    let publisher = TaskPublisher::new(brokers.publisher, RetryPolicy::from(&config.publisher));
    let router = Arc::new(EventRouter::new(
        brokers.subscriber,
        RetryPolicy::from(&config.redis.connect),
    ));
    let gateway = Arc::new(Gateway::from_config(&config.gateway));
    gateway.install_listeners(&router);

    let upstream = config.upstream.as_ref().map(|upstream| {
        info!(
            url = %upstream.url,
            max_reconnects = upstream.max_reconnects,
            "upstream task feed configured"
        );
        Arc::new(ReconnectingConsumer::new(
            Arc::new(WebSocketSource::new(upstream.url.clone())),
            Arc::new(TaskRelay::new(publisher.clone(), Arc::clone(&gateway))),
            ReconnectPolicy::from(upstream),
        ))
    });

    AppState {
        config,
        publisher,
        gateway,
        router,
        upstream,
    }
}

#[derive(Debug)]
pub struct BackgroundTasks {
    router: JoinHandle<()>,
    upstream: Option<JoinHandle<Result<(), ConsumerError>>>,
}

pub fn spawn_background(state: &AppState, cancel: CancellationToken) -> BackgroundTasks {
    let router = state.router.spawn(cancel.child_token());
    let upstream = state
        .upstream
        .as_ref()
        .map(|consumer| Arc::clone(consumer).spawn(cancel.child_token()));
    BackgroundTasks { router, upstream }
}

impl BackgroundTasks {
    /// Waits for every task to finish. Call after cancelling their token.
    pub async fn join(self) {
        if let Err(err) = self.router.await {
            error!(error = %err, "event router task panicked");
        }
        if let Some(upstream) = self.upstream {
            match upstream.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "upstream consumer had already given up"),
                Err(err) => error!(error = %err, "upstream consumer task panicked"),
            }
        }
    }
}
