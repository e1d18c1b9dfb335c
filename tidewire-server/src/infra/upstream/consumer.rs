//! Long-lived client of an upstream task feed.
//!
//! The consumer opens the source, reads binary frames as JSON task messages and
//! hands each decoded task to an [`UpstreamHandler`]. When the transport
//! closes it waits `reconnect_delay` and opens it again. The reconnect counter
//! resets after every successful open; once it goes past `max_reconnects` in a
//! row the consumer gives up with [`ConsumerError::Exhausted`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tidewire_config::UpstreamConfig;
use tidewire_model::UpstreamTask;
use tokio::{select, sync::watch, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::source::{FrameStream, UpstreamFrame, UpstreamSource};

/// Receives every task decoded from the feed, in arrival order.
#[async_trait]
pub trait UpstreamHandler: Send + Sync {
    async fn handle(&self, task: UpstreamTask);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ConsumerState {
    Idle,
    Connecting,
    Connected,
    Backoff { attempt: u32 },
    Failed { attempts: u32 },
    Stopped,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("upstream {endpoint} still unreachable after {reconnects} reconnect attempts")]
    Exhausted { endpoint: String, reconnects: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_reconnects: u32,
    pub delay: Duration,
}

impl From<&UpstreamConfig> for ReconnectPolicy {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            max_reconnects: config.max_reconnects,
            delay: config.reconnect_delay,
        }
    }
}

#[derive(Debug, Default)]
struct ConsumerCounters {
    frames: AtomicU64,
    tasks: AtomicU64,
    decode_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub frames: u64,
    pub tasks: u64,
    pub decode_failures: u64,
}

enum SessionEnd {
    Closed,
    Cancelled,
}

pub struct ReconnectingConsumer {
    source: Arc<dyn UpstreamSource>,
    handler: Arc<dyn UpstreamHandler>,
    policy: ReconnectPolicy,
    state: watch::Sender<ConsumerState>,
    counters: ConsumerCounters,
}

impl fmt::Debug for ReconnectingConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectingConsumer")
            .field("endpoint", &self.source.describe())
            .field("policy", &self.policy)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ReconnectingConsumer {
    pub fn new(
        source: Arc<dyn UpstreamSource>,
        handler: Arc<dyn UpstreamHandler>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            source,
            handler,
            policy,
            state,
            counters: ConsumerCounters::default(),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ConsumerStats {
        ConsumerStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            tasks: self.counters.tasks.load(Ordering::Relaxed),
            decode_failures: self.counters.decode_failures.load(Ordering::Relaxed),
        }
    }

    pub fn spawn(
        self: Arc<Self>,
        cancel: CancellationToken,
    ) -> JoinHandle<Result<(), ConsumerError>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Runs until cancelled (`Ok`) or until the reconnect budget is spent.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ConsumerError> {
        let endpoint = self.source.describe();
        let mut reconnects: u32 = 0;

        loop {
            self.state.send_replace(ConsumerState::Connecting);
            let opened = select! {
                _ = cancel.cancelled() => {
                    self.stopped();
                    return Ok(());
                }
                opened = self.source.connect() => opened,
            };

            match opened {
                Ok(stream) => {
                    reconnects = 0;
                    self.state.send_replace(ConsumerState::Connected);
                    info!(endpoint = %endpoint, "upstream connected");
                    if let SessionEnd::Cancelled = self.pump(stream, &cancel).await {
                        self.stopped();
                        return Ok(());
                    }
                    warn!(endpoint = %endpoint, "upstream connection closed");
                }
                Err(err) => {
                    warn!(endpoint = %endpoint, error = %err, "upstream connect failed");
                }
            }

            reconnects += 1;
            if reconnects > self.policy.max_reconnects {
                self.state
                    .send_replace(ConsumerState::Failed { attempts: reconnects });
                error!(
                    endpoint = %endpoint,
                    max_reconnects = self.policy.max_reconnects,
                    "upstream reconnect budget exhausted; consumer stopped"
                );
                return Err(ConsumerError::Exhausted {
                    endpoint,
                    reconnects: self.policy.max_reconnects,
                });
            }

            self.state
                .send_replace(ConsumerState::Backoff { attempt: reconnects });
            info!(
                endpoint = %endpoint,
                attempt = reconnects,
                max_reconnects = self.policy.max_reconnects,
                delay_ms = self.policy.delay.as_millis() as u64,
                "reconnecting to upstream"
            );
            let sleep = time::sleep(self.policy.delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = cancel.cancelled() => {
                    self.stopped();
                    return Ok(());
                }
            }
        }
    }

    fn stopped(&self) {
        self.state.send_replace(ConsumerState::Stopped);
        info!("upstream consumer stopped");
    }

    async fn pump(&self, mut stream: FrameStream, cancel: &CancellationToken) -> SessionEnd {
        loop {
            let next = select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                next = stream.next() => next,
            };
            match next {
                None | Some(Ok(UpstreamFrame::Close)) => return SessionEnd::Closed,
                Some(Err(err)) => {
                    warn!(error = %err, "upstream read failed");
                    return SessionEnd::Closed;
                }
                Some(Ok(UpstreamFrame::Binary(bytes))) => {
                    self.counters.frames.fetch_add(1, Ordering::Relaxed);
                    self.dispatch(&bytes).await;
                }
                Some(Ok(UpstreamFrame::Text(_))) => {
                    debug!("ignoring text frame from upstream");
                }
                Some(Ok(UpstreamFrame::Control)) => {}
            }
        }
    }

    async fn dispatch(&self, bytes: &[u8]) {
        match serde_json::from_slice::<UpstreamTask>(bytes) {
            Ok(task) => {
                self.counters.tasks.fetch_add(1, Ordering::Relaxed);
                debug!(kind = %task.kind(), "upstream task received");
                self.handler.handle(task).await;
            }
            Err(err) => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, bytes = bytes.len(), "undecodable upstream frame dropped");
            }
        }
    }
}
