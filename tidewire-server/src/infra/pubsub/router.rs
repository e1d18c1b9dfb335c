//! Single subscription over every outcome channel, fanned out to in-process
//! listeners through the [`OutcomeBus`].

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::StreamExt;
use serde::Serialize;
use tidewire_model::{Channel, OutcomeEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    broker::{BrokerMessage, BrokerSubscriber},
    bus::{EmitReport, ListenerError, OutcomeBus},
    retry::RetryPolicy,
};

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered(EmitReport),
    /// Parsed fine but arrived on a channel the router does not route.
    Unrouted,
    Malformed,
}

#[derive(Debug, Default)]
struct RouterCounters {
    received: AtomicU64,
    dispatched: AtomicU64,
    malformed: AtomicU64,
    unrouted: AtomicU64,
    listener_failures: AtomicU64,
    resubscribes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub received: u64,
    pub dispatched: u64,
    pub malformed: u64,
    pub unrouted: u64,
    pub listener_failures: u64,
    pub resubscribes: u64,
}

pub struct EventRouter {
    bus: OutcomeBus,
    subscriber: Arc<dyn BrokerSubscriber>,
    resubscribe: RetryPolicy,
    counters: RouterCounters,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("bus", &self.bus)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    pub fn new(
        subscriber: Arc<dyn BrokerSubscriber>,
        resubscribe: RetryPolicy,
    ) -> Self {
        Self {
            bus: OutcomeBus::new(),
            subscriber,
            resubscribe,
            counters: RouterCounters::default(),
        }
    }

    pub fn bus(&self) -> &OutcomeBus {
        &self.bus
    }

    pub fn on<F>(&self, channel: Channel, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.bus.register(channel, name, listener);
    }

    pub fn on_progress<F>(&self, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(Channel::BacktestProgress, name, listener);
    }

    pub fn on_complete<F>(&self, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(Channel::BacktestComplete, name, listener);
    }

    pub fn on_error<F>(&self, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(Channel::BacktestError, name, listener);
    }

    pub fn on_optimization_progress<F>(&self, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(Channel::OptimizationProgress, name, listener);
    }

    pub fn on_optimization_complete<F>(&self, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(Channel::OptimizationComplete, name, listener);
    }

    pub fn on_walkforward_progress<F>(&self, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(Channel::WalkforwardProgress, name, listener);
    }

    pub fn on_walkforward_complete<F>(&self, name: &'static str, listener: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.on(Channel::WalkforwardComplete, name, listener);
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            received: c.received.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            unrouted: c.unrouted.load(Ordering::Relaxed),
            listener_failures: c.listener_failures.load(Ordering::Relaxed),
            resubscribes: c.resubscribes.load(Ordering::Relaxed),
        }
    }

    /// Parses one raw message and hands it to the listeners for its channel.
    /// Never fails: bad input is logged and counted.
    pub fn dispatch(&self, channel_name: &str, payload: &str) -> DispatchOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let channel = match channel_name.parse::<Channel>() {
            Ok(channel) if !channel.is_task() => channel,
            _ => {
                self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
                warn!(channel = channel_name, "message on unrouted channel");
                return DispatchOutcome::Unrouted;
            }
        };

        let event = match OutcomeEvent::parse(channel, payload) {
            Ok(event) => event,
            Err(err) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(channel = %channel, error = %err, "dropping malformed outcome message");
                return DispatchOutcome::Malformed;
            }
        };

        debug!(
            channel = %channel,
            id = %event.id,
            user_id = %event.user_id,
            "routing outcome"
        );
        let report = self.bus.emit(&event);
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        if report.failed > 0 {
            self.counters
                .listener_failures
                .fetch_add(report.failed as u64, Ordering::Relaxed);
        }
        DispatchOutcome::Delivered(report)
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move { router.run(cancel).await })
    }

    /// Keeps the subscription alive until `cancel` fires. When the stream ends
    /// or the subscribe call fails the router resubscribes with backoff; the
    /// backoff resets once a subscription is established.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut failures: u32 = 0;
        let mut established_once = false;

        loop {
            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.subscriber.subscribe(&Channel::OUTCOMES) => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    if established_once {
                        self.counters.resubscribes.fetch_add(1, Ordering::Relaxed);
                        info!("outcome subscription re-established");
                    } else {
                        info!(channels = Channel::OUTCOMES.len(), "outcome subscription established");
                    }
                    established_once = true;
                    failures = 0;

                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => None,
                            message = stream.next() => Some(message),
                        };
                        match next {
                            None => {
                                info!("event router stopped");
                                return;
                            }
                            Some(Some(BrokerMessage { channel, payload })) => {
                                self.dispatch(&channel, &payload);
                            }
                            Some(None) => {
                                warn!("outcome subscription stream ended");
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, attempt = failures + 1, "outcome subscription failed");
                }
            }

            let delay = self.resubscribe.delay_for(failures);
            failures = failures.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("event router stopped");
    }
}
