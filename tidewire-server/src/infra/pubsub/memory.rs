//! Process-local broker for development runs and tests.
//!
//! Behaves like a pub/sub server with a single node: every publish is
//! delivered to each live subscription that listens on the channel, and
//! nothing is retained for late subscribers.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tidewire_model::Channel;
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::broker::{
    BrokerError, BrokerMessage, BrokerPublisher, BrokerSubscriber, MessageStream,
};

struct Subscription {
    channels: Vec<Channel>,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

#[derive(Default)]
struct Inner {
    published: Mutex<Vec<(Channel, String)>>,
    subscriptions: Mutex<Vec<Subscription>>,
    subscribed: Notify,
    failing_publishes: AtomicU32,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("published", &self.inner.published.lock().len())
            .field("subscriptions", &self.subscriber_count())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, oldest first.
    pub fn published(&self) -> Vec<(Channel, String)> {
        self.inner.published.lock().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }

    /// Makes the next `count` publishes fail with a connection error.
    pub fn fail_next_publishes(&self, count: u32) {
        self.inner.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Delivers `payload` as if another process had published it.
    pub fn inject(&self, channel: Channel, payload: impl Into<String>) {
        self.deliver(channel, payload.into());
    }

    /// Ends every live subscription stream, as a dropped connection would.
    pub fn disconnect_subscribers(&self) {
        self.inner.subscriptions.lock().clear();
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        loop {
            let subscribed = self.inner.subscribed.notified();
            if self.subscriber_count() >= count {
                return;
            }
            subscribed.await;
        }
    }

    fn deliver(&self, channel: Channel, payload: String) {
        let mut subscriptions = self.inner.subscriptions.lock();
        subscriptions.retain(|subscription| {
            if !subscription.channels.contains(&channel) {
                return !subscription.sender.is_closed();
            }
            subscription
                .sender
                .send(BrokerMessage {
                    channel: channel.as_str().to_string(),
                    payload: payload.clone(),
                })
                .is_ok()
        });
    }
}

#[async_trait]
impl BrokerPublisher for InMemoryBroker {
    async fn publish(
        &self,
        channel: Channel,
        payload: String,
    ) -> Result<(), BrokerError> {
        let failing = self.inner.failing_publishes.fetch_update(
            Ordering::SeqCst,
            Ordering::SeqCst,
            |remaining| remaining.checked_sub(1),
        );
        if failing.is_ok() {
            return Err(BrokerError::Connection(
                "in-memory broker unavailable".into(),
            ));
        }

        self.inner
            .published
            .lock()
            .push((channel, payload.clone()));
        self.deliver(channel, payload);
        Ok(())
    }
}

#[async_trait]
impl BrokerSubscriber for InMemoryBroker {
    async fn subscribe(
        &self,
        channels: &[Channel],
    ) -> Result<MessageStream, BrokerError> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner.subscriptions.lock().push(Subscription {
            channels: channels.to_vec(),
            sender,
        });
        self.inner.subscribed.notify_waiters();
        Ok(UnboundedReceiverStream::new(receiver).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_loops_back_to_matching_subscribers() {
        let broker = InMemoryBroker::new();
        let mut progress = broker
            .subscribe(&[Channel::BacktestProgress])
            .await
            .unwrap();
        let mut tasks = broker.subscribe(&[Channel::BacktestTask]).await.unwrap();

        broker
            .publish(Channel::BacktestTask, "{}".into())
            .await
            .unwrap();

        let message = tasks.next().await.unwrap();
        assert_eq!(message.channel, "backtest:task");
        assert_eq!(broker.published().len(), 1);

        broker.disconnect_subscribers();
        assert!(progress.next().await.is_none());
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let broker = InMemoryBroker::new();
        broker.fail_next_publishes(2);

        for _ in 0..2 {
            let err = broker
                .publish(Channel::BacktestTask, "{}".into())
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }
        broker
            .publish(Channel::BacktestTask, "{}".into())
            .await
            .unwrap();
        assert_eq!(broker.published().len(), 1);
    }
}
