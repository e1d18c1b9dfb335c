use std::{fmt, future::Future};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use redis::{AsyncCommands, RedisError, aio::ConnectionManager};
use thiserror::Error;
use tidewire_config::RedisConfig;
use tidewire_model::Channel;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection failed: {0}")]
    Connection(String),
    #[error("broker rejected the command: {0}")]
    Rejected(String),
    #[error("invalid broker configuration: {0}")]
    Config(String),
}

impl BrokerError {
    /// Connection-level failures may succeed on a later attempt; rejections
    /// and configuration problems will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Connection(_))
    }
}

impl From<RedisError> for BrokerError {
    fn from(err: RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_dropped()
            || err.is_connection_refusal()
            || err.is_timeout()
        {
            BrokerError::Connection(err.to_string())
        } else {
            BrokerError::Rejected(err.to_string())
        }
    }
}

/// One message received on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

pub type MessageStream = BoxStream<'static, BrokerMessage>;

/// Publish side of the broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerPublisher: Send + Sync {
    async fn publish(
        &self,
        channel: Channel,
        payload: String,
    ) -> Result<(), BrokerError>;
}

/// Subscribe side of the broker. Each call opens a fresh subscription; the
/// returned stream ends when the underlying connection is lost.
#[async_trait]
pub trait BrokerSubscriber: Send + Sync {
    async fn subscribe(
        &self,
        channels: &[Channel],
    ) -> Result<MessageStream, BrokerError>;
}

fn open_client(config: &RedisConfig) -> Result<redis::Client, BrokerError> {
    let url = config
        .connection_url()
        .map_err(|err| BrokerError::Config(err.to_string()))?;
    redis::Client::open(url.as_str())
        .map_err(|err| BrokerError::Config(err.to_string()))
}

/// Runs `op` until it succeeds or the connect policy is exhausted.
async fn connect_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &'static str,
    mut op: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RedisError>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let err = BrokerError::from(err);
                if !err.is_retryable() || retry >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_for(retry);
                warn!(
                    connection = label,
                    attempt = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "redis connect failed, retrying"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}

/// Publish connection backed by the client's reconnecting connection manager.
#[derive(Clone)]
pub struct RedisPublisher {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisPublisher")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisPublisher {
    pub async fn connect(config: &RedisConfig) -> Result<Self, BrokerError> {
        info!(url = %config.redacted_url(), "connecting redis publisher");
        let client = open_client(config)?;
        let policy = RetryPolicy::from(&config.connect);
        let conn = connect_with_retry(&policy, "publish", || {
            ConnectionManager::new(client.clone())
        })
        .await?;
        info!("redis publisher connected");
        Ok(Self { conn })
    }
}

#[async_trait]
impl BrokerPublisher for RedisPublisher {
    async fn publish(
        &self,
        channel: Channel,
        payload: String,
    ) -> Result<(), BrokerError> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(channel.as_str(), payload).await?;
        debug!(channel = %channel, receivers, "published message");
        Ok(())
    }
}

/// Subscription side. Uses its own dedicated pub/sub connection per call.
#[derive(Clone)]
pub struct RedisSubscriber {
    client: redis::Client,
    policy: RetryPolicy,
}

impl fmt::Debug for RedisSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSubscriber")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RedisSubscriber {
    pub fn new(config: &RedisConfig) -> Result<Self, BrokerError> {
        Ok(Self {
            client: open_client(config)?,
            policy: RetryPolicy::from(&config.connect),
        })
    }
}

#[async_trait]
impl BrokerSubscriber for RedisSubscriber {
    async fn subscribe(
        &self,
        channels: &[Channel],
    ) -> Result<MessageStream, BrokerError> {
        let mut pubsub = connect_with_retry(&self.policy, "subscribe", || {
            self.client.get_async_pubsub()
        })
        .await?;

        let names: Vec<&'static str> =
            channels.iter().map(Channel::as_str).collect();
        pubsub.subscribe(names.clone()).await?;
        info!(channels = ?names, "redis subscription established");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => Some(BrokerMessage { channel, payload }),
                Err(err) => {
                    warn!(channel = %channel, error = %err, "dropping non-UTF-8 payload");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };
    use std::time::Duration;

    fn io_error() -> RedisError {
        RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ))
    }

    #[test]
    fn io_errors_are_retryable() {
        assert!(BrokerError::from(io_error()).is_retryable());
        assert!(!BrokerError::Rejected("WRONGTYPE".into()).is_retryable());
        assert!(!BrokerError::Config("bad url".into()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retry_gives_up_after_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed(2, Duration::from_millis(100));

        let counter = Arc::clone(&calls);
        let result: Result<(), BrokerError> =
            connect_with_retry(&policy, "test", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(io_error()) }
            })
            .await;

        assert!(matches!(result, Err(BrokerError::Connection(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retry_returns_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::fixed(5, Duration::from_millis(100));

        let counter = Arc::clone(&calls);
        let result = connect_with_retry(&policy, "test", || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err(io_error()) } else { Ok(n) } }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
