use std::{fmt, sync::Arc};

use chrono::Utc;
use thiserror::Error;
use tidewire_model::{Channel, TaskEnvelope};
use tracing::{debug, error, info, warn};

use super::{
    broker::{BrokerError, BrokerPublisher},
    retry::RetryPolicy,
};

#[derive(Debug, Error)]
pub enum PublishError {
    /// Every attempt in the retry budget failed with a transient error.
    #[error("publish to {channel} failed after {attempts} attempts: {last}")]
    Exhausted {
        channel: Channel,
        attempts: u32,
        #[source]
        last: BrokerError,
    },
    #[error("failed to serialize task for {channel}")]
    Serialization {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },
    #[error("broker rejected publish to {channel}")]
    Rejected {
        channel: Channel,
        #[source]
        source: BrokerError,
    },
}

impl PublishError {
    pub fn channel(&self) -> Channel {
        match self {
            PublishError::Exhausted { channel, .. }
            | PublishError::Serialization { channel, .. }
            | PublishError::Rejected { channel, .. } => *channel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub channel: Channel,
    pub attempts: u32,
}

/// Hands task envelopes to the compute tier on the task channel for their
/// workflow.
#[derive(Clone)]
pub struct TaskPublisher {
    broker: Arc<dyn BrokerPublisher>,
    policy: RetryPolicy,
}

impl fmt::Debug for TaskPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPublisher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl TaskPublisher {
    pub fn new(broker: Arc<dyn BrokerPublisher>, policy: RetryPolicy) -> Self {
        Self { broker, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Stamps the envelope, serializes it once and publishes it. Transient
    /// broker failures are retried per the policy; anything else fails on
    /// the spot.
    pub async fn publish(
        &self,
        envelope: &TaskEnvelope,
    ) -> Result<PublishReceipt, PublishError> {
        let channel = envelope.channel();
        let payload = envelope
            .to_wire(Utc::now())
            .and_then(|wire| serde_json::to_string(&wire))
            .map_err(|source| PublishError::Serialization { channel, source })?;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.broker.publish(channel, payload.clone()).await {
                Ok(()) => {
                    if attempt > 1 {
                        info!(
                            channel = %channel,
                            task_id = %envelope.id,
                            attempts = attempt,
                            "task published after retry"
                        );
                    } else {
                        debug!(channel = %channel, task_id = %envelope.id, "task published");
                    }
                    return Ok(PublishReceipt {
                        channel,
                        attempts: attempt,
                    });
                }
                Err(err) if !err.is_retryable() => {
                    error!(
                        channel = %channel,
                        task_id = %envelope.id,
                        error = %err,
                        "task publish rejected"
                    );
                    return Err(PublishError::Rejected {
                        channel,
                        source: err,
                    });
                }
                Err(err) if attempt > self.policy.max_retries => {
                    error!(
                        channel = %channel,
                        task_id = %envelope.id,
                        attempts = attempt,
                        error = %err,
                        "task publish exhausted retries"
                    );
                    return Err(PublishError::Exhausted {
                        channel,
                        attempts: attempt,
                        last: err,
                    });
                }
                Err(err) => {
                    let delay = self.policy.delay_for(attempt - 1);
                    warn!(
                        channel = %channel,
                        task_id = %envelope.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "task publish failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
