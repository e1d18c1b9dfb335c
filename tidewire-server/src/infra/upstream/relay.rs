use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tidewire_model::UpstreamTask;
use tracing::{error, info, warn};

use super::consumer::UpstreamHandler;
use crate::infra::{pubsub::TaskPublisher, websocket::Gateway};

/// Re-publishes upstream tasks to the compute tier and tells the owning user
/// the task has started, as an HTTP submission would.
pub struct TaskRelay {
    publisher: TaskPublisher,
    gateway: Arc<Gateway>,
}

impl fmt::Debug for TaskRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRelay")
            .field("publisher", &self.publisher)
            .finish_non_exhaustive()
    }
}

impl TaskRelay {
    pub fn new(publisher: TaskPublisher, gateway: Arc<Gateway>) -> Self {
        Self { publisher, gateway }
    }
}

#[async_trait]
impl UpstreamHandler for TaskRelay {
    async fn handle(&self, task: UpstreamTask) {
        let envelope = task.into_envelope();
        if let Err(err) = envelope.params.validate() {
            warn!(
                task_id = %envelope.id,
                user_id = %envelope.user_id,
                error = %err,
                "upstream task failed validation; dropped"
            );
            return;
        }

        match self.publisher.publish(&envelope).await {
            Ok(receipt) => {
                info!(
                    task_id = %envelope.id,
                    user_id = %envelope.user_id,
                    channel = %receipt.channel,
                    "upstream task relayed"
                );
                self.gateway.notify_task_started(&envelope);
            }
            Err(err) => {
                error!(
                    task_id = %envelope.id,
                    user_id = %envelope.user_id,
                    error = %err,
                    "upstream task could not be published"
                );
            }
        }
    }
}
