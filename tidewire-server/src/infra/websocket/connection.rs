use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tidewire_model::{ConnectionId, ServerEvent};
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Server side of one live gateway socket. Frames are queued on a bounded
/// channel drained by the socket's writer task.
pub struct Connection {
    pub id: ConnectionId,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<ServerEvent>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("channel_closed", &self.sender.is_closed())
            .finish()
    }
}

impl Connection {
    pub fn new(sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: ConnectionId::new(),
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Queues a frame without waiting. A slow or dead socket fails here
    /// instead of stalling the caller.
    pub fn try_deliver(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.sender.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
