//! Real-time client protocol spoken over the gateway WebSocket.
//!
//! Every frame in either direction is a JSON object `{"event": .., "data": ..}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Event names used on the gateway namespace.
pub mod events {
    pub const SUBSCRIBE: &str = "backtest:subscribe";
    pub const UNSUBSCRIBE: &str = "backtest:unsubscribe";

    pub const SUBSCRIBED: &str = "backtest:subscribed";
    pub const UNSUBSCRIBED: &str = "backtest:unsubscribed";
    pub const STARTED: &str = "backtest:started";
    pub const ALERT_TRIGGERED: &str = "alert:triggered";
    /// Rejection of a client command.
    pub const ERROR: &str = "error";
}

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Outbound frames are plain frames; the alias keeps call sites readable.
pub type ServerEvent = Frame;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unsupported client event `{0}`")]
    UnsupportedEvent(String),
}

/// Commands a client may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `user_id` is `None` when the client omitted it or sent a blank or
    /// non-string value.
    Subscribe { user_id: Option<String> },
    Unsubscribe { user_id: Option<String> },
}

impl ClientCommand {
    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        let frame: Frame = serde_json::from_slice(raw)?;
        Self::from_frame(frame)
    }

    pub fn from_frame(frame: Frame) -> Result<Self, ProtocolError> {
        let user_id = frame
            .data
            .get("userId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match frame.event.as_str() {
            events::SUBSCRIBE => Ok(ClientCommand::Subscribe { user_id }),
            events::UNSUBSCRIBE => Ok(ClientCommand::Unsubscribe { user_id }),
            _ => Err(ProtocolError::UnsupportedEvent(frame.event)),
        }
    }
}
