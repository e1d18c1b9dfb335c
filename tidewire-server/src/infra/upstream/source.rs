//! Transport under the reconnecting consumer.

use std::fmt;

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("failed to connect to upstream: {0}")]
    Connect(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// One inbound frame, reduced to what the consumer cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    Binary(Vec<u8>),
    Text(String),
    /// Ping, pong and other control traffic.
    Control,
    Close,
}

pub type FrameStream = BoxStream<'static, Result<UpstreamFrame, UpstreamError>>;

/// Something the consumer can (re)open. Each successful call is one
/// connection; the stream ending means the transport closed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn connect(&self) -> Result<FrameStream, UpstreamError>;

    fn describe(&self) -> String;
}

#[derive(Clone)]
pub struct WebSocketSource {
    url: String,
}

impl fmt::Debug for WebSocketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketSource")
            .field("url", &self.url)
            .finish()
    }
}

impl WebSocketSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl UpstreamSource for WebSocketSource {
    async fn connect(&self) -> Result<FrameStream, UpstreamError> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|err| UpstreamError::Connect(err.to_string()))?;
        debug!(url = %self.url, status = %response.status(), "upstream handshake complete");

        Ok(stream
            .map(|item| match item {
                Ok(Message::Binary(bytes)) => Ok(UpstreamFrame::Binary(bytes.to_vec())),
                Ok(Message::Text(text)) => Ok(UpstreamFrame::Text(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Ok(UpstreamFrame::Close),
                Ok(_) => Ok(UpstreamFrame::Control),
                Err(err) => Err(UpstreamError::Transport(err.to_string())),
            })
            .boxed())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
