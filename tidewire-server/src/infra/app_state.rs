use std::{fmt, sync::Arc};

use tidewire_config::Config;

use crate::infra::{
    pubsub::{EventRouter, TaskPublisher},
    upstream::ReconnectingConsumer,
    websocket::Gateway,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: TaskPublisher,
    pub gateway: Arc<Gateway>,
    pub router: Arc<EventRouter>,
    /// Present only when an upstream feed is configured.
    pub upstream: Option<Arc<ReconnectingConsumer>>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn config(&self) -> &Config {
        &self.config
    }
}
