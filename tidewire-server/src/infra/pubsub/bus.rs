//! In-process listener registry for outcome events.
//!
//! Listeners are registered per outcome channel and invoked synchronously in
//! registration order. Each invocation is isolated: an `Err` or a panic from one
//! listener is logged and counted, and the remaining listeners still run.

use std::{
    collections::HashMap,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::RwLock;
use thiserror::Error;
use tidewire_model::{Channel, OutcomeEvent};
use tracing::error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("{0}")]
    Failed(String),
    #[error("listener panicked: {0}")]
    Panicked(String),
}

impl ListenerError {
    pub fn failed(message: impl Into<String>) -> Self {
        ListenerError::Failed(message.into())
    }
}

pub type ListenerFn =
    dyn Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync;

#[derive(Clone)]
struct Registered {
    name: &'static str,
    callback: Arc<ListenerFn>,
}

/// Result of delivering one event to its listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct OutcomeBus {
    listeners: RwLock<HashMap<Channel, Vec<Registered>>>,
}

impl fmt::Debug for OutcomeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read();
        let counts: Vec<(&'static str, usize)> = Channel::OUTCOMES
            .iter()
            .map(|channel| {
                (
                    channel.as_str(),
                    listeners.get(channel).map(Vec::len).unwrap_or(0),
                )
            })
            .collect();
        f.debug_struct("OutcomeBus")
            .field("listeners", &counts)
            .finish()
    }
}

impl OutcomeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener for `channel`. Task channels never carry outcomes,
    /// so registering on one is a programming error and is ignored.
    pub fn register<F>(&self, channel: Channel, name: &'static str, callback: F)
    where
        F: Fn(&OutcomeEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        if channel.is_task() {
            error!(channel = %channel, listener = name, "refusing listener on task channel");
            return;
        }
        self.listeners
            .write()
            .entry(channel)
            .or_default()
            .push(Registered {
                name,
                callback: Arc::new(callback),
            });
    }

    pub fn listener_count(&self, channel: Channel) -> usize {
        self.listeners.read().get(&channel).map(Vec::len).unwrap_or(0)
    }

    pub fn emit(&self, event: &OutcomeEvent) -> EmitReport {
        // Snapshot so listeners run without the lock held.
        let listeners = match self.listeners.read().get(&event.channel) {
            Some(listeners) => listeners.clone(),
            None => return EmitReport::default(),
        };

        let mut report = EmitReport::default();
        for listener in &listeners {
            report.invoked += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| (listener.callback)(event)))
                .unwrap_or_else(|panic| Err(ListenerError::Panicked(panic_message(panic.as_ref()))));

            if let Err(err) = outcome {
                report.failed += 1;
                error!(
                    channel = %event.channel,
                    listener = listener.name,
                    id = %event.id,
                    error = %err,
                    "outcome listener failed"
                );
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
