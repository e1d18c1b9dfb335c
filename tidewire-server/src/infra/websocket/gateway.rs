//! Fan-out gateway: tracks which live sockets belong to which user and pushes
//! server events to all of a user's sockets.
//!
//! A socket starts out `Connected`, becomes `Subscribed(user)` after a
//! successful `backtest:subscribe`, returns to `Connected` on unsubscribe and
//! ends `Terminated` once the transport goes away. Delivery never waits on a
//! socket: each one has a bounded queue and a full or closed queue only costs
//! that socket the frame.

use std::{fmt, sync::Arc};

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tidewire_config::GatewayConfig;
use tidewire_model::{
    Channel, ClientCommand, ConnectionId, Frame, OutcomeEvent, ServerEvent, TaskEnvelope,
    UserId, protocol::events,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    connection::{Connection, DeliveryError},
    registry::{ConnectionRegistry, RegistryError},
};
use crate::infra::pubsub::{EventRouter, ListenerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Subscribed(UserId),
    Terminated,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("userId is required")]
    MissingUser,
    #[error("connection is already subscribed as {current}; unsubscribe first")]
    AlreadySubscribed { current: UserId },
    #[error("connection is no longer registered")]
    Terminated,
}

impl From<RegistryError> for SubscribeError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownConnection(_) => SubscribeError::Terminated,
            RegistryError::AlreadyBound { current } => {
                SubscribeError::AlreadySubscribed { current }
            }
        }
    }
}

/// Result of one fan-out call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Dropped because the socket's outbound queue was full.
    pub full: usize,
    /// Dropped because the socket was already closing.
    pub closed: usize,
}

impl BroadcastReport {
    pub fn dropped(&self) -> usize {
        self.full + self.closed
    }

    pub fn is_noop(&self) -> bool {
        self.delivered == 0 && self.dropped() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub users: usize,
}

pub struct Gateway {
    registry: Mutex<ConnectionRegistry>,
    outbound_buffer: usize,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.stats();
        f.debug_struct("Gateway")
            .field("connections", &stats.connections)
            .field("users", &stats.users)
            .field("outbound_buffer", &self.outbound_buffer)
            .finish()
    }
}

impl Gateway {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            registry: Mutex::new(ConnectionRegistry::new()),
            outbound_buffer: outbound_buffer.max(1),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.outbound_buffer)
    }

    /// Registers a new socket. The receiver yields the frames queued for it.
    pub fn connect(&self) -> (Arc<Connection>, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(self.outbound_buffer);
        let connection = Arc::new(Connection::new(sender));
        self.registry.lock().insert(Arc::clone(&connection));
        debug!(connection_id = %connection.id, "gateway connection opened");
        (connection, receiver)
    }

    /// Forgets the socket and whatever membership it held.
    pub fn disconnect(&self, id: ConnectionId) -> Option<UserId> {
        let user = self.registry.lock().remove(id);
        match &user {
            Some(user) => info!(connection_id = %id, user_id = %user, "subscribed connection closed"),
            None => debug!(connection_id = %id, "gateway connection closed"),
        }
        user
    }

    pub fn connection_state(&self, id: ConnectionId) -> ConnectionState {
        let registry = self.registry.lock();
        if !registry.contains(id) {
            return ConnectionState::Terminated;
        }
        match registry.owner_of(id) {
            Some(user) => ConnectionState::Subscribed(user.clone()),
            None => ConnectionState::Connected,
        }
    }

    /// Binds the socket to `user_id` and returns the user's live socket count.
    pub fn subscribe(
        &self,
        id: ConnectionId,
        user_id: Option<&str>,
    ) -> Result<usize, SubscribeError> {
        let user = user_id
            .and_then(|raw| UserId::new(raw).ok())
            .ok_or(SubscribeError::MissingUser)?;
        let count = self.registry.lock().bind(id, &user)?;
        info!(connection_id = %id, user_id = %user, connections = count, "connection subscribed");
        Ok(count)
    }

    /// Drops the socket's membership. Without a user id whatever user the socket
    /// holds is released; a mismatched user id changes nothing. Returns the
    /// user that was released.
    pub fn unsubscribe(&self, id: ConnectionId, user_id: Option<&str>) -> Option<UserId> {
        let mut registry = self.registry.lock();
        let current = registry.owner_of(id)?.clone();
        if let Some(requested) = user_id
            && requested != current.as_str()
        {
            debug!(
                connection_id = %id,
                requested,
                current = %current,
                "unsubscribe for a user this connection does not hold"
            );
            return None;
        }
        registry.unbind(id, &current);
        drop(registry);
        info!(connection_id = %id, user_id = %current, "connection unsubscribed");
        Some(current)
    }

    /// Applies a client command and replies to the issuing socket only.
    pub fn handle_command(&self, id: ConnectionId, command: ClientCommand) {
        let reply = match command {
            ClientCommand::Subscribe { user_id } => {
                match self.subscribe(id, user_id.as_deref()) {
                    Ok(connections) => Frame::new(
                        events::SUBSCRIBED,
                        json!({
                            "userId": user_id,
                            "connectionId": id,
                            "connections": connections,
                            "timestamp": now_stamp(),
                        }),
                    ),
                    Err(err) => {
                        warn!(connection_id = %id, error = %err, "subscribe rejected");
                        error_frame(events::SUBSCRIBE, &err.to_string())
                    }
                }
            }
            ClientCommand::Unsubscribe { user_id } => {
                let released = self.unsubscribe(id, user_id.as_deref());
                let user = released
                    .map(|user| user.as_str().to_string())
                    .or(user_id);
                Frame::new(
                    events::UNSUBSCRIBED,
                    json!({
                        "userId": user,
                        "connectionId": id,
                        "timestamp": now_stamp(),
                    }),
                )
            }
        };
        self.reply(id, reply);
    }

    /// Sends a rejection for a frame the socket could not decode.
    pub fn reject(&self, id: ConnectionId, reason: &str) {
        self.reply(id, error_frame("unknown", reason));
    }

    fn reply(&self, id: ConnectionId, frame: Frame) {
        let Some(connection) = self.registry.lock().get(id) else {
            return;
        };
        if let Err(err) = connection.try_deliver(frame) {
            warn!(connection_id = %id, error = %err, "reply not delivered");
        }
    }

    /// Pushes `event` to every live socket of `user`. A user without sockets is
    /// not an error; the call just does nothing.
    pub fn broadcast_to_user(&self, user: &UserId, event: &str, payload: Value) -> BroadcastReport {
        let targets = self.registry.lock().connections_for(user);
        if targets.is_empty() {
            debug!(user_id = %user, event, "no live connections for user");
            return BroadcastReport::default();
        }

        let frame = Frame::new(event, payload);
        let mut report = BroadcastReport::default();
        for connection in targets {
            match connection.try_deliver(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(DeliveryError::Full) => {
                    report.full += 1;
                    warn!(
                        connection_id = %connection.id,
                        user_id = %user,
                        event,
                        "outbound queue full; frame dropped"
                    );
                }
                Err(DeliveryError::Closed) => {
                    report.closed += 1;
                    debug!(
                        connection_id = %connection.id,
                        user_id = %user,
                        event,
                        "connection closing; frame dropped"
                    );
                }
            }
        }
        report
    }

    /// Tells the submitting user their task is on its way to the compute tier.
    pub fn notify_task_started(&self, envelope: &TaskEnvelope) -> BroadcastReport {
        let kind = envelope.kind();
        let mut payload = Map::new();
        payload.insert(
            kind.id_field().to_string(),
            Value::String(envelope.id.as_str().to_string()),
        );
        payload.insert(
            "userId".to_string(),
            Value::String(envelope.user_id.as_str().to_string()),
        );
        payload.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
        payload.insert("status".to_string(), Value::String("queued".to_string()));
        payload.insert("timestamp".to_string(), Value::String(now_stamp()));
        self.broadcast_to_user(&envelope.user_id, events::STARTED, Value::Object(payload))
    }

    /// Forwards an alert object to `user`. The object keeps its own fields and
    /// gets a fresh `timestamp`; non-object alerts are wrapped under `alert`.
    pub fn notify_alert(&self, user: &UserId, alert: Value) -> BroadcastReport {
        let mut payload = match alert {
            Value::Object(fields) => fields,
            other => {
                let mut fields = Map::new();
                fields.insert("alert".to_string(), other);
                fields
            }
        };
        payload.insert(
            "userId".to_string(),
            Value::String(user.as_str().to_string()),
        );
        payload.insert("timestamp".to_string(), Value::String(now_stamp()));
        self.broadcast_to_user(user, events::ALERT_TRIGGERED, Value::Object(payload))
    }

    /// Registers one listener per outcome channel forwarding the outcome to its
    /// user under the channel's own event name.
    pub fn install_listeners(self: &Arc<Self>, router: &EventRouter) {
        for channel in Channel::OUTCOMES {
            let gateway = Arc::clone(self);
            router.on(channel, "gateway", move |event: &OutcomeEvent| {
                gateway.forward_outcome(event)
            });
        }
    }

    fn forward_outcome(&self, event: &OutcomeEvent) -> Result<(), ListenerError> {
        let report = self.broadcast_to_user(
            &event.user_id,
            event.channel.as_str(),
            event.client_payload(Utc::now()),
        );
        // Sockets closing ahead of their disconnect are not a failure.
        if report.full > 0 && report.delivered == 0 {
            return Err(ListenerError::failed(format!(
                "{} for {} dropped at every connection",
                event.channel, event.user_id
            )));
        }
        Ok(())
    }

    pub fn stats(&self) -> GatewayStats {
        let registry = self.registry.lock();
        GatewayStats {
            connections: registry.connection_count(),
            users: registry.user_count(),
        }
    }

    pub fn member_count(&self, user: &UserId) -> usize {
        self.registry.lock().member_count(user)
    }
}

fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn error_frame(command: &str, message: &str) -> Frame {
    Frame::new(
        events::ERROR,
        json!({
            "event": command,
            "message": message,
            "timestamp": now_stamp(),
        }),
    )
}
