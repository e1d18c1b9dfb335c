use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::infra::{app_state::AppState, websocket::messages};

/// Upgrades a request on the gateway namespace to a WebSocket.
pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (connection, mut rx) = state.gateway.connect();
    let conn_id = connection.id;
    drop(connection);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match messages::frame_to_websocket(&frame) {
                Ok(msg) => {
                    if ws_sender.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(event = %frame.event, error = %err, "failed to encode frame"),
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(msg) => match messages::websocket_to_command(&msg) {
                Ok(Some(command)) => state.gateway.handle_command(conn_id, command),
                Ok(None) => {}
                Err(err) => {
                    debug!(connection_id = %conn_id, error = %err, "unreadable client frame");
                    state.gateway.reject(conn_id, &err.to_string());
                }
            },
            Err(err) => {
                debug!(connection_id = %conn_id, error = %err, "websocket receive failed");
                break;
            }
        }
    }

    // Dropping the registry entry closes the outbound queue, which ends the
    // writer once it has flushed what is left.
    state.gateway.disconnect(conn_id);
    if let Err(err) = writer.await {
        debug!(connection_id = %conn_id, error = %err, "websocket writer ended abnormally");
    }
}
