pub mod alerts;
pub mod handle_websocket;
pub mod health;
pub mod tasks;
