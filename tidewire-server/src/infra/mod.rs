pub mod app_state;
pub mod errors;
pub mod pubsub;
pub mod startup;
pub mod upstream;
pub mod websocket;
