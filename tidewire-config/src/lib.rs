//! Configuration for the tidewire dispatch server.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! the process environment (including `.env`). The composed [`Config`] passes
//! through guard rails before it is handed to the server.

pub mod constants;
pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{
    ConfigLoad, ConfigLoader, error::ConfigLoadError,
};
pub use models::{
    Config, ConfigMetadata, ConnectionRetry, GatewayConfig, PublisherConfig,
    RedisConfig, ServerConfig, UpstreamConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
