use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::util::{parse_bool_var, parse_csv_var, parse_var};

/// Raw configuration as defined in a TOML file. Durations are humantime
/// strings (`"5s"`, `"250ms"`) resolved by the loader.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub server: FileServerConfig,
    #[serde(default)]
    pub redis: FileRedisConfig,
    #[serde(default)]
    pub publisher: FilePublisherConfig,
    #[serde(default)]
    pub gateway: FileGatewayConfig,
    pub upstream: Option<FileUpstreamConfig>,
    pub dev_mode: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_retries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_backoff_base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_backoff_max: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePublisherConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileGatewayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound_buffer: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileUpstreamConfig {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnects: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<String>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub server_host: Option<String>,
    pub server_port: Option<u16>,
    pub redis_url: Option<String>,
    pub redis_host: Option<String>,
    pub redis_port: Option<u16>,
    pub redis_username: Option<String>,
    pub redis_password: Option<String>,
    pub redis_password_file: Option<PathBuf>,
    pub redis_db: Option<i64>,
    pub redis_connect_retries: Option<usize>,
    pub publish_max_retries: Option<u32>,
    pub publish_retry_delay: Option<String>,
    pub publish_backoff_factor: Option<f64>,
    pub publish_max_delay: Option<String>,
    pub gateway_namespace: Option<String>,
    pub gateway_outbound_buffer: Option<usize>,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub upstream_url: Option<String>,
    pub upstream_max_reconnects: Option<u32>,
    pub upstream_reconnect_delay: Option<String>,
    pub dev_mode: Option<bool>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self {
            config_path: std::env::var("TIDEWIRE_CONFIG").ok().map(PathBuf::from),
            server_host: std::env::var("SERVER_HOST").ok(),
            server_port: parse_var("SERVER_PORT"),
            redis_url: std::env::var("REDIS_URL")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            redis_host: std::env::var("REDIS_HOST").ok(),
            redis_port: parse_var("REDIS_PORT"),
            redis_username: std::env::var("REDIS_USERNAME").ok(),
            redis_password: std::env::var("REDIS_PASSWORD").ok(),
            redis_password_file: std::env::var("REDIS_PASSWORD_FILE")
                .ok()
                .map(PathBuf::from),
            redis_db: parse_var("REDIS_DB"),
            redis_connect_retries: parse_var("REDIS_CONNECT_RETRIES"),
            publish_max_retries: parse_var("PUBLISH_MAX_RETRIES"),
            publish_retry_delay: std::env::var("PUBLISH_RETRY_DELAY").ok(),
            publish_backoff_factor: parse_var("PUBLISH_BACKOFF_FACTOR"),
            publish_max_delay: std::env::var("PUBLISH_MAX_DELAY").ok(),
            gateway_namespace: std::env::var("GATEWAY_NAMESPACE").ok(),
            gateway_outbound_buffer: parse_var("GATEWAY_OUTBOUND_BUFFER"),
            cors_allowed_origins: parse_csv_var("CORS_ALLOWED_ORIGINS"),
            upstream_url: std::env::var("UPSTREAM_URL")
                .ok()
                .filter(|value| !value.trim().is_empty()),
            upstream_max_reconnects: parse_var("UPSTREAM_MAX_RECONNECTS"),
            upstream_reconnect_delay: std::env::var("UPSTREAM_RECONNECT_DELAY").ok(),
            dev_mode: parse_bool_var("DEV_MODE"),
        }
    }
}
