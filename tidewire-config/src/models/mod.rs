pub mod sources;

use std::{fmt, path::PathBuf, time::Duration};

use url::Url;

use crate::{constants::*, loader::error::ConfigLoadError};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub publisher: PublisherConfig,
    pub gateway: GatewayConfig,
    pub upstream: Option<UpstreamConfig>,
    pub dev_mode: bool,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SERVER_HOST.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

/// Connection settings shared by the publish and subscribe connections.
#[derive(Clone)]
pub struct RedisConfig {
    /// Full `redis://` URL; when set it wins over host/port/db.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub db: i64,
    pub connect: ConnectionRetry,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_REDIS_HOST.to_string(),
            port: DEFAULT_REDIS_PORT,
            username: None,
            password: None,
            db: 0,
            connect: ConnectionRetry::default(),
        }
    }
}

impl RedisConfig {
    /// Resolves the URL handed to the Redis client. Credentials configured
    /// separately are merged into an explicit URL that carries none.
    pub fn connection_url(&self) -> Result<Url, ConfigLoadError> {
        let mut url = match &self.url {
            Some(raw) => Url::parse(raw).map_err(|source| ConfigLoadError::InvalidRedisUrl {
                reason: source.to_string(),
            })?,
            None => Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
                .map_err(|source| ConfigLoadError::InvalidRedisUrl {
                    reason: source.to_string(),
                })?,
        };

        if !matches!(url.scheme(), "redis" | "rediss") {
            return Err(ConfigLoadError::InvalidRedisUrl {
                reason: format!("unsupported scheme `{}`", url.scheme()),
            });
        }

        if url.username().is_empty()
            && let Some(username) = &self.username
        {
            url.set_username(username)
                .map_err(|_| ConfigLoadError::InvalidRedisUrl {
                    reason: "username cannot be set on this URL".into(),
                })?;
        }

        if url.password().is_none()
            && let Some(password) = &self.password
        {
            url.set_password(Some(password))
                .map_err(|_| ConfigLoadError::InvalidRedisUrl {
                    reason: "password cannot be set on this URL".into(),
                })?;
        }

        Ok(url)
    }

    /// Connection URL with the password masked, for logs.
    pub fn redacted_url(&self) -> String {
        match self.connection_url() {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("***"));
                }
                url.to_string()
            }
            Err(err) => format!("<invalid: {err}>"),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.connection_url()
            .map(|url| url.password().is_some())
            .unwrap_or(false)
    }
}

impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.redacted_url())
            .field("connect", &self.connect)
            .finish()
    }
}

/// Backoff applied when (re)establishing broker connections. Independent of
/// the publish retry policy.
#[derive(Debug, Clone)]
pub struct ConnectionRetry {
    pub retries: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for ConnectionRetry {
    fn default() -> Self {
        Self {
            retries: DEFAULT_REDIS_CONNECT_RETRIES,
            backoff_base: DEFAULT_REDIS_BACKOFF_BASE,
            backoff_max: DEFAULT_REDIS_BACKOFF_MAX,
        }
    }
}

/// Bounded retry for task publishes. A factor of `1.0` keeps the delay fixed.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_PUBLISH_MAX_RETRIES,
            retry_delay: DEFAULT_PUBLISH_RETRY_DELAY,
            backoff_factor: DEFAULT_PUBLISH_BACKOFF_FACTOR,
            max_delay: DEFAULT_PUBLISH_MAX_DELAY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Path segment the WebSocket endpoint is mounted under.
    pub namespace: String,
    /// Per-connection queue of outbound frames.
    pub outbound_buffer: usize,
    pub cors_allowed_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_GATEWAY_NAMESPACE.to_string(),
            outbound_buffer: DEFAULT_GATEWAY_OUTBOUND_BUFFER,
            cors_allowed_origins: default_cors_origins(),
        }
    }
}

impl GatewayConfig {
    pub fn route_path(&self) -> String {
        format!("/{}", self.namespace)
    }

    pub fn is_wildcard_included(&self) -> bool {
        self.cors_allowed_origins
            .iter()
            .any(|origin| origin.trim() == "*")
    }
}

/// Endpoint the reconnecting consumer pulls tasks from.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub url: String,
    pub max_reconnects: u32,
    pub reconnect_delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_built_from_parts_with_credentials() {
        let redis = RedisConfig {
            host: "cache.internal".into(),
            port: 6380,
            password: Some("s3cr3t".into()),
            db: 2,
            ..RedisConfig::default()
        };
        let url = redis.connection_url().unwrap();
        assert_eq!(url.as_str(), "redis://:s3cr3t@cache.internal:6380/2");
        assert!(redis.has_credentials());
        assert!(!redis.redacted_url().contains("s3cr3t"));
    }

    #[test]
    fn explicit_url_keeps_its_own_password() {
        let redis = RedisConfig {
            url: Some("redis://:inline@10.0.0.5:6379/0".into()),
            password: Some("ignored".into()),
            ..RedisConfig::default()
        };
        assert_eq!(
            redis.connection_url().unwrap().password(),
            Some("inline")
        );
    }

    #[test]
    fn non_redis_scheme_is_rejected() {
        let redis = RedisConfig {
            url: Some("http://localhost:6379".into()),
            ..RedisConfig::default()
        };
        assert!(matches!(
            redis.connection_url(),
            Err(ConfigLoadError::InvalidRedisUrl { .. })
        ));
    }
}
