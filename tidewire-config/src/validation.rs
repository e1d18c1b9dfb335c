use thiserror::Error;
use url::Url;

use crate::constants::LARGE_RETRY_BUDGET;
use crate::models::Config;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("gateway outbound buffer must be greater than zero")]
    ZeroOutboundBuffer,
    #[error("gateway namespace `{namespace}` {reason}")]
    InvalidNamespace { namespace: String, reason: String },
    #[error("upstream url `{url}` {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },
    #[error("publisher backoff factor must be finite and at least 1.0, got {factor}")]
    InvalidBackoffFactor { factor: f64 },
    #[error("CORS wildcard origins are not allowed when DEV_MODE is false")]
    DangerousCorsWildcard,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.gateway.outbound_buffer == 0 {
        return Err(ConfigGuardRailError::ZeroOutboundBuffer);
    }
    validate_namespace(&config.gateway.namespace)?;

    if !config.dev_mode && config.gateway.is_wildcard_included() {
        return Err(ConfigGuardRailError::DangerousCorsWildcard);
    }

    let factor = config.publisher.backoff_factor;
    if !factor.is_finite() || factor < 1.0 {
        return Err(ConfigGuardRailError::InvalidBackoffFactor { factor });
    }

    if let Some(upstream) = &config.upstream {
        validate_upstream_url(&upstream.url)?;
        if upstream.reconnect_delay.is_zero() {
            warnings.push_with_hint(
                "UPSTREAM_RECONNECT_DELAY is zero; reconnect attempts will run back to back",
                "Set a delay such as 10s to avoid hammering the upstream endpoint",
            );
        }
    }

    if !config.dev_mode && !config.redis.has_credentials() {
        warnings.push_with_hint(
            "Redis connection has no password configured",
            "Set REDIS_PASSWORD or embed credentials in REDIS_URL for non-dev deployments",
        );
    }

    if config.publisher.max_retries > LARGE_RETRY_BUDGET {
        warnings.push(format!(
            "PUBLISH_MAX_RETRIES={} is large; callers will wait a long time before a publish is reported as failed",
            config.publisher.max_retries
        ));
    }

    if config.publisher.max_retries > 0 && config.publisher.retry_delay.is_zero() {
        warnings.push(
            "PUBLISH_RETRY_DELAY is zero; publish retries will not back off",
        );
    }

    Ok(warnings)
}

fn validate_namespace(namespace: &str) -> Result<(), ConfigGuardRailError> {
    let invalid = |reason: &str| ConfigGuardRailError::InvalidNamespace {
        namespace: namespace.to_string(),
        reason: reason.to_string(),
    };

    if namespace.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if !namespace
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(
            "may only contain ASCII letters, digits, `-` and `_`",
        ));
    }
    if matches!(namespace, "api" | "health") {
        return Err(invalid("collides with a built-in route"));
    }
    Ok(())
}

fn validate_upstream_url(raw: &str) -> Result<(), ConfigGuardRailError> {
    let url = Url::parse(raw).map_err(|err| {
        ConfigGuardRailError::InvalidUpstreamUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        }
    })?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConfigGuardRailError::InvalidUpstreamUrl {
            url: raw.to_string(),
            reason: format!("must use ws or wss, not `{}`", url.scheme()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        ConfigMetadata, GatewayConfig, PublisherConfig, RedisConfig,
        ServerConfig, UpstreamConfig,
    };
    use std::time::Duration;

    fn dev_config() -> Config {
        Config {
            server: ServerConfig::default(),
            redis: RedisConfig::default(),
            publisher: PublisherConfig::default(),
            gateway: GatewayConfig::default(),
            upstream: None,
            dev_mode: true,
            metadata: ConfigMetadata::default(),
        }
    }

    #[test]
    fn defaults_pass_in_dev_mode_without_warnings() {
        let warnings = apply_guard_rails(&dev_config()).unwrap();
        assert!(warnings.is_empty());
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let mut config = dev_config();
        config.gateway.outbound_buffer = 0;
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::ZeroOutboundBuffer)
        ));
    }

    #[test]
    fn namespace_with_slash_is_rejected() {
        let mut config = dev_config();
        config.gateway.namespace = "back/test".into();
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::InvalidNamespace { .. })
        ));
    }

    #[test]
    fn wildcard_cors_only_allowed_in_dev_mode() {
        let mut config = dev_config();
        config.gateway.cors_allowed_origins = vec!["*".into()];
        assert!(apply_guard_rails(&config).is_ok());

        config.dev_mode = false;
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::DangerousCorsWildcard)
        ));
    }

    #[test]
    fn upstream_must_be_websocket() {
        let mut config = dev_config();
        config.upstream = Some(UpstreamConfig {
            url: "http://feeds.internal/tasks".into(),
            max_reconnects: 5,
            reconnect_delay: Duration::from_secs(10),
        });
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::InvalidUpstreamUrl { .. })
        ));
    }

    #[test]
    fn shrinking_backoff_factor_is_rejected() {
        let mut config = dev_config();
        config.publisher.backoff_factor = 0.5;
        assert!(matches!(
            apply_guard_rails(&config),
            Err(ConfigGuardRailError::InvalidBackoffFactor { .. })
        ));
    }

    #[test]
    fn production_posture_warns_about_missing_redis_password() {
        let mut config = dev_config();
        config.dev_mode = false;
        config.publisher.max_retries = 50;
        let warnings = apply_guard_rails(&config).unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(
            warnings
                .iter()
                .any(|w| w.message.contains("no password"))
        );
    }
}
