pub mod error;

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    constants::*,
    models::{
        Config, ConfigMetadata, ConnectionRetry, GatewayConfig,
        PublisherConfig, RedisConfig, ServerConfig, UpstreamConfig,
        sources::{EnvConfig, FileConfig, FileRedisConfig},
    },
    util::parse_duration,
    validation::{self, ConfigWarnings},
};

use self::error::ConfigLoadError;

const DEFAULT_CONFIG_LOCATIONS: [&str; 2] =
    ["tidewire.toml", "config/tidewire.toml"];

#[derive(Debug, Default, Clone)]
struct ConfigLoaderOptions {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Reads this file instead of `./.env`. A missing file is not an error.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads `.env`, the config file and the process environment, then
    /// applies guard rails. Environment values win over file values.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let env_config = EnvConfig::gather();
        let (file_config, config_path) = self.load_file_config(&env_config)?;

        let metadata = ConfigMetadata {
            config_path,
            env_file_loaded,
        };
        let (config, warnings) =
            compose_config(file_config, env_config, metadata)?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env_config.config_path.clone());

        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigLoadError::MissingConfig { path });
                }
                path
            }
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.exists())
            {
                Some(path) => path,
                None => return Ok((None, None)),
            },
        };

        let file_config = read_file_config(&path)?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }
}

pub fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merges file and environment sources over the built-in defaults.
pub fn compose_config(
    file_config: Option<FileConfig>,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<(Config, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();

    if metadata.config_path.is_none() {
        warnings.push_with_hint(
            "No tidewire.toml detected; using defaults and environment variables",
            "Pass --config or set TIDEWIRE_CONFIG to load a configuration file",
        );
    }

    let FileConfig {
        server: file_server,
        redis: file_redis,
        publisher: file_publisher,
        gateway: file_gateway,
        upstream: file_upstream,
        dev_mode: file_dev_mode,
    } = file_config.unwrap_or_default();

    let server = ServerConfig {
        host: env
            .server_host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
        port: env
            .server_port
            .or(file_server.port)
            .unwrap_or(DEFAULT_SERVER_PORT),
    };

    let redis = RedisConfig {
        password: resolve_redis_password(&env, &file_redis)?,
        url: env.redis_url.clone().or(file_redis.url),
        host: env
            .redis_host
            .clone()
            .or(file_redis.host)
            .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
        port: env
            .redis_port
            .or(file_redis.port)
            .unwrap_or(DEFAULT_REDIS_PORT),
        username: env
            .redis_username
            .clone()
            .or(file_redis.username)
            .filter(|value| !value.trim().is_empty()),
        db: env.redis_db.or(file_redis.db).unwrap_or(0),
        connect: ConnectionRetry {
            retries: env
                .redis_connect_retries
                .or(file_redis.connect_retries)
                .unwrap_or(DEFAULT_REDIS_CONNECT_RETRIES),
            backoff_base: duration_or(
                "redis.connect_backoff_base",
                file_redis.connect_backoff_base,
                DEFAULT_REDIS_BACKOFF_BASE,
            )?,
            backoff_max: duration_or(
                "redis.connect_backoff_max",
                file_redis.connect_backoff_max,
                DEFAULT_REDIS_BACKOFF_MAX,
            )?,
        },
    };
    // Fail fast on a URL the client would reject later.
    redis.connection_url()?;

    let publisher = PublisherConfig {
        max_retries: env
            .publish_max_retries
            .or(file_publisher.max_retries)
            .unwrap_or(DEFAULT_PUBLISH_MAX_RETRIES),
        retry_delay: duration_or(
            "publisher.retry_delay",
            env.publish_retry_delay.clone().or(file_publisher.retry_delay),
            DEFAULT_PUBLISH_RETRY_DELAY,
        )?,
        backoff_factor: env
            .publish_backoff_factor
            .or(file_publisher.backoff_factor)
            .unwrap_or(DEFAULT_PUBLISH_BACKOFF_FACTOR),
        max_delay: duration_or(
            "publisher.max_delay",
            env.publish_max_delay.clone().or(file_publisher.max_delay),
            DEFAULT_PUBLISH_MAX_DELAY,
        )?,
    };

    let gateway = GatewayConfig {
        namespace: env
            .gateway_namespace
            .clone()
            .or(file_gateway.namespace)
            .map(|ns| ns.trim().trim_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_GATEWAY_NAMESPACE.to_string()),
        outbound_buffer: env
            .gateway_outbound_buffer
            .or(file_gateway.outbound_buffer)
            .unwrap_or(DEFAULT_GATEWAY_OUTBOUND_BUFFER),
        cors_allowed_origins: env
            .cors_allowed_origins
            .clone()
            .or(file_gateway.cors_allowed_origins)
            .unwrap_or_else(default_cors_origins),
    };

    let upstream = match (env.upstream_url.clone(), file_upstream) {
        (Some(url), file) => Some(UpstreamConfig {
            url,
            max_reconnects: env
                .upstream_max_reconnects
                .or(file.as_ref().and_then(|f| f.max_reconnects))
                .unwrap_or(DEFAULT_UPSTREAM_MAX_RECONNECTS),
            reconnect_delay: duration_or(
                "upstream.reconnect_delay",
                env.upstream_reconnect_delay
                    .clone()
                    .or(file.and_then(|f| f.reconnect_delay)),
                DEFAULT_UPSTREAM_RECONNECT_DELAY,
            )?,
        }),
        (None, Some(file)) => Some(UpstreamConfig {
            url: file.url,
            max_reconnects: env
                .upstream_max_reconnects
                .or(file.max_reconnects)
                .unwrap_or(DEFAULT_UPSTREAM_MAX_RECONNECTS),
            reconnect_delay: duration_or(
                "upstream.reconnect_delay",
                env.upstream_reconnect_delay.clone().or(file.reconnect_delay),
                DEFAULT_UPSTREAM_RECONNECT_DELAY,
            )?,
        }),
        (None, None) => None,
    };

    let config = Config {
        server,
        redis,
        publisher,
        gateway,
        upstream,
        dev_mode: env.dev_mode.or(file_dev_mode).unwrap_or(false),
        metadata,
    };

    let guard_warnings = validation::apply_guard_rails(&config)?;
    warnings.extend(guard_warnings);

    Ok((config, warnings))
}

fn duration_or(
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    match raw {
        Some(value) => parse_duration(&value).map_err(|source| {
            ConfigLoadError::InvalidDuration {
                field,
                value,
                source,
            }
        }),
        None => Ok(default),
    }
}

fn resolve_redis_password(
    env: &EnvConfig,
    file_redis: &FileRedisConfig,
) -> Result<Option<String>, ConfigLoadError> {
    if let Some(password) = env
        .redis_password
        .clone()
        .filter(|value| !value.trim().is_empty())
    {
        return Ok(Some(password));
    }

    if let Some(path) = env.redis_password_file.as_ref()
        && let Some(secret) = read_secret_file(path)?
    {
        return Ok(Some(secret));
    }

    if let Some(password) = file_redis
        .password
        .clone()
        .filter(|value| !value.trim().is_empty())
    {
        return Ok(Some(password));
    }

    match file_redis.password_file.as_ref() {
        Some(path) => read_secret_file(path),
        None => Ok(None),
    }
}

fn read_secret_file(path: &Path) -> Result<Option<String>, ConfigLoadError> {
    let contents = fs::read_to_string(path).map_err(|source| {
        ConfigLoadError::SecretFileIo {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}
