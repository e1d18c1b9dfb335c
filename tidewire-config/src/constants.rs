use std::time::Duration;

pub const DEFAULT_SERVER_HOST: &str = "0.0.0.0";
pub const DEFAULT_SERVER_PORT: u16 = 3000;

pub const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
pub const DEFAULT_REDIS_PORT: u16 = 6379;
pub const DEFAULT_REDIS_CONNECT_RETRIES: usize = 6;
pub const DEFAULT_REDIS_BACKOFF_BASE: Duration = Duration::from_millis(500);
pub const DEFAULT_REDIS_BACKOFF_MAX: Duration = Duration::from_secs(30);

pub const DEFAULT_PUBLISH_MAX_RETRIES: u32 = 3;
pub const DEFAULT_PUBLISH_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_PUBLISH_BACKOFF_FACTOR: f64 = 1.0;
pub const DEFAULT_PUBLISH_MAX_DELAY: Duration = Duration::from_secs(60);

pub const DEFAULT_GATEWAY_NAMESPACE: &str = "backtest";
pub const DEFAULT_GATEWAY_OUTBOUND_BUFFER: usize = 100;

pub const DEFAULT_UPSTREAM_MAX_RECONNECTS: u32 = 5;
pub const DEFAULT_UPSTREAM_RECONNECT_DELAY: Duration = Duration::from_secs(10);

/// Publish retry budgets above this are accepted but flagged.
pub const LARGE_RETRY_BUDGET: u32 = 10;

pub fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:5173".to_string(),
    ]
}
