// Server configuration
//
// Loaded from environment variables (after dotenvy has read any .env file).
// Every value has a default; a value that is present but malformed is a
// startup error rather than being silently replaced.

use anyhow::{bail, Context, Result};
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::services::StreamConfig;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:4000";
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024; // 1 MB
pub const DEFAULT_SUBSCRIBER_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_IDLE_SWEEP_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_INITIAL_BACKFILL_LIMIT: usize = 100;
pub const DEFAULT_BACKFILL_PAGE_SIZE: usize = 500;
pub const DEFAULT_STREAM_HANDSHAKE_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Postgres URL; `None` runs with the in-memory store (dev mode)
    pub database_url: Option<String>,
    /// Example: "/api" results in routes like /api/events
    pub api_prefix: String,
    /// Only needed when the dashboard is served from another origin
    pub cors_allowed_origins: Vec<String>,
    pub max_event_bytes: usize,
    pub subscriber_queue_capacity: usize,
    pub session_idle_timeout: Duration,
    pub idle_sweep_interval: Duration,
    pub stream: StreamConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 4000)),
            database_url: None,
            api_prefix: String::new(),
            cors_allowed_origins: Vec::new(),
            max_event_bytes: DEFAULT_MAX_EVENT_BYTES,
            subscriber_queue_capacity: DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS),
            idle_sweep_interval: Duration::from_secs(DEFAULT_IDLE_SWEEP_INTERVAL_SECS),
            stream: StreamConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let bind_addr = parse_or(&get, "AGENTDASH_BIND_ADDR", DEFAULT_BIND_ADDR.parse()?)?;
        let database_url = get("DATABASE_URL");
        let api_prefix = get("API_PREFIX").unwrap_or_default();
        if !api_prefix.is_empty() && !api_prefix.starts_with('/') {
            bail!("API_PREFIX must start with '/', got {api_prefix:?}");
        }
        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let max_event_bytes = positive(&get, "MAX_EVENT_BYTES", DEFAULT_MAX_EVENT_BYTES)?;
        let subscriber_queue_capacity = positive(
            &get,
            "SUBSCRIBER_QUEUE_CAPACITY",
            DEFAULT_SUBSCRIBER_QUEUE_CAPACITY,
        )?;
        let session_idle_timeout = Duration::from_secs(positive(
            &get,
            "SESSION_IDLE_TIMEOUT_SECS",
            DEFAULT_SESSION_IDLE_TIMEOUT_SECS,
        )?);
        let idle_sweep_interval = Duration::from_secs(positive(
            &get,
            "IDLE_SWEEP_INTERVAL_SECS",
            DEFAULT_IDLE_SWEEP_INTERVAL_SECS,
        )?);

        let stream = StreamConfig {
            initial_backfill_limit: parse_or(
                &get,
                "INITIAL_BACKFILL_LIMIT",
                DEFAULT_INITIAL_BACKFILL_LIMIT,
            )?,
            backfill_page_size: positive(&get, "BACKFILL_PAGE_SIZE", DEFAULT_BACKFILL_PAGE_SIZE)?,
            handshake_timeout: Duration::from_millis(parse_or(
                &get,
                "STREAM_HANDSHAKE_TIMEOUT_MS",
                DEFAULT_STREAM_HANDSHAKE_TIMEOUT_MS,
            )?),
        };

        Ok(Self {
            bind_addr,
            database_url,
            api_prefix,
            cors_allowed_origins,
            max_event_bytes,
            subscriber_queue_capacity,
            session_idle_timeout,
            idle_sweep_interval,
            stream,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Invalid value for {name}: {raw:?}")),
        None => Ok(default),
    }
}

fn positive<T>(get: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr + PartialOrd + Default + Copy,
    T::Err: Display,
{
    let value = parse_or(get, name, default)?;
    if value <= T::default() {
        bail!("{name} must be greater than zero");
    }
    Ok(value)
}
