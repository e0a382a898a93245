//! Configuration module
//!
//! Configuration is read from the environment (a `.env` file is honored through
//! dotenvy). Values are grouped by concern: HTTP/base settings, Telegram
//! credentials, worker pool behavior, transfer limits and the optional
//! forward proxy used for every request to the platform.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{MAX_PROBE_TIMEOUT_SECS, PLATFORM_MAX_UPLOAD_BYTES};

// Common constants
const SERVER_PORT: u16 = 8000;
const DB_MAX_CONNECTIONS: u32 = 5;
const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const WORKER_MAX_CONCURRENT_REQUESTS: usize = 4;
const MAX_UPLOAD_SIZE_MB: u64 = 50;
const DOCUMENT_UPLOAD_TIMEOUT_SECS: u64 = 300;
const VIDEO_UPLOAD_TIMEOUT_SECS: u64 = 600;
const HEALTH_PROBE_INTERVAL_SECS: u64 = 30;
const HEALTH_PROBE_TIMEOUT_SECS: u64 = 10;
const HEALTH_FAILURE_THRESHOLD: u32 = 3;
const RESOLVE_TIMEOUT_SECS: u64 = 15;
const UPSTREAM_FETCH_TIMEOUT_SECS: u64 = 30;
const STREAM_BUFFER_CHUNKS: usize = 8;
const EXPIRY_SWEEP_INTERVAL_SECS: u64 = 3600;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Worker selection policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategyKind {
    /// Least-recently handed out worker first
    RoundRobin,
    /// Fewest outstanding requests first
    LeastLoaded,
    /// Uniform pick among admissible workers
    Random,
}

impl FromStr for SelectionStrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" | "round-robin" | "roundrobin" => Ok(SelectionStrategyKind::RoundRobin),
            "least_loaded" | "least-loaded" => Ok(SelectionStrategyKind::LeastLoaded),
            "random" => Ok(SelectionStrategyKind::Random),
            other => Err(anyhow::anyhow!("Invalid selection strategy: {}", other)),
        }
    }
}

/// HTTP server, auth and catalog settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    pub base_url: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub admin_api_key: String,
    pub api_keys: Vec<String>,
    pub log_format: LogFormat,
}

/// Credentials of the worker accounts and the chat they store into
#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_tokens: Vec<String>,
    pub bot_names: Vec<String>,
    pub channel_id: i64,
    pub api_base: String,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_tokens", &format!("<{} redacted>", self.bot_tokens.len()))
            .field("bot_names", &self.bot_names)
            .field("channel_id", &self.channel_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl TelegramConfig {
    /// Worker names paired with their tokens, in configuration order.
    /// Missing names fall back to `bot-<n>`.
    pub fn workers(&self) -> Vec<(String, String)> {
        self.bot_tokens
            .iter()
            .enumerate()
            .map(|(idx, token)| {
                let name = self
                    .bot_names
                    .get(idx)
                    .filter(|n| !n.is_empty())
                    .cloned()
                    .unwrap_or_else(|| format!("bot-{}", idx + 1));
                (name, token.clone())
            })
            .collect()
    }
}

/// Health probing and admission control
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub worker_max_concurrent_requests: usize,
    pub selection_strategy: SelectionStrategyKind,
    pub health_probe_interval: Duration,
    pub health_probe_timeout: Duration,
    pub health_failure_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_max_concurrent_requests: WORKER_MAX_CONCURRENT_REQUESTS,
            selection_strategy: SelectionStrategyKind::RoundRobin,
            health_probe_interval: Duration::from_secs(HEALTH_PROBE_INTERVAL_SECS),
            health_probe_timeout: Duration::from_secs(HEALTH_PROBE_TIMEOUT_SECS),
            health_failure_threshold: HEALTH_FAILURE_THRESHOLD,
        }
    }
}

/// Upload and download limits
#[derive(Clone, Debug)]
pub struct TransferConfig {
    pub max_upload_bytes: u64,
    pub document_upload_timeout: Duration,
    pub video_upload_timeout: Duration,
    pub upload_retry_on_other_worker: bool,
    pub resolve_timeout: Duration,
    /// Bounds both the wait for upstream response headers and the gap between chunks.
    pub upstream_fetch_timeout: Duration,
    pub stream_buffer_chunks: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: MAX_UPLOAD_SIZE_MB * 1024 * 1024,
            document_upload_timeout: Duration::from_secs(DOCUMENT_UPLOAD_TIMEOUT_SECS),
            video_upload_timeout: Duration::from_secs(VIDEO_UPLOAD_TIMEOUT_SECS),
            upload_retry_on_other_worker: false,
            resolve_timeout: Duration::from_secs(RESOLVE_TIMEOUT_SECS),
            upstream_fetch_timeout: Duration::from_secs(UPSTREAM_FETCH_TIMEOUT_SECS),
            stream_buffer_chunks: STREAM_BUFFER_CHUNKS,
        }
    }
}

/// Forward HTTP proxy for upstream traffic
#[derive(Clone)]
pub struct ForwardProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for ForwardProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ForwardProxyConfig {
    /// Proxy URL without credentials; credentials are applied separately.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    pub telegram: TelegramConfig,
    pub pool: PoolConfig,
    pub transfer: TransferConfig,
    pub proxy: Option<ForwardProxyConfig>,
    /// Seconds between expiry sweeps; 0 disables the sweeper.
    pub expiry_sweep_interval_secs: u64,
}

impl Config {
    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = get("ENVIRONMENT")
            .or_else(|| get("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let server_port: u16 = match get("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            None => SERVER_PORT,
        };

        let base = BaseConfig {
            server_port,
            cors_origins: split_list(&get("CORS_ORIGINS").unwrap_or_else(|| "*".to_string())),
            environment,
            base_url: get("BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| format!("http://localhost:{}", server_port)),
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://tgstore.db?mode=rwc".to_string()),
            db_max_connections: parse_or(
                "DB_MAX_CONNECTIONS",
                get("DB_MAX_CONNECTIONS"),
                DB_MAX_CONNECTIONS,
            )?,
            admin_api_key: get("ADMIN_API_KEY")
                .map(|k| k.trim().to_string())
                .ok_or_else(|| anyhow::anyhow!("ADMIN_API_KEY must be set"))?,
            api_keys: get("API_KEYS").map(|s| split_list(&s)).unwrap_or_default(),
            log_format: match get("LOG_FORMAT").map(|s| s.to_lowercase()).as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Compact,
            },
        };

        let telegram = TelegramConfig {
            bot_tokens: get("TELEGRAM_BOT_TOKENS")
                .map(|s| split_list(&s))
                .ok_or_else(|| anyhow::anyhow!("TELEGRAM_BOT_TOKENS must be set"))?,
            bot_names: get("TELEGRAM_BOT_NAMES")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
            channel_id: get("TELEGRAM_CHANNEL_ID")
                .ok_or_else(|| anyhow::anyhow!("TELEGRAM_CHANNEL_ID must be set"))?
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("TELEGRAM_CHANNEL_ID must be a numeric chat id"))?,
            api_base: get("TELEGRAM_API_BASE")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| TELEGRAM_API_BASE.to_string()),
        };

        let pool = PoolConfig {
            worker_max_concurrent_requests: parse_or(
                "WORKER_MAX_CONCURRENT_REQUESTS",
                get("WORKER_MAX_CONCURRENT_REQUESTS"),
                WORKER_MAX_CONCURRENT_REQUESTS,
            )?,
            selection_strategy: match get("SELECTION_STRATEGY") {
                Some(raw) => raw.parse()?,
                None => SelectionStrategyKind::RoundRobin,
            },
            health_probe_interval: secs_or(
                "HEALTH_PROBE_INTERVAL_SECS",
                get("HEALTH_PROBE_INTERVAL_SECS"),
                HEALTH_PROBE_INTERVAL_SECS,
            )?,
            health_probe_timeout: secs_or(
                "HEALTH_PROBE_TIMEOUT_SECS",
                get("HEALTH_PROBE_TIMEOUT_SECS"),
                HEALTH_PROBE_TIMEOUT_SECS,
            )?,
            health_failure_threshold: parse_or(
                "HEALTH_FAILURE_THRESHOLD",
                get("HEALTH_FAILURE_THRESHOLD"),
                HEALTH_FAILURE_THRESHOLD,
            )?,
        };

        let transfer = TransferConfig {
            max_upload_bytes: parse_or::<u64>(
                "MAX_UPLOAD_SIZE_MB",
                get("MAX_UPLOAD_SIZE_MB"),
                MAX_UPLOAD_SIZE_MB,
            )?
            .checked_mul(1024 * 1024)
            .ok_or_else(|| anyhow::anyhow!("MAX_UPLOAD_SIZE_MB is too large"))?,
            document_upload_timeout: secs_or(
                "DOCUMENT_UPLOAD_TIMEOUT_SECS",
                get("DOCUMENT_UPLOAD_TIMEOUT_SECS"),
                DOCUMENT_UPLOAD_TIMEOUT_SECS,
            )?,
            video_upload_timeout: secs_or(
                "VIDEO_UPLOAD_TIMEOUT_SECS",
                get("VIDEO_UPLOAD_TIMEOUT_SECS"),
                VIDEO_UPLOAD_TIMEOUT_SECS,
            )?,
            upload_retry_on_other_worker: parse_or(
                "UPLOAD_RETRY_ON_OTHER_WORKER",
                get("UPLOAD_RETRY_ON_OTHER_WORKER"),
                false,
            )?,
            resolve_timeout: secs_or(
                "RESOLVE_TIMEOUT_SECS",
                get("RESOLVE_TIMEOUT_SECS"),
                RESOLVE_TIMEOUT_SECS,
            )?,
            upstream_fetch_timeout: secs_or(
                "UPSTREAM_FETCH_TIMEOUT_SECS",
                get("UPSTREAM_FETCH_TIMEOUT_SECS"),
                UPSTREAM_FETCH_TIMEOUT_SECS,
            )?,
            stream_buffer_chunks: parse_or(
                "STREAM_BUFFER_CHUNKS",
                get("STREAM_BUFFER_CHUNKS"),
                STREAM_BUFFER_CHUNKS,
            )?,
        };

        let proxy = match (get("PROXY_HOST"), get("PROXY_PORT")) {
            (Some(host), Some(port)) => Some(ForwardProxyConfig {
                host: host.trim().to_string(),
                port: port
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("PROXY_PORT must be a valid port"))?,
                username: get("PROXY_USER"),
                password: get("PROXY_PASS"),
            }),
            (None, None) => None,
            _ => {
                return Err(anyhow::anyhow!(
                    "PROXY_HOST and PROXY_PORT must be set together"
                ))
            }
        };

        Ok(Config {
            base,
            telegram,
            pool,
            transfer,
            proxy,
            expiry_sweep_interval_secs: parse_or(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                get("EXPIRY_SWEEP_INTERVAL_SECS"),
                EXPIRY_SWEEP_INTERVAL_SECS,
            )?,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.is_production() && self.base.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }
        if self.base.admin_api_key.is_empty() {
            return Err(anyhow::anyhow!("ADMIN_API_KEY must not be empty"));
        }
        if self.telegram.bot_tokens.is_empty() {
            return Err(anyhow::anyhow!("TELEGRAM_BOT_TOKENS must list at least one token"));
        }
        if self.pool.worker_max_concurrent_requests == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_MAX_CONCURRENT_REQUESTS must be greater than 0"
            ));
        }
        let probe_secs = self.pool.health_probe_timeout.as_secs();
        if probe_secs == 0 || probe_secs > MAX_PROBE_TIMEOUT_SECS {
            return Err(anyhow::anyhow!(
                "HEALTH_PROBE_TIMEOUT_SECS must be between 1 and {}",
                MAX_PROBE_TIMEOUT_SECS
            ));
        }
        if self.pool.health_probe_interval.is_zero() {
            return Err(anyhow::anyhow!("HEALTH_PROBE_INTERVAL_SECS must be greater than 0"));
        }
        if self.pool.health_failure_threshold == 0 {
            return Err(anyhow::anyhow!("HEALTH_FAILURE_THRESHOLD must be at least 1"));
        }
        if self.transfer.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }
        if self.transfer.max_upload_bytes > PLATFORM_MAX_UPLOAD_BYTES {
            return Err(anyhow::anyhow!(
                "MAX_UPLOAD_SIZE_MB cannot exceed the platform limit of {} bytes",
                PLATFORM_MAX_UPLOAD_BYTES
            ));
        }
        if self.transfer.stream_buffer_chunks == 0 {
            return Err(anyhow::anyhow!("STREAM_BUFFER_CHUNKS must be greater than 0"));
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `default` when unset; a value that is set but does not parse is an error.
fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, anyhow::Error> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}

fn secs_or(key: &str, raw: Option<String>, default: u64) -> Result<Duration, anyhow::Error> {
    parse_or(key, raw, default).map(Duration::from_secs)
}
