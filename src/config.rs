//! Link configuration parsed from environment variables.
//!
//! Every knob has a typed default; unparsable values fall back to the
//! default rather than failing startup. Only values that would make the
//! link unusable (bad URL scheme, zero fps, zero chunk size) are rejected.

use std::time::Duration;

use crate::channel::retry::{DEFAULT_INITIAL_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_MAX_RETRIES, RetryPolicy};
use crate::chunked::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:5003/ws/pepper";
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 90_000;
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CAPTURE_FPS: u32 = 10;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("server url must start with ws:// or wss://, got `{0}`")]
    InvalidUrl(String),
    #[error("capture fps must be greater than zero")]
    ZeroFps,
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
}

// =============================================================================
// CHANNEL
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Server endpoint. Mutable at runtime through `Channel::set_url`.
    pub server_url: String,
    /// Liveness probe period while open.
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    /// Silence longer than this is treated as a dead connection.
    pub read_timeout: Duration,
    /// Upper bound for flushing a single outbound frame.
    pub write_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_owned(),
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl ChannelConfig {
    /// Channel config for `url` with every other knob at its default.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self { server_url: url.into(), ..Self::default() }
    }

    /// Build channel config from environment variables.
    ///
    /// Optional:
    /// - `PEPPER_WS_URL`: default `ws://127.0.0.1:5003/ws/pepper`
    /// - `PEPPER_PING_INTERVAL_SECS`: default 30
    /// - `PEPPER_CONNECT_TIMEOUT_MS`: default 10000
    /// - `PEPPER_READ_TIMEOUT_MS`: default 90000
    /// - `PEPPER_WRITE_TIMEOUT_MS`: default 10000
    /// - `PEPPER_MAX_RETRY_COUNT`: default 5
    /// - `PEPPER_INITIAL_BACKOFF_MS`: default 1000
    /// - `PEPPER_MAX_BACKOFF_MS`: default 30000
    /// - `PEPPER_BACKOFF_JITTER`: default 0.0
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = std::env::var("PEPPER_WS_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_owned());
        validate_url(&server_url)?;

        Ok(Self {
            server_url,
            ping_interval: Duration::from_secs(env_parse("PEPPER_PING_INTERVAL_SECS", DEFAULT_PING_INTERVAL_SECS)),
            connect_timeout: Duration::from_millis(env_parse("PEPPER_CONNECT_TIMEOUT_MS", DEFAULT_CONNECT_TIMEOUT_MS)),
            read_timeout: Duration::from_millis(env_parse("PEPPER_READ_TIMEOUT_MS", DEFAULT_READ_TIMEOUT_MS)),
            write_timeout: Duration::from_millis(env_parse("PEPPER_WRITE_TIMEOUT_MS", DEFAULT_WRITE_TIMEOUT_MS)),
            retry: RetryPolicy {
                max_retries: env_parse("PEPPER_MAX_RETRY_COUNT", DEFAULT_MAX_RETRIES),
                initial_backoff: Duration::from_millis(env_parse("PEPPER_INITIAL_BACKOFF_MS", DEFAULT_INITIAL_BACKOFF_MS)),
                max_backoff: Duration::from_millis(env_parse("PEPPER_MAX_BACKOFF_MS", DEFAULT_MAX_BACKOFF_MS)),
                jitter_ratio: env_parse("PEPPER_BACKOFF_JITTER", 0.0_f64),
            },
        })
    }
}

/// Accept only WebSocket URLs.
pub fn validate_url(url: &str) -> Result<(), ConfigError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(ConfigError::InvalidUrl(url.to_owned()))
    }
}

// =============================================================================
// CAPTURE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub target_fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self { target_fps: DEFAULT_CAPTURE_FPS }
    }
}

impl CaptureConfig {
    /// Period between capture ticks (`1000 / target_fps` ms).
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.target_fps.max(1)))
    }
}

// =============================================================================
// LINK
// =============================================================================

/// Everything the robot-side bridge needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub channel: ChannelConfig,
    pub capture: CaptureConfig,
    /// Chunk size used when paging pictures out of the robot.
    pub chunk_size: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self { channel: ChannelConfig::default(), capture: CaptureConfig::default(), chunk_size: DEFAULT_CHUNK_SIZE }
    }
}

impl LinkConfig {
    /// Build the full link config from environment variables.
    ///
    /// Adds to [`ChannelConfig::from_env`]:
    /// - `PEPPER_CAPTURE_FPS`: default 10
    /// - `PEPPER_CHUNK_SIZE`: default 4 MiB
    pub fn from_env() -> Result<Self, ConfigError> {
        let channel = ChannelConfig::from_env()?;
        let target_fps = env_parse("PEPPER_CAPTURE_FPS", DEFAULT_CAPTURE_FPS);
        if target_fps == 0 {
            return Err(ConfigError::ZeroFps);
        }
        let chunk_size = env_parse("PEPPER_CHUNK_SIZE", DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }

        Ok(Self { channel, capture: CaptureConfig { target_fps }, chunk_size })
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
