//! Application configuration from environment variables.
//!
//! Load configuration using `Config::from_env()` after calling `dotenvy::dotenv()`.

use std::time::Duration;

/// Default listen host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 1234;

/// Default heartbeat period in seconds
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 30;

/// Default bound on a single socket write, in milliseconds
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

/// Default capacity of each connection's outbound queue
pub const DEFAULT_OUTGOING_BUFFER_SIZE: usize = 256;

/// Errors raised while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen host
    /// Example: 127.0.0.1
    pub host: String,

    /// Listen port
    pub port: u16,

    /// Heartbeat period; `None` disables heartbeats (`PING_INTERVAL_SECS=0`)
    pub ping_interval: Option<Duration>,

    /// Bound on a single socket write and on queueing a room notice
    pub send_timeout: Duration,

    /// Capacity of each connection's outbound queue
    pub outgoing_buffer_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` before this to load from `.env` file.
    /// Unset variables fall back to their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = parse_var(&lookup, "PORT", "a port number", DEFAULT_PORT)?;

        let ping_secs = parse_var(
            &lookup,
            "PING_INTERVAL_SECS",
            "a whole number of seconds",
            DEFAULT_PING_INTERVAL_SECS,
        )?;
        let send_timeout_ms = parse_var(
            &lookup,
            "SEND_TIMEOUT_MS",
            "a whole number of milliseconds",
            DEFAULT_SEND_TIMEOUT_MS,
        )?;
        let outgoing_buffer_size = parse_var(
            &lookup,
            "OUTGOING_BUFFER_SIZE",
            "a positive integer",
            DEFAULT_OUTGOING_BUFFER_SIZE,
        )?;

        // tokio's bounded channel panics on zero capacity
        if outgoing_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                name: "OUTGOING_BUFFER_SIZE",
                value: "0".to_string(),
                expected: "a positive integer",
            });
        }

        Ok(Self {
            host,
            port,
            ping_interval: (ping_secs > 0).then(|| Duration::from_secs(ping_secs)),
            send_timeout: Duration::from_millis(send_timeout_ms),
            outgoing_buffer_size,
        })
    }

    /// Address to listen on, as `host:port`
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ping_interval: Some(Duration::from_secs(DEFAULT_PING_INTERVAL_SECS)),
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            outgoing_buffer_size: DEFAULT_OUTGOING_BUFFER_SIZE,
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            expected,
        }),
    }
}
