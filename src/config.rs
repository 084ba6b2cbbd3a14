//! Server configuration loaded from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::api::broadcaster::DEFAULT_MAILBOX_CAPACITY;
use crate::api::state::DEFAULT_KEEPALIVE;

/// Errors raised while reading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub host: String,
    pub port: u16,
    /// Pending events each subscriber may hold before it is evicted
    pub mailbox_capacity: usize,
    /// Idle interval before a keepalive comment is sent
    pub keepalive: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment:
    /// - `TERMINAL_SYNC_HOST` - bind address (default `0.0.0.0`)
    /// - `TERMINAL_SYNC_PORT` - TCP port (default 8000)
    /// - `TERMINAL_SYNC_MAILBOX_CAPACITY` - per-subscriber mailbox size (default 5)
    /// - `TERMINAL_SYNC_KEEPALIVE_SECS` - idle keepalive interval (default 30)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("TERMINAL_SYNC_HOST").unwrap_or(defaults.host);
        let port = parse_or("TERMINAL_SYNC_PORT", &lookup, defaults.port)?;

        let mailbox_capacity: usize = parse_or(
            "TERMINAL_SYNC_MAILBOX_CAPACITY",
            &lookup,
            defaults.mailbox_capacity,
        )?;
        if mailbox_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "TERMINAL_SYNC_MAILBOX_CAPACITY",
                reason: "must be at least 1".to_string(),
            });
        }

        let keepalive_secs: u64 = parse_or(
            "TERMINAL_SYNC_KEEPALIVE_SECS",
            &lookup,
            defaults.keepalive.as_secs(),
        )?;
        if keepalive_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "TERMINAL_SYNC_KEEPALIVE_SECS",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            mailbox_capacity,
            keepalive: Duration::from_secs(keepalive_secs),
        })
    }

    /// Socket address to bind
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid {
                name: "TERMINAL_SYNC_HOST",
                reason: format!("{e}"),
            })
    }
}

fn parse_or<T, F>(name: &'static str, lookup: &F, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{raw:?}: {e}"),
        }),
        None => Ok(default),
    }
}
