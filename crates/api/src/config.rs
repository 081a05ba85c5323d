//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use taller_infra::ServiceConfig;
use taller_infra::config::{DEFAULT_IDEMPOTENCY_TTL, DEFAULT_LOCK_TIMEOUT};
use taller_observability::LogFormat;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub lock_timeout: Duration,
    pub idempotency_ttl: Duration,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// `BIND_ADDR`, `LOCK_TIMEOUT_MS`, `IDEMPOTENCY_TTL_SECS`, `LOG_FORMAT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = match lookup("BIND_ADDR") {
            Some(raw) => parse("BIND_ADDR", &raw)?,
            None => parse("BIND_ADDR", DEFAULT_BIND_ADDR)?,
        };

        let lock_timeout = match lookup("LOCK_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(parse_positive("LOCK_TIMEOUT_MS", &raw)?),
            None => DEFAULT_LOCK_TIMEOUT,
        };

        let idempotency_ttl = match lookup("IDEMPOTENCY_TTL_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("IDEMPOTENCY_TTL_SECS", &raw)?),
            None => DEFAULT_IDEMPOTENCY_TTL,
        };

        let log_format = match lookup("LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(|reason| ConfigError {
                var: "LOG_FORMAT",
                reason,
            })?,
            None => LogFormat::default(),
        };

        Ok(Self {
            bind_addr,
            lock_timeout,
            idempotency_ttl,
            log_format,
        })
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            lock_timeout: self.lock_timeout,
            idempotency_ttl: self.idempotency_ttl,
        }
    }

    /// Expired idempotency entries are swept at a tenth of the TTL, at most hourly.
    pub fn idempotency_sweep_interval(&self) -> Duration {
        (self.idempotency_ttl / 10).clamp(Duration::from_secs(1), Duration::from_secs(3600))
    }
}

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        reason: format!("'{raw}': {e}"),
    })
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match parse::<u64>(var, raw)? {
        0 => Err(ConfigError {
            var,
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}
