//! Typed configuration for the in-process services.

use std::time::Duration;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Upper bound on waiting for order and stock-row locks.
    pub lock_timeout: Duration,
    /// How long a stored action result answers retries with the same key.
    pub idempotency_ttl: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            idempotency_ttl: DEFAULT_IDEMPOTENCY_TTL,
        }
    }
}
