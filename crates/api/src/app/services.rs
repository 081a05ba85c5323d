//! Wiring between the HTTP layer and the in-process inventory services.
//!
//! Every service call can wait on keyed locks, so handlers run it on the
//! blocking pool instead of an async worker.

use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::debug;

use taller_infra::command_dispatcher::DispatchError;
use taller_infra::idempotency::IdempotencyStore;
use taller_infra::{InventoryServices, ServiceConfig};

use crate::app::errors::ApiError;

#[derive(Debug, Clone)]
pub struct AppServices {
    inner: InventoryServices,
}

impl AppServices {
    pub fn new(inner: InventoryServices) -> Self {
        Self { inner }
    }

    pub fn in_memory(config: ServiceConfig) -> Self {
        Self::new(InventoryServices::in_memory(config))
    }

    pub fn inventory(&self) -> &InventoryServices {
        &self.inner
    }

    /// Run `f` against the services on the blocking pool.
    pub async fn run<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&InventoryServices) -> Result<T, DispatchError> + Send + 'static,
        T: Send + 'static,
    {
        let services = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&services))
            .await
            .map_err(|e| ApiError::Internal(format!("worker failed: {e}")))?
            .map_err(ApiError::from)
    }

    /// Periodically drop expired idempotency entries.
    pub fn spawn_idempotency_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let store = self.inner.idempotency.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = store.purge_expired(Utc::now());
                if purged > 0 {
                    debug!(purged, "expired idempotency entries purged");
                }
            }
        })
    }
}
