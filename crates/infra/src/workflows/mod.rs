//! Order workflows: the services the API calls.
//!
//! Every order action runs as one critical section under the order's key:
//!
//! ```text
//! lock order -> idempotency replay? -> decide -> ledger transaction {
//!     stock effects, append events
//! } -> update read model -> remember result
//! ```

pub mod purchasing;
pub mod sales;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

use taller_core::{AggregateId, DomainError};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::config::ServiceConfig;
use crate::event_store::{InMemoryEventStore, StoredEvent};
use crate::idempotency::{self, IdempotencyKey, IdempotencyStore, InMemoryIdempotencyStore};
use crate::ledger::{KeyGuard, KeyedLocks, Ledger};
use crate::read_model::InMemoryReadStore;

pub use purchasing::{NewPurchaseOrder, PurchaseOrderFilter, PurchaseOrderService};
pub use sales::{NewSalesOrder, SalesOrderFilter, SalesOrderService};

pub type OrderEventStore = Arc<InMemoryEventStore>;
pub type OrderDispatcher = CommandDispatcher<OrderEventStore>;

/// State shared by the order services.
#[derive(Debug)]
pub struct OrderContext {
    pub dispatcher: OrderDispatcher,
    pub ledger: Arc<Ledger>,
    pub idempotency: Arc<dyn IdempotencyStore>,
    order_locks: KeyedLocks<AggregateId>,
    config: ServiceConfig,
}

impl OrderContext {
    pub fn new(
        store: OrderEventStore,
        ledger: Arc<Ledger>,
        idempotency: Arc<dyn IdempotencyStore>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store),
            ledger,
            idempotency,
            order_locks: KeyedLocks::new(),
            config,
        }
    }

    pub(crate) fn lock_order(&self, order: AggregateId) -> Result<KeyGuard<'_, AggregateId>, DispatchError> {
        Ok(self.order_locks.lock_all([order], self.config.lock_timeout)?)
    }

    pub(crate) fn replay<R: DeserializeOwned>(
        &self,
        key: &IdempotencyKey,
        fingerprint: &JsonValue,
    ) -> Result<Option<R>, DispatchError> {
        idempotency::replay(self.idempotency.as_ref(), key, fingerprint, Utc::now())
    }

    /// Store the result of a committed action. Failures are logged, not returned.
    pub(crate) fn remember<R: Serialize>(&self, key: IdempotencyKey, fingerprint: JsonValue, result: &R) {
        if let Err(e) =
            idempotency::remember(self.idempotency.as_ref(), key.clone(), fingerprint, result, Utc::now())
        {
            warn!(
                resource = %key.resource,
                action = %key.action,
                key = %key.key,
                error = %e,
                "could not store idempotent result"
            );
        }
    }
}

pub(crate) fn require_key(key: &str) -> Result<(), DispatchError> {
    if key.trim().is_empty() {
        return Err(DomainError::validation("idempotencyKey is required").into());
    }
    Ok(())
}

pub(crate) fn fingerprint<T: Serialize>(request: &T) -> Result<JsonValue, DispatchError> {
    serde_json::to_value(request).map_err(|e| DispatchError::Deserialize(e.to_string()))
}

pub(crate) fn envelopes(events: &[StoredEvent]) -> impl Iterator<Item = taller_events::EventEnvelope<JsonValue>> + '_ {
    events.iter().map(StoredEvent::to_envelope)
}

/// Everything the API needs, wired in memory.
#[derive(Debug, Clone)]
pub struct InventoryServices {
    pub config: ServiceConfig,
    pub ledger: Arc<Ledger>,
    pub purchasing: Arc<PurchaseOrderService>,
    pub sales: Arc<SalesOrderService>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

impl InventoryServices {
    pub fn in_memory(config: ServiceConfig) -> Self {
        let ledger = Arc::new(Ledger::new(config));
        let idempotency: Arc<dyn IdempotencyStore> =
            Arc::new(InMemoryIdempotencyStore::new(config.idempotency_ttl));

        let store: OrderEventStore = Arc::new(InMemoryEventStore::new());

        let purchase_ctx =
            OrderContext::new(store.clone(), ledger.clone(), idempotency.clone(), config);
        let sales_ctx = OrderContext::new(store, ledger.clone(), idempotency.clone(), config);

        Self {
            config,
            purchasing: Arc::new(PurchaseOrderService::new(
                purchase_ctx,
                Arc::new(InMemoryReadStore::new()),
            )),
            sales: Arc::new(SalesOrderService::new(sales_ctx, Arc::new(InMemoryReadStore::new()))),
            ledger,
            idempotency,
        }
    }
}
