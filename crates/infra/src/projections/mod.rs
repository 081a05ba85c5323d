//! Order read models built from committed event envelopes.
//!
//! Projections are rebuildable from the event store and idempotent: each
//! keeps a per-stream cursor and ignores envelopes at or below it.

pub mod purchasing;
pub mod sales_orders;

use thiserror::Error;

use crate::command_dispatcher::DispatchError;

pub use purchasing::{PURCHASE_ORDER_AGGREGATE, PurchaseOrderReadModel, PurchaseOrdersProjection};
pub use sales_orders::{SALES_ORDER_AGGREGATE, SalesOrderReadModel, SalesOrdersProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize order event: {0}")]
    Deserialize(String),
    #[error("event does not belong to its stream: {0}")]
    StreamMismatch(String),
    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
    #[error("no read model for {0}")]
    MissingRecord(String),
}

impl From<ProjectionError> for DispatchError {
    fn from(value: ProjectionError) -> Self {
        DispatchError::Projection(value.to_string())
    }
}
