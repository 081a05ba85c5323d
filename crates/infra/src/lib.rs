//! Infrastructure layer: inventory ledger, order event store, idempotency,
//! read models and the order workflows built on them.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod idempotency;
pub mod ledger;
pub mod projections;
pub mod read_model;
pub mod workflows;

pub use config::ServiceConfig;
pub use workflows::InventoryServices;

#[cfg(test)]
mod integration_tests;
