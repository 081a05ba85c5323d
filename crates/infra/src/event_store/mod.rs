//! Append-only event store boundary.
//!
//! Purchase and sales orders are stored as event streams; this module defines
//! the storage abstraction and its in-memory implementation.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
