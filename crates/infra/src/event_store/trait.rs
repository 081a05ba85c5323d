use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use std::sync::Arc;
use taller_core::{AggregateId, ExpectedVersion};

/// An event ready to be appended to a stream (not yet assigned a sequence number).
///
/// ## Event Lifecycle
///
/// 1. **Domain event**: created by the aggregate's `handle()` method
/// 2. **UncommittedEvent**: wrapped with stream metadata (aggregate_id, aggregate_type)
/// 3. **StoredEvent**: persisted with an assigned sequence_number
/// 4. **EventEnvelope**: handed to projections
///
/// Use `UncommittedEvent::from_typed()` to build one from a typed domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

/// A stored event in an append-only stream (assigned a sequence number).
///
/// Sequence numbers are assigned during append, start at 1 and grow by one per
/// event within a stream. The last one is the stream version used for
/// optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: Uuid,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,

    /// Monotonically increasing position in the aggregate stream.
    pub sequence_number: u64,

    pub event_type: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    pub fn stream_version(&self) -> u64 {
        self.sequence_number
    }

    /// Convert a stored event into an envelope for projections.
    pub fn to_envelope(&self) -> taller_events::EventEnvelope<JsonValue> {
        taller_events::EventEnvelope::new(
            self.event_id,
            self.aggregate_id,
            self.aggregate_type.clone(),
            self.sequence_number,
            self.payload.clone(),
        )
    }
}

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants, transitions).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("aggregate type mismatch: {0}")]
    AggregateTypeMismatch(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),
}

/// Append-only event store, one stream per aggregate instance.
///
/// `append()`:
/// - requires every event of a batch to target the same aggregate
/// - checks optimistic concurrency against the current stream version
/// - assigns sequence numbers starting at `current_version + 1`
/// - persists the batch atomically
///
/// `load_stream()` returns the stream in sequence order, or an empty vector
/// when the aggregate has never been created.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError>;

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError>;

    /// Every stored event of the given aggregate type, ordered by stream then sequence.
    fn load_all(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_stream(aggregate_id)
    }

    fn load_all(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        (**self).load_all(aggregate_type)
    }
}

impl UncommittedEvent {
    /// Build from a typed domain event, capturing the metadata needed to
    /// deserialize it again on rehydration.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_id: Uuid,
        event: &E,
    ) -> Result<Self, EventStoreError>
    where
        E: taller_events::Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| {
            EventStoreError::InvalidAppend(format!("payload serialization failed: {e}"))
        })?;

        Ok(Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event.event_type().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}
