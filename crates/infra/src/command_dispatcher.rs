//! Command execution pipeline for the event-sourced order aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load events from store
//!   ↓
//! 2. Rehydrate aggregate (apply historical events to rebuild state)
//!   ↓
//! 3. Handle command (pure decision logic, produces events)
//!   ↓
//! 4. (optional) Run the ledger effect the events describe
//!   ↓
//! 5. Persist events to store (append-only, optimistic concurrency check)
//! ```
//!
//! Steps 1-3 produce a [`Decision`]; step 5 is [`CommandDispatcher::commit`].
//! Workflows that touch stock call `commit` from inside a ledger transaction,
//! so the staged stock changes are only written once the append succeeded.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

use taller_core::{Aggregate, AggregateId, DomainError, ExpectedVersion, ItemId, WarehouseId};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
use crate::ledger::LockTimeout;

/// Infrastructure-level failure of a service operation.
///
/// Domain errors are carried over variant by variant so the API can map each
/// one to its own status code.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Optimistic concurrency failure (stale aggregate version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate names, reused idempotency keys, order-owned reservations.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error(
        "insufficient stock for item {item} in warehouse {warehouse}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        item: ItemId,
        warehouse: WarehouseId,
        requested: i64,
        available: i64,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A keyed lock could not be acquired within the configured timeout.
    #[error("lock timeout: {0}")]
    LockTimeout(String),

    /// Failed to deserialize historical event payloads into the aggregate event type.
    #[error("failed to deserialize stored payload: {0}")]
    Deserialize(String),

    /// A read model could not apply a committed event.
    #[error("projection failed: {0}")]
    Projection(String),

    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
            DomainError::NotFound(what) => DispatchError::NotFound(what),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::InsufficientStock {
                item,
                warehouse,
                requested,
                available,
            } => DispatchError::InsufficientStock {
                item,
                warehouse,
                requested,
                available,
            },
            DomainError::InvalidTransition(msg) => DispatchError::InvalidTransition(msg),
        }
    }
}

impl From<LockTimeout> for DispatchError {
    fn from(value: LockTimeout) -> Self {
        DispatchError::LockTimeout(value.to_string())
    }
}

/// Events decided for an aggregate, not yet persisted.
#[derive(Debug)]
pub struct Decision<A: Aggregate> {
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// State the decision was made on (history applied, new events not).
    pub aggregate: A,
    pub events: Vec<A::Event>,
    expected: ExpectedVersion,
}

/// Outcome of a committed decision.
#[derive(Debug)]
pub struct Dispatched<A> {
    pub committed: Vec<StoredEvent>,
    /// State after the committed events were applied.
    pub aggregate: A,
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// Aggregates used here must be deterministic and side-effect free, and track
/// their version in `apply()`.
#[derive(Debug)]
pub struct CommandDispatcher<S> {
    store: S,
}

impl<S> CommandDispatcher<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> CommandDispatcher<S>
where
    S: EventStore,
{
    /// Load and rehydrate an aggregate without handling anything.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        ensure_stream_type(aggregate_id, aggregate_type, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Steps 1-3: load, rehydrate and decide.
    ///
    /// `make_command` sees the rehydrated aggregate, which lets callers derive
    /// command inputs (such as one fresh id per order line) from current state.
    pub fn decide_with<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
        make_command: impl FnOnce(&A) -> A::Command,
    ) -> Result<Decision<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        let aggregate_type = aggregate_type.into();
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;
        ensure_stream_type(aggregate_id, &aggregate_type, &history)?;
        let expected = ExpectedVersion::Exact(stream_version(&history));

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history::<A>(&mut aggregate, &history)?;

        let command = make_command(&aggregate);
        let events = aggregate.handle(&command).map_err(DispatchError::from)?;

        Ok(Decision {
            aggregate_id,
            aggregate_type,
            aggregate,
            events,
            expected,
        })
    }

    pub fn decide<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
        command: A::Command,
    ) -> Result<Decision<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: DeserializeOwned,
    {
        self.decide_with(aggregate_id, aggregate_type, make_aggregate, move |_| command)
    }

    /// Step 5: append the decided events and evolve the aggregate.
    pub fn commit<A>(&self, decision: Decision<A>) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: taller_events::Event + Serialize,
    {
        let Decision {
            aggregate_id,
            aggregate_type,
            mut aggregate,
            events,
            expected,
        } = decision;

        if events.is_empty() {
            return Ok(Dispatched {
                committed: vec![],
                aggregate,
            });
        }

        let uncommitted = events
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    aggregate_id,
                    aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for ev in &events {
            aggregate.apply(ev);
        }

        Ok(Dispatched {
            committed,
            aggregate,
        })
    }

    /// Decide and commit in one go, for commands without ledger effects.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: taller_events::Event + Serialize + DeserializeOwned,
    {
        let decision = self.decide(aggregate_id, aggregate_type, make_aggregate, command)?;
        self.commit(decision)
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number == 0 || e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

/// A stream written by another aggregate type reads as missing.
fn ensure_stream_type(
    aggregate_id: AggregateId,
    aggregate_type: &str,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    match stream.first() {
        Some(first) if first.aggregate_type != aggregate_type => Err(DispatchError::NotFound(
            format!("{aggregate_type} {aggregate_id}"),
        )),
        _ => Ok(()),
    }
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    let mut sorted = history.to_vec();
    sorted.sort_by_key(|e| e.sequence_number);

    for stored in sorted {
        let ev: A::Event = serde_json::from_value(stored.payload)
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
