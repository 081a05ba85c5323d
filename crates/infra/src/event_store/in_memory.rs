use std::collections::HashMap;
use std::sync::RwLock;

use taller_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

/// In-memory append-only event store.
///
/// Backs the service process; state does not survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        if events.is_empty() {
            return Ok(vec![]);
        }

        let aggregate_id = events[0].aggregate_id;
        let aggregate_type = events[0].aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let stream = streams.entry(aggregate_id).or_default();
        let current = Self::current_version(stream);

        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let mut next = current + 1;
        let mut committed = Vec::with_capacity(events.len());
        for e in events {
            let stored = StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number: next,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            };
            next += 1;
            stream.push(stored.clone());
            committed.push(stored);
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_all(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::InvalidAppend("lock poisoned".to_string()))?;

        let mut all: Vec<StoredEvent> = streams
            .values()
            .filter(|s| s.first().is_some_and(|e| e.aggregate_type == aggregate_type))
            .flat_map(|s| s.iter().cloned())
            .collect();
        all.sort_by_key(|e| (e.aggregate_id, e.sequence_number));
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn append_assigns_sequence_numbers_and_checks_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = store
            .append(vec![event(id, "sales.order"), event(id, "sales.order")], ExpectedVersion::Exact(0))
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);

        let stale = store.append(vec![event(id, "sales.order")], ExpectedVersion::Exact(1));
        assert!(matches!(stale, Err(EventStoreError::Concurrency(_))));

        store
            .append(vec![event(id, "sales.order")], ExpectedVersion::Exact(2))
            .unwrap();
        assert_eq!(store.load_stream(id).unwrap().len(), 3);
    }

    #[test]
    fn stream_type_cannot_change() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, "sales.order")], ExpectedVersion::Any)
            .unwrap();
        let res = store.append(vec![event(id, "purchasing.order")], ExpectedVersion::Any);
        assert!(matches!(res, Err(EventStoreError::AggregateTypeMismatch(_))));
    }

    #[test]
    fn load_all_filters_by_type() {
        let store = InMemoryEventStore::new();
        store
            .append(vec![event(AggregateId::new(), "sales.order")], ExpectedVersion::Any)
            .unwrap();
        store
            .append(vec![event(AggregateId::new(), "purchasing.order")], ExpectedVersion::Any)
            .unwrap();
        assert_eq!(store.load_all("sales.order").unwrap().len(), 1);
    }
}
