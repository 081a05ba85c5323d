//! Idempotency table for order actions.
//!
//! An entry maps `(resource, action, key)` to the fingerprint of the request
//! that first used the key and the result it produced. A retry with the same
//! fingerprint gets the stored result back; a different payload under the
//! same key is a conflict. Only successful results are stored.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::command_dispatcher::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub resource: String,
    pub action: String,
    pub key: String,
}

impl IdempotencyKey {
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredOutcome {
    pub fingerprint: JsonValue,
    pub result: JsonValue,
    pub stored_at: DateTime<Utc>,
}

pub trait IdempotencyStore: Send + Sync + std::fmt::Debug {
    /// Live entry for `key`; expired entries are dropped and read as absent.
    fn get(&self, key: &IdempotencyKey, now: DateTime<Utc>) -> Option<StoredOutcome>;
    fn put(&self, key: IdempotencyKey, outcome: StoredOutcome);
    /// Drop every expired entry, returning how many went.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

impl<S> IdempotencyStore for Arc<S>
where
    S: IdempotencyStore + ?Sized,
{
    fn get(&self, key: &IdempotencyKey, now: DateTime<Utc>) -> Option<StoredOutcome> {
        (**self).get(key, now)
    }

    fn put(&self, key: IdempotencyKey, outcome: StoredOutcome) {
        (**self).put(key, outcome)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        (**self).purge_expired(now)
    }
}

#[derive(Debug)]
pub struct InMemoryIdempotencyStore {
    ttl: chrono::Duration,
    entries: RwLock<HashMap<IdempotencyKey, StoredOutcome>>,
}

impl InMemoryIdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn is_expired(&self, outcome: &StoredOutcome, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(outcome.stored_at) >= self.ttl
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get(&self, key: &IdempotencyKey, now: DateTime<Utc>) -> Option<StoredOutcome> {
        {
            let map = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match map.get(key) {
                None => return None,
                Some(o) if !self.is_expired(o, now) => return Some(o.clone()),
                Some(_) => {}
            }
        }
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if map.get(key).is_some_and(|o| self.is_expired(o, now)) {
            map.remove(key);
            debug!(resource = %key.resource, action = %key.action, "idempotency entry expired");
        }
        None
    }

    fn put(&self, key: IdempotencyKey, outcome: StoredOutcome) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, outcome);
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, o| !self.is_expired(o, now));
        before - map.len()
    }
}

/// Stored result for a retried request, or `None` when the action must run.
pub fn replay<S, R>(
    store: &S,
    key: &IdempotencyKey,
    fingerprint: &JsonValue,
    now: DateTime<Utc>,
) -> Result<Option<R>, DispatchError>
where
    S: IdempotencyStore + ?Sized,
    R: DeserializeOwned,
{
    let Some(stored) = store.get(key, now) else {
        return Ok(None);
    };

    if &stored.fingerprint != fingerprint {
        warn!(
            resource = %key.resource,
            action = %key.action,
            key = %key.key,
            "idempotency key reused with a different payload"
        );
        return Err(DispatchError::Conflict(format!(
            "idempotency key '{}' was already used for a different {} request",
            key.key, key.action
        )));
    }

    debug!(resource = %key.resource, action = %key.action, key = %key.key, "replaying stored result");
    serde_json::from_value(stored.result)
        .map(Some)
        .map_err(|e| DispatchError::Deserialize(e.to_string()))
}

pub fn remember<S, R>(
    store: &S,
    key: IdempotencyKey,
    fingerprint: JsonValue,
    result: &R,
    now: DateTime<Utc>,
) -> Result<(), DispatchError>
where
    S: IdempotencyStore + ?Sized,
    R: Serialize,
{
    let result = serde_json::to_value(result).map_err(|e| DispatchError::Deserialize(e.to_string()))?;
    store.put(
        key,
        StoredOutcome {
            fingerprint,
            result,
            stored_at: now,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(k: &str) -> IdempotencyKey {
        IdempotencyKey::new("salesOrder:1", "confirm", k)
    }

    #[test]
    fn same_payload_replays_stored_result() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let now = Utc::now();
        let fp = json!({ "warehouse": "w1" });

        assert!(replay::<_, JsonValue>(&store, &key("a"), &fp, now).unwrap().is_none());
        remember(&store, key("a"), fp.clone(), &json!({ "status": "confirmada" }), now).unwrap();

        let again: Option<JsonValue> = replay(&store, &key("a"), &fp, now).unwrap();
        assert_eq!(again, Some(json!({ "status": "confirmada" })));
    }

    #[test]
    fn different_payload_is_conflict() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let now = Utc::now();
        remember(&store, key("a"), json!({ "warehouse": "w1" }), &json!(1), now).unwrap();

        let err = replay::<_, JsonValue>(&store, &key("a"), &json!({ "warehouse": "w2" }), now)
            .unwrap_err();
        assert!(matches!(err, DispatchError::Conflict(_)));
    }

    #[test]
    fn keys_are_scoped_by_action() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let now = Utc::now();
        remember(&store, key("a"), json!({}), &json!(1), now).unwrap();

        let ship = IdempotencyKey::new("salesOrder:1", "ship", "a");
        assert!(replay::<_, JsonValue>(&store, &ship, &json!({ "x": 1 }), now).unwrap().is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let store = InMemoryIdempotencyStore::new(Duration::from_secs(60));
        let t0 = Utc::now();
        remember(&store, key("a"), json!({}), &json!(1), t0).unwrap();
        remember(&store, key("b"), json!({}), &json!(2), t0 + chrono::Duration::seconds(50)).unwrap();

        let later = t0 + chrono::Duration::seconds(61);
        assert!(store.get(&key("a"), later).is_none());
        assert!(store.get(&key("b"), later).is_some());

        assert_eq!(store.purge_expired(t0 + chrono::Duration::seconds(200)), 1);
        assert!(store.get(&key("b"), t0).is_none());
    }

    #[test]
    fn poisoned_table_keeps_its_entries() {
        let store = Arc::new(InMemoryIdempotencyStore::new(Duration::from_secs(60)));
        let now = Utc::now();
        remember(store.as_ref(), key("a"), json!({}), &json!(1), now).unwrap();

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.write().unwrap();
            panic!("poison the table");
        })
        .join();
        assert!(store.entries.is_poisoned());

        assert!(store.get(&key("a"), now).is_some());
        remember(store.as_ref(), key("b"), json!({}), &json!(2), now).unwrap();
        assert!(store.get(&key("b"), now).is_some());
        assert_eq!(store.purge_expired(now + chrono::Duration::seconds(61)), 2);
    }
}
