use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("could not acquire {keys} key(s) within {waited:?}")]
pub struct LockTimeout {
    pub keys: usize,
    pub waited: Duration,
}

/// Lock table keyed by value (stock rows, orders).
///
/// A caller names every key it needs up front and gets them all at once or
/// none, so two callers can never each hold half of the other's set.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every key is free, then take them all.
    pub fn lock_all(
        &self,
        keys: impl IntoIterator<Item = K>,
        timeout: Duration,
    ) -> Result<KeyGuard<'_, K>, LockTimeout> {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + timeout;
        let mut held = self.table();
        loop {
            if keys.iter().all(|k| !held.contains(k)) {
                held.extend(keys.iter().cloned());
                return Ok(KeyGuard { locks: self, keys });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(LockTimeout {
                    keys: keys.len(),
                    waited: timeout,
                });
            }
            held = self
                .released
                .wait_timeout(held, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    pub fn is_held(&self, key: &K) -> bool {
        self.table().contains(key)
    }

    // The set only ever holds fully inserted keys, so a poisoned table is still usable.
    fn table(&self) -> MutexGuard<'_, HashSet<K>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keys held until drop.
#[derive(Debug)]
pub struct KeyGuard<'a, K>
where
    K: Eq + Hash + Ord + Clone,
{
    locks: &'a KeyedLocks<K>,
    keys: Vec<K>,
}

impl<K> KeyGuard<'_, K>
where
    K: Eq + Hash + Ord + Clone,
{
    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

impl<K> Drop for KeyGuard<'_, K>
where
    K: Eq + Hash + Ord + Clone,
{
    fn drop(&mut self) {
        let mut held = self.locks.table();
        for k in &self.keys {
            held.remove(k);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn guard_releases_on_drop() {
        let locks = KeyedLocks::new();
        {
            let guard = locks.lock_all([2, 1, 2], Duration::from_millis(10)).unwrap();
            assert_eq!(guard.keys(), &[1, 2]);
            assert!(locks.is_held(&1));
        }
        assert!(!locks.is_held(&1));
        assert!(!locks.is_held(&2));
    }

    #[test]
    fn overlapping_set_times_out() {
        let locks = KeyedLocks::new();
        let _held = locks.lock_all([1, 2], Duration::from_millis(10)).unwrap();

        let err = locks.lock_all([2, 3], Duration::from_millis(30)).unwrap_err();
        assert_eq!(err.keys, 2);
        // Failed acquisition takes nothing.
        assert!(!locks.is_held(&3));

        // Disjoint keys are independent.
        assert!(locks.lock_all([3], Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn waiters_wake_when_keys_are_released() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                std::thread::spawn(move || {
                    let _g = locks.lock_all(["row"], Duration::from_secs(5)).unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
