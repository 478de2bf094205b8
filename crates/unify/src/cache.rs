//! Capacity-bounded LRU of normalization outcomes.
//!
//! Passed explicitly into a run and shared by all collection workers.
//! Normalization is pure, so a hit returns exactly what a miss would compute.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;

use crate::model::{ComparisonKey, InvalidRecord};

type CacheKey = (String, String);
type Outcome = Result<ComparisonKey, InvalidRecord>;

pub struct KeyCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, (Outcome, u64)>,
    /// last-use tick -> key, oldest first
    recency: BTreeMap<u64, CacheKey>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

impl KeyCache {
    /// `capacity == 0` disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            len: inner.entries.len(),
            capacity: self.capacity,
        }
    }

    /// Cached outcome for `(collection_id, display_name)`, computing it with
    /// `compute` on a miss. `compute` runs without the lock held.
    pub fn get_or_insert_with<F>(&self, collection_id: &str, display_name: &str, compute: F) -> Outcome
    where
        F: FnOnce() -> Outcome,
    {
        if self.capacity == 0 {
            return compute();
        }

        let key = (collection_id.to_string(), display_name.to_string());
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.tick += 1;
            let tick = inner.tick;
            if let Some((outcome, last_used)) = inner.entries.get_mut(&key) {
                let outcome = outcome.clone();
                let previous = std::mem::replace(last_used, tick);
                inner.recency.remove(&previous);
                inner.recency.insert(tick, key);
                inner.hits += 1;
                return outcome;
            }
            inner.misses += 1;
        }

        let outcome = compute();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.tick += 1;
        let tick = inner.tick;
        if let Some((_, previous)) = inner.entries.insert(key.clone(), (outcome.clone(), tick)) {
            // another worker filled it while we were computing
            inner.recency.remove(&previous);
        }
        inner.recency.insert(tick, key);
        while inner.entries.len() > self.capacity {
            match inner.recency.pop_first() {
                Some((_, oldest)) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        outcome
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("KeyCache")
            .field("capacity", &stats.capacity)
            .field("len", &stats.len)
            .field("hits", &stats.hits)
            .field("misses", &stats.misses)
            .finish()
    }
}
