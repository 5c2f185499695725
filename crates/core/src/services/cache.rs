use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// A bounded TTL cache meant to be injected into request handlers, in
/// place of ad hoc module-global maps. Entries expire after `ttl`; when
/// the cache is full the oldest entry is evicted.
///
/// Interior mutability so handlers can share one instance behind an `Arc`.
pub struct BoundedCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    capacity: usize,
    ttl: Duration,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// `capacity` must be at least 1.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Get a live entry, dropping it if it has expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Insert or replace. At capacity, the oldest entry goes first.
    pub fn insert(&self, key: K, value: V) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            // Expired entries are better victims than live ones.
            entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.inserted_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest_key) = oldest {
                    entries.remove(&oldest_key);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
