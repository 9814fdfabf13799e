//! # Coordinate LRU Cache
//!
//! A least-recently-used cache keyed by rounded coordinates.
//! Backs [`crate::elevation::CachedSource`] so that repeated reference
//! lookups around the same spot (stops, loops, repeated laps) are answered
//! from memory.

use std::collections::HashMap;

/// Coordinates rounded to a fixed number of decimals.
///
/// Five decimals is roughly one meter, well below the resolution of any
/// reference elevation dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoordKey {
    lat: i64,
    lon: i64,
}

impl CoordKey {
    pub fn new(latitude: f64, longitude: f64, decimals: u32) -> Self {
        let scale = 10f64.powi(decimals as i32);
        Self {
            lat: (latitude * scale).round() as i64,
            lon: (longitude * scale).round() as i64,
        }
    }
}

/// Hit/miss counters of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// LRU cache with O(n) eviction.
///
/// Capacities are a few thousand entries, so a linear scan on eviction is
/// acceptable and simpler than maintaining a linked list.
#[derive(Debug)]
pub struct LruCache<V> {
    capacity: usize,
    entries: HashMap<CoordKey, CacheEntry<V>>,
    access_counter: u64,
    hits: u64,
    misses: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    last_access: u64,
}

impl<V: Clone> LruCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a value, refreshing its access time.
    pub fn get(&mut self, key: &CoordKey) -> Option<V> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.access_counter += 1;
                entry.last_access = self.access_counter;
                self.hits += 1;
                Some(entry.value.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Insert a value, evicting the least recently used entry when full.
    pub fn insert(&mut self, key: CoordKey, value: V) {
        self.access_counter += 1;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.last_access = self.access_counter;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value,
                last_access: self.access_counter,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_counter = 0;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            entries: self.entries.len(),
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(k, _)| *k);

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

impl<V: Clone> Default for LruCache<V> {
    fn default() -> Self {
        Self::new(4096)
    }
}
