//! Counts sub-cache (§3 "Counts sub-cache"): fingerprint-identity → i64
//! cardinality, bounded, independent of the full-iterable cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::fingerprint::Fingerprint;

pub struct CountsCache {
    entries: Arc<DashMap<u64, i64>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CountsCache {
    pub fn new(capacity: usize) -> Self {
        CountsCache { entries: Arc::new(DashMap::with_capacity(capacity)), capacity, hits: AtomicU64::new(0), misses: AtomicU64::new(0) }
    }

    pub fn get<F: Fingerprint>(&self, fingerprint: &F) -> Option<i64> {
        let key = identity_hash(fingerprint);
        match self.entries.get(&key) {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(*v)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set<F: Fingerprint>(&self, fingerprint: &F, count: i64) {
        let key = identity_hash(fingerprint);
        if self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            if let Some(entry) = self.entries.iter().next() {
                let evict_key = *entry.key();
                drop(entry);
                self.entries.remove(&evict_key);
            }
        }
        self.entries.insert(key, count);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Cumulative hit rate in `[0.0, 1.0]`, `0.0` with no observations
    /// yet. Unlike the full-iterable cache's decayed estimate, the counts
    /// cache has no generation to carry a smoothed value across, so this
    /// is a plain ratio over all lookups since construction.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn identity_hash<F: Fingerprint>(fingerprint: &F) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    fingerprint.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::test_support::FakeFingerprint;

    #[test]
    fn set_then_get_hits_distinct_key_misses() {
        let cache = CountsCache::new(10);
        let h = FakeFingerprint::new(1, true, 0);
        let h_other = FakeFingerprint::new(2, true, 0);

        cache.set(&h, 42);
        assert_eq!(cache.get(&h), Some(42));
        assert_eq!(cache.get(&h_other), None);

        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn hit_rate_is_zero_with_no_observations_then_tracks_ratio() {
        let cache = CountsCache::new(10);
        assert_eq!(cache.hit_rate(), 0.0);

        let h = FakeFingerprint::new(1, true, 0);
        cache.set(&h, 42);
        cache.get(&h);
        cache.get(&h);
        cache.get(&FakeFingerprint::new(2, true, 0));
        assert!((cache.hit_rate() - (2.0 / 3.0)).abs() < 1e-9);
    }
}
