//! Deferred-admission filter (§4.G): when the cache is not sparse, a
//! fingerprint must be sighted twice, at least `deferredDelay` ms apart,
//! before it is admitted for real caching.

use std::sync::Arc;

use dashmap::DashMap;

use super::fingerprint::Fingerprint;

/// Whether [`DeferredAdmissionFilter::probe`] allows caching to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Defer,
}

/// Fingerprint-identity → first-seen timestamp (ms). Bounded,
/// approximately-LRU: `dashmap`'s lightly-striped shards give the
/// lock-free-ish concurrent access §5 calls for, at the cost of true LRU
/// ordering — eviction under pressure picks an arbitrary entry from a
/// shard rather than the globally oldest one, which is the
/// "approximately" in "approximately-LRU".
pub struct DeferredAdmissionFilter {
    first_seen: Arc<DashMap<u64, u64>>,
    capacity: usize,
    deferred_delay_ms: u64,
}

impl DeferredAdmissionFilter {
    pub fn new(capacity: usize, deferred_delay_ms: u64) -> Self {
        DeferredAdmissionFilter { first_seen: Arc::new(DashMap::with_capacity(capacity)), capacity, deferred_delay_ms }
    }

    /// Probes `fingerprint` at `now_ms`. Identity is taken from the
    /// fingerprint's `Hash`/`Eq` impl via a stable hash, since the map
    /// only needs fingerprint *identity*, not the fingerprint itself.
    pub fn probe<F: Fingerprint>(&self, fingerprint: &F, now_ms: u64) -> Admission {
        let key = identity_hash(fingerprint);
        match self.first_seen.get(&key) {
            None => {
                self.evict_if_full();
                self.first_seen.insert(key, now_ms);
                Admission::Defer
            }
            Some(first_seen) => {
                if now_ms < *first_seen + self.deferred_delay_ms {
                    Admission::Defer
                } else {
                    drop(first_seen);
                    self.first_seen.remove(&key);
                    Admission::Admit
                }
            }
        }
    }

    fn evict_if_full(&self) {
        if self.first_seen.len() < self.capacity {
            return;
        }
        if let Some(entry) = self.first_seen.iter().next() {
            let key = *entry.key();
            drop(entry);
            self.first_seen.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
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
    fn first_sighting_is_never_admitted() {
        let filter = DeferredAdmissionFilter::new(100, 500);
        let fp = FakeFingerprint::new(1, true, 0);
        assert_eq!(filter.probe(&fp, 0), Admission::Defer);
        assert_eq!(filter.probe(&fp, 200), Admission::Defer);
    }

    #[test]
    fn admits_once_delay_elapses() {
        let filter = DeferredAdmissionFilter::new(100, 500);
        let fp = FakeFingerprint::new(1, true, 0);
        assert_eq!(filter.probe(&fp, 0), Admission::Defer);
        assert_eq!(filter.probe(&fp, 200), Admission::Defer);
        assert_eq!(filter.probe(&fp, 600), Admission::Admit);
    }

    #[test]
    fn admitted_entry_is_forgotten_so_it_wont_re_defer() {
        let filter = DeferredAdmissionFilter::new(100, 500);
        let fp = FakeFingerprint::new(1, true, 0);
        filter.probe(&fp, 0);
        assert_eq!(filter.probe(&fp, 600), Admission::Admit);
        assert!(filter.is_empty());
    }
}
