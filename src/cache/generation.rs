//! Cache adapter generation (§3 "Cache adapter", §4.F, §5).
//!
//! A generation is a versioned, effectively-immutable snapshot of the
//! full-iterable cache. Mutation never happens in place: inserting or
//! removing an entry builds a *new* generation, and the shared reference
//! is advanced only by [`GenerationSlot::compare_and_set`] — the single
//! admission point for swapping generations (§4.F).

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::fingerprint::Fingerprint;
use super::policy::QueryCancellingPolicy;

/// A materialised query result plus the fingerprint it was built from.
/// Holds no mutable external references, per §3: it becomes expired when
/// `fingerprint.is_expired()` reports so.
#[derive(Clone)]
pub struct CachedIterable<F: Fingerprint, V: Clone + Send + Sync> {
    pub fingerprint: F,
    pub value: V,
}

impl<F: Fingerprint, V: Clone + Send + Sync> CachedIterable<F, V> {
    pub fn new(fingerprint: F, value: V) -> Self {
        CachedIterable { fingerprint, value }
    }

    pub fn is_expired(&self) -> bool {
        self.fingerprint.is_expired()
    }
}

/// One versioned snapshot of the full-iterable cache.
pub struct CacheAdapterGeneration<F: Fingerprint, V: Clone + Send + Sync> {
    version: u64,
    capacity: usize,
    entries: HashMap<F, CachedIterable<F, V>>,
    /// Exponentially decayed hit-rate estimate in `[0.0, 1.0]`, advanced
    /// by [`Self::adjust_hit_rate`] on the shared periodic timer (§5).
    hit_rate: f64,
}

impl<F: Fingerprint, V: Clone + Send + Sync> CacheAdapterGeneration<F, V> {
    pub fn empty(capacity: usize) -> Self {
        CacheAdapterGeneration { version: 0, capacity, entries: HashMap::new(), hit_rate: 0.0 }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hit_rate(&self) -> f64 {
        self.hit_rate
    }

    /// True while the fill factor is low enough to admit new entries
    /// without deferral — below 75% fill (§11's resolution of this
    /// spec-left-open formula).
    pub fn is_sparse(&self) -> bool {
        self.entries.len() * 4 < self.capacity * 3
    }

    pub fn get(&self, fingerprint: &F) -> Option<&CachedIterable<F, V>> {
        self.entries.get(fingerprint)
    }

    /// Builds the next generation with `entry` inserted, evicting an
    /// arbitrary existing entry first if this would exceed capacity
    /// (bounded approximate cache, §3 "Deferred-iterable map" applies the
    /// same bound to the full cache).
    pub fn with_inserted(&self, entry: CachedIterable<F, V>) -> Self {
        let mut entries = self.entries.clone();
        if entries.len() >= self.capacity && !entries.contains_key(&entry.fingerprint) {
            if let Some(k) = entries.keys().next().cloned() {
                entries.remove(&k);
            }
        }
        entries.insert(entry.fingerprint.clone(), entry);
        CacheAdapterGeneration { version: self.version + 1, capacity: self.capacity, entries, hit_rate: self.hit_rate }
    }

    pub fn with_removed(&self, fingerprint: &F) -> Self {
        let mut entries = self.entries.clone();
        entries.remove(fingerprint);
        CacheAdapterGeneration { version: self.version + 1, capacity: self.capacity, entries, hit_rate: self.hit_rate }
    }

    /// Recomputes `hit_rate` given a window's raw hit/miss counts.
    pub fn with_adjusted_hit_rate(&self, hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        let observed = if total == 0 { self.hit_rate } else { hits as f64 / total as f64 };
        // Exponential decay: weight the new observation at 0.2, matching
        // a conventional slow-moving estimator for a cache that is read
        // far more often than it is resized.
        const DECAY: f64 = 0.2;
        let hit_rate = self.hit_rate * (1.0 - DECAY) + observed * DECAY;
        CacheAdapterGeneration {
            version: self.version,
            capacity: self.capacity,
            entries: self.entries.clone(),
            hit_rate,
        }
    }
}

/// The shared, swappable reference to the current generation.
///
/// `compare_and_set` is the only admission point for installing a new
/// generation (§4.F): it succeeds iff the slot still holds exactly the
/// `Arc` the caller read earlier, matched by pointer identity rather than
/// by value, mirroring a CAS on a plain reference.
pub struct GenerationSlot<F: Fingerprint, V: Clone + Send + Sync> {
    current: Mutex<Arc<CacheAdapterGeneration<F, V>>>,
    /// Policies pinned to some earlier generation, notified on every
    /// successful swap so an in-flight job can observe
    /// `current_cache_generation` diverge from what it captured, without
    /// polling this slot itself (§4.E adapter-obsolescence detection).
    /// Held weakly: a finished job's policy is simply dropped here rather
    /// than unregistered.
    outstanding_policies: Mutex<Vec<Weak<QueryCancellingPolicy>>>,
}

impl<F: Fingerprint, V: Clone + Send + Sync> GenerationSlot<F, V> {
    pub fn new(initial: CacheAdapterGeneration<F, V>) -> Self {
        GenerationSlot { current: Mutex::new(Arc::new(initial)), outstanding_policies: Mutex::new(Vec::new()) }
    }

    /// A snapshot of the currently installed generation. Any transaction
    /// opened after this call sees this generation (or a later one) per
    /// IV-8; a transaction that already captured an earlier snapshot
    /// keeps reading it until it commits or reverts.
    pub fn current(&self) -> Arc<CacheAdapterGeneration<F, V>> {
        self.current.lock().clone()
    }

    /// The current generation's own version number. Shared with
    /// [`CacheAdapterGeneration::version`] rather than kept as a separate
    /// counter, so a pure hit-rate recalibration (which preserves the
    /// generation's version) never looks like content changed underneath
    /// an in-flight job.
    pub fn current_version(&self) -> u64 {
        self.current().version()
    }

    /// Registers `policy` to be notified of every later generation swap
    /// that changes this slot's version. Call this once, right after
    /// building a policy off a freshly-opened transaction's local
    /// generation.
    pub fn register_policy(&self, policy: &Arc<QueryCancellingPolicy>) {
        let mut policies = self.outstanding_policies.lock();
        policies.retain(|weak| weak.strong_count() > 0);
        policies.push(Arc::downgrade(policy));
    }

    /// Succeeds iff the slot still holds exactly `old`. On success,
    /// notifies every still-live registered policy of the new version
    /// (§4.E), so a consistent job pinned to `old` can observe the swap
    /// and cancel itself.
    pub fn compare_and_set(&self, old: &Arc<CacheAdapterGeneration<F, V>>, new: CacheAdapterGeneration<F, V>) -> bool {
        let mut guard = self.current.lock();
        if !Arc::ptr_eq(&*guard, old) {
            return false;
        }
        let new_version = new.version();
        *guard = Arc::new(new);
        drop(guard);

        let mut policies = self.outstanding_policies.lock();
        policies.retain(|weak| match weak.upgrade() {
            Some(policy) => {
                policy.notify_generation(new_version);
                true
            }
            None => false,
        });
        true
    }
}

/// A transaction's read-only local view of the full-iterable cache: a
/// pinned generation snapshot plus a set of fingerprints this
/// transaction has locally evicted because it observed them expired
/// (§4.F: "on expiry, evict the entry locally").
pub struct LocalCacheView<F: Fingerprint, V: Clone + Send + Sync> {
    generation: Arc<CacheAdapterGeneration<F, V>>,
    locally_evicted: Mutex<std::collections::HashSet<F>>,
}

impl<F: Fingerprint, V: Clone + Send + Sync> LocalCacheView<F, V> {
    pub fn new(generation: Arc<CacheAdapterGeneration<F, V>>) -> Self {
        LocalCacheView { generation, locally_evicted: Mutex::new(std::collections::HashSet::new()) }
    }

    pub fn generation(&self) -> &Arc<CacheAdapterGeneration<F, V>> {
        &self.generation
    }

    pub fn is_sparse(&self) -> bool {
        self.generation.is_sparse()
    }

    /// Looks up `fingerprint`. Returns `None` if locally evicted, absent,
    /// or present-but-expired (expiry evicts it locally as a side
    /// effect).
    pub fn get(&self, fingerprint: &F) -> Option<CachedIterable<F, V>> {
        if self.locally_evicted.lock().contains(fingerprint) {
            return None;
        }
        match self.generation.get(fingerprint) {
            Some(cached) if cached.is_expired() => {
                self.locally_evicted.lock().insert(fingerprint.clone());
                None
            }
            Some(cached) => Some(cached.clone()),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::test_support::FakeFingerprint;

    #[test]
    fn compare_and_set_succeeds_only_against_current() {
        let slot = GenerationSlot::<FakeFingerprint, u64>::new(CacheAdapterGeneration::empty(10));
        let old = slot.current();
        let g2 = old.with_inserted(CachedIterable::new(FakeFingerprint::new(1, true, 0), 42));
        assert!(slot.compare_and_set(&old, g2));

        // old is now stale; a second CAS against it must fail.
        let g3 = slot.current().with_inserted(CachedIterable::new(FakeFingerprint::new(2, true, 0), 7));
        assert!(!slot.compare_and_set(&old, g3));
    }

    #[test]
    fn registered_policy_is_notified_on_swap_and_dropped_policy_is_pruned() {
        let slot = GenerationSlot::<FakeFingerprint, u64>::new(CacheAdapterGeneration::empty(10));
        let policy = Arc::new(QueryCancellingPolicy::new(true, 0, 10_000, 1_000, slot.current_version()));
        slot.register_policy(&policy);

        let old = slot.current();
        let g2 = old.with_inserted(CachedIterable::new(FakeFingerprint::new(1, true, 0), 42));
        assert!(slot.compare_and_set(&old, g2));

        assert!(policy.do_cancel(10).is_err());

        // A policy whose Arc has since been dropped is pruned on the next
        // swap rather than kept alive forever.
        drop(policy);
        assert_eq!(slot.outstanding_policies.lock().len(), 1);
        let old2 = slot.current();
        let g3 = old2.with_inserted(CachedIterable::new(FakeFingerprint::new(2, true, 0), 7));
        assert!(slot.compare_and_set(&old2, g3));
        assert!(slot.outstanding_policies.lock().is_empty());
    }

    #[test]
    fn transaction_opened_before_swap_keeps_old_generation() {
        let slot = GenerationSlot::<FakeFingerprint, u64>::new(CacheAdapterGeneration::empty(10));
        let opened_before = LocalCacheView::new(slot.current());

        let old = slot.current();
        let g2 = old.with_inserted(CachedIterable::new(FakeFingerprint::new(1, true, 0), 42));
        assert!(slot.compare_and_set(&old, g2));

        let opened_after = LocalCacheView::new(slot.current());
        assert!(opened_before.get(&FakeFingerprint::new(1, true, 0)).is_none());
        assert!(opened_after.get(&FakeFingerprint::new(1, true, 0)).is_some());
    }

    #[test]
    fn expired_entry_is_evicted_locally_on_lookup() {
        let fp = FakeFingerprint::new(1, true, 0);
        let gen = CacheAdapterGeneration::empty(10).with_inserted(CachedIterable::new(fp.clone(), 99u64));
        let view = LocalCacheView::new(Arc::new(gen));
        assert!(view.get(&fp).is_some());
        fp.expire();
        assert!(view.get(&fp).is_none());
        assert!(view.get(&fp).is_none());
    }

    #[test]
    fn sparse_below_seventy_five_percent_fill() {
        let mut gen = CacheAdapterGeneration::<FakeFingerprint, u64>::empty(4);
        assert!(gen.is_sparse());
        for i in 0..3 {
            gen = gen.with_inserted(CachedIterable::new(FakeFingerprint::new(i, true, 0), i));
        }
        assert!(!gen.is_sparse());
    }
}
