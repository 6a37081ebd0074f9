//! Hit-rate telemetry driver (§6 "hit-rate estimates for both caches",
//! §5 "a separate shared timer drives periodic tasks (hit-rate
//! adjustment, stuck-transaction monitor)").
//!
//! Mirrors [`crate::txn::StuckTransactionMonitor`]'s tick/schedule split:
//! [`HitRateMonitor::tick`] performs one windowed adjustment, and the host
//! re-fires it on its own timer exactly as it does for the stuck-monitor
//! sweep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;

use crate::telemetry::Counters;

use super::counts::CountsCache;
use super::fingerprint::Fingerprint;
use super::generation::GenerationSlot;

/// A point-in-time read of both caches' hit-rate estimates, as exposed on
/// the telemetry surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct HitRate {
    /// The full-iterable cache's exponentially decayed estimate
    /// (§4.F `with_adjusted_hit_rate`).
    pub full_iterable: f64,
    /// The counts cache's cumulative hit ratio.
    pub counts: f64,
}

/// Periodically folds the raw hit/miss counters into the full-iterable
/// cache generation's decayed hit-rate estimate. The counts cache needs
/// no periodic driver: its hit rate is a plain cumulative ratio, read
/// directly off its own atomics on demand.
pub struct HitRateMonitor<F: Fingerprint, V: Clone + Send + Sync> {
    slot: Arc<GenerationSlot<F, V>>,
    counts: Arc<CountsCache>,
    counters: Arc<Counters>,
    last_hits: AtomicU64,
    last_misses: AtomicU64,
}

impl<F: Fingerprint, V: Clone + Send + Sync> HitRateMonitor<F, V> {
    pub fn new(slot: Arc<GenerationSlot<F, V>>, counts: Arc<CountsCache>, counters: Arc<Counters>) -> Self {
        HitRateMonitor { slot, counts, counters, last_hits: AtomicU64::new(0), last_misses: AtomicU64::new(0) }
    }

    /// Folds the total-hit/total-miss counters accumulated since the
    /// previous tick into the current generation's decayed estimate. A
    /// lost compare-and-swap (a caching job admitted an entry in the
    /// meantime) is not retried: the next tick's window absorbs it.
    pub fn tick(&self) {
        let hits = self.counters.total_hits.load(Ordering::Relaxed);
        let misses = self.counters.total_misses.load(Ordering::Relaxed);
        let window_hits = hits.saturating_sub(self.last_hits.swap(hits, Ordering::Relaxed));
        let window_misses = misses.saturating_sub(self.last_misses.swap(misses, Ordering::Relaxed));
        if window_hits == 0 && window_misses == 0 {
            debug!("hit-rate monitor tick: no observations this window");
            return;
        }
        let current = self.slot.current();
        let next = current.with_adjusted_hit_rate(window_hits, window_misses);
        self.slot.compare_and_set(&current, next);
    }

    /// The current combined hit-rate snapshot for both caches.
    pub fn snapshot(&self) -> HitRate {
        HitRate { full_iterable: self.slot.current().hit_rate(), counts: self.counts.hit_rate() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fingerprint::test_support::FakeFingerprint;
    use crate::cache::generation::CacheAdapterGeneration;

    #[test]
    fn tick_folds_window_into_decayed_estimate() {
        let slot = Arc::new(GenerationSlot::<FakeFingerprint, u64>::new(CacheAdapterGeneration::empty(10)));
        let counts = Arc::new(CountsCache::new(10));
        let counters = Arc::new(Counters::new());
        let monitor = HitRateMonitor::new(slot.clone(), counts, counters.clone());

        assert_eq!(monitor.snapshot().full_iterable, 0.0);

        for _ in 0..3 {
            Counters::incr(&counters.total_hits);
        }
        Counters::incr(&counters.total_misses);
        monitor.tick();

        assert!(monitor.snapshot().full_iterable > 0.0);
    }

    #[test]
    fn empty_window_leaves_estimate_unchanged() {
        let slot = Arc::new(GenerationSlot::<FakeFingerprint, u64>::new(CacheAdapterGeneration::empty(10)));
        let counts = Arc::new(CountsCache::new(10));
        let counters = Arc::new(Counters::new());
        let monitor = HitRateMonitor::new(slot.clone(), counts, counters);

        monitor.tick();
        assert_eq!(monitor.snapshot().full_iterable, 0.0);
    }

    #[test]
    fn counts_cache_hit_rate_is_read_directly_not_decayed() {
        let slot = Arc::new(GenerationSlot::<FakeFingerprint, u64>::new(CacheAdapterGeneration::empty(10)));
        let counts = Arc::new(CountsCache::new(10));
        let counters = Arc::new(Counters::new());
        let fp = FakeFingerprint::new(1, true, 0);
        counts.set(&fp, 7);
        counts.get(&fp);
        let monitor = HitRateMonitor::new(slot, counts, counters);
        assert_eq!(monitor.snapshot().counts, 1.0);
    }
}
