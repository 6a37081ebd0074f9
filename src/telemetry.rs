//! Telemetry surface (§6): counters and hit-rate estimates exposed by the
//! entity-iterable cache controller.

use std::sync::atomic::{AtomicU64, Ordering};

/// All counters the controller maintains, plus both caches' hit-rate
/// estimates. Cheap to snapshot: every field is a plain atomic read.
#[derive(Default)]
pub struct Counters {
    pub total_hits: AtomicU64,
    pub total_misses: AtomicU64,
    pub count_hits: AtomicU64,
    pub count_misses: AtomicU64,
    pub jobs_enqueued: AtomicU64,
    pub jobs_not_enqueued: AtomicU64,
    pub jobs_started: AtomicU64,
    pub jobs_not_started: AtomicU64,
    pub jobs_interrupted: AtomicU64,
    pub count_jobs_enqueued: AtomicU64,
    pub stuck_transactions: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            total_hits: self.total_hits.load(Ordering::Relaxed),
            total_misses: self.total_misses.load(Ordering::Relaxed),
            count_hits: self.count_hits.load(Ordering::Relaxed),
            count_misses: self.count_misses.load(Ordering::Relaxed),
            jobs_enqueued: self.jobs_enqueued.load(Ordering::Relaxed),
            jobs_not_enqueued: self.jobs_not_enqueued.load(Ordering::Relaxed),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_not_started: self.jobs_not_started.load(Ordering::Relaxed),
            jobs_interrupted: self.jobs_interrupted.load(Ordering::Relaxed),
            count_jobs_enqueued: self.count_jobs_enqueued.load(Ordering::Relaxed),
            stuck_transactions: self.stuck_transactions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A point-in-time read of [`Counters`], safe to hand to a caller without
/// holding any reference into the live cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountersSnapshot {
    pub total_hits: u64,
    pub total_misses: u64,
    pub count_hits: u64,
    pub count_misses: u64,
    pub jobs_enqueued: u64,
    pub jobs_not_enqueued: u64,
    pub jobs_started: u64,
    pub jobs_not_started: u64,
    pub jobs_interrupted: u64,
    pub count_jobs_enqueued: u64,
    pub stuck_transactions: u64,
}

/// Renders a byte count either as a raw integer or in human-readable
/// units, per the `entityIterableCacheUseHumanReadable` config key
/// (§11's resolution of that key's meaning).
pub fn format_cache_size(entries: usize, human_readable: bool) -> String {
    if !human_readable || entries < 1024 {
        return entries.to_string();
    }
    let units = ["", "Ki", "Mi", "Gi"];
    let mut value = entries as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < units.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", units[unit])
}
