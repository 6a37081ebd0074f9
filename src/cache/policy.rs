//! Query-cancellation policy (§4.E): decides whether a background caching
//! job may start, whether it must abort mid-flight, and why.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CancelReason, Error, Result};

/// Cancellation state attached to a transaction before it starts
/// materialising a cached result.
pub struct QueryCancellingPolicy {
    is_consistent: bool,
    start_time_ms: u64,
    /// Budget for a consistent (full-iterable) job, or for a
    /// counts-only job when `is_consistent` is false — §4.E: "two timeout
    /// budgets are used: the full-iterable timeout when consistent,
    /// otherwise the counts-only timeout."
    caching_timeout_ms: u64,
    start_caching_timeout_ms: u64,
    local_cache_generation: u64,
    /// Updated by the cache controller whenever a new generation is
    /// installed; compared against `local_cache_generation` to detect
    /// obsolescence.
    current_cache_generation: AtomicU64,
}

impl QueryCancellingPolicy {
    pub fn new(
        is_consistent: bool,
        start_time_ms: u64,
        caching_timeout_ms: u64,
        start_caching_timeout_ms: u64,
        local_cache_generation: u64,
    ) -> Self {
        QueryCancellingPolicy {
            is_consistent,
            start_time_ms,
            caching_timeout_ms,
            start_caching_timeout_ms,
            local_cache_generation,
            current_cache_generation: AtomicU64::new(local_cache_generation),
        }
    }

    /// Called by the cache generation's compare-and-swap path whenever a
    /// new generation becomes current, so in-flight policies observe the
    /// swap without polling the generation reference directly.
    pub fn notify_generation(&self, generation: u64) {
        self.current_cache_generation.store(generation, Ordering::SeqCst);
    }

    /// `now - startTime < startCachingTimeout`.
    pub fn can_start_at(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.start_time_ms) < self.start_caching_timeout_ms
    }

    /// `(isConsistent ∧ currentGeneration ≠ localGeneration) ∨ (now - startTime > cachingTimeout)`.
    pub fn need_to_cancel(&self, now_ms: u64) -> bool {
        let adapter_obsolete = self.is_consistent
            && self.current_cache_generation.load(Ordering::SeqCst) != self.local_cache_generation;
        let overdue = now_ms.saturating_sub(self.start_time_ms) > self.caching_timeout_ms;
        adapter_obsolete || overdue
    }

    /// Fails with [`Error::TooLongInstantiation`] and the applicable
    /// reason, if cancellation is warranted; otherwise returns `Ok(())`.
    pub fn do_cancel(&self, now_ms: u64) -> Result<()> {
        if !self.need_to_cancel(now_ms) {
            return Ok(());
        }
        let reason = if self.is_consistent
            && self.current_cache_generation.load(Ordering::SeqCst) != self.local_cache_generation
        {
            CancelReason::CacheAdapterObsolete
        } else {
            CancelReason::JobOverdue
        };
        Err(Error::TooLongInstantiation(reason))
    }

    pub fn is_consistent(&self) -> bool {
        self.is_consistent
    }

    pub fn local_cache_generation(&self) -> u64 {
        self.local_cache_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cannot_start_after_queue_wait_budget() {
        let policy = QueryCancellingPolicy::new(true, 1000, 5000, 200, 1);
        assert!(policy.can_start_at(1100));
        assert!(!policy.can_start_at(1300));
    }

    #[test]
    fn cancels_on_adapter_swap_for_consistent_job() {
        let policy = QueryCancellingPolicy::new(true, 0, 10_000, 1_000, 1);
        assert!(policy.do_cancel(10).is_ok());
        policy.notify_generation(2);
        let err = policy.do_cancel(10).unwrap_err();
        assert!(matches!(err, Error::TooLongInstantiation(CancelReason::CacheAdapterObsolete)));
    }

    #[test]
    fn inconsistent_job_ignores_adapter_swap() {
        let policy = QueryCancellingPolicy::new(false, 0, 10_000, 1_000, 1);
        policy.notify_generation(2);
        assert!(policy.do_cancel(10).is_ok());
    }

    #[test]
    fn cancels_when_overdue() {
        let policy = QueryCancellingPolicy::new(true, 0, 100, 1_000, 1);
        let err = policy.do_cancel(500).unwrap_err();
        assert!(matches!(err, Error::TooLongInstantiation(CancelReason::JobOverdue)));
    }
}
