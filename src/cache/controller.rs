//! Entity-iterable cache controller (§4.H): orchestrates hit/miss
//! accounting, admission, job enqueue, the counts sub-cache, and
//! stuck-transaction telemetry.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use log::info;

use crate::config::CacheConfig;
use crate::error::Error;
use crate::scheduler::{BackgroundScheduler, Job, Priority};
use crate::telemetry::Counters;

use super::counts::CountsCache;
use super::deferred::{Admission, DeferredAdmissionFilter};
use super::fingerprint::Fingerprint;
use super::generation::{CacheAdapterGeneration, CachedIterable, GenerationSlot, LocalCacheView};
use super::hitrate::{HitRate, HitRateMonitor};
use super::policy::QueryCancellingPolicy;

/// The value a query fingerprint resolves to once materialised. Kept
/// generic so this crate never has to know the entity-attribute model —
/// callers plug in whatever representation their query executor
/// produces.
pub trait CacheableIterable<F: Fingerprint, V: Clone + Send + Sync>: Send + Sync {
    fn fingerprint(&self) -> F;

    /// Whether this particular iterable instance is eligible for caching
    /// at all (some iterables are inherently uncacheable, e.g. ones that
    /// read external state).
    fn can_be_cached(&self) -> bool;

    /// Runs the query to completion and returns the cacheable value.
    fn materialize(&self) -> crate::error::Result<V>;

    /// Whether concurrent calls to `materialize` are safe — gates the
    /// asynchronous-counts fallback in `get_cached_count_for`.
    fn is_thread_safe(&self) -> bool;
}

/// The transaction context this crate consumes (§6), parameterised over
/// the same fingerprint/value types as the controller it is used with.
pub trait TransactionContext<F: Fingerprint, V: Clone + Send + Sync>: Send + Sync {
    fn is_mutable(&self) -> bool;
    fn is_current(&self) -> bool;
    fn is_caching_relevant(&self) -> bool;
    fn local_cache(&self) -> Arc<LocalCacheView<F, V>>;
    fn local_cache_attempt(&self);
    fn local_cache_hit(&self);
    fn set_query_cancelling_policy(&self, policy: Arc<QueryCancellingPolicy>);
}

/// Opens a fresh read-only transaction for a caching job to materialise
/// against (§4.H step 2).
pub trait TransactionOpener<F: Fingerprint, V: Clone + Send + Sync>: Send + Sync {
    fn open_readonly(&self) -> crate::error::Result<Arc<dyn TransactionContext<F, V>>>;
}

/// `(fingerprint identity, is_consistent)` — a job's identity per §4.H:
/// two jobs with equal fingerprints and equal consistency are equal, and
/// equal jobs coalesce on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct JobKey {
    fingerprint_identity: u64,
    is_consistent: bool,
}

fn identity_hash<F: Fingerprint>(fingerprint: &F) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    fingerprint.hash(&mut hasher);
    hasher.finish()
}

fn system_now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// The controller. One instance owns the full-iterable cache generation,
/// the counts sub-cache, the deferred-admission filter, and the shared
/// telemetry counters.
pub struct EntityIterableCacheController<F: Fingerprint, V: Clone + Send + Sync> {
    config: CacheConfig,
    slot: Arc<GenerationSlot<F, V>>,
    deferred: DeferredAdmissionFilter,
    counts: Arc<CountsCache>,
    counters: Arc<Counters>,
    scheduler: Arc<dyn BackgroundScheduler>,
    opener: Arc<dyn TransactionOpener<F, V>>,
    in_flight: Arc<DashSet<JobKey>>,
    /// Bounds the re-queue loop this crate uses to resolve §9's open
    /// question on read-only-conflict retries: at most one re-queue per
    /// job identity per generation version, after which a conflict is
    /// simply abandoned rather than retried indefinitely.
    reenqueue_attempts: Arc<DashMap<(JobKey, u64), u32>>,
    hit_rate_monitor: Arc<HitRateMonitor<F, V>>,
}

impl<F: Fingerprint, V: Clone + Send + Sync + 'static> EntityIterableCacheController<F, V> {
    pub fn new(config: CacheConfig, scheduler: Arc<dyn BackgroundScheduler>, opener: Arc<dyn TransactionOpener<F, V>>) -> Self {
        let slot = Arc::new(GenerationSlot::new(CacheAdapterGeneration::empty(config.entity_iterable_cache_size)));
        let counts = Arc::new(CountsCache::new(config.entity_iterable_cache_counts_cache_size));
        let counters = Arc::new(Counters::new());
        let hit_rate_monitor = Arc::new(HitRateMonitor::new(slot.clone(), counts.clone(), counters.clone()));

        EntityIterableCacheController {
            slot,
            deferred: DeferredAdmissionFilter::new(config.entity_iterable_cache_size, config.entity_iterable_cache_deferred_delay_ms),
            counts,
            counters,
            scheduler,
            opener,
            in_flight: Arc::new(DashSet::new()),
            reenqueue_attempts: Arc::new(DashMap::new()),
            hit_rate_monitor,
            config,
        }
    }

    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    pub fn current_generation(&self) -> Arc<CacheAdapterGeneration<F, V>> {
        self.slot.current()
    }

    /// The shared hit-rate driver (§5's shared periodic timer, §6's
    /// telemetry surface). The host re-fires `tick()` on its own
    /// schedule, exactly as it does for `txn::StuckTransactionMonitor`.
    pub fn hit_rate_monitor(&self) -> &Arc<HitRateMonitor<F, V>> {
        &self.hit_rate_monitor
    }

    /// A point-in-time read of both caches' hit-rate estimates.
    pub fn hit_rates(&self) -> HitRate {
        self.hit_rate_monitor.snapshot()
    }

    fn is_caching_queue_full(&self) -> bool {
        self.scheduler.pending_jobs() > self.slot.current().len()
    }

    /// §4.H `putIfNotCached`. Returns `Some(value)` on a cache hit or a
    /// synchronous materialisation; `None` means the caller should keep
    /// using its own uncached iterable (a miss that was deferred,
    /// skipped, or handed off to an async job).
    pub fn put_if_not_cached(
        &self,
        iterable: &Arc<dyn CacheableIterable<F, V>>,
        txn: &dyn TransactionContext<F, V>,
        now_ms: u64,
    ) -> Option<V> {
        if self.config.is_caching_disabled || !iterable.can_be_cached() {
            return None;
        }

        let fingerprint = iterable.fingerprint();
        let local_cache = txn.local_cache();
        txn.local_cache_attempt();

        if let Some(cached) = local_cache.get(&fingerprint) {
            txn.local_cache_hit();
            Counters::incr(&self.counters.total_hits);
            return Some(cached.value);
        }
        Counters::incr(&self.counters.total_misses);

        if txn.is_mutable() || !txn.is_current() || !txn.is_caching_relevant() {
            return None;
        }

        if !local_cache.is_sparse() {
            match self.deferred.probe(&fingerprint, now_ms) {
                Admission::Defer => return None,
                Admission::Admit => {}
            }
        }

        if self.scheduler.is_dispatcher_thread() {
            return self.materialize_and_admit(iterable, &fingerprint, &local_cache);
        }

        self.enqueue_caching_job(iterable.clone(), fingerprint, now_ms);
        None
    }

    fn materialize_and_admit(
        &self,
        iterable: &Arc<dyn CacheableIterable<F, V>>,
        fingerprint: &F,
        local_cache: &LocalCacheView<F, V>,
    ) -> Option<V> {
        Counters::incr(&self.counters.jobs_started);
        match iterable.materialize() {
            Ok(value) => {
                self.admit(local_cache.generation(), fingerprint.clone(), value.clone());
                Some(value)
            }
            Err(_) => None,
        }
    }

    fn admit(&self, local_generation: &Arc<CacheAdapterGeneration<F, V>>, fingerprint: F, value: V) {
        let current = self.slot.current();
        // Only admit when the shared generation still matches the one the
        // caller read from; otherwise discard — the work was wasted
        // because the world moved on underneath it (§4.H step 6).
        if !Arc::ptr_eq(&current, local_generation) {
            return;
        }
        let next = current.with_inserted(CachedIterable::new(fingerprint, value));
        self.slot.compare_and_set(&current, next);
    }

    fn enqueue_caching_job(&self, iterable: Arc<dyn CacheableIterable<F, V>>, fingerprint: F, now_ms: u64) {
        let key = JobKey { fingerprint_identity: identity_hash(&fingerprint), is_consistent: fingerprint.is_consistent() };

        if self.is_caching_queue_full() {
            Counters::incr(&self.counters.jobs_not_enqueued);
            return;
        }
        if !self.in_flight.insert(key) {
            // An equal job is already pending or running: coalesce.
            return;
        }

        let job = CachingJob {
            fingerprint,
            iterable,
            enqueued_at_ms: now_ms,
            config: self.config,
            slot: self.slot.clone(),
            scheduler: self.scheduler.clone(),
            opener: self.opener.clone(),
            counters: self.counters.clone(),
            in_flight: self.in_flight.clone(),
            reenqueue_attempts: self.reenqueue_attempts.clone(),
            key,
            attempt_generation: self.slot.current_version(),
        };

        if self.scheduler.queue(Box::new(job), Priority::Normal) {
            Counters::incr(&self.counters.jobs_enqueued);
        } else {
            self.in_flight.remove(&key);
            Counters::incr(&self.counters.jobs_not_enqueued);
        }
    }

    /// §4.H `getCachedCount(fingerprint)`.
    pub fn get_cached_count(&self, fingerprint: &F) -> Option<i64> {
        let result = self.counts.get(fingerprint);
        Counters::incr(if result.is_some() { &self.counters.count_hits } else { &self.counters.count_misses });
        result
    }

    /// §4.H `getCachedCount(iterable)`: materialises synchronously and
    /// takes its size if already on a caching-worker thread; otherwise
    /// schedules an asynchronous counts job (if the iterable is
    /// thread-safe) and returns `-1` for "not yet known".
    pub fn get_cached_count_for(&self, iterable: &Arc<dyn CacheableIterable<F, V>>, size_of: impl Fn(&V) -> i64 + Send + Sync + 'static) -> i64 {
        let fingerprint = iterable.fingerprint();
        if let Some(count) = self.get_cached_count(&fingerprint) {
            return count;
        }

        if self.scheduler.is_dispatcher_thread() {
            return match iterable.materialize() {
                Ok(value) => {
                    let count = size_of(&value);
                    self.set_cached_count(&fingerprint, count);
                    count
                }
                Err(_) => -1,
            };
        }

        if iterable.is_thread_safe() {
            let key = JobKey { fingerprint_identity: identity_hash(&fingerprint), is_consistent: fingerprint.is_consistent() };
            if self.in_flight.insert(key) {
                let job = CountsJob {
                    fingerprint,
                    iterable: iterable.clone(),
                    counts: self.counts.clone(),
                    counters: self.counters.clone(),
                    in_flight: self.in_flight.clone(),
                    key,
                    size_of: Arc::new(size_of),
                };
                if self.scheduler.queue(Box::new(job), Priority::Normal) {
                    Counters::incr(&self.counters.count_jobs_enqueued);
                } else {
                    self.in_flight.remove(&key);
                }
            }
        }
        -1
    }

    /// §4.H `setCachedCount`.
    pub fn set_cached_count(&self, fingerprint: &F, count: i64) {
        self.counts.set(fingerprint, count);
    }
}

struct CachingJob<F: Fingerprint, V: Clone + Send + Sync> {
    fingerprint: F,
    iterable: Arc<dyn CacheableIterable<F, V>>,
    enqueued_at_ms: u64,
    config: CacheConfig,
    slot: Arc<GenerationSlot<F, V>>,
    scheduler: Arc<dyn BackgroundScheduler>,
    opener: Arc<dyn TransactionOpener<F, V>>,
    counters: Arc<Counters>,
    in_flight: Arc<DashSet<JobKey>>,
    reenqueue_attempts: Arc<DashMap<(JobKey, u64), u32>>,
    key: JobKey,
    attempt_generation: u64,
}

impl<F: Fingerprint, V: Clone + Send + Sync + 'static> CachingJob<F, V> {
    fn caching_timeout_ms(&self) -> u64 {
        if self.fingerprint.is_consistent() {
            self.config.entity_iterable_cache_caching_timeout_ms
        } else {
            self.config.entity_iterable_cache_counts_caching_timeout_ms
        }
    }

    fn run_at(&self, now_ms: u64) {
        // §4.H execution step 1: re-check the queue-wait budget and
        // queue-full condition before doing any real work.
        let queue_full = self.scheduler.pending_jobs() > self.slot.current().len();
        let overdue_in_queue = now_ms.saturating_sub(self.enqueued_at_ms) >= self.config.entity_iterable_cache_start_caching_timeout_ms;
        if queue_full || overdue_in_queue {
            Counters::incr(&self.counters.jobs_not_started);
            self.in_flight.remove(&self.key);
            return;
        }

        let txn = match self.opener.open_readonly() {
            Ok(txn) => txn,
            Err(_) => {
                Counters::incr(&self.counters.jobs_not_started);
                self.in_flight.remove(&self.key);
                return;
            }
        };
        Counters::incr(&self.counters.jobs_started);

        if !self.fingerprint.is_consistent() {
            self.fingerprint.reset_birth_time(now_ms);
        }

        let local_generation = txn.local_cache().generation().clone();
        let policy = Arc::new(QueryCancellingPolicy::new(
            self.fingerprint.is_consistent(),
            now_ms,
            self.caching_timeout_ms(),
            self.config.entity_iterable_cache_start_caching_timeout_ms,
            local_generation.version(),
        ));
        self.slot.register_policy(&policy);
        txn.set_query_cancelling_policy(policy);

        match self.iterable.materialize() {
            Ok(value) => {
                // Only admit when the shared generation still matches the
                // one this job read from; otherwise discard — the world
                // moved on while this job was materialising (§4.H step 6).
                let current = self.slot.current();
                if Arc::ptr_eq(&current, &local_generation) {
                    let next = current.with_inserted(CachedIterable::new(self.fingerprint.clone(), value));
                    self.slot.compare_and_set(&current, next);
                }
                self.in_flight.remove(&self.key);
                self.reenqueue_attempts.remove(&(self.key, self.attempt_generation));
            }
            Err(Error::TooLongInstantiation(reason)) => {
                info!("caching job for {:?} cancelled: {reason}", self.fingerprint);
                Counters::incr(&self.counters.jobs_interrupted);
                self.in_flight.remove(&self.key);
                self.reenqueue_attempts.remove(&(self.key, self.attempt_generation));
            }
            Err(Error::ReadonlyConflict) => {
                let attempt_key = (self.key, self.attempt_generation);
                let mut attempts = self.reenqueue_attempts.entry(attempt_key).or_insert(0);
                if *attempts < 1 {
                    *attempts += 1;
                    drop(attempts);
                    self.scheduler.queue(
                        Box::new(CachingJob {
                            fingerprint: self.fingerprint.clone(),
                            iterable: self.iterable.clone(),
                            enqueued_at_ms: self.enqueued_at_ms,
                            config: self.config,
                            slot: self.slot.clone(),
                            scheduler: self.scheduler.clone(),
                            opener: self.opener.clone(),
                            counters: self.counters.clone(),
                            in_flight: self.in_flight.clone(),
                            reenqueue_attempts: self.reenqueue_attempts.clone(),
                            key: self.key,
                            attempt_generation: self.attempt_generation,
                        }),
                        Priority::BelowNormal,
                    );
                    // The job identity stays marked in-flight across the
                    // re-queue: it is still logically the same job.
                } else {
                    drop(attempts);
                    self.in_flight.remove(&self.key);
                    self.reenqueue_attempts.remove(&attempt_key);
                }
            }
            Err(_) => {
                Counters::incr(&self.counters.jobs_interrupted);
                self.in_flight.remove(&self.key);
                self.reenqueue_attempts.remove(&(self.key, self.attempt_generation));
            }
        }
    }
}

impl<F: Fingerprint, V: Clone + Send + Sync + 'static> Job for CachingJob<F, V> {
    fn run(&self) {
        self.run_at(system_now_ms());
    }

    fn shard_key(&self) -> u64 {
        identity_hash(&self.fingerprint)
    }

    fn is_consistent(&self) -> bool {
        self.fingerprint.is_consistent()
    }
}

struct CountsJob<F: Fingerprint, V: Clone + Send + Sync> {
    fingerprint: F,
    iterable: Arc<dyn CacheableIterable<F, V>>,
    counts: Arc<CountsCache>,
    counters: Arc<Counters>,
    in_flight: Arc<DashSet<JobKey>>,
    key: JobKey,
    size_of: Arc<dyn Fn(&V) -> i64 + Send + Sync>,
}

impl<F: Fingerprint, V: Clone + Send + Sync> Job for CountsJob<F, V> {
    fn run(&self) {
        match self.iterable.materialize() {
            Ok(value) => {
                let count = (self.size_of)(&value);
                self.counts.set(&self.fingerprint, count);
            }
            Err(_) => {
                Counters::incr(&self.counters.jobs_interrupted);
            }
        }
        self.in_flight.remove(&self.key);
    }

    fn shard_key(&self) -> u64 {
        identity_hash(&self.fingerprint)
    }

    fn is_consistent(&self) -> bool {
        self.fingerprint.is_consistent()
    }
}
