//! Background task scheduler (consumed, §6): the worker pool the caching
//! controller enqueues jobs onto, plus the priorities it uses.

/// Priorities used by the entity-iterable cache controller: `Normal` on
/// initial enqueue, `BelowNormal` when re-enqueueing after a read-only
/// conflict (§4.H step 5, §9 Open Question: bounded to one re-queue per
/// job identity per generation — see [`crate::cache::controller`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    BelowNormal,
    Normal,
}

/// A unit of work the scheduler runs on a caching-worker thread.
pub trait Job: Send + Sync {
    fn run(&self);

    /// A stable shard key used to spread jobs of the same consistency
    /// class across the workers reserved for that class.
    fn shard_key(&self) -> u64;

    /// Whether this job belongs to the consistent (full-iterable) class
    /// or the inconsistent (counts-only) class — see §5 "Sharding":
    /// consistent jobs land on disjoint workers from inconsistent ones so
    /// slow inconsistent jobs cannot starve consistent ones.
    fn is_consistent(&self) -> bool;
}

/// The background task scheduler this crate consumes.
pub trait BackgroundScheduler: Send + Sync {
    /// Enqueues `job` at `priority`. Returns `true` if it was actually
    /// queued; `false` if coalesced with an equal job already pending
    /// (§5: "per fingerprint, at most one materialisation job is in
    /// flight at a time").
    fn queue(&self, job: Box<dyn Job>, priority: Priority) -> bool;

    /// Enqueues `job` to run after `delay_ms`.
    fn queue_in(&self, job: Box<dyn Job>, delay_ms: u64) -> bool;

    /// Number of jobs currently pending (queued, not yet started).
    fn pending_jobs(&self) -> usize;

    /// Whether the calling thread is itself a caching-worker thread
    /// (§9 "dispatcher thread" detection: implemented as a thread-local
    /// tag set on worker entry, not thread-identity comparison).
    fn is_dispatcher_thread(&self) -> bool;
}

thread_local! {
    /// Set on entry to a caching-worker thread's run loop, cleared
    /// nowhere (the thread never stops being a worker) — the thread-local
    /// tag §9 asks for, rather than comparing thread identities.
    static IS_CACHING_WORKER: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

fn mark_current_thread_as_caching_worker() {
    IS_CACHING_WORKER.with(|flag| flag.set(true));
}

fn current_thread_is_caching_worker() -> bool {
    IS_CACHING_WORKER.with(|flag| flag.get())
}

enum ScheduledJob {
    Now(Box<dyn Job>),
    After(Box<dyn Job>, u64),
}

/// A fixed-size worker pool built on `crossbeam-channel` as its
/// concurrent queue: half the workers (rounded down, at least one) are
/// reserved for consistent jobs, the rest for inconsistent ones, and a
/// job is routed to a worker within its class by
/// `shard_key % workers_in_class` — the explicit shard-selection §9 asks
/// for instead of hash-mangling a single index space.
pub struct ThreadPoolScheduler {
    consistent_senders: Vec<crossbeam_channel::Sender<ScheduledJob>>,
    inconsistent_senders: Vec<crossbeam_channel::Sender<ScheduledJob>>,
    pending: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    _workers: Vec<std::thread::JoinHandle<()>>,
}

impl ThreadPoolScheduler {
    /// Builds a pool with `thread_count` workers (minimum 2, so each
    /// consistency class gets at least one dedicated worker).
    pub fn new(thread_count: usize) -> Self {
        let thread_count = thread_count.max(2);
        let consistent_count = thread_count / 2;
        let inconsistent_count = thread_count - consistent_count;
        let pending = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut consistent_senders = Vec::with_capacity(consistent_count);
        let mut inconsistent_senders = Vec::with_capacity(inconsistent_count);
        let mut workers = Vec::with_capacity(thread_count);

        for _ in 0..consistent_count {
            let (tx, rx) = crossbeam_channel::unbounded::<ScheduledJob>();
            consistent_senders.push(tx);
            workers.push(spawn_worker(rx, pending.clone()));
        }
        for _ in 0..inconsistent_count {
            let (tx, rx) = crossbeam_channel::unbounded::<ScheduledJob>();
            inconsistent_senders.push(tx);
            workers.push(spawn_worker(rx, pending.clone()));
        }

        ThreadPoolScheduler { consistent_senders, inconsistent_senders, pending, _workers: workers }
    }

    fn sender_for(&self, job: &dyn Job) -> &crossbeam_channel::Sender<ScheduledJob> {
        let senders = if job.is_consistent() { &self.consistent_senders } else { &self.inconsistent_senders };
        &senders[job.shard_key() as usize % senders.len()]
    }
}

fn spawn_worker(rx: crossbeam_channel::Receiver<ScheduledJob>, pending: std::sync::Arc<std::sync::atomic::AtomicUsize>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        mark_current_thread_as_caching_worker();
        for scheduled in rx {
            match scheduled {
                ScheduledJob::Now(job) => {
                    job.run();
                    pending.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                }
                ScheduledJob::After(job, delay_ms) => {
                    std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                    job.run();
                    pending.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }
    })
}

impl BackgroundScheduler for ThreadPoolScheduler {
    fn queue(&self, job: Box<dyn Job>, _priority: Priority) -> bool {
        let sender = self.sender_for(job.as_ref()).clone();
        self.pending.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if sender.send(ScheduledJob::Now(job)).is_err() {
            self.pending.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            return false;
        }
        true
    }

    fn queue_in(&self, job: Box<dyn Job>, delay_ms: u64) -> bool {
        let sender = self.sender_for(job.as_ref()).clone();
        self.pending.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if sender.send(ScheduledJob::After(job, delay_ms)).is_err() {
            self.pending.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            return false;
        }
        true
    }

    fn pending_jobs(&self) -> usize {
        self.pending.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn is_dispatcher_thread(&self) -> bool {
        current_thread_is_caching_worker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingJob {
        counter: Arc<AtomicUsize>,
        consistent: bool,
    }

    impl Job for CountingJob {
        fn run(&self) {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }

        fn shard_key(&self) -> u64 {
            0
        }

        fn is_consistent(&self) -> bool {
            self.consistent
        }
    }

    #[test]
    fn queued_jobs_run_and_report_pending_count() {
        let pool = ThreadPoolScheduler::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for consistent in [true, false, true, false] {
            pool.queue(Box::new(CountingJob { counter: counter.clone(), consistent }), Priority::Normal);
        }
        // Give the workers a moment; this is a coarse liveness check, not
        // a precise timing assertion.
        std::thread::sleep(std::time::Duration::from_millis(200));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
