//! Stuck-transaction monitor (§4.I) and the minimal transaction surface it
//! needs from the host environment (§6's `forEachActiveTransaction`).

use std::sync::{Arc, Weak};

use log::{debug, error};

use crate::telemetry::Counters;

/// One active transaction, as seen by the stuck monitor. This is
/// intentionally a much narrower surface than the caching-relevant
/// [`crate::cache::controller::TransactionContext`] — the monitor only
/// ever needs age, provenance, and the ability to force-finish.
pub trait ActiveTransaction: Send + Sync {
    fn creation_time_ms(&self) -> u64;

    /// The thread that created this transaction, for the stuck-log
    /// message (§4.I: "creating thread identity").
    fn creating_thread_name(&self) -> String;

    /// The stack trace captured at creation time, if the environment
    /// attaches one. The soft-timeout log only fires when this is
    /// present, per §4.I.
    fn creation_stack_trace(&self) -> Option<String>;

    /// Aborts and closes the transaction forcibly.
    fn finish(&self);
}

/// The host's active-transaction iteration (§6).
pub trait TransactionSource: Send + Sync {
    fn for_each_active_transaction(&self, callback: &mut dyn FnMut(&dyn ActiveTransaction));
}

/// Lets the monitor detect that its owning environment has shut down,
/// without pinning it alive — the monitor only ever holds a [`Weak`]
/// reference to this (§5).
pub trait EnvironmentHandle: Send + Sync {
    fn is_closed(&self) -> bool;
}

/// Periodic sweep over active transactions: logs (and counts) those past
/// the soft timeout with an attached creation trace, and force-finishes
/// those past the hard expiration timeout.
pub struct StuckTransactionMonitor {
    source: Arc<dyn TransactionSource>,
    soft_timeout_ms: u64,
    hard_timeout_ms: u64,
    counters: Arc<Counters>,
}

impl StuckTransactionMonitor {
    pub fn new(source: Arc<dyn TransactionSource>, soft_timeout_ms: u64, hard_timeout_ms: u64, counters: Arc<Counters>) -> Self {
        StuckTransactionMonitor { source, soft_timeout_ms, hard_timeout_ms, counters }
    }

    /// Runs one sweep at logical time `now_ms`.
    pub fn tick(&self, now_ms: u64) {
        debug!("stuck-transaction monitor tick at {now_ms}");
        self.source.for_each_active_transaction(&mut |txn| {
            let age_ms = now_ms.saturating_sub(txn.creation_time_ms());

            if age_ms > self.soft_timeout_ms {
                if let Some(trace) = txn.creation_stack_trace() {
                    error!(
                        "transaction stuck: created at {} ms by thread {:?}, age {} ms\n{}",
                        txn.creation_time_ms(),
                        txn.creating_thread_name(),
                        age_ms,
                        trace
                    );
                    Counters::incr(&self.counters.stuck_transactions);
                }
            }

            if age_ms > self.hard_timeout_ms {
                txn.finish();
            }
        });
    }
}

/// Re-queues `monitor` on `scheduler` every `check_freq_ms`
/// (`envMonitorTxnsCheckFreq`, §6), using `now_ms` to timestamp each
/// sweep. Exits cleanly once `env` reports closed, or is dropped.
pub fn schedule_next_tick<F>(
    monitor: Arc<StuckTransactionMonitor>,
    env: Weak<dyn EnvironmentHandle>,
    check_freq_ms: u64,
    now_ms: F,
    mut requeue: impl FnMut(u64) + Send + 'static,
) where
    F: Fn() -> u64,
{
    match env.upgrade() {
        Some(handle) if !handle.is_closed() => {
            monitor.tick(now_ms());
            requeue(check_freq_ms);
        }
        _ => {
            debug!("stuck-transaction monitor exiting: owning environment closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeTxn {
        created_at: u64,
        trace: Option<String>,
        finished: Arc<AtomicBool>,
    }

    impl ActiveTransaction for FakeTxn {
        fn creation_time_ms(&self) -> u64 {
            self.created_at
        }
        fn creating_thread_name(&self) -> String {
            "worker-1".to_string()
        }
        fn creation_stack_trace(&self) -> Option<String> {
            self.trace.clone()
        }
        fn finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    struct FakeSource(Vec<FakeTxn>);

    impl TransactionSource for FakeSource {
        fn for_each_active_transaction(&self, callback: &mut dyn FnMut(&dyn ActiveTransaction)) {
            for txn in &self.0 {
                callback(txn);
            }
        }
    }

    #[test]
    fn past_hard_timeout_is_finished() {
        let finished = Arc::new(AtomicBool::new(false));
        let source = Arc::new(FakeSource(vec![FakeTxn { created_at: 0, trace: None, finished: finished.clone() }]));
        let monitor = StuckTransactionMonitor::new(source, 100, 200, Arc::new(Counters::new()));
        monitor.tick(250);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn past_soft_timeout_without_trace_is_not_counted() {
        let finished = Arc::new(AtomicBool::new(false));
        let source = Arc::new(FakeSource(vec![FakeTxn { created_at: 0, trace: None, finished }]));
        let counters = Arc::new(Counters::new());
        let monitor = StuckTransactionMonitor::new(source, 100, 10_000, counters.clone());
        monitor.tick(150);
        assert_eq!(counters.snapshot().stuck_transactions, 0);
    }

    #[test]
    fn past_soft_timeout_with_trace_is_counted() {
        let finished = Arc::new(AtomicBool::new(false));
        let source = Arc::new(FakeSource(vec![FakeTxn { created_at: 0, trace: Some("at foo()".into()), finished }]));
        let counters = Arc::new(Counters::new());
        let monitor = StuckTransactionMonitor::new(source, 100, 10_000, counters.clone());
        monitor.tick(150);
        assert_eq!(counters.snapshot().stuck_transactions, 1);
    }

    struct AlwaysOpenEnv;
    impl EnvironmentHandle for AlwaysOpenEnv {
        fn is_closed(&self) -> bool {
            false
        }
    }

    #[test]
    fn requeues_while_environment_is_open() {
        let source = Arc::new(FakeSource(Vec::new()));
        let monitor = Arc::new(StuckTransactionMonitor::new(source, 100, 200, Arc::new(Counters::new())));
        let env: Arc<dyn EnvironmentHandle> = Arc::new(AlwaysOpenEnv);
        let env_weak = Arc::downgrade(&env);
        let requeued = Arc::new(AtomicU64::new(0));
        let requeued_clone = requeued.clone();
        schedule_next_tick(monitor, env_weak, 50, || 0, move |_| {
            requeued_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(requeued.load(Ordering::SeqCst), 1);
    }
}
