#![doc = include_str!("../README.md")]
// No warnings
//#![deny(warnings)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
//#![deny(unused_results)]

// the code must be documented and everything should have a debug print implementation
#![deny(unused_doc_comments)]
//#![deny(missing_docs)]
//#![deny(clippy::missing_docs_in_private_items)]
//#![deny(clippy::missing_errors_doc)]
//#![deny(clippy::missing_panics_doc)]
//#![deny(clippy::missing_safety_doc)]
//#![deny(missing_debug_implementations)]

pub mod backends;
pub mod cache;
pub mod config;
pub mod cursor;
pub mod error;
pub mod log;
pub mod scheduler;
pub mod telemetry;
pub mod trie;
pub mod txn;
pub mod varint;

/// Prelude module to import everything from this crate.
pub mod prelude {
    pub use crate::backends::MmapLog;
    pub use crate::cache::{
        CacheAdapterGeneration, CacheableIterable, CachedIterable, EntityIterableCacheController, Fingerprint, GenerationSlot,
        HitRate, HitRateMonitor, LocalCacheView, QueryCancellingPolicy, TransactionContext, TransactionOpener,
    };
    pub use crate::config::{CacheConfig, ConfigSource};
    pub use crate::cursor::{ByteCursor, RandomAccessBytes};
    pub use crate::error::{CancelReason, Error, Result};
    pub use crate::log::{Address, LogAccessor, Loggable, TypeTag};
    pub use crate::scheduler::{BackgroundScheduler, Job, Priority, ThreadPoolScheduler};
    pub use crate::telemetry::{Counters, CountersSnapshot};
    pub use crate::trie::{ChildIterator, ChildReference, PatriciaNode, Tree};
    pub use crate::txn::{ActiveTransaction, EnvironmentHandle, StuckTransactionMonitor, TransactionSource};
}
