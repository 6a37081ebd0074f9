//! The entity-iterable result cache (§3, §4.F–§4.H): a concurrent,
//! multi-generation cache of materialised query results keyed by query
//! fingerprint, plus the independent counts sub-cache and the
//! deferred-admission filter that gates entry into both.

pub mod controller;
pub mod counts;
pub mod deferred;
pub mod fingerprint;
pub mod generation;
pub mod hitrate;
pub mod policy;

pub use controller::{CacheableIterable, EntityIterableCacheController, TransactionContext, TransactionOpener};
pub use counts::CountsCache;
pub use deferred::{Admission, DeferredAdmissionFilter};
pub use fingerprint::Fingerprint;
pub use generation::{CacheAdapterGeneration, CachedIterable, GenerationSlot, LocalCacheView};
pub use hitrate::{HitRate, HitRateMonitor};
pub use policy::QueryCancellingPolicy;
