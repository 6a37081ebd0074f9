//! Query fingerprint: the cache key (§3 "Query fingerprint").
//!
//! A fingerprint is an opaque identity computed from an iterable's
//! structural shape (its operator tree and parameters) such that two
//! iterables with equal fingerprints produce equal results against the
//! same logical database state. This crate does not compute fingerprints
//! — that belongs to the query executor that builds iterables — it only
//! specifies the trait a fingerprint must satisfy to be usable as a cache
//! key.

use std::fmt::Debug;
use std::hash::Hash;

/// A query fingerprint: equality + hash identity, an expiry predicate
/// tied to the logical snapshot it was built against, a "consistent"
/// flag, and a birth timestamp that re-enqueueing may reset.
pub trait Fingerprint: Debug + Eq + Hash + Clone + Send + Sync + 'static {
    /// Whether evaluating the iterable this fingerprint identifies is
    /// guaranteed to produce the same bytes as a synchronous execution
    /// (vs. an approximate / best-effort count).
    fn is_consistent(&self) -> bool;

    /// Whether the logical snapshot this fingerprint was built against is
    /// still current. A cached entry whose fingerprint reports expiry is
    /// evicted on next lookup.
    fn is_expired(&self) -> bool;

    /// Milliseconds since the epoch at which this fingerprint was first
    /// built (or last reset by a re-enqueue).
    fn birth_time_ms(&self) -> u64;

    /// Resets the birth timestamp to `now_ms`, used as a keep-alive when
    /// an inconsistent (counts-only) job re-runs (§4.H step 3).
    fn reset_birth_time(&self, now_ms: u64);
}
