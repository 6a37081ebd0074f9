//! Error kinds shared by the byte cursor, varint codec, Patricia node view,
//! and the entity-iterable cache.
//!
//! Format errors (`InvalidAddressLength`, `InvalidAddress`, `Overflow`,
//! `Truncated`, `EndOfInput`) are fatal and meant to bubble all the way up
//! to the caller. `TooLongInstantiation` and `ReadonlyConflict` are caught
//! inside the caching orchestrator (see [`crate::cache::controller`]) and
//! never surface past it.

use std::fmt;

/// Why a caching job cancelled itself mid-instantiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cache adapter generation the job was reading from has been
    /// superseded by a compare-and-swap before the job finished.
    CacheAdapterObsolete,
    /// The job's wall-clock budget (§4.E `cachingTimeout`) expired.
    JobOverdue,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::CacheAdapterObsolete => write!(f, "cache adapter obsolete"),
            CancelReason::JobOverdue => write!(f, "job overdue"),
        }
    }
}

/// All error kinds produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The byte cursor was asked to read past the end of its addressed
    /// range.
    #[error("end of input")]
    EndOfInput,

    /// A compressed-unsigned-long decode consumed more than 9 bytes
    /// without finding a terminal byte.
    #[error("varint overflow: more than 9 bytes consumed")]
    Overflow,

    /// The cursor was exhausted while decoding a compressed unsigned long.
    #[error("varint truncated")]
    Truncated,

    /// A node's encoded `childAddressLength` fell outside `[1, 8]`.
    /// Fatal: indicates log corruption.
    #[error("invalid child address length {0}: must be in [1, 8]")]
    InvalidAddressLength(u32),

    /// The log accessor could not resolve an address to a Patricia-node
    /// loggable.
    #[error("invalid address: does not refer to a Patricia node")]
    InvalidAddress,

    /// `remove()` was called on an immutable child iterator.
    #[error("remove is not supported on an immutable iterator")]
    NotSupported,

    /// A caching job cancelled itself; see [`CancelReason`].
    #[error("caching job cancelled: {0}")]
    TooLongInstantiation(CancelReason),

    /// The transaction used to materialise a cached result hit a
    /// read-only conflict; the orchestrator re-enqueues once at lower
    /// priority.
    #[error("read-only transaction conflict")]
    ReadonlyConflict,

    /// The entity a cached link pointed at was deleted concurrently.
    #[error("phantom link: referent deleted concurrently")]
    PhantomLink,
}

pub type Result<T> = std::result::Result<T, Error>;
