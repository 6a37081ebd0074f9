//! Logical addresses and loggable records (§3, §6).
//!
//! The log itself — the append-only page store that assigns addresses to
//! byte ranges — is an external collaborator; this module only specifies
//! the shapes the rest of the crate needs from it ([`Loggable`],
//! [`LogAccessor`]) and the address type and type-tag predicates that are
//! part of the stable on-disk format.

use std::sync::Arc;

use crate::cursor::{ByteCursor, RandomAccessBytes};

/// An opaque 64-bit offset into the append-only log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub u64);

impl Address {
    /// Sentinel denoting "none" — the empty tree's root, for instance.
    pub const NULL: Address = Address(u64::MAX);

    pub fn is_null(self) -> bool {
        self == Address::NULL
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "NULL_ADDRESS")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// The single-byte type tag at the head of every loggable record.
///
/// Bit assignments are this crate's own choice (spec §3 only fixes the
/// four derivable predicates, not the bit layout):
/// bit 0 — is a Patricia node; bit 1 — has a value; bit 2 — has children;
/// bit 3 — is the tree root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeTag(pub u8);

impl TypeTag {
    const IS_PATRICIA_NODE: u8 = 1 << 0;
    const HAS_VALUE: u8 = 1 << 1;
    const HAS_CHILDREN: u8 = 1 << 2;
    const IS_ROOT: u8 = 1 << 3;

    pub fn new(is_patricia_node: bool, has_value: bool, has_children: bool, is_root: bool) -> Self {
        let mut bits = 0u8;
        if is_patricia_node {
            bits |= Self::IS_PATRICIA_NODE;
        }
        if has_value {
            bits |= Self::HAS_VALUE;
        }
        if has_children {
            bits |= Self::HAS_CHILDREN;
        }
        if is_root {
            bits |= Self::IS_ROOT;
        }
        TypeTag(bits)
    }

    pub fn is_patricia_node(self) -> bool {
        self.0 & Self::IS_PATRICIA_NODE != 0
    }

    pub fn has_value(self) -> bool {
        self.0 & Self::HAS_VALUE != 0
    }

    pub fn has_children(self) -> bool {
        self.0 & Self::HAS_CHILDREN != 0
    }

    pub fn is_root(self) -> bool {
        self.0 & Self::IS_ROOT != 0
    }
}

/// A contiguous byte range in the log: an address, a type tag, and a
/// payload cursor anchored at the record's data address.
#[derive(Clone)]
pub struct Loggable {
    address: Address,
    tag: TypeTag,
    data_address: usize,
    source: Arc<dyn RandomAccessBytes>,
}

impl Loggable {
    pub fn new(address: Address, tag: TypeTag, data_address: usize, source: Arc<dyn RandomAccessBytes>) -> Self {
        Loggable { address, tag, data_address, source }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn tag(&self) -> TypeTag {
        self.tag
    }

    /// A cursor positioned at the start of this record's payload.
    pub fn data_cursor(&self) -> ByteCursor {
        ByteCursor::at(self.source.clone(), self.data_address)
    }

    pub fn data_address(&self) -> usize {
        self.data_address
    }
}

/// The log page accessor this crate consumes (§6).
///
/// Returned byte sources must be stable for at least as long as the
/// caller holds them — callers pin a log page by cloning the `Arc`
/// returned via [`Loggable::data_cursor`].
pub trait LogAccessor: Send + Sync {
    /// Fetches the loggable record at `address`.
    fn get_loggable(&self, address: Address) -> crate::error::Result<Loggable>;
}
