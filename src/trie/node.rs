//! Immutable Patricia node view (§4.C): a zero-copy window onto one node's
//! encoded bytes, plus child lookup and bidirectional iteration over its
//! child table.
//!
//! Nothing here ever deserialises a node into a heap-allocated tree of
//! objects — lookups walk the sorted child-byte column directly with
//! binary search and decode only the one address they need.

use std::sync::Arc;

use crate::cursor::{ByteCursor, RandomAccessBytes};
use crate::error::{Error, Result};
use crate::log::{Address, Loggable, LogAccessor};
use crate::varint;

use super::tree::load_node;

/// One entry of a node's child table: the discriminating key byte and the
/// log address of the child it leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildReference {
    pub first_byte: u8,
    pub suffix_address: Address,
}

struct Inner {
    address: Address,
    source: Arc<dyn RandomAccessBytes>,
    data_address: usize,
    key_suffix_range: (usize, usize),
    value_range: Option<(usize, usize)>,
    children_count: u16,
    child_address_length: u8,
    /// Byte offset from `data_address` at which the child table begins.
    data_offset: usize,
    accessor: Arc<dyn LogAccessor>,
}

/// A read-only view over one Patricia node's encoded bytes.
///
/// Cheap to clone: internally reference-counted, so handing a clone to a
/// [`ChildIterator`] as a back-reference to its parent costs one atomic
/// increment, not a copy of the node's bytes.
#[derive(Clone)]
pub struct PatriciaNode {
    inner: Arc<Inner>,
}

impl PatriciaNode {
    /// The synthetic empty-tree node: `NULL_ADDRESS`, no key suffix, no
    /// children.
    pub fn empty(accessor: Arc<dyn LogAccessor>) -> Self {
        PatriciaNode {
            inner: Arc::new(Inner {
                address: Address::NULL,
                source: Arc::new(Vec::new()),
                data_address: 0,
                key_suffix_range: (0, 0),
                value_range: None,
                children_count: 0,
                child_address_length: 0,
                data_offset: 0,
                accessor,
            }),
        }
    }

    pub fn is_empty_tree(&self) -> bool {
        self.inner.address.is_null()
    }

    /// Parses a node view out of `loggable`'s payload (§4.C construction).
    pub fn parse(loggable: &Loggable, accessor: Arc<dyn LogAccessor>) -> Result<Self> {
        let tag = loggable.tag();
        if !tag.is_patricia_node() {
            return Err(Error::InvalidAddress);
        }

        let source = loggable.data_cursor();
        let data_address = loggable.data_address();
        let mut cursor = source.clone();

        let key_suffix_len = varint::decode(&mut cursor)? as usize;
        let key_suffix_start = cursor.position();
        cursor.skip(key_suffix_len);
        let key_suffix_range = (key_suffix_start, key_suffix_start + key_suffix_len);

        let value_range = if tag.has_value() {
            let value_len = varint::decode(&mut cursor)? as usize;
            let value_start = cursor.position();
            cursor.skip(value_len);
            Some((value_start, value_start + value_len))
        } else {
            None
        };

        let (children_count, child_address_length, data_offset) = if tag.has_children() {
            let (count, len) = varint::decode_children_header(&mut cursor)?;
            if !(1..=8).contains(&len) {
                return Err(Error::InvalidAddressLength(len as u32));
            }
            (count, len, cursor.position() - data_address)
        } else {
            (0, 0, cursor.position() - data_address)
        };

        Ok(PatriciaNode {
            inner: Arc::new(Inner {
                address: loggable.address(),
                source: source_bytes(&source),
                data_address,
                key_suffix_range,
                value_range,
                children_count,
                child_address_length,
                data_offset,
                accessor,
            }),
        })
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn children_count(&self) -> u16 {
        self.inner.children_count
    }

    pub fn key_suffix(&self) -> &[u8] {
        let (start, end) = self.inner.key_suffix_range;
        &self.inner.source.as_slice()[start..end]
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.inner.value_range.map(|(start, end)| &self.inner.source.as_slice()[start..end])
    }

    pub fn data_offset(&self) -> usize {
        self.inner.data_offset
    }

    fn entry_len(&self) -> usize {
        self.inner.child_address_length as usize + 1
    }

    fn entry_absolute_offset(&self, index: u16) -> usize {
        self.inner.data_address + self.inner.data_offset + index as usize * self.entry_len()
    }

    fn first_byte_at(&self, index: u16) -> u8 {
        self.inner.source.byte_at(self.entry_absolute_offset(index))
    }

    fn read_entry(&self, index: u16) -> ChildReference {
        let offset = self.entry_absolute_offset(index);
        let first_byte = self.inner.source.byte_at(offset);
        let mut cursor = ByteCursor::at(self.inner.source.clone(), offset + 1);
        let addr = cursor.next_long(self.inner.child_address_length).expect("child table bounds checked at parse time");
        ChildReference { first_byte, suffix_address: Address(addr) }
    }

    /// Binary search the child table by byte key `b` (unsigned). On hit,
    /// loads and returns the child node via the tree façade; `None` on
    /// miss.
    pub fn get_child(&self, b: u8) -> Result<Option<PatriciaNode>> {
        match self.binary_search(b) {
            Some(index) => {
                let entry = self.read_entry(index);
                Ok(Some(load_node(&self.inner.accessor, entry.suffix_address)?))
            }
            None => Ok(None),
        }
    }

    /// Classic bounded binary search; returns the index of the entry whose
    /// first byte equals `b`, if any.
    fn binary_search(&self, b: u8) -> Option<u16> {
        if self.inner.children_count == 0 {
            return None;
        }
        let mut low: i32 = 0;
        let mut high: i32 = self.inner.children_count as i32 - 1;
        while low <= high {
            let mid = ((low as u32 + high as u32) >> 1) as i32;
            let actual = self.first_byte_at(mid as u16);
            let cmp = (actual as i32 & 0xff) - (b as i32 & 0xff);
            if cmp == 0 {
                return Some(mid as u16);
            } else if cmp < 0 {
                low = mid + 1;
            } else {
                high = mid - 1;
            }
        }
        None
    }

    /// Modified binary search locating the first index whose byte is
    /// strictly greater than `b`, per §4.C's `getChildrenRange` contract:
    /// `low=-1, high=count`, midpoint `(low+high+1)/2`, moving
    /// `high <- mid` while `actual > b`.
    fn first_greater_than(&self, b: u8) -> u16 {
        let mut low: i32 = -1;
        let mut high: i32 = self.inner.children_count as i32;
        while high - low > 1 {
            let mid = (low + high + 1) / 2;
            let actual = self.first_byte_at(mid as u16);
            if (actual as i32 & 0xff) > (b as i32 & 0xff) {
                high = mid;
            } else {
                low = mid;
            }
        }
        high as u16
    }

    /// Forward iterator over all children, empty-safe.
    pub fn get_children(&self) -> ChildIterator {
        ChildIterator::new(self.clone(), -1)
    }

    /// Iterator positioned at the child whose byte equals `b`, or a
    /// genuinely empty iterator if absent (neither `next()` nor `prev()`
    /// yields anything, unlike the "one past the end" position
    /// `get_children_last()` uses, which intentionally still supports
    /// `prev()`).
    pub fn get_children_at(&self, b: u8) -> ChildIterator {
        match self.binary_search(b) {
            Some(index) => ChildIterator::new(self.clone(), index as i32 - 1),
            None => ChildIterator::empty(self.clone()),
        }
    }

    /// Iterator positioned at the first child whose byte is strictly
    /// greater than `b`; genuinely empty if none exists (see
    /// [`Self::get_children_at`] for why that must not reuse the "one past
    /// the end" position).
    pub fn get_children_range(&self, b: u8) -> ChildIterator {
        let first = self.first_greater_than(b);
        if first == self.inner.children_count {
            ChildIterator::empty(self.clone())
        } else {
            ChildIterator::new(self.clone(), first as i32 - 1)
        }
    }

    /// Iterator positioned one past the last child, so `prev()` yields the
    /// last element.
    pub fn get_children_last(&self) -> ChildIterator {
        ChildIterator::new(self.clone(), self.inner.children_count as i32)
    }
}

fn source_bytes(cursor: &ByteCursor) -> Arc<dyn RandomAccessBytes> {
    // `ByteCursor` already owns an `Arc` clone of the backing source; this
    // recovers it so the node view can slice directly instead of paying
    // for a fresh cursor on every field access.
    cursor.source_arc()
}

/// Bidirectional iterator over a node's child table (§4.C).
///
/// Forward steps continue reading from a single streaming cursor; a
/// backward step re-seeks a fresh cursor at the target offset, which is
/// the one place iteration pays for a seek.
pub struct ChildIterator {
    parent: PatriciaNode,
    /// Index of the last-yielded element; `-1` before the first element,
    /// `children_count` one past the last.
    index: i32,
    /// A cursor ready to read the entry at `index + 1`, reused across
    /// consecutive `next()` calls.
    cursor: Option<ByteCursor>,
    /// True for an iterator built over a byte that has no matching/greater
    /// child: `index` is meaningless in this state, and both directions
    /// must report empty regardless of its value.
    empty: bool,
}

impl ChildIterator {
    fn new(parent: PatriciaNode, index: i32) -> Self {
        ChildIterator { parent, index, cursor: None, empty: false }
    }

    /// A genuinely empty iterator: `next()` and `prev()` both always
    /// return `None`, distinct from the "one past the end" position that
    /// `get_children_last()` uses (which still supports `prev()`).
    fn empty(parent: PatriciaNode) -> Self {
        ChildIterator { parent, index: -1, cursor: None, empty: true }
    }

    pub fn has_next(&self) -> bool {
        !self.empty && self.index < self.parent.inner.children_count as i32 - 1
    }

    pub fn has_prev(&self) -> bool {
        !self.empty && self.index > 0
    }

    /// The parent node this iterator was built from.
    pub fn parent(&self) -> &PatriciaNode {
        &self.parent
    }

    fn cursor_at(&self, index: u16) -> ByteCursor {
        ByteCursor::at(self.parent.inner.source.clone(), self.parent.entry_absolute_offset(index))
    }

    /// Advances by one and reads the next `(firstByte, suffixAddress)`.
    pub fn next(&mut self) -> Option<ChildReference> {
        if !self.has_next() {
            return None;
        }
        let new_index = self.index + 1;
        let mut cursor = self.cursor.take().unwrap_or_else(|| self.cursor_at(new_index as u16));
        let first_byte = cursor.next().ok()?;
        let addr = cursor.next_long(self.parent.inner.child_address_length).ok()?;
        self.index = new_index;
        self.cursor = Some(cursor);
        Some(ChildReference { first_byte, suffix_address: Address(addr) })
    }

    /// Decrements and re-seeks a fresh cursor at
    /// `dataOffset + index * (childAddressLength + 1)`.
    pub fn prev(&mut self) -> Option<ChildReference> {
        if !self.has_prev() {
            return None;
        }
        let new_index = self.index - 1;
        let mut cursor = self.cursor_at(new_index as u16);
        let first_byte = cursor.next().ok()?;
        let addr = cursor.next_long(self.parent.inner.child_address_length).ok()?;
        self.index = new_index;
        self.cursor = Some(cursor);
        Some(ChildReference { first_byte, suffix_address: Address(addr) })
    }

    /// In-place variant of [`next`](Self::next): mutates `out` instead of
    /// allocating a new `ChildReference`. The caller promises not to
    /// retain whatever `out` held before the call.
    pub fn next_in_place(&mut self, out: &mut ChildReference) -> bool {
        match self.next() {
            Some(r) => {
                *out = r;
                true
            }
            None => false,
        }
    }

    /// In-place variant of [`prev`](Self::prev).
    pub fn prev_in_place(&mut self, out: &mut ChildReference) -> bool {
        match self.prev() {
            Some(r) => {
                *out = r;
                true
            }
            None => false,
        }
    }

    /// Always fails: the immutable view never mutates. Callers needing
    /// mutation must use the (out of scope) write path.
    pub fn remove(&mut self) -> Result<()> {
        Err(Error::NotSupported)
    }
}
