//! The Patricia-trie read path (§3, §4.C, §4.D): on-disk node layout,
//! zero-copy node view, child lookup and iteration, and the tree façade
//! that ties node loading to a [`crate::log::LogAccessor`].

mod node;
mod tree;

pub use node::{ChildIterator, ChildReference, PatriciaNode};
pub use tree::Tree;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::cursor::RandomAccessBytes;
    use crate::error::Error;
    use crate::log::{Address, Loggable, LogAccessor, TypeTag};
    use crate::varint;

    use super::*;

    /// An in-memory log: a flat `Vec<u8>` plus a table mapping addresses
    /// to `(tag, data_offset)`, standing in for the real append-only log
    /// accessor per §6.
    struct FakeLog {
        bytes: Arc<Vec<u8>>,
        records: std::collections::HashMap<u64, (TypeTag, usize)>,
    }

    impl LogAccessor for FakeLog {
        fn get_loggable(&self, address: Address) -> crate::error::Result<Loggable> {
            let (tag, data_offset) = *self.records.get(&address.0).ok_or(Error::InvalidAddress)?;
            let source: Arc<dyn RandomAccessBytes> = self.bytes.clone();
            Ok(Loggable::new(address, tag, data_offset, source))
        }
    }

    struct NodeBuilder {
        bytes: Vec<u8>,
    }

    impl NodeBuilder {
        fn new() -> Self {
            NodeBuilder { bytes: Vec::new() }
        }

        /// Appends one encoded node (without its type-tag byte, which the
        /// fake log tracks out of band) and returns its data offset.
        fn push_node(&mut self, key_suffix: &[u8], value: Option<&[u8]>, children: &[(u8, u64)], child_address_length: u8) -> usize {
            let offset = self.bytes.len();
            self.bytes.extend(varint::encode(key_suffix.len() as u64));
            self.bytes.extend_from_slice(key_suffix);
            if let Some(v) = value {
                self.bytes.extend(varint::encode(v.len() as u64));
                self.bytes.extend_from_slice(v);
            }
            if !children.is_empty() {
                self.bytes.extend(varint::encode_children_header(children.len() as u16, child_address_length));
                for &(byte, addr) in children {
                    self.bytes.push(byte);
                    let addr_bytes = addr.to_be_bytes();
                    self.bytes.extend_from_slice(&addr_bytes[8 - child_address_length as usize..]);
                }
            }
            offset
        }
    }

    fn build_scenario() -> (FakeLog, Address) {
        let mut builder = NodeBuilder::new();
        let mut records = std::collections::HashMap::new();

        // Five leaf children at addresses 100..500, each a trivial node
        // with an empty key suffix and no children of their own.
        for addr in [100u64, 200, 300, 400, 500] {
            let offset = builder.push_node(&[], None, &[], 0);
            records.insert(addr, (TypeTag::new(true, false, false, false), offset));
        }

        let children = [(0x02u8, 100u64), (0x10, 200), (0x7F, 300), (0x80, 400), (0xFE, 500)];
        let root_offset = builder.push_node(b"root-suffix", None, &children, 2);
        records.insert(1, (TypeTag::new(true, false, true, true), root_offset));

        (FakeLog { bytes: Arc::new(builder.bytes), records }, Address(1))
    }

    #[test]
    fn child_binary_search_scenario() {
        let (log, root_addr) = build_scenario();
        let accessor: Arc<dyn LogAccessor> = Arc::new(log);
        let tree = Tree::new(accessor, root_addr);
        let root = tree.root().unwrap();

        assert_eq!(root.children_count(), 5);

        let hit = root.get_child(0x7F).unwrap().expect("0x7F must be present");
        assert_eq!(hit.address(), Address(300));

        assert!(root.get_child(0x11).unwrap().is_none());

        let mut range = root.get_children_range(0x10);
        let first = range.next().unwrap();
        assert_eq!(first, ChildReference { first_byte: 0x7F, suffix_address: Address(300) });

        let mut empty_range = root.get_children_range(0xFE);
        assert!(empty_range.next().is_none());
        assert!(empty_range.prev().is_none());

        let mut miss_at = root.get_children_at(0x11);
        assert!(miss_at.next().is_none());
        assert!(miss_at.prev().is_none());

        let mut last = root.get_children_last();
        let tail = last.prev().unwrap();
        assert_eq!(tail, ChildReference { first_byte: 0xFE, suffix_address: Address(500) });
    }

    #[test]
    fn forward_and_backward_iteration_agree() {
        let (log, root_addr) = build_scenario();
        let accessor: Arc<dyn LogAccessor> = Arc::new(log);
        let tree = Tree::new(accessor, root_addr);
        let root = tree.root().unwrap();

        let mut forward = root.get_children();
        let mut collected = Vec::new();
        while let Some(r) = forward.next() {
            collected.push(r);
        }
        assert_eq!(collected.len(), 5);
        assert_eq!(collected[0].first_byte, 0x02);
        assert_eq!(collected[4].first_byte, 0xFE);

        // prev() after reaching the end walks back in reverse order.
        let mut backward = Vec::new();
        while let Some(r) = forward.prev() {
            backward.push(r);
        }
        let mut expected = collected.clone();
        expected.pop(); // forward already consumed and returned the last element
        expected.reverse();
        assert_eq!(backward, expected);
    }

    #[test]
    fn prev_after_next_round_trips() {
        let (log, root_addr) = build_scenario();
        let accessor: Arc<dyn LogAccessor> = Arc::new(log);
        let tree = Tree::new(accessor, root_addr);
        let root = tree.root().unwrap();

        let mut it = root.get_children();
        let a = it.next().unwrap();
        let b = it.next().unwrap();
        assert_ne!(a, b);
        let back = it.prev().unwrap();
        assert_eq!(back, b);
        let back2 = it.prev().unwrap();
        assert_eq!(back2, a);
    }

    #[test]
    fn remove_is_not_supported() {
        let (log, root_addr) = build_scenario();
        let accessor: Arc<dyn LogAccessor> = Arc::new(log);
        let tree = Tree::new(accessor, root_addr);
        let root = tree.root().unwrap();
        let mut it = root.get_children();
        assert!(matches!(it.remove(), Err(Error::NotSupported)));
    }

    #[test]
    fn empty_tree_short_circuits() {
        let log = FakeLog { bytes: Arc::new(Vec::new()), records: std::collections::HashMap::new() };
        let accessor: Arc<dyn LogAccessor> = Arc::new(log);
        let tree = Tree::new(accessor, Address::NULL);
        let root = tree.root().unwrap();
        assert!(root.is_empty_tree());
        assert_eq!(root.children_count(), 0);
        assert!(root.get_child(5).unwrap().is_none());
        assert!(root.get_children().next().is_none());
    }

    #[test]
    fn node_with_no_children_has_no_child_table() {
        let (log, root_addr) = build_scenario();
        let accessor: Arc<dyn LogAccessor> = Arc::new(log);
        let tree = Tree::new(accessor, root_addr);
        let leaf = tree.load(Address(100)).unwrap();
        assert_eq!(leaf.children_count(), 0);
        assert!(leaf.get_children().next().is_none());
    }
}
