//! Tree read façade (§4.D): resolves a log address to an immutable node
//! view, and tracks the current root.

use std::sync::Arc;

use crate::error::Result;
use crate::log::{Address, LogAccessor};

use super::node::PatriciaNode;

/// Loads the node at `address` via `accessor`.
///
/// Fails with [`crate::error::Error::InvalidAddress`] if the address does
/// not refer to a Patricia-node loggable, or
/// [`crate::error::Error::InvalidAddressLength`] if the node's encoded
/// `childAddressLength` is out of range. `NULL_ADDRESS` always resolves to
/// the synthetic empty-tree node.
///
/// Shared by [`Tree::load`] and [`PatriciaNode::get_child`](super::node::PatriciaNode::get_child),
/// which both need to resolve a decoded address to a fresh node view
/// without owning a second accessor.
pub(crate) fn load_node(accessor: &Arc<dyn LogAccessor>, address: Address) -> Result<PatriciaNode> {
    if address.is_null() {
        return Ok(PatriciaNode::empty(accessor.clone()));
    }
    let loggable = accessor.get_loggable(address)?;
    PatriciaNode::parse(&loggable, accessor.clone())
}

/// The tree read façade: loads nodes given a log address, and exposes the
/// current root.
pub struct Tree {
    accessor: Arc<dyn LogAccessor>,
    root_address: Address,
}

impl Tree {
    pub fn new(accessor: Arc<dyn LogAccessor>, root_address: Address) -> Self {
        Tree { accessor, root_address }
    }

    /// Loads a node given its log address.
    pub fn load(&self, address: Address) -> Result<PatriciaNode> {
        load_node(&self.accessor, address)
    }

    /// The tree's root node.
    pub fn root(&self) -> Result<PatriciaNode> {
        self.load(self.root_address)
    }

    pub fn root_address(&self) -> Address {
        self.root_address
    }
}
