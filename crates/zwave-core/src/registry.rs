//! Node table shared between the controller and the host

use crate::device::ZWaveNode;
use dashmap::DashMap;
use std::sync::Arc;

/// Known nodes keyed by node id
///
/// Entries are only ever added; a node id maps to one node for the
/// lifetime of the network.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    nodes: Arc<DashMap<u8, ZWaveNode>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node unless its id is already taken; returns true if inserted
    pub fn insert_if_absent(&self, node: ZWaveNode) -> bool {
        match self.nodes.entry(node.node_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(node);
                true
            }
        }
    }

    /// Modify a node in place; returns None if the node is unknown
    pub fn update<R>(&self, node_id: u8, f: impl FnOnce(&mut ZWaveNode) -> R) -> Option<R> {
        self.nodes.get_mut(&node_id).map(|mut entry| f(entry.value_mut()))
    }

    #[must_use]
    pub fn get(&self, node_id: u8) -> Option<ZWaveNode> {
        self.nodes.get(&node_id).map(|r| r.value().clone())
    }

    /// All nodes ordered by node id
    #[must_use]
    pub fn list(&self) -> Vec<ZWaveNode> {
        let mut nodes: Vec<ZWaveNode> = self.nodes.iter().map(|r| r.value().clone()).collect();
        nodes.sort_by_key(|node| node.node_id);
        nodes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
