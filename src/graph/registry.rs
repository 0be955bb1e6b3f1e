//! Live mirror of the server's node/port graph.
//!
//! Fed by the backend adapter from inside the event pump, read by every
//! query through cloned snapshots. Nodes and free-floating ports share one
//! table behind one lock, so attaching a port to its node is a single
//! atomic step.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::types::*;

/// Where a port ended up after an info update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPlacement {
    /// Moved into the owning node's port map
    Attached(ObjectId),
    /// Still free-floating (parent unknown or untracked)
    Floating,
    /// Port is not tracked as free-floating (removed, or already attached)
    Unknown,
}

#[derive(Debug, Default)]
struct Tables {
    nodes: HashMap<ObjectId, Node>,
    /// Ports not (yet) attached to a tracked node
    ports: HashMap<ObjectId, Port>,
}

#[derive(Debug, Default)]
pub struct GraphRegistry {
    tables: RwLock<Tables>,
}

impl GraphRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // ── Discovery events ───────────────────────────────────────────────────

    pub fn on_node_added(&self, id: ObjectId) {
        let mut tables = self.tables.write();
        tables.nodes.insert(id, Node::new(id));
        log::debug!("Node added: id={}", id);
    }

    /// Merge node info. Unknown ids (already removed) are ignored.
    pub fn on_node_info(&self, id: ObjectId, props: &NodeProps) {
        let mut tables = self.tables.write();
        if let Some(node) = tables.nodes.get_mut(&id) {
            node.merge(props);
            log::debug!(
                "Node info: id={} pid={:?} name={:?} binary={:?}",
                id,
                node.pid,
                node.name,
                node.application_binary
            );
        }
    }

    pub fn on_port_added(&self, id: ObjectId) {
        let mut tables = self.tables.write();
        tables.ports.insert(id, Port::new(id));
        log::debug!("Port added: id={}", id);
    }

    /// Merge port info and attach the port to its parent if that node is
    /// tracked.
    ///
    /// Attachment only happens here: a port whose parent shows up later
    /// stays free-floating.
    pub fn on_port_info(&self, id: ObjectId, props: &PortProps) -> PortPlacement {
        let mut tables = self.tables.write();

        let Some(port) = tables.ports.get_mut(&id) else {
            return PortPlacement::Unknown;
        };
        port.merge(props);
        let parent = port.parent_node;

        let Some(parent) = parent.filter(|p| tables.nodes.contains_key(p)) else {
            log::debug!("Port {} stays free-floating (parent {:?})", id, parent);
            return PortPlacement::Floating;
        };

        if let Some(port) = tables.ports.remove(&id)
            && let Some(node) = tables.nodes.get_mut(&parent)
        {
            log::debug!(
                "Port {} attached to node {} (dir={:?} side={:?})",
                id,
                parent,
                port.direction,
                port.side
            );
            node.ports.insert(id, port);
        }
        PortPlacement::Attached(parent)
    }

    /// Forget a node or free-floating port. Ports attached to a removed node
    /// go with it.
    pub fn on_global_removed(&self, id: ObjectId) {
        let mut tables = self.tables.write();
        let node = tables.nodes.remove(&id);
        let port = tables.ports.remove(&id);
        if node.is_some() || port.is_some() {
            log::debug!(
                "Global removed: id={} (node={} port={})",
                id,
                node.is_some(),
                port.is_some()
            );
        }
    }

    pub fn clear(&self) {
        let mut tables = self.tables.write();
        tables.nodes.clear();
        tables.ports.clear();
    }

    // ── Snapshots ──────────────────────────────────────────────────────────

    pub fn get_node(&self, id: ObjectId) -> Option<Node> {
        self.tables.read().nodes.get(&id).cloned()
    }

    pub fn contains_node(&self, id: ObjectId) -> bool {
        self.tables.read().nodes.contains_key(&id)
    }

    /// All tracked nodes, ordered by id.
    pub fn get_all_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self.tables.read().nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        nodes
    }

    pub fn get_free_port(&self, id: ObjectId) -> Option<Port> {
        self.tables.read().ports.get(&id).cloned()
    }

    pub fn free_port_count(&self) -> usize {
        self.tables.read().ports.len()
    }

    /// Free-floating ports whose alias carries `marker`, in one direction,
    /// ordered by id.
    pub fn marked_ports(&self, marker: &str, direction: PortDirection) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .tables
            .read()
            .ports
            .values()
            .filter(|p| p.direction == Some(direction) && p.is_marked(marker))
            .cloned()
            .collect();
        ports.sort_by_key(|p| p.id);
        ports
    }
}
