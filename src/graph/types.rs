use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Identifier of a server-side graph object (node, port, link).
///
/// Unique only while the object exists; the server reuses ids after removal.
pub type ObjectId = u32;

/// Property keys read from node info.
pub const KEY_APP_PID: &str = "application.process.id";
pub const KEY_APP_NAME: &str = "application.name";
pub const KEY_APP_BINARY: &str = "application.process.binary";

/// Property keys read from port info.
pub const KEY_PORT_NODE: &str = "node.id";
pub const KEY_PORT_NAME: &str = "port.name";
pub const KEY_PORT_ALIAS: &str = "port.alias";

/// Which sound server produced an [`AppHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub enum BackendKind {
    #[default]
    PipeWire,
}

/// Port direction (Input sorts before Output)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

/// One channel endpoint of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Port {
    pub id: ObjectId,
    /// Owning node, unknown until the port info arrives
    pub parent_node: Option<ObjectId>,
    pub direction: Option<PortDirection>,
    /// Last character of the port name (`L`/`1`, `R`/`2`, ...)
    pub side: Option<char>,
    pub alias: String,
}

impl Port {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn is_marked(&self, marker: &str) -> bool {
        !marker.is_empty() && self.alias.contains(marker)
    }

    /// Merge freshly reported fields; absent fields keep their old value.
    pub fn merge(&mut self, props: &PortProps) {
        if let Some(direction) = props.direction {
            self.direction = Some(direction);
        }
        if let Some(parent) = props.parent_node {
            self.parent_node = Some(parent);
        }
        if let Some(side) = props.side {
            self.side = Some(side);
        }
        if let Some(ref alias) = props.alias {
            self.alias = alias.clone();
        }
    }
}

/// One audio graph client (application or device).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Node {
    pub id: ObjectId,
    pub pid: Option<u32>,
    pub name: String,
    pub application_binary: String,
    /// Ports that were attached to this node once their parent was known
    pub ports: HashMap<ObjectId, Port>,
}

impl Node {
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Nodes without a reported binary are devices or internal nodes.
    pub fn is_application(&self) -> bool {
        !self.application_binary.is_empty()
    }

    pub fn has_port(&self, direction: PortDirection) -> bool {
        self.ports.values().any(|p| p.direction == Some(direction))
    }

    pub fn ports_with(&self, direction: PortDirection) -> impl Iterator<Item = &Port> {
        self.ports
            .values()
            .filter(move |p| p.direction == Some(direction))
    }

    pub fn merge(&mut self, props: &NodeProps) {
        if let Some(pid) = props.pid {
            self.pid = Some(pid);
        }
        if let Some(ref name) = props.name {
            self.name = name.clone();
        }
        if let Some(ref binary) = props.application_binary {
            self.application_binary = binary.clone();
        }
    }

    pub fn display_name(&self) -> &str {
        if !self.name.is_empty() {
            &self.name
        } else if !self.application_binary.is_empty() {
            &self.application_binary
        } else {
            "Unknown"
        }
    }
}

/// Node fields carried by one info event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeProps {
    pub pid: Option<u32>,
    pub name: Option<String>,
    pub application_binary: Option<String>,
}

impl NodeProps {
    /// Build from a property lookup (e.g. a PipeWire dict).
    pub fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Self {
        let pid = lookup(KEY_APP_PID).and_then(|v| match v.trim().parse() {
            Ok(pid) => Some(pid),
            Err(_) => {
                log::debug!("Ignoring unparsable {} {:?}", KEY_APP_PID, v);
                None
            }
        });

        Self {
            pid,
            name: lookup(KEY_APP_NAME).map(String::from),
            application_binary: lookup(KEY_APP_BINARY).map(String::from),
        }
    }
}

/// Port fields carried by one info event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortProps {
    pub direction: Option<PortDirection>,
    pub parent_node: Option<ObjectId>,
    pub side: Option<char>,
    pub alias: Option<String>,
}

impl PortProps {
    pub fn from_lookup<'a>(
        direction: Option<PortDirection>,
        lookup: impl Fn(&str) -> Option<&'a str>,
    ) -> Self {
        Self {
            direction,
            // id 0 is the core itself, never a port owner
            parent_node: lookup(KEY_PORT_NODE)
                .and_then(|v| v.trim().parse().ok())
                .filter(|id| *id != 0),
            side: lookup(KEY_PORT_NAME).and_then(|name| name.chars().last()),
            alias: lookup(KEY_PORT_ALIAS).map(String::from),
        }
    }
}

/// An application as exposed to the capability consumers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppHandle {
    pub backend: BackendKind,
    pub pid: Option<u32>,
    pub node_id: ObjectId,
    pub name: String,
    /// Executable path or name
    pub application: String,
}

impl AppHandle {
    pub fn from_node(backend: BackendKind, node: &Node) -> Self {
        Self {
            backend,
            pid: node.pid,
            node_id: node.id,
            name: node.name.clone(),
            application: node.application_binary.clone(),
        }
    }
}
