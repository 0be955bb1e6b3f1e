//! In-memory sound server for tests.
//!
//! Behaves like the real thing where routing cares: globals, info and
//! removals are queued and only reach the registry when someone syncs;
//! objects answer with their info one round trip after being bound; link
//! and node creation can be made to fail, and round trips can be made to
//! never complete.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, RoutingError};
use crate::graph::{BackendKind, GraphRegistry, NodeProps, ObjectId, PortDirection, PortProps};
use crate::link::{LinkDriver, LinkId};
use crate::sync::{DoneListener, RoundTrip, SyncBarrier};

const FIRST_SERVER_ID: ObjectId = 1000;

#[derive(Debug, Clone)]
enum SimEvent {
    NodeGlobal { id: ObjectId, name: String },
    PortGlobal { id: ObjectId },
    NodeInfo(ObjectId, NodeProps),
    PortInfo(ObjectId, PortProps),
    GlobalRemoved(ObjectId),
    Done(i32),
}

struct SimServer {
    registry: Arc<GraphRegistry>,
    done: DoneListener,
    marker: String,
    queue: VecDeque<SimEvent>,
    /// Info held back until the client binds the object
    unbound: HashMap<ObjectId, Vec<SimEvent>>,
    bound_this_round: bool,
    next_seq: i32,
    next_id: ObjectId,
    node_ports: HashMap<ObjectId, Vec<ObjectId>>,
    port_dirs: HashMap<ObjectId, PortDirection>,
    links: BTreeMap<LinkId, (ObjectId, ObjectId)>,
    own_node: Option<ObjectId>,
    own_ports: Vec<ObjectId>,
    fail_links: bool,
    failing_ports: HashSet<ObjectId>,
    fail_nodes: bool,
    stalled: bool,
    shut_down: bool,
}

impl SimServer {
    fn alloc_id(&mut self) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn announce(&mut self, global: SimEvent, id: ObjectId, info: SimEvent) {
        self.queue.push_back(global);
        self.unbound.insert(id, vec![info]);
    }

    /// Info for a bound object goes straight to the queue.
    fn send_info(&mut self, id: ObjectId, info: SimEvent) {
        match self.unbound.get_mut(&id) {
            Some(pending) => pending.push(info),
            None => self.queue.push_back(info),
        }
    }

    fn add_node(&mut self, id: ObjectId, name: &str, props: NodeProps) {
        self.node_ports.entry(id).or_default();
        self.announce(
            SimEvent::NodeGlobal {
                id,
                name: name.to_string(),
            },
            id,
            SimEvent::NodeInfo(id, props),
        );
    }

    fn add_port(
        &mut self,
        node: ObjectId,
        direction: PortDirection,
        port_name: &str,
        alias: String,
    ) -> ObjectId {
        let id = self.alloc_id();
        self.node_ports.entry(node).or_default().push(id);
        self.port_dirs.insert(id, direction);
        let props = PortProps {
            direction: Some(direction),
            parent_node: Some(node),
            side: port_name.chars().last(),
            alias: Some(alias),
        };
        self.announce(SimEvent::PortGlobal { id }, id, SimEvent::PortInfo(id, props));
        id
    }

    fn remove(&mut self, id: ObjectId) {
        if let Some(ports) = self.node_ports.remove(&id) {
            for port in ports {
                self.remove(port);
            }
        }
        self.port_dirs.remove(&id);
        self.unbound.remove(&id);
        self.links
            .retain(|link, (out, inp)| *link != id && *out != id && *inp != id);
        self.queue.push_back(SimEvent::GlobalRemoved(id));
    }

    fn link(&mut self, output: ObjectId, input: ObjectId) -> Result<LinkId> {
        if self.fail_links
            || self.failing_ports.contains(&output)
            || self.failing_ports.contains(&input)
        {
            return Err(RoutingError::Link(format!(
                "link-factory refused {} -> {}",
                output, input
            )));
        }
        match (self.port_dirs.get(&output), self.port_dirs.get(&input)) {
            (Some(PortDirection::Output), Some(PortDirection::Input)) => {}
            _ => {
                return Err(RoutingError::Link(format!(
                    "invalid port pair {} -> {}",
                    output, input
                )));
            }
        }
        let id = self.alloc_id();
        self.links.insert(id, (output, input));
        Ok(id)
    }

    fn handle(&mut self, event: SimEvent) {
        match event {
            SimEvent::NodeGlobal { id, name } => {
                if !self.marker.is_empty() && name.contains(&self.marker) {
                    return;
                }
                self.registry.on_node_added(id);
                self.bind(id);
            }
            SimEvent::PortGlobal { id } => {
                self.registry.on_port_added(id);
                self.bind(id);
            }
            SimEvent::NodeInfo(id, props) => self.registry.on_node_info(id, &props),
            SimEvent::PortInfo(id, props) => {
                self.registry.on_port_info(id, &props);
            }
            SimEvent::GlobalRemoved(id) => self.registry.on_global_removed(id),
            SimEvent::Done(seq) => self.done.notify(seq),
        }
    }

    fn bind(&mut self, id: ObjectId) {
        if let Some(pending) = self.unbound.remove(&id) {
            self.queue.extend(pending);
            self.bound_this_round = true;
        }
    }
}

impl RoundTrip for SimServer {
    fn request(&mut self) -> Result<i32> {
        self.next_seq += 1;
        if !self.stalled {
            self.queue.push_back(SimEvent::Done(self.next_seq));
        }
        Ok(self.next_seq)
    }

    fn dispatch(&mut self, timeout: Duration) -> Result<()> {
        match self.queue.pop_front() {
            Some(event) => self.handle(event),
            None => std::thread::sleep(timeout.min(Duration::from_millis(1))),
        }
        Ok(())
    }

    fn round_completed(&mut self) -> bool {
        std::mem::take(&mut self.bound_this_round)
    }
}

/// A [`LinkDriver`] over a simulated server.
pub struct MockDriver {
    server: Mutex<SimServer>,
    barrier: SyncBarrier,
    registry: Arc<GraphRegistry>,
}

impl MockDriver {
    pub fn new(marker: &str) -> Self {
        Self::with_timeout(marker, Some(Duration::from_millis(200)))
    }

    pub fn with_timeout(marker: &str, timeout: Option<Duration>) -> Self {
        let registry = GraphRegistry::new();
        let barrier = SyncBarrier::new(timeout);
        let server = SimServer {
            registry: registry.clone(),
            done: barrier.listener(),
            marker: marker.to_string(),
            queue: VecDeque::new(),
            unbound: HashMap::new(),
            bound_this_round: false,
            next_seq: 0,
            next_id: FIRST_SERVER_ID,
            node_ports: HashMap::new(),
            port_dirs: HashMap::new(),
            links: BTreeMap::new(),
            own_node: None,
            own_ports: Vec::new(),
            fail_links: false,
            failing_ports: HashSet::new(),
            fail_nodes: false,
            stalled: false,
            shut_down: false,
        };
        Self {
            server: Mutex::new(server),
            barrier,
            registry,
        }
    }

    pub fn registry(&self) -> Arc<GraphRegistry> {
        self.registry.clone()
    }

    // ── Graph scripting ────────────────────────────────────────────────────

    /// An application node with a known binary.
    pub fn add_app(&self, id: ObjectId, binary: &str) -> ObjectId {
        let props = NodeProps {
            pid: Some(id + 40000),
            name: Some(binary.rsplit('/').next().unwrap_or(binary).to_string()),
            application_binary: Some(binary.to_string()),
        };
        self.server.lock().add_node(id, binary, props);
        id
    }

    /// A device node: no application binary.
    pub fn add_device(&self, id: ObjectId, name: &str) -> ObjectId {
        let props = NodeProps {
            name: Some(name.to_string()),
            ..Default::default()
        };
        self.server.lock().add_node(id, name, props);
        id
    }

    pub fn set_app_name(&self, id: ObjectId, name: &str) {
        let props = NodeProps {
            name: Some(name.to_string()),
            ..Default::default()
        };
        self.server.lock().send_info(id, SimEvent::NodeInfo(id, props));
    }

    /// A port on `node` whose name ends in `side`. The node does not have
    /// to exist (yet).
    pub fn add_app_port(&self, node: ObjectId, direction: PortDirection, side: char) -> ObjectId {
        let prefix = match direction {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
        };
        let name = format!("{}_{}", prefix, side);
        self.server
            .lock()
            .add_port(node, direction, &name, format!("app-{}:{}", node, name))
    }

    /// A port on our own (marker-named, never tracked) node.
    pub fn add_own_port(&self, direction: PortDirection, side: char) -> ObjectId {
        let mut server = self.server.lock();
        let sink_name = format!("{}_sink", server.marker);
        let node = match server.own_node {
            Some(node) => node,
            None => {
                let node = server.alloc_id();
                server.add_node(node, &sink_name, NodeProps::default());
                server.own_node = Some(node);
                node
            }
        };
        let prefix = match direction {
            PortDirection::Input => "playback",
            PortDirection::Output => "monitor",
        };
        let name = format!("{}_{}", prefix, side);
        let id = server.add_port(node, direction, &name, format!("{}:{}", sink_name, name));
        server.own_ports.push(id);
        id
    }

    pub fn own_ports(&self) -> Vec<ObjectId> {
        self.server.lock().own_ports.clone()
    }

    /// Remove a node (with its ports and links) or a port.
    pub fn remove(&self, id: ObjectId) {
        self.server.lock().remove(id);
    }

    // ── Failure injection ──────────────────────────────────────────────────

    pub fn fail_links(&self, fail: bool) {
        self.server.lock().fail_links = fail;
    }

    pub fn fail_links_on(&self, port: ObjectId) {
        self.server.lock().failing_ports.insert(port);
    }

    pub fn fail_nodes(&self, fail: bool) {
        self.server.lock().fail_nodes = fail;
    }

    /// Round trips never complete while stalled.
    pub fn stall_sync(&self, stalled: bool) {
        self.server.lock().stalled = stalled;
    }

    // ── Server-side inspection ─────────────────────────────────────────────

    /// `(link, output port, input port)` for every link alive on the server.
    pub fn active_links(&self) -> Vec<(LinkId, ObjectId, ObjectId)> {
        self.server
            .lock()
            .links
            .iter()
            .map(|(id, (out, inp))| (*id, *out, *inp))
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.server.lock().shut_down
    }
}

impl LinkDriver for MockDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::PipeWire
    }

    fn sync(&self) -> Result<()> {
        let mut server = self.server.lock();
        if server.shut_down {
            return Err(RoutingError::Disconnected);
        }
        self.barrier.sync(&mut *server)
    }

    fn create_link(&self, output_port: ObjectId, input_port: ObjectId) -> Result<LinkId> {
        let id = self.server.lock().link(output_port, input_port)?;
        if let Err(e) = self.sync() {
            // Nobody gets the id, so the link must not outlive the call
            self.server.lock().links.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    fn destroy_object(&self, id: ObjectId) -> Result<()> {
        {
            let mut server = self.server.lock();
            if server.shut_down {
                return Err(RoutingError::Disconnected);
            }
            if server.links.remove(&id).is_some() {
                server.queue.push_back(SimEvent::GlobalRemoved(id));
            }
        }
        self.sync()
    }

    fn create_node(&self, factory: &str, props: &[(String, String)]) -> Result<ObjectId> {
        let lookup = |key: &str| {
            props
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        let result = {
            let mut server = self.server.lock();
            if server.fail_nodes {
                Err(RoutingError::Link(format!("{} factory refused node", factory)))
            } else {
                let name = lookup("node.name");
                let id = server.alloc_id();
                server.add_node(id, &name, NodeProps::default());
                if lookup("media.class") == "Audio/Sink" {
                    for (direction, port) in [
                        (PortDirection::Input, "playback_FL"),
                        (PortDirection::Input, "playback_FR"),
                        (PortDirection::Output, "monitor_FL"),
                        (PortDirection::Output, "monitor_FR"),
                    ] {
                        server.add_port(id, direction, port, format!("{}:{}", name, port));
                    }
                }
                Ok(id)
            }
        };
        self.sync()?;
        result
    }

    fn shutdown(&self) {
        let mut server = self.server.lock();
        server.shut_down = true;
        server.links.clear();
        server.queue.clear();
    }
}
