use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::Duration;

use libspa::utils::Direction;
use pipewire::{
    context::ContextRc,
    core::{CoreRc, Listener as CoreListener, PW_ID_CORE},
    link::Link as PwLink,
    loop_::LoopRef,
    main_loop::MainLoopRc,
    node::{Node as PwNode, NodeListener},
    port::{Port as PwPort, PortListener},
    properties::PropertiesBox,
    proxy::{ProxyListener, ProxyT},
    registry::{Listener as RegistryListener, RegistryRc},
    types::ObjectType,
};

use super::types::PwCommand;
use crate::config::RoutingConfig;
use crate::error::{Result, RoutingError};
use crate::graph::{GraphRegistry, NodeProps, ObjectId, PortDirection, PortProps};
use crate::mailbox::{Alive, AliveGuard};
use crate::sync::{RoundTrip, SyncBarrier};

/// How long the idle loop waits for events before checking the mailbox.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Proxies the thread keeps alive.
#[derive(Default)]
struct Proxies {
    /// Bound for info; dropped when the global goes away
    nodes: HashMap<ObjectId, (PwNode, NodeListener)>,
    ports: HashMap<ObjectId, (PwPort, PortListener)>,
    /// Links we created; dropping the proxy destroys the link
    links: HashMap<ObjectId, PwLink>,
    /// Nodes we created (the null sink)
    created_nodes: Vec<PwNode>,
    bound_this_round: bool,
}

struct Connection {
    mainloop: MainLoopRc,
    core: CoreRc,
    registry: RegistryRc,
    proxies: Rc<RefCell<Proxies>>,
    connected: Rc<Cell<bool>>,
    marker: String,
    _context: ContextRc,
    _core_listener: CoreListener,
    _registry_listener: RegistryListener,
}

/// Drives the loop on behalf of the barrier.
struct Pump<'a> {
    conn: &'a Connection,
    loop_: &'a LoopRef,
}

impl RoundTrip for Pump<'_> {
    fn request(&mut self) -> Result<i32> {
        self.conn
            .core
            .sync(0)
            .map(|seq| seq.seq())
            .map_err(|e| RoutingError::Server(e.to_string()))
    }

    fn dispatch(&mut self, timeout: Duration) -> Result<()> {
        if !self.conn.connected.get() {
            return Err(RoutingError::Disconnected);
        }
        let res = self.loop_.iterate(timeout);
        if res < 0 && res != -libc::EINTR {
            log::warn!("PipeWire loop iteration failed: {}", res);
        }
        Ok(())
    }

    fn round_completed(&mut self) -> bool {
        std::mem::take(&mut self.conn.proxies.borrow_mut().bound_this_round)
    }
}

/// The running thread as seen from outside.
pub struct Started {
    pub cmd_tx: pipewire::channel::Sender<PwCommand>,
    pub thread: std::thread::JoinHandle<()>,
    /// Cleared when the thread exits, however it exits
    pub alive: Alive,
}

/// Spawn the PipeWire thread. Returns once the connection is up, or with
/// the reason it could not be established.
pub fn start(graph: Arc<GraphRegistry>, config: &RoutingConfig) -> Result<Started> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();
    let config = config.clone();
    let alive = Alive::new();
    let guard = alive.guard();

    let handle = std::thread::Builder::new()
        .name("pipewire".into())
        .spawn(move || run_pipewire_thread(graph, config, ready_tx, guard))
        .map_err(|e| RoutingError::Setup(format!("Failed to spawn PipeWire thread: {}", e)))?;

    match ready_rx.recv() {
        Ok(Ok(cmd_tx)) => Ok(Started {
            cmd_tx,
            thread: handle,
            alive,
        }),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(e)
        }
        Err(_) => {
            let _ = handle.join();
            Err(RoutingError::Setup("PipeWire thread exited during setup".into()))
        }
    }
}

fn run_pipewire_thread(
    graph: Arc<GraphRegistry>,
    config: RoutingConfig,
    ready_tx: Sender<Result<pipewire::channel::Sender<PwCommand>>>,
    _alive: AliveGuard,
) {
    pipewire::init();

    let conn = match connect(&graph, &config) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("PipeWire setup failed: {}", e);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let barrier = SyncBarrier::new(config.sync_timeout());
    let _done_listener = conn
        .core
        .add_listener_local()
        .done({
            let listener = barrier.listener();
            move |id, seq| {
                if id == PW_ID_CORE {
                    listener.notify(seq.seq());
                }
            }
        })
        .register();

    // Commands wake the loop; they are queued here and served between
    // iterations, never from inside one.
    let pending: Rc<RefCell<VecDeque<PwCommand>>> = Rc::new(RefCell::new(VecDeque::new()));
    let (cmd_tx, cmd_rx) = pipewire::channel::channel::<PwCommand>();
    let _cmd_receiver = cmd_rx.attach(conn.mainloop.loop_(), {
        let pending = pending.clone();
        move |cmd| pending.borrow_mut().push_back(cmd)
    });

    if ready_tx.send(Ok(cmd_tx)).is_err() {
        return;
    }
    log::info!("PipeWire thread started");

    let loop_ = conn.mainloop.loop_();
    loop_.enter();
    loop {
        let cmd = pending.borrow_mut().pop_front();
        match cmd {
            Some(PwCommand::Shutdown) => break,
            Some(cmd) => handle_command(&conn, &barrier, loop_, cmd),
            None => {
                loop_.iterate(IDLE_WAIT);
            }
        }
        if !conn.connected.get() {
            log::error!("PipeWire connection lost");
            break;
        }
    }
    // Pull in whatever is still sitting in the channel so its reply senders
    // get dropped below.
    loop_.iterate(Duration::ZERO);
    loop_.leave();

    // Dropping the queued commands drops their reply channels, which the
    // callers see as a disconnect.
    pending.borrow_mut().clear();
    log::info!("PipeWire thread stopped");
}

fn connect(graph: &Arc<GraphRegistry>, config: &RoutingConfig) -> Result<Connection> {
    let mainloop = MainLoopRc::new(None)
        .map_err(|e| RoutingError::Setup(format!("Failed to create main loop: {}", e)))?;
    let context = ContextRc::new(&mainloop, None)
        .map_err(|e| RoutingError::Setup(format!("Failed to create context: {}", e)))?;
    let core = context
        .connect_rc(None)
        .map_err(|e| RoutingError::Setup(format!("Failed to connect context: {}", e)))?;
    let registry = core
        .get_registry_rc()
        .map_err(|e| RoutingError::Setup(format!("Failed to get registry: {}", e)))?;

    let proxies: Rc<RefCell<Proxies>> = Rc::new(RefCell::new(Proxies::default()));
    let connected = Rc::new(Cell::new(true));

    let core_listener = core
        .add_listener_local()
        .error({
            let connected = connected.clone();
            move |id, seq, res, message| {
                log::error!(
                    "PipeWire error on object {} (seq {}, res {}): {}",
                    id,
                    seq,
                    res,
                    message
                );
                if id == PW_ID_CORE && res == -libc::EPIPE {
                    connected.set(false);
                }
            }
        })
        .register();

    let registry_listener = registry
        .add_listener_local()
        .global({
            let graph = graph.clone();
            let registry = registry.clone();
            let proxies = proxies.clone();
            let config = config.clone();

            move |global| match global.type_ {
                ObjectType::Node => {
                    let name = global
                        .props
                        .as_ref()
                        .and_then(|p| p.get("node.name"))
                        .unwrap_or_default();
                    if config.is_own_node(name) {
                        log::debug!("Skipping own node {} ({})", global.id, name);
                        return;
                    }

                    let node: PwNode = match registry.bind(global) {
                        Ok(node) => node,
                        Err(e) => {
                            log::warn!("Failed to bind node {}: {}", global.id, e);
                            return;
                        }
                    };
                    graph.on_node_added(global.id);

                    let listener = node
                        .add_listener_local()
                        .info({
                            let graph = graph.clone();
                            move |info| {
                                let props = info.props();
                                let node_props =
                                    NodeProps::from_lookup(|k| props.and_then(|p| p.get(k)));
                                graph.on_node_info(info.id(), &node_props);
                            }
                        })
                        .register();

                    let mut proxies = proxies.borrow_mut();
                    proxies.nodes.insert(global.id, (node, listener));
                    proxies.bound_this_round = true;
                }
                ObjectType::Port => {
                    let port: PwPort = match registry.bind(global) {
                        Ok(port) => port,
                        Err(e) => {
                            log::warn!("Failed to bind port {}: {}", global.id, e);
                            return;
                        }
                    };
                    graph.on_port_added(global.id);

                    let listener = port
                        .add_listener_local()
                        .info({
                            let graph = graph.clone();
                            move |info| {
                                let direction = match info.direction() {
                                    Direction::Input => Some(PortDirection::Input),
                                    Direction::Output => Some(PortDirection::Output),
                                    #[allow(unreachable_patterns)]
                                    _ => None,
                                };
                                let props = info.props();
                                let port_props = PortProps::from_lookup(direction, |k| {
                                    props.and_then(|p| p.get(k))
                                });
                                graph.on_port_info(info.id(), &port_props);
                            }
                        })
                        .register();

                    let mut proxies = proxies.borrow_mut();
                    proxies.ports.insert(global.id, (port, listener));
                    proxies.bound_this_round = true;
                }
                _ => {}
            }
        })
        .global_remove({
            let graph = graph.clone();
            let proxies = proxies.clone();

            move |id| {
                graph.on_global_removed(id);
                let mut proxies = proxies.borrow_mut();
                proxies.nodes.remove(&id);
                proxies.ports.remove(&id);
                proxies.links.remove(&id);
            }
        })
        .register();

    Ok(Connection {
        mainloop,
        core,
        registry,
        proxies,
        connected,
        marker: config.marker.clone(),
        _context: context,
        _core_listener: core_listener,
        _registry_listener: registry_listener,
    })
}

fn handle_command(conn: &Connection, barrier: &SyncBarrier, loop_: &LoopRef, cmd: PwCommand) {
    let mut pump = Pump { conn, loop_ };
    match cmd {
        PwCommand::Sync { reply } => {
            let _ = reply.send(barrier.sync(&mut pump));
        }
        PwCommand::CreateLink {
            output_port_id,
            input_port_id,
            reply,
        } => {
            let _ = reply.send(create_link(
                conn,
                barrier,
                &mut pump,
                output_port_id,
                input_port_id,
            ));
        }
        PwCommand::DestroyObject { id, reply } => {
            let _ = conn.registry.destroy_global(id);
            conn.proxies.borrow_mut().links.remove(&id);
            let _ = reply.send(barrier.sync(&mut pump));
        }
        PwCommand::CreateNode {
            factory,
            props,
            reply,
        } => {
            let _ = reply.send(create_node(conn, barrier, &mut pump, &factory, &props));
        }
        PwCommand::Shutdown => {}
    }
}

/// Outcome slot filled by a proxy's `bound`/`error` events.
type Outcome = Rc<RefCell<Option<Result<ObjectId>>>>;

fn watch_proxy(proxy: &impl ProxyT, what: &'static str) -> (Outcome, ProxyListener) {
    let outcome: Outcome = Rc::new(RefCell::new(None));
    let listener = proxy
        .upcast_ref()
        .add_listener_local()
        .bound({
            let outcome = outcome.clone();
            move |id| {
                *outcome.borrow_mut() = Some(Ok(id));
            }
        })
        .error({
            let outcome = outcome.clone();
            move |_seq, _res, message| {
                log::error!("Failed to create {}: {}", what, message);
                *outcome.borrow_mut() = Some(Err(RoutingError::Link(message.to_string())));
            }
        })
        .register();
    (outcome, listener)
}

fn settle(outcome: &Outcome, what: &str) -> Result<ObjectId> {
    outcome
        .borrow_mut()
        .take()
        .unwrap_or_else(|| {
            Err(RoutingError::Link(format!(
                "{} was neither bound nor rejected",
                what
            )))
        })
}

fn create_link(
    conn: &Connection,
    barrier: &SyncBarrier,
    pump: &mut Pump<'_>,
    output_port_id: ObjectId,
    input_port_id: ObjectId,
) -> Result<ObjectId> {
    let props = pipewire::properties::properties! {
        *pipewire::keys::APP_NAME => conn.marker.as_str(),
        *pipewire::keys::LINK_OUTPUT_PORT => output_port_id.to_string(),
        *pipewire::keys::LINK_INPUT_PORT => input_port_id.to_string(),
    };

    let link = conn
        .core
        .create_object::<PwLink>("link-factory", &props)
        .map_err(|e| RoutingError::Link(e.to_string()))?;

    let (outcome, listener) = watch_proxy(&link, "link");
    // On failure the proxy is dropped here, taking a half-made link with it
    barrier.sync(pump)?;
    drop(listener);

    let id = settle(&outcome, "link")?;
    conn.proxies.borrow_mut().links.insert(id, link);
    Ok(id)
}

fn create_node(
    conn: &Connection,
    barrier: &SyncBarrier,
    pump: &mut Pump<'_>,
    factory: &str,
    props: &[(String, String)],
) -> Result<ObjectId> {
    let mut properties = PropertiesBox::new();
    for (key, value) in props {
        properties.insert(key.as_str(), value.as_str());
    }

    let node = conn
        .core
        .create_object::<PwNode>(factory, &properties)
        .map_err(|e| RoutingError::Link(e.to_string()))?;

    let (outcome, listener) = watch_proxy(&node, "node");
    barrier.sync(pump)?;
    drop(listener);

    let id = settle(&outcome, "node")?;
    conn.proxies.borrow_mut().created_nodes.push(node);
    Ok(id)
}
