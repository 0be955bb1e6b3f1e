//! PipeWire backend.
//!
//! PipeWire objects are single-threaded, so a dedicated thread owns the main
//! loop, context, core and registry, and serves [`PwCommand`]s. Discovery
//! callbacks on that thread feed the shared [`GraphRegistry`];
//! [`PipeWireDriver`] is the `Send + Sync` handle the routing layer talks to.

mod manager;
mod types;

pub use types::PwCommand;

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::backend::{GraphBackend, NullSinkProvisioner, NullSinkSpec};
use crate::config::RoutingConfig;
use crate::error::{Result, RoutingError};
use crate::graph::{BackendKind, GraphRegistry, ObjectId};
use crate::link::{LinkDriver, LinkId};
use crate::mailbox::{Mailbox, Outbox};

pub type PipeWireBackend = GraphBackend<PipeWireDriver>;

/// Connect, catch up with the graph and provision the null sink.
///
/// Only an unreachable server fails here; a null sink that cannot be
/// created is logged and routing will find no ports later.
pub fn setup(config: &RoutingConfig) -> Result<PipeWireBackend> {
    let registry = GraphRegistry::new();
    let driver = Arc::new(PipeWireDriver::start(registry.clone(), config)?);

    driver
        .sync()
        .map_err(|e| RoutingError::Setup(format!("Initial sync failed: {}", e)))?;

    if config.create_null_sink {
        if !config.is_own_node(&config.null_sink_name) {
            log::warn!(
                "Null sink name '{}' does not contain marker '{}'; its ports will not be found",
                config.null_sink_name,
                config.marker
            );
        }
        NullSinkProvisioner::provision(&*driver, &NullSinkSpec::new(&config.null_sink_name));
    }

    Ok(GraphBackend::new(driver, registry, config))
}

/// Slack on top of the round trips a request waits for.
const REPLY_MARGIN: Duration = Duration::from_secs(1);

impl Outbox<PwCommand> for pipewire::channel::Sender<PwCommand> {
    fn post(&self, cmd: PwCommand) -> std::result::Result<(), PwCommand> {
        self.send(cmd)
    }
}

pub struct PipeWireDriver {
    mailbox: Mailbox<pipewire::channel::Sender<PwCommand>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PipeWireDriver {
    pub fn start(registry: Arc<GraphRegistry>, config: &RoutingConfig) -> Result<Self> {
        let started = manager::start(registry, config)?;
        // Room for our own round trip and one queued ahead of it
        let reply_timeout = config.sync_timeout().map(|t| t * 2 + REPLY_MARGIN);
        Ok(Self {
            mailbox: Mailbox::new(started.cmd_tx, started.alive, reply_timeout),
            thread: Mutex::new(Some(started.thread)),
        })
    }

    /// Send a command and block until the PipeWire thread answers, exits,
    /// or the reply timeout runs out.
    fn request<T>(&self, make: impl FnOnce(Sender<Result<T>>) -> PwCommand) -> Result<T> {
        self.mailbox.request(make)
    }
}

impl LinkDriver for PipeWireDriver {
    fn kind(&self) -> BackendKind {
        BackendKind::PipeWire
    }

    fn sync(&self) -> Result<()> {
        self.request(|reply| PwCommand::Sync { reply })
    }

    fn create_link(&self, output_port: ObjectId, input_port: ObjectId) -> Result<LinkId> {
        self.request(|reply| PwCommand::CreateLink {
            output_port_id: output_port,
            input_port_id: input_port,
            reply,
        })
    }

    fn destroy_object(&self, id: ObjectId) -> Result<()> {
        self.request(|reply| PwCommand::DestroyObject { id, reply })
    }

    fn create_node(&self, factory: &str, props: &[(String, String)]) -> Result<ObjectId> {
        self.request(|reply| PwCommand::CreateNode {
            factory: factory.to_string(),
            props: props.to_vec(),
            reply,
        })
    }

    fn shutdown(&self) {
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        if !self.mailbox.post(PwCommand::Shutdown) {
            log::debug!("PipeWire thread already stopped");
        }
        if thread.join().is_err() {
            log::error!("PipeWire thread panicked");
        }
    }
}

impl Drop for PipeWireDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
