use std::sync::mpsc::Sender;

use crate::error::Result;
use crate::graph::ObjectId;

/// Requests served by the PipeWire thread. Each carries the channel its
/// answer goes back on.
#[derive(Debug)]
pub enum PwCommand {
    /// Round trip; answers once discovery has caught up
    Sync { reply: Sender<Result<()>> },
    /// Link an output port to an input port
    CreateLink {
        output_port_id: ObjectId,
        input_port_id: ObjectId,
        reply: Sender<Result<ObjectId>>,
    },
    /// Destroy a global (our links, usually)
    DestroyObject {
        id: ObjectId,
        reply: Sender<Result<()>>,
    },
    /// Create a node through a factory and keep it alive
    CreateNode {
        factory: String,
        props: Vec<(String, String)>,
        reply: Sender<Result<ObjectId>>,
    },
    /// Leave the loop and drop the connection
    Shutdown,
}
