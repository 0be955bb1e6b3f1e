//! micbridge - audio graph routing for soundboards
//!
//! Discovers the sound server's node/port graph, and links a virtual sink
//! into other applications' microphone inputs ("sound input") or an
//! application's output back into local playback ("passthrough").

pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod link;
pub mod mailbox;
#[cfg(feature = "pipewire")]
pub mod pipewire;
pub mod sync;

pub use backend::{AudioBackend, GraphBackend};
pub use config::RoutingConfig;
pub use error::{Result, RoutingError};
pub use graph::{AppHandle, BackendKind};

/// Set up the backend selected in `config`.
pub fn setup(config: &RoutingConfig) -> Result<Box<dyn AudioBackend>> {
    match config.backend {
        #[cfg(feature = "pipewire")]
        BackendKind::PipeWire => Ok(Box::new(crate::pipewire::setup(config)?)),
        #[cfg(not(feature = "pipewire"))]
        BackendKind::PipeWire => Err(RoutingError::Setup(
            "built without the `pipewire` feature".into(),
        )),
    }
}
