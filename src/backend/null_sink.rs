//! The virtual sink every route meets at.
//!
//! Its playback ports receive passthrough audio, its monitor ports carry the
//! soundboard output into other applications. Both sides carry our marker in
//! their alias, which is how the routing code finds them.

use crate::graph::ObjectId;
use crate::link::LinkDriver;

pub const NULL_SINK_FACTORY: &str = "adapter";
pub const NULL_SINK_MEDIA_CLASS: &str = "Audio/Sink";
pub const NULL_SINK_NODE_FACTORY: &str = "support.null-audio-sink";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullSinkSpec {
    /// `node.name`; must contain the marker so discovery skips the node
    pub name: String,
}

impl NullSinkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn props(&self) -> Vec<(String, String)> {
        vec![
            ("media.class".into(), NULL_SINK_MEDIA_CLASS.into()),
            ("node.name".into(), self.name.clone()),
            ("factory.name".into(), NULL_SINK_NODE_FACTORY.into()),
        ]
    }
}

pub struct NullSinkProvisioner;

impl NullSinkProvisioner {
    /// Create the sink once. Failure is logged, not fatal: routing calls
    /// will simply find no candidate ports later.
    pub fn provision<D: LinkDriver + ?Sized>(
        driver: &D,
        spec: &NullSinkSpec,
    ) -> Option<ObjectId> {
        match driver.create_node(NULL_SINK_FACTORY, &spec.props()) {
            Ok(id) => {
                log::info!("Null sink '{}' created (id {})", spec.name, id);
                Some(id)
            }
            Err(e) => {
                log::error!("Failed to create null sink '{}': {}", spec.name, e);
                None
            }
        }
    }
}
