//! Capability interface consumed by the UI, tray and remote-control layers,
//! and the backend-neutral routing implementation behind it.
//!
//! Each sound server supplies a [`LinkDriver`](crate::link::LinkDriver);
//! [`GraphBackend`] turns graph + links into the capabilities below.

mod graph_backend;
pub mod mock;
mod null_sink;

pub use graph_backend::GraphBackend;
pub use null_sink::{NullSinkProvisioner, NullSinkSpec};

use crate::error::RoutingError;
use crate::graph::{AppHandle, BackendKind};

/// What a soundboard needs from the audio graph.
///
/// Nothing here fails hard: a missing app, a rejected link or an
/// unsupported capability is logged and reported as `false`/`None`.
pub trait AudioBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Stop both sessions and release the connection. Idempotent.
    fn destroy(&self);

    /// Applications with an input port and a known binary.
    fn recording_apps(&self) -> Vec<AppHandle>;

    /// Applications with an output port and a known binary.
    fn playback_apps(&self) -> Vec<AppHandle>;

    fn playback_app(&self, name: &str) -> Option<AppHandle>;

    fn recording_app(&self, name: &str) -> Option<AppHandle>;

    /// Route our output into the app's microphone input.
    fn input_sound_to(&self, app: &AppHandle) -> bool;

    fn stop_sound_input(&self) -> bool;

    /// Route the app's output into our local playback.
    fn passthrough_from(&self, app: &AppHandle) -> bool;

    fn stop_passthrough(&self) -> bool;

    fn is_currently_passing_through(&self) -> bool;

    fn use_as_default(&self) -> bool {
        unsupported(self.kind(), "use_as_default");
        false
    }

    /// Nothing to revert counts as reverted.
    fn revert_default(&self) -> bool {
        unsupported(self.kind(), "revert_default");
        true
    }

    fn mute_input(&self, state: bool) -> bool {
        let _ = state;
        unsupported(self.kind(), "mute_input");
        false
    }
}

fn unsupported(kind: BackendKind, capability: &'static str) {
    log::warn!("{:?}: {}", kind, RoutingError::Unsupported(capability));
}
