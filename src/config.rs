//! Routing configuration.
//!
//! Only tunes markers and timeouts; the routing core keeps no state on disk.
//! Stored as JSON under the user's config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::graph::BackendKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Sound server to talk to
    pub backend: BackendKind,
    /// Private marker tagging our own nodes and ports (matched as substring)
    pub marker: String,
    /// `node.name` of the virtual sink created at setup
    pub null_sink_name: String,
    pub create_null_sink: bool,
    /// Upper bound for one sync round trip; 0 or absent waits forever
    pub sync_timeout_ms: Option<u64>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::PipeWire,
            marker: "soundux".into(),
            null_sink_name: "soundux_sink".into(),
            create_null_sink: true,
            sync_timeout_ms: Some(5000),
        }
    }
}

impl RoutingConfig {
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("micbridge").join("routing.json"))
    }

    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                log::warn!("Ignoring config {:?}: {}", path, e);
                Self::default()
            }),
            _ => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(std::io::Error::other)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Nodes carrying our marker in their name are never tracked.
    pub fn is_own_node(&self, node_name: &str) -> bool {
        !self.marker.is_empty() && node_name.contains(&self.marker)
    }
}
