//! Link creation/destruction and routing-session bookkeeping.
//!
//! A session is just the ordered list of link ids created for one routing
//! kind. Nothing else is remembered about a link; stopping a session
//! destroys every id in its list and empties it.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{Result, RoutingError};
use crate::graph::{BackendKind, ObjectId};

pub type LinkId = ObjectId;

/// The server operations routing needs, already bridged to blocking calls.
///
/// Every method that changes the graph waits for the server to acknowledge
/// the change before returning.
pub trait LinkDriver: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Round trip: the registry reflects everything the server had queued.
    fn sync(&self) -> Result<()>;

    /// Link an output port to an input port. Resolves to the bound link id
    /// or the server's error message.
    fn create_link(&self, output_port: ObjectId, input_port: ObjectId) -> Result<LinkId>;

    /// Destroy an object by id. The server does not say whether the id
    /// still existed.
    fn destroy_object(&self, id: ObjectId) -> Result<()>;

    /// Create a node through a server-side factory.
    fn create_node(&self, factory: &str, props: &[(String, String)]) -> Result<ObjectId>;

    /// Stop the event pump and release the connection.
    fn shutdown(&self) {}
}

/// The two independently tracked routing kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Our output into an application's microphone input
    SoundInput,
    /// An application's output into our local playback
    Passthrough,
}

#[derive(Debug, Default)]
struct Sessions {
    sound_input: Vec<LinkId>,
    passthrough: Vec<LinkId>,
}

impl Sessions {
    fn list(&mut self, kind: SessionKind) -> &mut Vec<LinkId> {
        match kind {
            SessionKind::SoundInput => &mut self.sound_input,
            SessionKind::Passthrough => &mut self.passthrough,
        }
    }
}

pub struct LinkManager<D: LinkDriver> {
    driver: Arc<D>,
    sessions: Mutex<Sessions>,
}

impl<D: LinkDriver> LinkManager<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    /// Create one link. Failures are logged and returned, never retried.
    pub fn create_link(&self, output_port: ObjectId, input_port: ObjectId) -> Result<LinkId> {
        log::debug!("Creating link {} -> {}", output_port, input_port);
        match self.driver.create_link(output_port, input_port) {
            Ok(id) => {
                log::debug!("Link {} bound ({} -> {})", id, output_port, input_port);
                Ok(id)
            }
            Err(e) => {
                log::error!(
                    "Failed to create link {} -> {}: {}",
                    output_port,
                    input_port,
                    e
                );
                Err(e)
            }
        }
    }

    /// Destroy one link. Returns true once the request went out, whether or
    /// not the link still existed.
    pub fn delete_link(&self, id: LinkId) -> bool {
        match self.driver.destroy_object(id) {
            Ok(()) => {
                log::debug!("Link {} destroyed", id);
                true
            }
            Err(RoutingError::Disconnected) => {
                log::error!("Cannot destroy link {}: server disconnected", id);
                false
            }
            // The destroy went out, only the round trip after it failed
            Err(e) => {
                log::warn!("Link {} destroy not confirmed: {}", id, e);
                true
            }
        }
    }

    pub fn record(&self, kind: SessionKind, id: LinkId) {
        self.sessions.lock().list(kind).push(id);
    }

    /// Destroy every link of the session and empty it, whatever the
    /// individual outcomes.
    pub fn stop_session(&self, kind: SessionKind) {
        // Take the list first: deleting syncs, which must not run under our lock
        let links = std::mem::take(self.sessions.lock().list(kind));
        if links.is_empty() {
            return;
        }

        log::info!("Stopping {:?} session ({} links)", kind, links.len());
        for id in links {
            self.delete_link(id);
        }
    }

    pub fn links(&self, kind: SessionKind) -> Vec<LinkId> {
        self.sessions.lock().list(kind).clone()
    }

    pub fn is_active(&self, kind: SessionKind) -> bool {
        !self.sessions.lock().list(kind).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockDriver;
    use crate::graph::PortDirection;
    use std::time::Duration;

    #[test]
    fn test_stop_session_drains_list() {
        let driver = Arc::new(MockDriver::new("soundux"));
        driver.add_own_port(PortDirection::Output, 'L');
        let app = driver.add_app(5, "discord");
        let input = driver.add_app_port(app, PortDirection::Input, 'L');

        let links = LinkManager::new(driver.clone());
        let out = driver.own_ports()[0];
        let id = links.create_link(out, input).unwrap();
        links.record(SessionKind::SoundInput, id);
        assert!(links.is_active(SessionKind::SoundInput));
        assert!(!links.is_active(SessionKind::Passthrough));

        links.stop_session(SessionKind::SoundInput);
        assert!(links.links(SessionKind::SoundInput).is_empty());
        assert!(driver.active_links().is_empty());
    }

    #[test]
    fn test_double_delete_is_harmless() {
        let driver = Arc::new(MockDriver::new("soundux"));
        let links = LinkManager::new(driver.clone());
        assert!(links.delete_link(1234));
        assert!(links.delete_link(1234));
    }

    #[test]
    fn test_delete_counts_once_issued() {
        let timeout = Some(Duration::from_millis(20));
        let driver = Arc::new(MockDriver::with_timeout("soundux", timeout));
        let links = LinkManager::new(driver.clone());
        driver.stall_sync(true);
        assert!(links.delete_link(7));

        driver.shutdown();
        assert!(!links.delete_link(7));
    }

    #[test]
    fn test_unconfirmed_link_is_not_left_behind() {
        let timeout = Some(Duration::from_millis(20));
        let driver = Arc::new(MockDriver::with_timeout("soundux", timeout));
        let out = driver.add_own_port(PortDirection::Output, 'L');
        let app = driver.add_app(5, "discord");
        let input = driver.add_app_port(app, PortDirection::Input, 'L');
        driver.sync().unwrap();

        let links = LinkManager::new(driver.clone());
        driver.stall_sync(true);
        assert!(links.create_link(out, input).is_err());
        assert!(driver.active_links().is_empty());
    }

    #[test]
    fn test_create_link_surfaces_server_error() {
        let driver = Arc::new(MockDriver::new("soundux"));
        driver.fail_links(true);
        let links = LinkManager::new(driver.clone());
        assert!(links.create_link(1, 2).is_err());
    }
}
