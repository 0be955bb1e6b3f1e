//! Backend-neutral routing on top of a [`LinkDriver`].
//!
//! ## Port pairing
//! Our own ports are the marker-aliased ports of the null sink; they stay
//! free-floating in the registry because our node is never tracked. A route
//! pairs each of them with every port of the target node in the opposite
//! role, and links the pairs the [`ChannelMatcher`] accepts:
//!
//! | session      | our side       | target side    | link direction  |
//! |--------------|----------------|----------------|-----------------|
//! | sound input  | output (monitor) | input        | ours → target   |
//! | passthrough  | input (playback) | output       | target → ours   |
//!
//! A route succeeds when at least one link was created. Links created before
//! a failing pair are kept.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::AudioBackend;
use crate::config::RoutingConfig;
use crate::error::RoutingError;
use crate::graph::{
    AppHandle, BackendKind, ChannelMatcher, GraphRegistry, Port, PortDirection, SideMatcher,
};
use crate::link::{LinkDriver, LinkManager, SessionKind};

pub struct GraphBackend<D: LinkDriver, M: ChannelMatcher = SideMatcher> {
    registry: Arc<GraphRegistry>,
    links: LinkManager<D>,
    matcher: M,
    marker: String,
    destroyed: AtomicBool,
}

impl<D: LinkDriver> GraphBackend<D> {
    pub fn new(driver: Arc<D>, registry: Arc<GraphRegistry>, config: &RoutingConfig) -> Self {
        Self::with_matcher(driver, registry, config, SideMatcher)
    }
}

impl<D: LinkDriver, M: ChannelMatcher> GraphBackend<D, M> {
    pub fn with_matcher(
        driver: Arc<D>,
        registry: Arc<GraphRegistry>,
        config: &RoutingConfig,
        matcher: M,
    ) -> Self {
        Self {
            registry,
            links: LinkManager::new(driver),
            matcher,
            marker: config.marker.clone(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<GraphRegistry> {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<D> {
        self.links.driver()
    }

    /// Link ids currently held by a session.
    pub fn session_links(&self, kind: SessionKind) -> Vec<crate::link::LinkId> {
        self.links.links(kind)
    }

    /// Round trip before reading the registry. A failed sync is logged and
    /// reported as `false`.
    fn refresh(&self) -> bool {
        match self.links.driver().sync() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Graph sync failed: {}", e);
                false
            }
        }
    }

    fn apps_with(&self, direction: PortDirection) -> Vec<AppHandle> {
        if !self.refresh() {
            return Vec::new();
        }
        let kind = self.kind();
        self.registry
            .get_all_nodes()
            .iter()
            .filter(|n| n.is_application() && n.has_port(direction))
            .map(|n| AppHandle::from_node(kind, n))
            .collect()
    }

    fn app_named(&self, name: &str) -> Option<AppHandle> {
        if !self.refresh() {
            return None;
        }
        let kind = self.kind();
        self.registry
            .get_all_nodes()
            .iter()
            .find(|n| n.name == name)
            .map(|n| AppHandle::from_node(kind, n))
    }

    /// Stop the previous session of `kind`, then link our ports to `app`.
    fn route(&self, kind: SessionKind, app: &AppHandle) -> bool {
        self.links.stop_session(kind);

        if app.backend != self.kind() {
            log::warn!(
                "Ignoring {:?} app handle '{}' on the {:?} backend",
                app.backend,
                app.name,
                self.kind()
            );
            return false;
        }

        if !self.refresh() {
            return false;
        }

        let Some(node) = self.registry.get_node(app.node_id) else {
            log::warn!(
                "Cannot route to '{}': {}",
                app.name,
                RoutingError::UnknownNode(app.node_id)
            );
            return false;
        };

        let (own_direction, target_direction) = match kind {
            SessionKind::SoundInput => (PortDirection::Output, PortDirection::Input),
            SessionKind::Passthrough => (PortDirection::Input, PortDirection::Output),
        };

        let own_ports = self.registry.marked_ports(&self.marker, own_direction);
        let mut target_ports: Vec<&Port> = node.ports_with(target_direction).collect();
        target_ports.sort_by_key(|p| p.id);

        let mut created = 0usize;
        for own in &own_ports {
            for target in &target_ports {
                if !self.matcher.matches(own, target) {
                    continue;
                }

                let (output, input) = match kind {
                    SessionKind::SoundInput => (own.id, target.id),
                    SessionKind::Passthrough => (target.id, own.id),
                };

                if let Ok(link) = self.links.create_link(output, input) {
                    self.links.record(kind, link);
                    created += 1;
                }
            }
        }

        if created == 0 {
            log::warn!(
                "{:?} to '{}' created no links ({} own ports, {} target ports)",
                kind,
                node.display_name(),
                own_ports.len(),
                target_ports.len()
            );
            false
        } else {
            log::info!(
                "{:?} to '{}' active with {} links",
                kind,
                node.display_name(),
                created
            );
            true
        }
    }
}

impl<D: LinkDriver, M: ChannelMatcher> AudioBackend for GraphBackend<D, M> {
    fn kind(&self) -> BackendKind {
        self.links.driver().kind()
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Destroying {:?} backend", self.kind());
        self.links.stop_session(SessionKind::SoundInput);
        self.links.stop_session(SessionKind::Passthrough);
        self.links.driver().shutdown();
        self.registry.clear();
    }

    fn recording_apps(&self) -> Vec<AppHandle> {
        self.apps_with(PortDirection::Input)
    }

    fn playback_apps(&self) -> Vec<AppHandle> {
        self.apps_with(PortDirection::Output)
    }

    fn playback_app(&self, name: &str) -> Option<AppHandle> {
        self.app_named(name)
    }

    fn recording_app(&self, name: &str) -> Option<AppHandle> {
        self.app_named(name)
    }

    fn input_sound_to(&self, app: &AppHandle) -> bool {
        self.route(SessionKind::SoundInput, app)
    }

    fn stop_sound_input(&self) -> bool {
        self.links.stop_session(SessionKind::SoundInput);
        true
    }

    fn passthrough_from(&self, app: &AppHandle) -> bool {
        self.route(SessionKind::Passthrough, app)
    }

    fn stop_passthrough(&self) -> bool {
        self.links.stop_session(SessionKind::Passthrough);
        true
    }

    fn is_currently_passing_through(&self) -> bool {
        self.links.is_active(SessionKind::Passthrough)
    }
}

impl<D: LinkDriver, M: ChannelMatcher> Drop for GraphBackend<D, M> {
    fn drop(&mut self) {
        self.destroy();
    }
}
