//! Routing behavior against the simulated sound server.

use std::collections::HashSet;
use std::sync::Arc;

use micbridge::backend::mock::MockDriver;
use micbridge::graph::{ObjectId, PortDirection};
use micbridge::link::SessionKind;
use micbridge::{AudioBackend, GraphBackend, RoutingConfig};

fn setup() -> (Arc<MockDriver>, GraphBackend<MockDriver>) {
    let driver = Arc::new(MockDriver::new("soundux"));
    let backend = GraphBackend::new(driver.clone(), driver.registry(), &RoutingConfig::default());
    (driver, backend)
}

/// Our sink's monitor ports (sides 1/2) plus an app with L/R inputs.
fn stereo_app(driver: &MockDriver, id: ObjectId, binary: &str) -> (ObjectId, ObjectId) {
    driver.add_app(id, binary);
    let l = driver.add_app_port(id, PortDirection::Input, 'L');
    let r = driver.add_app_port(id, PortDirection::Input, 'R');
    (l, r)
}

#[test]
fn test_input_sound_links_matching_sides() {
    let (driver, backend) = setup();
    let own_1 = driver.add_own_port(PortDirection::Output, '1');
    let own_2 = driver.add_own_port(PortDirection::Output, '2');
    let (in_l, in_r) = stereo_app(&driver, 5, "discord");

    let app = backend.recording_app("discord").unwrap();
    assert_eq!(app.node_id, 5);
    assert!(backend.input_sound_to(&app));

    let mut pairs: Vec<(ObjectId, ObjectId)> =
        driver.active_links().iter().map(|l| (l.1, l.2)).collect();
    pairs.sort();
    assert_eq!(pairs, vec![(own_1, in_l), (own_2, in_r)]);
    assert_eq!(backend.session_links(SessionKind::SoundInput).len(), 2);
}

#[test]
fn test_no_matching_direction_creates_nothing() {
    let (driver, backend) = setup();
    driver.add_own_port(PortDirection::Output, '1');
    driver.add_app(6, "spotify");
    driver.add_app_port(6, PortDirection::Output, 'L');

    let app = backend.playback_app("spotify").unwrap();
    assert!(!backend.input_sound_to(&app));
    assert!(driver.active_links().is_empty());
    assert!(backend.session_links(SessionKind::SoundInput).is_empty());
}

#[test]
fn test_all_links_failing_reports_failure() {
    let (driver, backend) = setup();
    driver.add_own_port(PortDirection::Output, '1');
    driver.add_own_port(PortDirection::Output, '2');
    stereo_app(&driver, 5, "discord");
    driver.fail_links(true);

    let app = backend.recording_app("discord").unwrap();
    assert!(!backend.input_sound_to(&app));
    assert!(backend.session_links(SessionKind::SoundInput).is_empty());
}

#[test]
fn test_partial_success_keeps_created_links() {
    let (driver, backend) = setup();
    driver.add_own_port(PortDirection::Output, '1');
    driver.add_own_port(PortDirection::Output, '2');
    let (_, in_r) = stereo_app(&driver, 5, "discord");
    driver.fail_links_on(in_r);

    let app = backend.recording_app("discord").unwrap();
    assert!(backend.input_sound_to(&app));
    assert_eq!(backend.session_links(SessionKind::SoundInput).len(), 1);
    assert_eq!(driver.active_links().len(), 1);
}

#[test]
fn test_devices_are_not_listed() {
    let (driver, backend) = setup();
    driver.add_device(3, "Built-in Audio");
    driver.add_app_port(3, PortDirection::Output, 'L');
    driver.add_app(4, "firefox");
    driver.add_app_port(4, PortDirection::Output, 'L');

    let apps = backend.playback_apps();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].node_id, 4);
    assert_eq!(apps[0].application, "firefox");
    assert!(backend.recording_apps().is_empty());
}

#[test]
fn test_port_before_parent_stays_orphaned() {
    let (driver, backend) = setup();
    let port = driver.add_app_port(7, PortDirection::Input, 'L');
    assert!(backend.recording_apps().is_empty());

    driver.add_app(7, "obs");
    assert!(backend.recording_apps().is_empty());

    let registry = driver.registry();
    assert!(registry.get_free_port(port).is_some());
    assert!(registry.get_node(7).unwrap().ports.is_empty());
}

#[test]
fn test_stop_passthrough_is_idempotent() {
    let (driver, backend) = setup();
    driver.add_own_port(PortDirection::Input, 'L');
    driver.add_app(8, "vlc");
    driver.add_app_port(8, PortDirection::Output, 'L');

    let app = backend.playback_app("vlc").unwrap();
    assert!(backend.passthrough_from(&app));
    assert!(backend.is_currently_passing_through());

    assert!(backend.stop_passthrough());
    assert!(!backend.is_currently_passing_through());
    assert!(backend.stop_passthrough());
    assert!(backend.session_links(SessionKind::Passthrough).is_empty());
    assert!(driver.active_links().is_empty());
}

#[test]
fn test_new_target_replaces_previous_session() {
    let (driver, backend) = setup();
    driver.add_own_port(PortDirection::Output, '1');
    driver.add_own_port(PortDirection::Output, '2');
    let a_ports = stereo_app(&driver, 10, "discord");
    let b_ports = stereo_app(&driver, 11, "teamspeak");

    let a = backend.recording_app("discord").unwrap();
    let b = backend.recording_app("teamspeak").unwrap();
    assert!(backend.input_sound_to(&a));
    assert!(backend.input_sound_to(&b));

    let targets: HashSet<ObjectId> = driver.active_links().iter().map(|l| l.2).collect();
    assert_eq!(targets, HashSet::from([b_ports.0, b_ports.1]));
    assert!(!targets.contains(&a_ports.0));
    assert_eq!(backend.session_links(SessionKind::SoundInput).len(), 2);
}

#[test]
fn test_new_passthrough_replaces_only_passthrough() {
    let (driver, backend) = setup();
    driver.add_own_port(PortDirection::Input, 'L');
    driver.add_own_port(PortDirection::Output, 'L');
    driver.add_app(12, "firefox");
    let a_out = driver.add_app_port(12, PortDirection::Output, 'L');
    driver.add_app(13, "vlc");
    let b_out = driver.add_app_port(13, PortDirection::Output, 'L');
    driver.add_app(14, "discord");
    let mic = driver.add_app_port(14, PortDirection::Input, 'L');

    let discord = backend.recording_app("discord").unwrap();
    assert!(backend.input_sound_to(&discord));

    let a = backend.playback_app("firefox").unwrap();
    let b = backend.playback_app("vlc").unwrap();
    assert!(backend.passthrough_from(&a));
    assert!(backend.passthrough_from(&b));

    let outputs: HashSet<ObjectId> = driver.active_links().iter().map(|l| l.1).collect();
    assert!(outputs.contains(&b_out));
    assert!(!outputs.contains(&a_out));
    assert_eq!(backend.session_links(SessionKind::Passthrough).len(), 1);

    // Sound input into discord survives the passthrough switch
    assert_eq!(backend.session_links(SessionKind::SoundInput).len(), 1);
    assert!(driver.active_links().iter().any(|l| l.2 == mic));
}

#[test]
fn test_removed_app_cannot_be_routed() {
    let (driver, backend) = setup();
    driver.add_own_port(PortDirection::Output, '1');
    stereo_app(&driver, 5, "discord");

    let app = backend.recording_app("discord").unwrap();
    driver.remove(5);

    assert!(!backend.input_sound_to(&app));
    assert!(!driver.registry().contains_node(5));
    assert!(backend.recording_apps().is_empty());
}

#[test]
fn test_null_sink_rendezvous() {
    let (driver, backend) = setup();
    micbridge::backend::NullSinkProvisioner::provision(
        &*driver,
        &micbridge::backend::NullSinkSpec::new("soundux_sink"),
    )
    .unwrap();
    driver.add_app(20, "discord");
    driver.add_app_port(20, PortDirection::Input, 'L');
    driver.add_app_port(20, PortDirection::Input, 'R');
    driver.add_app(21, "firefox");
    driver.add_app_port(21, PortDirection::Output, 'L');
    driver.add_app_port(21, PortDirection::Output, 'R');

    let mic = backend.recording_app("discord").unwrap();
    let music = backend.playback_app("firefox").unwrap();
    assert!(backend.input_sound_to(&mic));
    assert!(backend.passthrough_from(&music));

    // Our own sink never shows up as an app
    assert_eq!(backend.recording_apps().len(), 1);
    assert_eq!(driver.active_links().len(), 4);

    assert!(backend.stop_sound_input());
    assert_eq!(driver.active_links().len(), 2);
    assert!(backend.is_currently_passing_through());
}

#[test]
fn test_concurrent_queries_see_consistent_graph() {
    let (driver, backend) = setup();
    for id in 30..40 {
        driver.add_app(id, &format!("app{}", id));
        driver.add_app_port(id, PortDirection::Output, 'L');
    }
    let backend = Arc::new(backend);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let backend = backend.clone();
            std::thread::spawn(move || backend.playback_apps().len())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 10);
    }
}
