//! micbridge - list routable applications and optionally hold a route.
//!
//! ```text
//! micbridge                      # list recording and playback apps
//! micbridge --input Discord      # play our sink into Discord's microphone
//! micbridge --passthrough Firefox
//! ```

use std::io::BufRead;
use std::process::ExitCode;

use micbridge::{AudioBackend, RoutingConfig};

enum Route {
    Input(String),
    Passthrough(String),
}

fn parse_args() -> Result<Option<Route>, String> {
    let mut args = std::env::args().skip(1);
    let Some(flag) = args.next() else {
        return Ok(None);
    };
    let name = args
        .next()
        .ok_or_else(|| format!("{} needs an application name", flag))?;
    match flag.as_str() {
        "--input" => Ok(Some(Route::Input(name))),
        "--passthrough" => Ok(Some(Route::Passthrough(name))),
        other => Err(format!("unknown argument {:?}", other)),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let route = match parse_args() {
        Ok(route) => route,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = RoutingConfig::load();
    log::info!("Starting micbridge ({:?} backend)", config.backend);

    let backend = match micbridge::setup(&config) {
        Ok(backend) => backend,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    for app in backend.recording_apps() {
        log::info!(
            "Recording: {} [{}] node={} pid={:?}",
            app.name,
            app.application,
            app.node_id,
            app.pid
        );
    }
    for app in backend.playback_apps() {
        log::info!(
            "Playback:  {} [{}] node={} pid={:?}",
            app.name,
            app.application,
            app.node_id,
            app.pid
        );
    }

    let code = match route {
        Some(route) => hold_route(backend.as_ref(), route),
        None => ExitCode::SUCCESS,
    };

    backend.destroy();
    code
}

fn hold_route(backend: &dyn AudioBackend, route: Route) -> ExitCode {
    let started = match route {
        Route::Input(name) => match backend.recording_app(&name) {
            Some(app) => backend.input_sound_to(&app),
            None => {
                log::error!("No recording app named {:?}", name);
                false
            }
        },
        Route::Passthrough(name) => match backend.playback_app(&name) {
            Some(app) => backend.passthrough_from(&app),
            None => {
                log::error!("No playback app named {:?}", name);
                false
            }
        },
    };

    if !started {
        return ExitCode::FAILURE;
    }

    log::info!("Route active, press Enter to stop");
    let mut line = String::new();
    let _ = std::io::stdin().lock().read_line(&mut line);

    backend.stop_sound_input();
    backend.stop_passthrough();
    ExitCode::SUCCESS
}
