//! Foliage Host - Headless Bevy app that streams exported foliage around a walking proxy
//!
//! Usage: `foliage_host [manifest.ron] [--settings <settings.ron>] [--frames <n>]`

mod scene;
mod systems;
mod world;

use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;

use world::HostConfig;

/// Host frame rate.
pub const TICK_HZ: f64 = 60.0;

fn tick_duration() -> Duration {
    Duration::from_secs_f64(1.0 / TICK_HZ)
}

fn main() {
    let config = HostConfig::from_args(std::env::args().skip(1)).unwrap_or_else(|e| {
        eprintln!("{e}");
        eprintln!("usage: foliage_host [manifest.ron] [--settings <settings.ron>] [--frames <n>]");
        std::process::exit(2);
    });

    let mut app = App::new();

    // Headless plugins (no rendering), one foliage tick per frame.
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick_duration())));
    app.add_plugins(bevy::log::LogPlugin::default());

    app.insert_resource(config);
    app.init_resource::<systems::LastTick>();

    app.add_systems(Startup, world::setup_foliage);
    app.add_systems(
        Update,
        (
            systems::walk_proxy,
            systems::tick_foliage,
            systems::report_progress,
            systems::exit_after_frames,
        )
            .chain(),
    );

    info!("Starting foliage host at {} Hz", TICK_HZ);
    app.run();
}
