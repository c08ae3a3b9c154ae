//! Startup: manifest, settings, reference ground, chunk registration and the walking proxy.

use std::path::PathBuf;

use bevy::prelude::*;
use foliage::{
    load_baked_placements_from_file, FoliageManifest, FoliageSettings, FoliageStreamer,
    GroundField, InstancePool,
};

use crate::scene::{ExportAssets, FoliageProxy};
use crate::systems::ProxyPath;

/// Manifest loaded when none is given on the command line.
pub const DEFAULT_MANIFEST: &str = "assets/foliage_manifest.ron";

/// Proxy walking speed in meters per second.
pub const PROXY_SPEED: f32 = 12.0;

/// How far past the last chunk the proxy walks before turning around, so every chunk is
/// eventually reclaimed.
const WALK_OVERSHOOT: f32 = 200.0;

/// Command line configuration.
#[derive(Resource, Debug, Clone)]
pub struct HostConfig {
    pub manifest_path: PathBuf,
    pub settings_path: Option<PathBuf>,
    /// Exit after this many frames; run forever when unset.
    pub max_frames: Option<u64>,
}

impl HostConfig {
    pub fn from_args(mut args: impl Iterator<Item = String>) -> Result<Self, String> {
        let mut manifest_path = None;
        let mut settings_path = None;
        let mut max_frames = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--settings" => {
                    let value = args.next().ok_or("--settings needs a path")?;
                    settings_path = Some(PathBuf::from(value));
                }
                "--frames" => {
                    let value = args.next().ok_or("--frames needs a number")?;
                    let frames = value
                        .parse::<u64>()
                        .map_err(|e| format!("invalid --frames '{value}': {e}"))?;
                    max_frames = Some(frames);
                }
                other if other.starts_with("--") => return Err(format!("unknown option '{other}'")),
                other => manifest_path = Some(PathBuf::from(other)),
            }
        }

        Ok(Self {
            manifest_path: manifest_path.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST)),
            settings_path,
            max_frames,
        })
    }
}

/// The streamer, keyed by ECS entities.
#[derive(Resource)]
pub struct FoliageStreaming(pub FoliageStreamer<Entity>);

/// Load everything the foliage pipeline needs and register every chunk of the manifest.
pub fn setup_foliage(mut commands: Commands, config: Res<HostConfig>) {
    let manifest = FoliageManifest::load(&config.manifest_path)
        .unwrap_or_else(|e| panic!("Failed to load manifest {:?}: {e}", config.manifest_path));

    let settings = match &config.settings_path {
        Some(path) => FoliageSettings::load(path)
            .unwrap_or_else(|e| panic!("Failed to load settings {path:?}: {e}")),
        None => manifest.settings.clone().unwrap_or_default(),
    };

    let ground = GroundField::from_spec(&manifest.ground);
    let mut streamer = FoliageStreamer::<Entity>::new(settings.clone(), InstancePool::shared())
        .unwrap_or_else(|e| panic!("Invalid foliage settings: {e}"));

    let bake = manifest
        .bake
        .as_ref()
        .and_then(|path| match load_baked_placements_from_file(path) {
            Ok(db) => {
                info!("Loaded placement bake {:?} ({} chunks)", path, db.chunks.len());
                Some(db)
            }
            Err(e) => {
                warn!("Placement bake unavailable, planning at runtime: {e}");
                None
            }
        });

    let mut waypoints = Vec::new();
    for chunk in &manifest.chunks {
        let bounds = chunk.bounds();
        match streamer.setup_from_export(&manifest.export_dir, &chunk.chunk, bounds, chunk.seed) {
            Ok(id) => {
                if let Some(baked) = bake.as_ref().and_then(|db| db.chunks.get(&chunk.chunk)) {
                    streamer.seed_cache(id, baked);
                }
                waypoints.push(bounds.center());
            }
            Err(e) => error!("Chunk '{}' not scheduled: {e}", chunk.chunk),
        }
    }

    info!(
        "Foliage world ready: {} of {} chunks registered from {:?}",
        streamer.len(),
        manifest.chunks.len(),
        manifest.export_dir
    );

    // Walk through every chunk, then well past the last one and back.
    if let Some(last) = waypoints.last().copied() {
        waypoints.push(last + Vec3::X * (settings.pool_distance + WALK_OVERSHOOT));
    }
    let start = waypoints.first().copied().unwrap_or(Vec3::ZERO);
    commands.spawn((
        FoliageProxy {
            tag: settings.proxy_tag.clone(),
        },
        Transform::from_translation(start),
        ProxyPath::new(waypoints, PROXY_SPEED),
    ));

    commands.insert_resource(ExportAssets::new(manifest.export_dir.clone()));
    commands.insert_resource(ground);
    commands.insert_resource(FoliageStreaming(streamer));
}
