//! Offline placement baking tool.
//!
//! Reads a foliage manifest (default `assets/foliage_manifest.ron`), plans and resolves every
//! listed chunk against the manifest's reference ground, and writes a bincode placement bake
//! the host seeds chunk caches from.
//!
//! Usage: `foliage_baker [manifest.ron] [output.bin]`

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;

use foliage::{
    decode, load_chunk_export, plan, resolve, save_baked_placements_to_file, BakedChunk,
    BakedPlacementDb, FoliageManifest, GroundField, LayerDefinition, PropId, RejectReason, Resolution,
    ResolvedPlacement,
};

const DEFAULT_MANIFEST: &str = "assets/foliage_manifest.ron";
const DEFAULT_OUTPUT: &str = "placements.bin";

#[derive(Resource)]
struct BakeConfig {
    manifest_path: PathBuf,
    /// Overrides the manifest's `bake` path.
    output_path: Option<PathBuf>,
}

fn main() {
    let mut args = std::env::args().skip(1);
    let manifest_path = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST));
    let output_path = args.next().map(PathBuf::from);

    let mut app = App::new();
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_once()));
    app.add_plugins(bevy::log::LogPlugin::default());

    app.insert_resource(BakeConfig {
        manifest_path,
        output_path,
    });
    app.add_systems(Startup, bake);

    app.run();
}

/// Counters for one chunk.
#[derive(Debug, Default)]
struct ChunkTally {
    placed: usize,
    blocked: usize,
    no_ground: usize,
}

fn bake(config: Res<BakeConfig>) {
    let manifest = FoliageManifest::load(&config.manifest_path)
        .unwrap_or_else(|e| panic!("Failed to load manifest {:?}: {e}", config.manifest_path));
    let settings = manifest.settings.clone().unwrap_or_default();
    settings
        .validate()
        .unwrap_or_else(|e| panic!("Invalid settings in {:?}: {e}", config.manifest_path));

    let ground = GroundField::from_spec(&manifest.ground);
    let output_path = output_path(&config, &manifest);

    info!(
        "Baking {} chunks from {:?} (density factor {}, scale range {:?})",
        manifest.chunks.len(),
        manifest.export_dir,
        settings.density_factor,
        settings.scale_range
    );

    let mut db = BakedPlacementDb::default();
    for entry in &manifest.chunks {
        let export = match load_chunk_export(&manifest.export_dir, &entry.chunk) {
            Ok(export) => export,
            Err(e) => {
                warn!("Skipping chunk '{}': {e}", entry.chunk);
                continue;
            }
        };

        let missing = missing_props(&manifest.export_dir, &export.name, &export.layers);
        let bounds = entry.bounds();
        let candidates = plan(
            &export.layers,
            &decode(&export.mask),
            bounds,
            settings.density_factor,
            entry.seed,
        )
        .with_scale_range(settings.scale_range)
        .excluding(missing);

        let mut tally = ChunkTally::default();
        let mut placements: Vec<ResolvedPlacement> = Vec::new();
        for candidate in candidates {
            match resolve(&ground, &candidate, &bounds, settings.probe_masks()) {
                Resolution::Placed(placement) => {
                    tally.placed += 1;
                    placements.push(placement);
                }
                Resolution::Rejected(RejectReason::Blocked) => tally.blocked += 1,
                Resolution::Rejected(RejectReason::NoGround) => tally.no_ground += 1,
            }
        }

        info!(
            "Baked chunk '{}': {} placed, {} blocked, {} without ground",
            entry.chunk, tally.placed, tally.blocked, tally.no_ground
        );

        db.chunks.insert(
            entry.chunk.clone(),
            BakedChunk::new(entry.seed, settings.density_factor, settings.scale_range, &placements),
        );
    }

    save_baked_placements_to_file(&db, &output_path)
        .unwrap_or_else(|e| panic!("Failed to write bake {:?}: {e}", output_path));
}

fn output_path(config: &BakeConfig, manifest: &FoliageManifest) -> PathBuf {
    if let Some(path) = &config.output_path {
        return path.clone();
    }
    manifest.bake.clone().unwrap_or_else(|| {
        config
            .manifest_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(DEFAULT_OUTPUT)
    })
}

/// Props whose model file is absent from the export. The runtime host cannot build them either.
fn missing_props(export_dir: &Path, chunk: &str, layers: &[LayerDefinition]) -> HashSet<PropId> {
    let mut missing = HashSet::new();
    for (index, layer) in layers.iter().enumerate() {
        for prop in layer.props() {
            if !export_dir.join(prop.as_str()).is_file() && missing.insert(prop.clone()) {
                warn!("Chunk '{}': layer {} prop '{}' has no model file, skipping", chunk, index, prop);
            }
        }
    }
    missing
}
