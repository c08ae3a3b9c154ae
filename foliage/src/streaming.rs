//! Streaming registry: every chunk scatterer of a world plus the shared instance pool.
//!
//! The host calls [`FoliageStreamer::tick`] once per frame. A tick looks up the tracked proxies,
//! applies distance gating to every chunk and then advances each chunk by one batch.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bevy::prelude::*;

use crate::{
    load_chunk_export, BakedChunk, ChunkBounds, ChunkScatterer, ConfigurationError, DensityMask,
    FoliageSettings, GroundProbe, InstanceHandle, InstancePool, LayerDefinition, RespawnReason,
    ScatterPhase, SceneHost, SharedPool, StepOutcome,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScattererId(pub u32);

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Whether proxy distances were re-evaluated this tick.
    pub distance_checked: bool,
    pub in_progress: usize,
    pub active: usize,
    /// Torn-down chunks unregistered this tick.
    pub removed: usize,
}

struct Registered<H> {
    scatterer: ChunkScatterer<H>,
    tearing_down: bool,
}

pub struct FoliageStreamer<H: InstanceHandle> {
    settings: FoliageSettings,
    pool: SharedPool<H>,
    scatterers: BTreeMap<ScattererId, Registered<H>>,
    next_id: u32,
    since_check: f32,
}

/// Distance from `point` to the closest proxy, if any.
pub fn nearest_distance(proxies: &[Vec3], point: Vec3) -> Option<f32> {
    proxies
        .iter()
        .map(|p| p.distance(point))
        .min_by(|a, b| a.total_cmp(b))
}

impl<H: InstanceHandle> FoliageStreamer<H> {
    pub fn new(settings: FoliageSettings, pool: SharedPool<H>) -> Result<Self, ConfigurationError> {
        settings.validate()?;
        Ok(Self {
            settings,
            pool,
            scatterers: BTreeMap::new(),
            next_id: 0,
            // Check distances on the first tick.
            since_check: f32::INFINITY,
        })
    }

    pub fn settings(&self) -> &FoliageSettings {
        &self.settings
    }

    pub fn pool(&self) -> &InstancePool<H> {
        &self.pool
    }

    pub fn shared_pool(&self) -> SharedPool<H> {
        Arc::clone(&self.pool)
    }

    pub fn len(&self) -> usize {
        self.scatterers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scatterers.is_empty()
    }

    pub fn get(&self, id: ScattererId) -> Option<&ChunkScatterer<H>> {
        self.scatterers.get(&id).map(|r| &r.scatterer)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScattererId, &ChunkScatterer<H>)> {
        self.scatterers.iter().map(|(id, r)| (*id, &r.scatterer))
    }

    /// Register a chunk. Fails fast on bad inputs; nothing is registered in that case.
    pub fn setup(
        &mut self,
        name: impl Into<String>,
        mask: &DensityMask,
        layers: Vec<LayerDefinition>,
        bounds: ChunkBounds,
        seed: u64,
    ) -> Result<ScattererId, ConfigurationError> {
        let scatterer = ChunkScatterer::new(name, mask, layers, bounds, seed, self.settings.clone())?;
        let id = ScattererId(self.next_id);
        self.next_id += 1;

        info!(
            "Foliage: registered chunk '{}' ({} layers, seed {})",
            scatterer.name(),
            scatterer.layers().len(),
            seed
        );
        self.scatterers.insert(
            id,
            Registered {
                scatterer,
                tearing_down: false,
            },
        );
        Ok(id)
    }

    /// Load a chunk from the exporter's files and register it.
    pub fn setup_from_export(
        &mut self,
        dir: impl AsRef<Path>,
        chunk: &str,
        bounds: ChunkBounds,
        seed: u64,
    ) -> Result<ScattererId, ConfigurationError> {
        let export = load_chunk_export(dir, chunk)?;
        self.setup(export.name, &export.mask, export.layers, bounds, seed)
    }

    /// Seed a chunk's placement cache from a bake.
    pub fn seed_cache(&mut self, id: ScattererId, baked: &BakedChunk) -> bool {
        let Some(entry) = self.scatterers.get_mut(&id) else {
            return false;
        };
        if baked.seed != entry.scatterer.seed() {
            warn!(
                "Foliage '{}': bake was made with seed {} but the chunk uses {}, ignoring it",
                entry.scatterer.name(),
                baked.seed,
                entry.scatterer.seed()
            );
            return false;
        }
        entry
            .scatterer
            .seed_cache(baked.resolved(), baked.density_factor, baked.scale_range);
        true
    }

    pub fn request_respawn(&mut self, id: ScattererId, reason: RespawnReason) -> bool {
        match self.scatterers.get_mut(&id) {
            Some(entry) if !entry.tearing_down => {
                entry.scatterer.request_respawn(reason);
                true
            }
            _ => false,
        }
    }

    pub fn respawn_all(&mut self, reason: RespawnReason) {
        for entry in self.scatterers.values_mut().filter(|e| !e.tearing_down) {
            entry.scatterer.request_respawn(reason);
        }
    }

    /// Validate and install new settings; every chunk respawns with them.
    pub fn apply_settings(&mut self, settings: FoliageSettings) -> Result<(), ConfigurationError> {
        settings.validate()?;
        for entry in self.scatterers.values_mut() {
            entry.scatterer.set_settings(settings.clone());
        }
        self.settings = settings;
        self.since_check = f32::INFINITY;
        info!("Foliage: settings applied to {} chunks", self.scatterers.len());
        Ok(())
    }

    /// Advance distance checks and batch progress.
    pub fn tick(&mut self, dt: f32, host: &mut impl SceneHost<H>, probe: &impl GroundProbe) -> TickReport {
        let mut report = TickReport::default();

        self.since_check += dt;
        if self.since_check >= self.settings.distance_check_interval {
            self.since_check = 0.0;
            report.distance_checked = true;

            let proxies = host.find_tagged(&self.settings.proxy_tag);
            for entry in self.scatterers.values_mut().filter(|e| !e.tearing_down) {
                let point = entry.scatterer.reference_point();
                entry.scatterer.update_proximity(nearest_distance(&proxies, point));
            }
        }

        for entry in self.scatterers.values_mut() {
            match entry.scatterer.step(host, probe, &self.pool) {
                StepOutcome::InProgress => report.in_progress += 1,
                StepOutcome::Done if !entry.scatterer.residents().is_empty() => report.active += 1,
                StepOutcome::Done => {}
            }
        }

        let before = self.scatterers.len();
        self.scatterers.retain(|_, entry| {
            let finished = entry.tearing_down && entry.scatterer.residents().is_empty();
            if finished && entry.scatterer.phase() == ScatterPhase::Idle {
                info!("Foliage: chunk '{}' torn down", entry.scatterer.name());
                return false;
            }
            true
        });
        report.removed = before - self.scatterers.len();

        report
    }

    /// Destroy a chunk's instances over the next ticks, then unregister it.
    pub fn teardown(&mut self, id: ScattererId) -> bool {
        let Some(entry) = self.scatterers.get_mut(&id) else {
            return false;
        };
        entry.tearing_down = true;
        entry.scatterer.deactivate(true);
        true
    }

    /// Destroy every resident and pooled instance now and return every chunk to idle.
    pub fn reset_all(&mut self, host: &mut impl SceneHost<H>) {
        for entry in self.scatterers.values_mut() {
            entry.scatterer.reset(host, &self.pool);
        }
        self.scatterers.retain(|_, entry| !entry.tearing_down);

        let pooled = self.pool.drain_idle();
        let count = pooled.len();
        for (_, handle) in pooled {
            host.destroy(handle);
        }
        self.since_check = f32::INFINITY;
        info!(
            "Foliage: reset, destroyed {} pooled instances, {} chunks idle",
            count,
            self.scatterers.len()
        );
    }
}
