//! Per-chunk spawn/despawn scheduling.
//!
//! A [`ChunkScatterer`] owns the scatter inputs of one terrain chunk and walks a resumable state
//! machine one bounded batch per [`ChunkScatterer::step`]:
//!
//! ```text
//! Idle -> Planning -> Spawning -> Active -> Despawning -> Idle
//!                                        -> Replanning -> Planning | Spawning
//! ```
//!
//! Every run is tagged with a generation. Respawn requests bump the generation and the in-flight
//! run notices at its next batch boundary, hands its instances back to the pool and restarts.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use bevy::prelude::*;

use crate::{
    decode, resnap, resolve, validate_layers, ChunkBounds, ConfigurationError, DensityMask,
    FoliageSettings, GroundProbe, InstancePool, LayerDefinition, LayerOccupancy, ProbeMasks,
    PropId, RenderOptions, Resnap, Resolution, ResolvedPlacement, ScatterPlan,
};

/// Requirements on the host's instance handle type.
pub trait InstanceHandle: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> InstanceHandle for T where T: Clone + Eq + Hash + Debug + Send + Sync + 'static {}

/// Scene operations the scheduler needs from its host.
pub trait SceneHost<H> {
    /// World positions of every object carrying `tag`.
    fn find_tagged(&self, tag: &str) -> Vec<Vec3>;

    /// Whether `prop` refers to an asset the host can build.
    fn can_instantiate(&self, prop: &PropId) -> bool;

    /// Construct a new instance of `prop`. `None` if the asset cannot be resolved.
    fn instantiate(&mut self, prop: &PropId) -> Option<H>;

    /// Move a fresh or pooled instance to its placement and make it visible.
    fn place(&mut self, handle: &H, placement: &ResolvedPlacement, render: &RenderOptions);

    /// Hide an instance that is going back to the pool.
    fn park(&mut self, handle: &H);

    fn destroy(&mut self, handle: H);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScatterPhase {
    Idle,
    Planning,
    Spawning,
    Active,
    Despawning,
    Replanning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnReason {
    Explicit,
    SettingsChanged,
    /// The geometry under the chunk changed; cached placements must be re-probed.
    GroundChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    InProgress,
}

/// One live instance owned by a scatterer.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnedInstance<H> {
    pub pool_key: PropId,
    pub handle: H,
    pub layer: usize,
    pub generation: u64,
}

/// Settings a cached placement list was resolved with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheKey {
    pub density_factor: f32,
    pub scale_range: (f32, f32),
    pub masks: ProbeMasks,
}

impl CacheKey {
    fn of(settings: &FoliageSettings) -> Self {
        Self {
            density_factor: settings.density_factor,
            scale_range: settings.scale_range,
            masks: settings.probe_masks(),
        }
    }
}

/// Resolved placements kept for replay.
#[derive(Debug, Clone)]
pub struct PlacementCache {
    pub key: CacheKey,
    pub placements: Arc<[ResolvedPlacement]>,
    /// Seeded from a bake; survives going idle.
    pub pinned: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScattererStats {
    pub activations: u32,
    pub reclaims: u32,
    pub plans: u32,
    pub cache_reuses: u32,
    pub cancellations: u32,
}

enum PlanSource {
    Fresh(Box<ScatterPlan>),
    Resnap {
        placements: Arc<[ResolvedPlacement]>,
        cursor: usize,
    },
}

enum Stage {
    Idle,
    /// Activated; the run starts on the next step.
    Starting,
    Planning {
        generation: u64,
        source: PlanSource,
        resolved: Vec<ResolvedPlacement>,
    },
    Spawning {
        generation: u64,
        placements: Arc<[ResolvedPlacement]>,
        cursor: usize,
        skipped: HashSet<PropId>,
    },
    Active,
    Despawning {
        destroy: bool,
    },
    Replanning,
}

/// Scatter state of one terrain chunk.
pub struct ChunkScatterer<H> {
    name: String,
    layers: Arc<[LayerDefinition]>,
    occupancy: Arc<LayerOccupancy>,
    bounds: ChunkBounds,
    seed: u64,
    settings: FoliageSettings,
    generation: u64,
    stage: Stage,
    residents: Vec<SpawnedInstance<H>>,
    cache: Option<PlacementCache>,
    resnap_pending: bool,
    stats: ScattererStats,
}

impl<H: InstanceHandle> ChunkScatterer<H> {
    /// Validate the chunk inputs and decode the mask. The scatterer starts `Idle`.
    pub fn new(
        name: impl Into<String>,
        mask: &DensityMask,
        layers: Vec<LayerDefinition>,
        bounds: ChunkBounds,
        seed: u64,
        settings: FoliageSettings,
    ) -> Result<Self, ConfigurationError> {
        validate_layers(&layers)?;
        bounds.validate()?;
        settings.validate()?;

        Ok(Self {
            name: name.into(),
            layers: layers.into(),
            occupancy: Arc::new(decode(mask)),
            bounds,
            seed,
            settings,
            generation: 0,
            stage: Stage::Idle,
            residents: Vec::new(),
            cache: None,
            resnap_pending: false,
            stats: ScattererStats::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> &ChunkBounds {
        &self.bounds
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn layers(&self) -> &[LayerDefinition] {
        &self.layers
    }

    pub fn settings(&self) -> &FoliageSettings {
        &self.settings
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn stats(&self) -> ScattererStats {
        self.stats
    }

    pub fn residents(&self) -> &[SpawnedInstance<H>] {
        &self.residents
    }

    /// Point the proxy distance is measured against.
    pub fn reference_point(&self) -> Vec3 {
        self.bounds.center()
    }

    pub fn cached_placements(&self) -> Option<&[ResolvedPlacement]> {
        self.cache.as_ref().map(|c| &*c.placements)
    }

    pub fn phase(&self) -> ScatterPhase {
        match self.stage {
            Stage::Idle => ScatterPhase::Idle,
            Stage::Starting | Stage::Planning { .. } => ScatterPhase::Planning,
            Stage::Spawning { .. } => ScatterPhase::Spawning,
            Stage::Active => ScatterPhase::Active,
            Stage::Despawning { .. } => ScatterPhase::Despawning,
            Stage::Replanning => ScatterPhase::Replanning,
        }
    }

    fn cache_key(&self) -> CacheKey {
        CacheKey::of(&self.settings)
    }

    /// Install baked placements as a pinned cache.
    pub fn seed_cache(&mut self, placements: Vec<ResolvedPlacement>, density_factor: f32, scale_range: (f32, f32)) {
        self.cache = Some(PlacementCache {
            key: CacheKey {
                density_factor,
                scale_range,
                masks: self.settings.probe_masks(),
            },
            placements: placements.into(),
            pinned: true,
        });
    }

    /// Start a run. Only an idle scatterer can be activated.
    pub fn activate(&mut self) -> bool {
        if !matches!(self.stage, Stage::Idle) {
            return false;
        }
        self.generation += 1;
        self.stats.activations += 1;
        self.stage = Stage::Starting;
        debug!("Foliage '{}': activated (generation {})", self.name, self.generation);
        true
    }

    /// Give every resident back, pooling it or destroying it when `destroy` is set.
    pub fn deactivate(&mut self, destroy: bool) {
        match self.stage {
            Stage::Idle if self.residents.is_empty() => {}
            Stage::Despawning { destroy: already } => {
                self.stage = Stage::Despawning {
                    destroy: already || destroy,
                };
            }
            _ => {
                self.generation += 1;
                self.stage = Stage::Despawning { destroy };
            }
        }
    }

    /// Invalidate the current run. An active chunk replans; an in-flight run unwinds at its next
    /// batch boundary.
    pub fn request_respawn(&mut self, reason: RespawnReason) {
        if reason == RespawnReason::GroundChanged {
            if self.cache.as_ref().is_some_and(|c| c.pinned) {
                self.resnap_pending = true;
            } else {
                self.cache = None;
            }
        }

        match self.stage {
            Stage::Idle | Stage::Despawning { .. } => {}
            Stage::Active => {
                self.generation += 1;
                self.stage = Stage::Replanning;
            }
            Stage::Starting | Stage::Planning { .. } | Stage::Spawning { .. } | Stage::Replanning => {
                self.generation += 1;
            }
        }
        debug!(
            "Foliage '{}': respawn requested ({:?}), generation {}",
            self.name, reason, self.generation
        );
    }

    /// Replace the settings; respawns if anything changed.
    pub fn set_settings(&mut self, settings: FoliageSettings) {
        if settings == self.settings {
            return;
        }
        self.settings = settings;
        self.request_respawn(RespawnReason::SettingsChanged);
    }

    /// Apply distance gating for the nearest proxy distance. `None` (no proxy found) keeps the
    /// current state.
    pub fn update_proximity(&mut self, distance: Option<f32>) {
        let Some(distance) = distance else {
            return;
        };

        match self.stage {
            Stage::Idle if distance < self.settings.spawn_distance => {
                self.activate();
            }
            Stage::Idle | Stage::Despawning { .. } => {}
            _ if distance > self.settings.pool_distance => {
                self.generation += 1;
                self.stats.reclaims += 1;
                self.stage = Stage::Despawning { destroy: false };
                debug!("Foliage '{}': proxy left ({:.1}m), reclaiming", self.name, distance);
            }
            _ => {}
        }
    }

    /// Destroy every resident immediately and go idle.
    pub fn reset(&mut self, host: &mut impl SceneHost<H>, pool: &InstancePool<H>) {
        for instance in self.residents.drain(..) {
            pool.forget(&instance.handle);
            host.destroy(instance.handle);
        }
        self.generation += 1;
        self.stage = Stage::Idle;
        self.enter_idle();
    }

    /// Advance by one batch.
    pub fn step(
        &mut self,
        host: &mut impl SceneHost<H>,
        probe: &impl GroundProbe,
        pool: &InstancePool<H>,
    ) -> StepOutcome {
        let stage = std::mem::replace(&mut self.stage, Stage::Idle);
        self.stage = match stage {
            Stage::Planning { generation, .. } | Stage::Spawning { generation, .. }
                if generation != self.generation =>
            {
                debug!(
                    "Foliage '{}': run {} superseded by {}, unwinding",
                    self.name, generation, self.generation
                );
                self.stats.cancellations += 1;
                Stage::Replanning
            }
            Stage::Idle => Stage::Idle,
            Stage::Active => Stage::Active,
            Stage::Starting => self.start_run(&*host),
            Stage::Planning {
                generation,
                source,
                resolved,
            } => self.step_planning(probe, generation, source, resolved),
            Stage::Spawning {
                generation,
                placements,
                cursor,
                skipped,
            } => self.step_spawning(host, pool, generation, placements, cursor, skipped),
            Stage::Despawning { destroy } => {
                if self.reclaim_batch(host, pool, destroy) {
                    self.enter_idle();
                    Stage::Idle
                } else {
                    Stage::Despawning { destroy }
                }
            }
            Stage::Replanning => {
                if self.reclaim_batch(host, pool, false) {
                    self.start_run(&*host)
                } else {
                    Stage::Replanning
                }
            }
        };

        match self.stage {
            Stage::Idle | Stage::Active => StepOutcome::Done,
            _ => StepOutcome::InProgress,
        }
    }

    fn enter_idle(&mut self) {
        if !self.cache.as_ref().is_some_and(|c| c.pinned) {
            self.cache = None;
        }
        debug!("Foliage '{}': idle", self.name);
    }

    fn unresolvable_props(&self, host: &impl SceneHost<H>) -> HashSet<PropId> {
        let mut missing = HashSet::new();
        for (index, layer) in self.layers.iter().enumerate() {
            for prop in layer.props() {
                if !host.can_instantiate(prop) {
                    warn!(
                        "Foliage '{}': layer {} prop '{}' cannot be instantiated, skipping",
                        self.name, index, prop
                    );
                    missing.insert(prop.clone());
                }
            }
        }
        missing
    }

    fn start_run(&mut self, host: &impl SceneHost<H>) -> Stage {
        let generation = self.generation;
        let key = self.cache_key();

        if let Some(cache) = &self.cache {
            if cache.key == key {
                let placements = Arc::clone(&cache.placements);
                if self.resnap_pending {
                    return Stage::Planning {
                        generation,
                        source: PlanSource::Resnap {
                            placements,
                            cursor: 0,
                        },
                        resolved: Vec::new(),
                    };
                }
                self.stats.cache_reuses += 1;
                return Stage::Spawning {
                    generation,
                    placements,
                    cursor: 0,
                    skipped: HashSet::new(),
                };
            }
            if cache.pinned {
                info!("Foliage '{}': baked placements no longer match settings, replanning", self.name);
            }
            self.cache = None;
            self.resnap_pending = false;
        }

        let plan = ScatterPlan::new(
            Arc::clone(&self.layers),
            Arc::clone(&self.occupancy),
            self.bounds,
            self.settings.density_factor,
            self.seed,
        )
        .with_scale_range(self.settings.scale_range)
        .excluding(self.unresolvable_props(host));

        self.stats.plans += 1;
        Stage::Planning {
            generation,
            source: PlanSource::Fresh(Box::new(plan)),
            resolved: Vec::new(),
        }
    }

    fn step_planning(
        &mut self,
        probe: &impl GroundProbe,
        generation: u64,
        mut source: PlanSource,
        mut resolved: Vec<ResolvedPlacement>,
    ) -> Stage {
        let masks = self.settings.probe_masks();
        let budget = self.settings.batch_size;

        let finished = match &mut source {
            PlanSource::Fresh(plan) => {
                let mut finished = false;
                for _ in 0..budget {
                    let Some(candidate) = plan.next() else {
                        finished = true;
                        break;
                    };
                    if let Resolution::Placed(placement) = resolve(probe, &candidate, &self.bounds, masks) {
                        resolved.push(placement);
                    }
                }
                finished
            }
            PlanSource::Resnap { placements, cursor } => {
                let end = (*cursor + budget).min(placements.len());
                for placement in &placements[*cursor..end] {
                    match resnap(probe, placement, masks) {
                        Resnap::Grounded(position) => resolved.push(ResolvedPlacement {
                            position,
                            ..placement.clone()
                        }),
                        Resnap::Hidden => {}
                        Resnap::Unchanged => resolved.push(placement.clone()),
                    }
                }
                *cursor = end;
                end == placements.len()
            }
        };

        if !finished {
            return Stage::Planning {
                generation,
                source,
                resolved,
            };
        }

        let pinned = matches!(source, PlanSource::Resnap { .. });
        if pinned {
            self.resnap_pending = false;
        }
        let placements: Arc<[ResolvedPlacement]> = resolved.into();
        info!(
            "Foliage '{}': {} placements resolved (generation {})",
            self.name,
            placements.len(),
            generation
        );
        self.cache = Some(PlacementCache {
            key: self.cache_key(),
            placements: Arc::clone(&placements),
            pinned,
        });

        Stage::Spawning {
            generation,
            placements,
            cursor: 0,
            skipped: HashSet::new(),
        }
    }

    fn step_spawning(
        &mut self,
        host: &mut impl SceneHost<H>,
        pool: &InstancePool<H>,
        generation: u64,
        placements: Arc<[ResolvedPlacement]>,
        cursor: usize,
        mut skipped: HashSet<PropId>,
    ) -> Stage {
        let render = self.settings.render_options();
        let end = (cursor + self.settings.batch_size).min(placements.len());

        for placement in &placements[cursor..end] {
            let prop = &placement.prop;
            let handle = match pool.acquire(prop) {
                Some(handle) => handle,
                None => match host.instantiate(prop) {
                    Some(handle) => {
                        pool.track(prop, handle.clone());
                        handle
                    }
                    None => {
                        if skipped.insert(prop.clone()) {
                            warn!(
                                "Foliage '{}': layer {} prop '{}' could not be instantiated, skipping",
                                self.name, placement.layer, prop
                            );
                        }
                        continue;
                    }
                },
            };
            host.place(&handle, placement, &render);
            self.residents.push(SpawnedInstance {
                pool_key: prop.clone(),
                handle,
                layer: placement.layer,
                generation,
            });
        }

        if end < placements.len() {
            return Stage::Spawning {
                generation,
                placements,
                cursor: end,
                skipped,
            };
        }

        info!(
            "Foliage '{}': active with {} instances",
            self.name,
            self.residents.len()
        );
        Stage::Active
    }

    /// Hand back up to one batch of residents. Returns `true` once none are left.
    fn reclaim_batch(&mut self, host: &mut impl SceneHost<H>, pool: &InstancePool<H>, destroy: bool) -> bool {
        let take = self.settings.batch_size.min(self.residents.len());
        let start = self.residents.len() - take;

        for instance in self.residents.drain(start..) {
            if destroy {
                pool.forget(&instance.handle);
                host.destroy(instance.handle);
            } else {
                host.park(&instance.handle);
                pool.release(&instance.pool_key, instance.handle);
            }
        }
        self.residents.is_empty()
    }
}
