//! Runtime foliage settings.
//!
//! One [`FoliageSettings`] value is injected into the streamer at startup and handed to every
//! chunk scatterer. Changing it at runtime goes through `FoliageStreamer::apply_settings`, which
//! respawns every chunk.

use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, LayerMask, ProbeMasks, DEFAULT_BATCH_SIZE};

/// Ray layer the exporter's terrain lives on by default.
pub const DEFAULT_RAY_LAYER: u8 = 6;

/// Global foliage tuning, loadable from RON.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoliageSettings {
    /// Global scatter multiplier applied on top of each layer's density.
    pub density_factor: f32,
    /// A chunk starts spawning when the tracked proxy comes closer than this.
    pub spawn_distance: f32,
    /// A chunk returns its instances to the pool when the proxy is farther than this.
    pub pool_distance: f32,
    /// Layer the ground probe accepts as terrain.
    pub ray_layer: u8,
    /// Layers that block a placement. `None` means every layer except `ray_layer`.
    pub block_layer_mask: Option<u32>,
    pub casts_shadows: bool,
    pub setup_lods: bool,
    /// Screen-height percentage at which LOD-managed instances are culled.
    pub cull_transition_percent: f32,
    /// Host layer spawned instances are assigned to, if any.
    pub spawn_layer: Option<u8>,
    /// Probes / spawns / reclaims processed per scheduler step.
    pub batch_size: usize,
    /// Uniform scale range `[min, max)` drawn for every placement.
    pub scale_range: (f32, f32),
    /// Tag used to look up the proxy (usually the player) that drives streaming.
    pub proxy_tag: String,
    /// Seconds between distance checks. Zero checks on every tick.
    pub distance_check_interval: f32,
}

impl Default for FoliageSettings {
    fn default() -> Self {
        Self {
            density_factor: 1.0,
            spawn_distance: 70.0,
            pool_distance: 71.0,
            ray_layer: DEFAULT_RAY_LAYER,
            block_layer_mask: None,
            casts_shadows: true,
            setup_lods: true,
            cull_transition_percent: 10.0,
            spawn_layer: None,
            batch_size: DEFAULT_BATCH_SIZE,
            // The exporter's prefabs were scaled by `1 - U(0, 0.3)`.
            scale_range: (0.7, 1.0),
            proxy_tag: "Player".to_string(),
            distance_check_interval: 0.0,
        }
    }
}

/// Per-instance render hints forwarded to the host on placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub casts_shadows: bool,
    /// Relative screen height below which the instance is culled (`None` when LODs are off).
    pub lod_cull_height: Option<f32>,
    pub spawn_layer: Option<u8>,
}

impl FoliageSettings {
    /// Parse settings from RON text. Missing fields fall back to defaults.
    pub fn from_ron_str(text: &str, path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let settings: FoliageSettings =
            ron::from_str(text).map_err(|source| ConfigurationError::Ron {
                path: path.as_ref().to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load and validate settings from a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&text, path)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let fail = |msg: String| Err(ConfigurationError::InvalidSettings(msg));

        if !self.density_factor.is_finite() || self.density_factor < 0.0 {
            return fail(format!("density_factor must be >= 0, got {}", self.density_factor));
        }
        if !(self.spawn_distance >= 0.0) {
            return fail(format!("spawn_distance must be >= 0, got {}", self.spawn_distance));
        }
        // Hysteresis band: reclaiming inside the spawn radius would thrash at the boundary.
        if !(self.pool_distance >= self.spawn_distance) {
            return fail(format!(
                "pool_distance ({}) must be >= spawn_distance ({})",
                self.pool_distance, self.spawn_distance
            ));
        }
        if self.ray_layer >= 32 {
            return fail(format!("ray_layer must be < 32, got {}", self.ray_layer));
        }
        if matches!(self.spawn_layer, Some(layer) if layer >= 32) {
            return fail("spawn_layer must be < 32".to_string());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be at least 1".to_string());
        }
        let (lo, hi) = self.scale_range;
        if !(lo > 0.0 && hi >= lo) {
            return fail(format!("scale_range must satisfy 0 < min <= max, got ({lo}, {hi})"));
        }
        if !(self.distance_check_interval >= 0.0) {
            return fail("distance_check_interval must be >= 0".to_string());
        }
        Ok(())
    }

    pub fn ground_mask(&self) -> LayerMask {
        LayerMask::single(self.ray_layer)
    }

    pub fn block_mask(&self) -> LayerMask {
        match self.block_layer_mask {
            Some(bits) => LayerMask(bits),
            None => LayerMask::all_except(self.ray_layer),
        }
    }

    pub fn probe_masks(&self) -> ProbeMasks {
        ProbeMasks {
            ground: self.ground_mask(),
            block: self.block_mask(),
        }
    }

    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            casts_shadows: self.casts_shadows,
            lod_cull_height: self
                .setup_lods
                .then_some(self.cull_transition_percent / 100.0),
            spawn_layer: self.spawn_layer,
        }
    }
}
