//! Reference ground for headless runs and the bake tool.
//!
//! A [`GroundField`] is a procedural heightfield on one collision layer plus a set of box
//! blockers on other layers. It implements [`GroundProbe`] so the scatter pipeline can be run
//! without an engine's physics scene.
//!
//! Scale: 1 unit = 1 meter

use bevy::prelude::*;
use noise::{NoiseFn, Perlin};
use serde::{Deserialize, Serialize};

use crate::{Blocker, BlockerGrid, GroundProbe, LayerMask, RayHit, DEFAULT_RAY_LAYER};

/// Horizontal frequency of the base heightfield.
const BASE_SCALE: f64 = 0.004;
/// Horizontal frequency of the detail bumps.
const DETAIL_SCALE: f64 = 0.04;
/// Detail amplitude relative to the base amplitude.
const DETAIL_RATIO: f32 = 0.15;

/// Serializable description of a ground field (part of the foliage manifest).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundSpec {
    pub seed: u32,
    pub base_height: f32,
    /// Peak height variation. Zero gives a flat plane at `base_height`.
    pub amplitude: f32,
    pub ground_layer: u8,
    pub blockers: Vec<BlockerSpec>,
}

impl Default for GroundSpec {
    fn default() -> Self {
        Self {
            seed: 42,
            base_height: 0.0,
            amplitude: 0.0,
            ground_layer: DEFAULT_RAY_LAYER,
            blockers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockerSpec {
    /// World XZ center.
    pub center: [f32; 2],
    pub half_extents: [f32; 2],
    #[serde(default)]
    pub rotation_deg: f32,
    pub top: f32,
    pub layer: u8,
}

impl From<&BlockerSpec> for Blocker {
    fn from(spec: &BlockerSpec) -> Self {
        Blocker {
            center: Vec2::from_array(spec.center),
            half_extents: Vec2::from_array(spec.half_extents),
            rotation: spec.rotation_deg.to_radians(),
            top: spec.top,
            layer: spec.layer,
        }
    }
}

/// Heightfield plus blockers, probed with downward rays.
#[derive(Resource, Debug, Clone)]
pub struct GroundField {
    height_noise: Perlin,
    detail_noise: Perlin,
    base_height: f32,
    amplitude: f32,
    ground_layer: u8,
    blockers: BlockerGrid,
}

impl GroundField {
    pub fn new(seed: u32, base_height: f32, amplitude: f32, ground_layer: u8) -> Self {
        Self {
            height_noise: Perlin::new(seed),
            detail_noise: Perlin::new(seed.wrapping_add(3000)),
            base_height,
            amplitude,
            ground_layer,
            blockers: BlockerGrid::new(),
        }
    }

    /// A horizontal plane at `height` on `ground_layer`.
    pub fn flat(height: f32, ground_layer: u8) -> Self {
        Self::new(0, height, 0.0, ground_layer)
    }

    pub fn from_spec(spec: &GroundSpec) -> Self {
        let mut field = Self::new(spec.seed, spec.base_height, spec.amplitude, spec.ground_layer);
        for blocker in &spec.blockers {
            field.add_blocker(blocker.into());
        }
        field
    }

    pub fn add_blocker(&mut self, blocker: Blocker) {
        self.blockers.insert(blocker);
    }

    pub fn blockers(&self) -> &BlockerGrid {
        &self.blockers
    }

    pub fn ground_layer(&self) -> u8 {
        self.ground_layer
    }

    /// Terrain height at a world XZ position.
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        if self.amplitude == 0.0 {
            return self.base_height;
        }
        let base = self
            .height_noise
            .get([x as f64 * BASE_SCALE, z as f64 * BASE_SCALE]) as f32;
        let detail = self
            .detail_noise
            .get([x as f64 * DETAIL_SCALE, z as f64 * DETAIL_SCALE]) as f32;

        self.base_height + base * self.amplitude + detail * self.amplitude * DETAIL_RATIO
    }
}

impl GroundProbe for GroundField {
    fn raycast_down(&self, origin: Vec3, max_distance: f32, mask: LayerMask) -> Option<RayHit> {
        let column = Vec2::new(origin.x, origin.z);
        let mut best: Option<RayHit> = None;
        let mut consider = |y: f32, layer: u8| {
            let distance = origin.y - y;
            if distance < 0.0 || distance > max_distance {
                return;
            }
            if best.map_or(true, |hit| distance < hit.distance) {
                best = Some(RayHit {
                    point: Vec3::new(origin.x, y, origin.z),
                    distance,
                    layer,
                });
            }
        };

        if mask.contains(self.ground_layer) {
            consider(self.height_at(origin.x, origin.z), self.ground_layer);
        }
        if let Some(blocker) = self.blockers.highest_below(column, origin.y, mask) {
            consider(blocker.top, blocker.layer);
        }
        best
    }
}
