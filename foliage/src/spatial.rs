//! Spatial hashing for blocker lookups.
//!
//! Ground probes run once per accepted candidate, so a chunk can issue thousands of them.
//! Blocker footprints are bucketed into a hash grid over XZ and each probe only checks the
//! blockers registered in its own cell.

use bevy::prelude::*;
use std::collections::HashMap;

use crate::LayerMask;

/// Size of each spatial grid cell in world units.
pub const SPATIAL_CELL_SIZE: f32 = 8.0;

/// An axis-aligned bounding box around a (possibly rotated) footprint.
#[derive(Clone, Copy, Debug)]
pub struct FootprintAabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl FootprintAabb {
    pub fn from_center_extents(center: Vec2, half_extents: Vec2, rotation: f32) -> Self {
        let cos_r = rotation.cos();
        let sin_r = rotation.sin();

        // Extent of the rotated corners
        let extent_x = (half_extents.x * cos_r.abs()) + (half_extents.y * sin_r.abs());
        let extent_y = (half_extents.x * sin_r.abs()) + (half_extents.y * cos_r.abs());

        Self {
            min: Vec2::new(center.x - extent_x, center.y - extent_y),
            max: Vec2::new(center.x + extent_x, center.y + extent_y),
        }
    }
}

/// A box-shaped piece of blocking geometry (a building, a rock, a wall).
#[derive(Clone, Debug, PartialEq)]
pub struct Blocker {
    /// Footprint center in world XZ.
    pub center: Vec2,
    pub half_extents: Vec2,
    /// Rotation about +Y in radians.
    pub rotation: f32,
    /// Height of the top face; this is what a downward probe hits.
    pub top: f32,
    /// Collision layer the blocker lives on.
    pub layer: u8,
}

impl Blocker {
    pub fn axis_aligned(center: Vec2, half_extents: Vec2, top: f32, layer: u8) -> Self {
        Self {
            center,
            half_extents,
            rotation: 0.0,
            top,
            layer,
        }
    }

    /// Check if a world XZ point is inside the rotated footprint.
    pub fn contains_point(&self, point: Vec2) -> bool {
        // Transform point to local space of the rotated rectangle
        let local = point - self.center;
        let cos_r = (-self.rotation).cos();
        let sin_r = (-self.rotation).sin();
        let rotated = Vec2::new(
            local.x * cos_r - local.y * sin_r,
            local.x * sin_r + local.y * cos_r,
        );

        rotated.x.abs() <= self.half_extents.x && rotated.y.abs() <= self.half_extents.y
    }
}

/// Spatial hash grid of blockers.
#[derive(Default, Debug, Clone)]
pub struct BlockerGrid {
    /// Map from grid cell (x, z) to blockers overlapping that cell.
    cells: HashMap<(i32, i32), Vec<usize>>,
    blockers: Vec<Blocker>,
}

impl BlockerGrid {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn world_to_cell(pos: Vec2) -> (i32, i32) {
        (
            (pos.x / SPATIAL_CELL_SIZE).floor() as i32,
            (pos.y / SPATIAL_CELL_SIZE).floor() as i32,
        )
    }

    pub fn insert(&mut self, blocker: Blocker) {
        let aabb = FootprintAabb::from_center_extents(blocker.center, blocker.half_extents, blocker.rotation);
        let min_cell = Self::world_to_cell(aabb.min);
        let max_cell = Self::world_to_cell(aabb.max);

        let idx = self.blockers.len();
        self.blockers.push(blocker);

        for cx in min_cell.0..=max_cell.0 {
            for cz in min_cell.1..=max_cell.1 {
                self.cells.entry((cx, cz)).or_default().push(idx);
            }
        }
    }

    /// Blockers whose footprint contains `point`.
    pub fn covering(&self, point: Vec2) -> impl Iterator<Item = &Blocker> {
        self.cells
            .get(&Self::world_to_cell(point))
            .into_iter()
            .flatten()
            .map(move |&idx| &self.blockers[idx])
            .filter(move |b| b.contains_point(point))
    }

    /// Highest blocker top at or below `y` over `point`, restricted to layers in `mask`.
    pub fn highest_below(&self, point: Vec2, y: f32, mask: LayerMask) -> Option<&Blocker> {
        self.covering(point)
            .filter(|b| mask.contains(b.layer) && b.top <= y)
            .max_by(|a, b| a.top.total_cmp(&b.top))
    }

    pub fn len(&self) -> usize {
        self.blockers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blockers.is_empty()
    }
}
