//! Ground snapping of planned candidates.
//!
//! The scatter planner does not know where the ground is. Each accepted candidate is probed
//! straight down through the host's ray-intersection system:
//! - anything on a blocking layer at or above the ground hit rejects the candidate
//! - no ground within range rejects the candidate
//! - otherwise the candidate lands on the ground hit point

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{ChunkBounds, PlacementCandidate, PropId};

/// Height added above the candidate before probing down.
pub const PROBE_LIFT: f32 = 200.0;

/// Maximum probe length.
pub const PROBE_MAX_DISTANCE: f32 = 5000.0;

/// Bit set of host collision layers (0..32).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LayerMask(pub u32);

impl LayerMask {
    pub const NONE: LayerMask = LayerMask(0);
    pub const ALL: LayerMask = LayerMask(u32::MAX);

    pub const fn single(layer: u8) -> Self {
        LayerMask(1 << layer)
    }

    pub const fn all_except(layer: u8) -> Self {
        LayerMask(!(1 << layer))
    }

    pub const fn contains(self, layer: u8) -> bool {
        layer < 32 && self.0 & (1 << layer) != 0
    }

    pub const fn union(self, other: LayerMask) -> Self {
        LayerMask(self.0 | other.0)
    }
}

/// Ground and blocking masks used for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMasks {
    pub ground: LayerMask,
    pub block: LayerMask,
}

/// Closest intersection of a downward ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub point: Vec3,
    pub distance: f32,
    pub layer: u8,
}

/// The host's ray-intersection system, restricted to what foliage needs.
pub trait GroundProbe {
    /// Cast a ray from `origin` along -Y and return the nearest hit on a layer in `mask`
    /// within `max_distance`.
    fn raycast_down(&self, origin: Vec3, max_distance: f32, mask: LayerMask) -> Option<RayHit>;
}

impl<T: GroundProbe + ?Sized> GroundProbe for &T {
    fn raycast_down(&self, origin: Vec3, max_distance: f32, mask: LayerMask) -> Option<RayHit> {
        (**self).raycast_down(origin, max_distance, mask)
    }
}

/// A candidate that landed on the ground. This is what gets cached, baked and spawned.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlacement {
    pub layer: usize,
    pub prop: PropId,
    /// World-space ground hit point.
    pub position: Vec3,
    /// Rotation about +Y in degrees.
    pub rotation_y: f32,
    pub scale: f32,
}

impl ResolvedPlacement {
    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(self.rotation_y.to_radians())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Blocking geometry sits on or above the ground along the probe.
    Blocked,
    /// The probe found no ground within range.
    NoGround,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Placed(ResolvedPlacement),
    Rejected(RejectReason),
}

/// World-space start of the probe for `candidate`.
pub fn probe_origin(bounds: &ChunkBounds, candidate: &PlacementCandidate) -> Vec3 {
    bounds.layer_origin() + candidate.local_position + Vec3::Y * PROBE_LIFT
}

fn cast(probe: &impl GroundProbe, origin: Vec3, masks: ProbeMasks) -> Result<RayHit, RejectReason> {
    let ground = probe.raycast_down(origin, PROBE_MAX_DISTANCE, masks.ground);
    let blocker = probe.raycast_down(origin, PROBE_MAX_DISTANCE, masks.block);

    match (ground, blocker) {
        (Some(g), Some(b)) if b.distance <= g.distance => Err(RejectReason::Blocked),
        (None, Some(_)) => Err(RejectReason::Blocked),
        (Some(g), _) => Ok(g),
        (None, None) => Err(RejectReason::NoGround),
    }
}

/// Snap one candidate onto the ground.
pub fn resolve(
    probe: &impl GroundProbe,
    candidate: &PlacementCandidate,
    bounds: &ChunkBounds,
    masks: ProbeMasks,
) -> Resolution {
    match cast(probe, probe_origin(bounds, candidate), masks) {
        Ok(hit) => Resolution::Placed(ResolvedPlacement {
            layer: candidate.layer,
            prop: candidate.prop.clone(),
            position: hit.point,
            rotation_y: candidate.rotation_y,
            scale: candidate.scale,
        }),
        Err(reason) => Resolution::Rejected(reason),
    }
}

/// Outcome of re-probing an existing placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resnap {
    /// Ground found; the placement belongs at this point.
    Grounded(Vec3),
    /// Something now blocks the spot; the instance should be hidden.
    Hidden,
    /// No ground under the placement; leave it where it is.
    Unchanged,
}

/// Re-probe a placement from [`PROBE_LIFT`] above its current position, e.g. after the ground
/// geometry under a baked chunk was re-imported.
pub fn resnap(probe: &impl GroundProbe, placement: &ResolvedPlacement, masks: ProbeMasks) -> Resnap {
    match cast(probe, placement.position + Vec3::Y * PROBE_LIFT, masks) {
        Ok(hit) => Resnap::Grounded(hit.point),
        Err(RejectReason::Blocked) => Resnap::Hidden,
        Err(RejectReason::NoGround) => Resnap::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Blocker, GroundField};

    const GROUND: u8 = 6;
    const WALLS: u8 = 2;

    fn masks() -> ProbeMasks {
        ProbeMasks {
            ground: LayerMask::single(GROUND),
            block: LayerMask::all_except(GROUND),
        }
    }

    fn candidate(x: f32, z: f32) -> PlacementCandidate {
        PlacementCandidate {
            layer: 0,
            prop: PropId::from("bush"),
            local_position: Vec3::new(x, -20.0, z),
            rotation_y: 45.0,
            scale: 0.9,
        }
    }

    fn bounds() -> ChunkBounds {
        ChunkBounds::new(Vec3::new(100.0, 0.0, 200.0), Vec3::new(133.0, 10.0, 233.0))
    }

    #[test]
    fn test_layer_mask_bits() {
        assert!(LayerMask::single(3).contains(3));
        assert!(!LayerMask::single(3).contains(4));
        assert!(!LayerMask::all_except(3).contains(3));
        assert!(LayerMask::all_except(3).contains(31));
        assert!(!LayerMask::ALL.contains(40));
        assert_eq!(LayerMask::single(1).union(LayerMask::single(2)), LayerMask(0b110));
    }

    #[test]
    fn test_probe_origin_is_lifted_from_layer_origin() {
        let origin = probe_origin(&bounds(), &candidate(4.0, 5.0));
        assert_eq!(origin, Vec3::new(104.0, 10.0 - 20.0 + PROBE_LIFT, 205.0));
    }

    #[test]
    fn test_clean_hit_lands_on_ground() {
        let field = GroundField::flat(3.0, GROUND);
        let Resolution::Placed(p) = resolve(&field, &candidate(4.0, 5.0), &bounds(), masks()) else {
            panic!("expected a placement");
        };
        assert_eq!(p.position, Vec3::new(104.0, 3.0, 205.0));
        assert_eq!(p.rotation_y, 45.0);
        assert_eq!(p.scale, 0.9);
    }

    #[test]
    fn test_blocker_above_ground_rejects() {
        let mut field = GroundField::flat(3.0, GROUND);
        field.add_blocker(Blocker::axis_aligned(Vec2::new(104.0, 205.0), Vec2::splat(1.0), 8.0, WALLS));
        assert_eq!(
            resolve(&field, &candidate(4.0, 5.0), &bounds(), masks()),
            Resolution::Rejected(RejectReason::Blocked)
        );
        // Next to the blocker the ground is clear.
        assert!(matches!(
            resolve(&field, &candidate(10.0, 5.0), &bounds(), masks()),
            Resolution::Placed(_)
        ));
    }

    #[test]
    fn test_blocker_on_ignored_layer_does_not_reject() {
        let mut field = GroundField::flat(3.0, GROUND);
        field.add_blocker(Blocker::axis_aligned(Vec2::new(104.0, 205.0), Vec2::splat(1.0), 8.0, WALLS));
        let masks = ProbeMasks {
            ground: LayerMask::single(GROUND),
            block: LayerMask::NONE,
        };
        assert!(matches!(
            resolve(&field, &candidate(4.0, 5.0), &bounds(), masks),
            Resolution::Placed(_)
        ));
    }

    #[test]
    fn test_missing_ground_rejects() {
        let field = GroundField::flat(3.0, WALLS);
        assert_eq!(
            resolve(&field, &candidate(4.0, 5.0), &bounds(), masks()),
            Resolution::Rejected(RejectReason::Blocked)
        );
        let nothing = GroundField::flat(3.0, 30);
        let masks = ProbeMasks {
            ground: LayerMask::single(GROUND),
            block: LayerMask::single(WALLS),
        };
        assert_eq!(
            resolve(&nothing, &candidate(4.0, 5.0), &bounds(), masks),
            Resolution::Rejected(RejectReason::NoGround)
        );
    }

    #[test]
    fn test_resnap() {
        let placement = ResolvedPlacement {
            layer: 0,
            prop: PropId::from("bush"),
            position: Vec3::new(1.0, 0.0, 1.0),
            rotation_y: 0.0,
            scale: 1.0,
        };
        let mut field = GroundField::flat(2.5, GROUND);
        assert_eq!(resnap(&field, &placement, masks()), Resnap::Grounded(Vec3::new(1.0, 2.5, 1.0)));

        field.add_blocker(Blocker::axis_aligned(Vec2::ONE, Vec2::splat(0.5), 4.0, WALLS));
        assert_eq!(resnap(&field, &placement, masks()), Resnap::Hidden);

        let nowhere = GroundField::flat(2.5, 30);
        let masks = ProbeMasks {
            ground: LayerMask::single(GROUND),
            block: LayerMask::NONE,
        };
        assert_eq!(resnap(&nowhere, &placement, masks), Resnap::Unchanged);
    }
}
