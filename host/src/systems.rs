//! Per-frame systems: proxy movement, foliage ticking, progress logging and exit.

use std::collections::HashSet;

use bevy::prelude::*;
use foliage::{GroundField, TickReport, MAX_LAYERS};

use crate::scene::{EntityHost, ExportAssets, FoliageInstance, FoliageLayer, FoliageProxy, Parked, RenderHints};
use crate::world::{FoliageStreaming, HostConfig};

/// Seconds between progress log lines.
const REPORT_INTERVAL: f32 = 2.0;

/// Waypoints the proxy walks back and forth along.
#[derive(Component, Debug, Clone)]
pub struct ProxyPath {
    pub waypoints: Vec<Vec3>,
    pub speed: f32,
    pub next: usize,
    /// Walking back towards the first waypoint.
    pub returning: bool,
}

impl ProxyPath {
    pub fn new(waypoints: Vec<Vec3>, speed: f32) -> Self {
        Self {
            waypoints,
            speed,
            next: 0,
            returning: false,
        }
    }

    fn advance_target(&mut self) {
        let last = self.waypoints.len().saturating_sub(1);
        if self.returning {
            if self.next == 0 {
                self.returning = false;
                self.next = last.min(1);
            } else {
                self.next -= 1;
            }
        } else if self.next >= last {
            self.returning = true;
            self.next = last.saturating_sub(1);
        } else {
            self.next += 1;
        }
    }
}

/// Move `from` towards `to` by at most `step`. Returns the new position and whether `to` was reached.
pub fn advance_toward(from: Vec3, to: Vec3, step: f32) -> (Vec3, bool) {
    let offset = to - from;
    let distance = offset.length();
    if distance <= step {
        (to, true)
    } else {
        (from + offset / distance * step, false)
    }
}

/// Last streamer report, for progress logging.
#[derive(Resource, Debug, Default)]
pub struct LastTick(pub TickReport);

pub fn walk_proxy(time: Res<Time>, mut proxies: Query<(&mut Transform, &mut ProxyPath)>) {
    let dt = time.delta_secs();
    for (mut transform, mut path) in proxies.iter_mut() {
        if path.waypoints.len() < 2 {
            continue;
        }
        let target = path.waypoints[path.next];
        let (position, reached) = advance_toward(transform.translation, target, path.speed * dt);
        transform.translation = position;
        if reached {
            path.advance_target();
        }
    }
}

pub fn tick_foliage(
    mut commands: Commands,
    time: Res<Time>,
    assets: Res<ExportAssets>,
    ground: Res<GroundField>,
    mut streaming: ResMut<FoliageStreaming>,
    mut last: ResMut<LastTick>,
    proxies: Query<(&FoliageProxy, &Transform)>,
) {
    let mut host = EntityHost {
        commands: &mut commands,
        proxies: proxies
            .iter()
            .map(|(proxy, transform)| (proxy.tag.clone(), transform.translation))
            .collect(),
        assets: &assets,
    };
    last.0 = streaming.0.tick(time.delta_secs(), &mut host, &*ground);
}

/// Tally of the foliage instances in the world.
#[derive(Debug, Default, PartialEq)]
pub struct InstanceSummary {
    pub visible: usize,
    pub parked: usize,
    /// Visible instances per density layer.
    pub per_layer: [usize; MAX_LAYERS],
    pub shadow_casters: usize,
    pub lod_managed: usize,
    /// Visible instances assigned to a render layer.
    pub layered: usize,
    /// Distinct props among visible instances.
    pub props: usize,
}

impl InstanceSummary {
    pub fn tally<'a>(
        instances: impl IntoIterator<
            Item = (
                &'a FoliageInstance,
                bool,
                Option<&'a FoliageLayer>,
                Option<&'a RenderHints>,
            ),
        >,
    ) -> Self {
        let mut summary = Self::default();
        let mut props = HashSet::new();
        for (instance, parked, layer, hints) in instances {
            if parked {
                summary.parked += 1;
                continue;
            }
            summary.visible += 1;
            props.insert(&instance.prop);
            if let Some(slot) = layer.and_then(|l| summary.per_layer.get_mut(l.0)) {
                *slot += 1;
            }
            if let Some(hints) = hints {
                summary.shadow_casters += usize::from(hints.casts_shadows);
                summary.lod_managed += usize::from(hints.lod_cull_height.is_some());
                summary.layered += usize::from(hints.spawn_layer.is_some());
            }
        }
        summary.props = props.len();
        summary
    }
}

pub fn report_progress(
    time: Res<Time>,
    mut elapsed: Local<f32>,
    last: Res<LastTick>,
    streaming: Res<FoliageStreaming>,
    assets: Res<ExportAssets>,
    instances: Query<(
        &FoliageInstance,
        Has<Parked>,
        Option<&FoliageLayer>,
        Option<&RenderHints>,
    )>,
    proxies: Query<&Transform, With<FoliageProxy>>,
) {
    *elapsed += time.delta_secs();
    if *elapsed < REPORT_INTERVAL {
        return;
    }
    *elapsed = 0.0;

    let summary = InstanceSummary::tally(instances.iter());
    let proxy = proxies.iter().next().map(|t| t.translation).unwrap_or(Vec3::ZERO);
    let pool = streaming.0.pool();

    info!(
        "Foliage: proxy at ({:.0}, {:.0}, {:.0}), {} chunks active, {} in progress, {} visible / {} parked instances (pool: {} idle, {} checked out)",
        proxy.x,
        proxy.y,
        proxy.z,
        last.0.active,
        last.0.in_progress,
        summary.visible,
        summary.parked,
        pool.total_idle(),
        pool.checked_out_count()
    );
    debug!(
        "Foliage: per layer {:?}, {} props of {} known, {} casting shadows, {} LOD-culled, {} on a render layer",
        summary.per_layer,
        summary.props,
        assets.cached(),
        summary.shadow_casters,
        summary.lod_managed,
        summary.layered
    );
}

pub fn exit_after_frames(config: Res<HostConfig>, mut frames: Local<u64>, mut app_exit: MessageWriter<AppExit>) {
    *frames += 1;
    if config.max_frames.is_some_and(|max| *frames >= max) {
        info!("Foliage host finished after {} frames", *frames);
        app_exit.write(AppExit::Success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foliage::PropId;

    #[test]
    fn test_advance_toward() {
        let (pos, reached) = advance_toward(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 4.0);
        assert_eq!(pos, Vec3::new(4.0, 0.0, 0.0));
        assert!(!reached);

        let (pos, reached) = advance_toward(pos, Vec3::new(10.0, 0.0, 0.0), 8.0);
        assert_eq!(pos, Vec3::new(10.0, 0.0, 0.0));
        assert!(reached);
    }

    #[test]
    fn test_instance_summary_reads_layers_and_hints() {
        let grass = FoliageInstance {
            prop: PropId::new("foliage/grass.obj"),
        };
        let fern = FoliageInstance {
            prop: PropId::new("foliage/fern.obj"),
        };
        let shaded = RenderHints {
            casts_shadows: true,
            lod_cull_height: Some(0.1),
            spawn_layer: None,
        };
        let flat = RenderHints {
            casts_shadows: false,
            lod_cull_height: None,
            spawn_layer: Some(9),
        };
        let (l0, l2) = (FoliageLayer(0), FoliageLayer(2));

        let summary = InstanceSummary::tally([
            (&grass, false, Some(&l0), Some(&shaded)),
            (&grass, false, Some(&l0), Some(&flat)),
            (&fern, false, Some(&l2), Some(&shaded)),
            (&fern, true, Some(&l2), Some(&shaded)),
            (&fern, true, None, None),
        ]);

        assert_eq!(summary.visible, 3);
        assert_eq!(summary.parked, 2);
        assert_eq!(summary.per_layer, [2, 0, 1, 0]);
        assert_eq!(summary.shadow_casters, 2);
        assert_eq!(summary.lod_managed, 2);
        assert_eq!(summary.layered, 1);
        assert_eq!(summary.props, 2);
    }

    #[test]
    fn test_path_walks_back_and_forth() {
        let mut path = ProxyPath::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], 1.0);
        let mut order = Vec::new();
        for _ in 0..6 {
            path.advance_target();
            order.push(path.next);
        }
        assert_eq!(order, vec![1, 2, 1, 0, 1, 2]);
    }
}
