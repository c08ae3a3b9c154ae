//! ECS side of the foliage pipeline: instance components and the `SceneHost` over `Commands`.

use std::path::PathBuf;

use bevy::prelude::*;
use dashmap::DashMap;
use foliage::{PropId, RenderOptions, ResolvedPlacement, SceneHost};

/// Marks an entity the streamer measures chunk distances against.
#[derive(Component, Debug, Clone)]
pub struct FoliageProxy {
    pub tag: String,
}

/// A spawned foliage instance and the prop it was built from.
#[derive(Component, Debug, Clone)]
pub struct FoliageInstance {
    pub prop: PropId,
}

/// Density layer the instance was last placed for.
#[derive(Component, Debug, Clone, Copy)]
pub struct FoliageLayer(pub usize);

/// Hidden instance sitting in the pool.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct Parked;

/// Render configuration a renderer would apply to the instance.
#[derive(Component, Debug, Clone, Copy)]
pub struct RenderHints {
    pub casts_shadows: bool,
    pub lod_cull_height: Option<f32>,
    pub spawn_layer: Option<u8>,
}

impl From<&RenderOptions> for RenderHints {
    fn from(render: &RenderOptions) -> Self {
        Self {
            casts_shadows: render.casts_shadows,
            lod_cull_height: render.lod_cull_height,
            spawn_layer: render.spawn_layer,
        }
    }
}

/// Directory prop ids are resolved against, with the file lookups already made.
#[derive(Resource, Debug, Default)]
pub struct ExportAssets {
    pub root: PathBuf,
    known: DashMap<PropId, bool>,
}

impl ExportAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            known: DashMap::new(),
        }
    }

    /// Whether the prop's model file exists. The disk is checked once per prop.
    pub fn contains(&self, prop: &PropId) -> bool {
        if let Some(found) = self.known.get(prop) {
            return *found;
        }
        let found = self.root.join(prop.as_str()).is_file();
        self.known.insert(prop.clone(), found);
        found
    }

    /// Props looked up so far.
    pub fn cached(&self) -> usize {
        self.known.len()
    }
}

/// Scene host that turns scheduler requests into entity commands.
pub struct EntityHost<'a, 'w, 's> {
    pub commands: &'a mut Commands<'w, 's>,
    /// Proxy positions gathered this frame, with their tags.
    pub proxies: Vec<(String, Vec3)>,
    pub assets: &'a ExportAssets,
}

impl SceneHost<Entity> for EntityHost<'_, '_, '_> {
    fn find_tagged(&self, tag: &str) -> Vec<Vec3> {
        self.proxies
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, pos)| *pos)
            .collect()
    }

    fn can_instantiate(&self, prop: &PropId) -> bool {
        self.assets.contains(prop)
    }

    fn instantiate(&mut self, prop: &PropId) -> Option<Entity> {
        if !self.assets.contains(prop) {
            return None;
        }
        let entity = self
            .commands
            .spawn((
                FoliageInstance { prop: prop.clone() },
                Transform::default(),
                Parked,
            ))
            .id();
        Some(entity)
    }

    fn place(&mut self, handle: &Entity, placement: &ResolvedPlacement, render: &RenderOptions) {
        let transform = Transform::from_translation(placement.position)
            .with_rotation(placement.rotation())
            .with_scale(Vec3::splat(placement.scale));
        self.commands
            .entity(*handle)
            .insert((transform, FoliageLayer(placement.layer), RenderHints::from(render)))
            .remove::<Parked>();
    }

    fn park(&mut self, handle: &Entity) {
        self.commands.entity(*handle).insert(Parked);
    }

    fn destroy(&mut self, handle: Entity) {
        self.commands.entity(handle).despawn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_lookups_are_cached() {
        let root = std::env::temp_dir().join(format!("foliage_host_assets_{}", std::process::id()));
        std::fs::create_dir_all(root.join("foliage")).unwrap();
        std::fs::write(root.join("foliage/fern.obj"), "o fern\n").unwrap();

        let assets = ExportAssets::new(&root);
        let fern = PropId::new("foliage/fern.obj");
        assert!(assets.contains(&fern));
        assert!(!assets.contains(&PropId::new("foliage/moss.obj")));
        assert_eq!(assets.cached(), 2);

        // Answered from the cache once looked up.
        std::fs::remove_dir_all(&root).unwrap();
        assert!(assets.contains(&fern));
        assert_eq!(assets.cached(), 2);
    }
}
