//! Shared fixtures for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use bevy::prelude::*;

use crate::{
    ChunkBounds, ChunkScatterer, DensityMask, GroundField, GroundProbe, InstancePool,
    LayerDefinition, MaskSample, PropId, PropWeight, RenderOptions, ResolvedPlacement, SceneHost,
    StepOutcome, DEFAULT_RAY_LAYER,
};

/// Bottom-first mask cycling black / red / half green / red+half green.
///
/// Layers 0, 1 and 2 are occupied, layer 3 is empty.
pub fn checker_mask(n: u32) -> DensityMask {
    let samples = (0..n * n)
        .map(|i| match i % 4 {
            0 => MaskSample::BLACK,
            1 => MaskSample::rgb(1.0, 0.0, 0.0),
            2 => MaskSample::rgb(0.0, 0.5, 0.0),
            _ => MaskSample::rgb(0.5, 0.5, 0.0),
        })
        .collect();
    DensityMask::from_samples(n, samples).unwrap()
}

pub fn layer(density: f32, props: &[(&str, f32)]) -> LayerDefinition {
    LayerDefinition::new(
        density,
        props.iter().map(|&(id, weight)| PropWeight::new(id, weight)),
    )
}

/// 32×10×32 chunk at the origin.
pub fn chunk_bounds() -> ChunkBounds {
    ChunkBounds::new(Vec3::ZERO, Vec3::new(32.0, 10.0, 32.0))
}

pub fn flat_ground(height: f32) -> GroundField {
    GroundField::flat(height, DEFAULT_RAY_LAYER)
}

/// Step until the scatterer reports `Done`. Panics if it never settles.
pub fn drive<H, S, P>(scatterer: &mut ChunkScatterer<H>, host: &mut S, probe: &P, pool: &InstancePool<H>) -> usize
where
    H: crate::InstanceHandle,
    S: SceneHost<H>,
    P: GroundProbe,
{
    for steps in 1..10_000 {
        if scatterer.step(host, probe, pool) == StepOutcome::Done {
            return steps;
        }
    }
    panic!("scatterer '{}' never settled", scatterer.name());
}

/// In-memory scene with `u32` handles.
#[derive(Default)]
pub struct MockHost {
    next: u32,
    pub missing: HashSet<PropId>,
    pub proxies: Vec<Vec3>,
    pub created: usize,
    pub placed: HashMap<u32, ResolvedPlacement>,
    pub parked: HashSet<u32>,
    pub destroyed: Vec<u32>,
}

impl MockHost {
    pub fn live(&self) -> usize {
        self.placed.len()
    }
}

impl SceneHost<u32> for MockHost {
    fn find_tagged(&self, tag: &str) -> Vec<Vec3> {
        if tag == "Player" {
            self.proxies.clone()
        } else {
            Vec::new()
        }
    }

    fn can_instantiate(&self, prop: &PropId) -> bool {
        !self.missing.contains(prop)
    }

    fn instantiate(&mut self, prop: &PropId) -> Option<u32> {
        if self.missing.contains(prop) {
            return None;
        }
        self.next += 1;
        self.created += 1;
        Some(self.next)
    }

    fn place(&mut self, handle: &u32, placement: &ResolvedPlacement, _render: &RenderOptions) {
        self.parked.remove(handle);
        self.placed.insert(*handle, placement.clone());
    }

    fn park(&mut self, handle: &u32) {
        self.placed.remove(handle);
        self.parked.insert(*handle);
    }

    fn destroy(&mut self, handle: u32) {
        self.placed.remove(&handle);
        self.parked.remove(&handle);
        self.destroyed.push(handle);
    }
}

/// Scratch directory removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(label: &str) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "foliage_{label}_{}_{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.0).ok();
    }
}

/// Write a two-layer export for `chunk` (grass on black texels, ferns on red) with an 8×8 mask.
pub fn write_sample_export(dir: &Path, chunk: &str) {
    let foliage = dir.join("foliage");
    std::fs::create_dir_all(&foliage).unwrap();

    std::fs::write(
        dir.join(format!("tex_{chunk}.json")),
        r#"{ "layers": [
            { "index": 0, "effectID": 10, "scale": 4.0, "fileDataID": 1001, "file": "grass_ground.png" },
            { "index": 1, "effectID": 20, "scale": 4.0, "fileDataID": 1002, "file": "fern_ground.png" }
        ] }"#,
    )
    .unwrap();
    std::fs::write(
        foliage.join("10.json"),
        r#"{ "ID": 10, "Density": 1, "Sound": 0, "DoodadID": [1, 0],
             "DoodadWeight": [1.0, 1.0],
             "DoodadModelIDs": { "1": { "fileDataID": 5001, "fileName": "grass.obj" } } }"#,
    )
    .unwrap();
    std::fs::write(
        foliage.join("20.json"),
        r#"{ "ID": 20, "Density": 1, "Sound": 0, "DoodadID": [2],
             "DoodadWeight": [1.0],
             "DoodadModelIDs": { "2": { "fileDataID": 5002, "fileName": "fern.obj" } } }"#,
    )
    .unwrap();
    std::fs::write(foliage.join("grass.obj"), "o grass\n").unwrap();
    std::fs::write(foliage.join("fern.obj"), "o fern\n").unwrap();

    let mut img = image::RgbaImage::new(8, 8);
    for (x, y, px) in img.enumerate_pixels_mut() {
        *px = if (x + y) % 2 == 0 {
            image::Rgba([0, 0, 0, 255])
        } else {
            image::Rgba([255, 0, 0, 255])
        };
    }
    img.save(dir.join(format!("tex_{chunk}.png"))).unwrap();
}
