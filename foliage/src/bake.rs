//! Baked placement database.
//!
//! The offline `foliage_baker` tool resolves every chunk of a manifest and writes
//! `placements.bin` using these types. The host seeds chunk caches from it so streaming a chunk
//! in skips planning entirely.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::{BakeError, PropId, ResolvedPlacement};

pub const PLACEMENT_BAKE_VERSION: u32 = 1;

/// Versioned database of resolved placements, keyed by chunk name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedPlacementDb {
    pub version: u32,
    pub chunks: HashMap<String, BakedChunk>,
}

impl Default for BakedPlacementDb {
    fn default() -> Self {
        Self {
            version: PLACEMENT_BAKE_VERSION,
            chunks: HashMap::new(),
        }
    }
}

/// Placements of one chunk and the inputs they were resolved with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedChunk {
    pub seed: u64,
    pub density_factor: f32,
    pub scale_range: (f32, f32),
    pub placements: Vec<BakedPlacement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedPlacement {
    pub layer: u8,
    pub prop: String,
    pub position: [f32; 3],
    pub rotation_y: f32,
    pub scale: f32,
}

impl From<&ResolvedPlacement> for BakedPlacement {
    fn from(p: &ResolvedPlacement) -> Self {
        Self {
            layer: p.layer as u8,
            prop: p.prop.as_str().to_string(),
            position: p.position.to_array(),
            rotation_y: p.rotation_y,
            scale: p.scale,
        }
    }
}

impl From<&BakedPlacement> for ResolvedPlacement {
    fn from(p: &BakedPlacement) -> Self {
        Self {
            layer: p.layer as usize,
            prop: PropId::new(&p.prop),
            position: Vec3::from_array(p.position),
            rotation_y: p.rotation_y,
            scale: p.scale,
        }
    }
}

impl BakedChunk {
    pub fn new(seed: u64, density_factor: f32, scale_range: (f32, f32), placements: &[ResolvedPlacement]) -> Self {
        Self {
            seed,
            density_factor,
            scale_range,
            placements: placements.iter().map(BakedPlacement::from).collect(),
        }
    }

    pub fn resolved(&self) -> Vec<ResolvedPlacement> {
        self.placements.iter().map(ResolvedPlacement::from).collect()
    }
}

/// Load a placement bake from bytes (bincode).
pub fn load_baked_placements_from_bytes(bytes: &[u8]) -> Result<BakedPlacementDb, BakeError> {
    let db: BakedPlacementDb = bincode::deserialize(bytes)?;
    if db.version != PLACEMENT_BAKE_VERSION {
        return Err(BakeError::Version {
            found: db.version,
            expected: PLACEMENT_BAKE_VERSION,
        });
    }
    Ok(db)
}

/// Load a placement bake from a file path (bincode).
pub fn load_baked_placements_from_file(path: impl AsRef<Path>) -> Result<BakedPlacementDb, BakeError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| BakeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    load_baked_placements_from_bytes(&bytes)
}

/// Save a placement bake (atomic write via temp file + rename).
pub fn save_baked_placements_to_file(db: &BakedPlacementDb, path: impl AsRef<Path>) -> Result<(), BakeError> {
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    let bytes = bincode::serialize(db)?;
    std::fs::write(&temp_path, &bytes).map_err(|source| BakeError::Write {
        path: temp_path.clone(),
        source,
    })?;
    std::fs::rename(&temp_path, path).map_err(|source| BakeError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        "Saved placement bake: {} chunks ({} bytes) to {:?}",
        db.chunks.len(),
        bytes.len(),
        path
    );
    Ok(())
}
