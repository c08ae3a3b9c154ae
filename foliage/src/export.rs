//! Loading the terrain exporter's foliage metadata.
//!
//! Per chunk the exporter writes, next to the chunk mesh:
//! - `tex_<chunk>.json`: the texture layers of the chunk, each naming a ground effect
//! - `tex_<chunk>.png`: the density mask
//! - `foliage/<effectID>.json`: the doodad table of one ground effect
//!
//! A [`FoliageManifest`] (RON) lists the chunks to stream, their bounds and seeds, plus the
//! reference ground the headless host and the bake tool probe against.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bevy::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    ChunkBounds, ConfigurationError, DensityMask, FoliageSettings, GroundSpec, LayerDefinition,
    PropWeight,
};

/// Directory, relative to the export root, holding effect tables and doodad models.
pub const FOLIAGE_DIR: &str = "foliage";

/// `tex_<chunk>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureMetadata {
    #[serde(default)]
    pub layers: Vec<TextureLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureLayer {
    #[serde(default)]
    pub index: u32,
    #[serde(rename = "effectID")]
    pub effect_id: u32,
    #[serde(default)]
    pub scale: f32,
    #[serde(rename = "fileDataID", default)]
    pub file_data_id: u32,
    #[serde(default)]
    pub file: String,
}

/// `foliage/<effectID>.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FoliageEffect {
    #[serde(rename = "ID")]
    pub id: i64,
    pub density: f32,
    #[serde(default)]
    pub sound: i64,
    #[serde(rename = "DoodadID")]
    pub doodad_ids: Vec<i64>,
    pub doodad_weight: Vec<f32>,
    #[serde(rename = "DoodadModelIDs", default)]
    pub doodad_models: HashMap<String, EffectModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectModel {
    #[serde(rename = "fileDataID", default)]
    pub file_data_id: i64,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Everything needed to set up one chunk scatterer.
#[derive(Debug, Clone)]
pub struct ChunkExport {
    pub name: String,
    pub mask: DensityMask,
    pub layers: Vec<LayerDefinition>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigurationError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigurationError::Metadata {
        path: path.to_path_buf(),
        source,
    })
}

/// Prop id of an exported doodad model.
pub fn prop_path(file_name: &str) -> String {
    format!("{FOLIAGE_DIR}/{file_name}")
}

/// Turn one effect table into the layer definition for mask layer `layer`.
///
/// Doodad id `0` marks an unused slot. Ids missing from the model table are skipped. An effect
/// left with no props becomes a placeholder layer.
pub fn layer_from_effect(layer: usize, effect: &FoliageEffect) -> Result<LayerDefinition, ConfigurationError> {
    if effect.doodad_weight.len() < effect.doodad_ids.len() {
        return Err(ConfigurationError::DoodadTableMismatch {
            layer,
            ids: effect.doodad_ids.len(),
            weights: effect.doodad_weight.len(),
        });
    }

    let mut props = Vec::new();
    for (&doodad, &weight) in effect.doodad_ids.iter().zip(&effect.doodad_weight) {
        if doodad == 0 {
            continue;
        }
        let Some(model) = effect.doodad_models.get(&doodad.to_string()) else {
            warn!("Effect {}: doodad {} has no model entry, skipping", effect.id, doodad);
            continue;
        };
        props.push(PropWeight::new(prop_path(&model.file_name), weight));
    }

    let def = LayerDefinition::new(effect.density, props);
    if def.props.is_empty() {
        warn!(
            "Effect {}: no usable doodads, layer {} will stay empty",
            effect.id, layer
        );
        return Ok(LayerDefinition::placeholder(effect.density));
    }
    Ok(def)
}

/// Load the metadata, effect tables and mask of `chunk` from an export directory.
///
/// A chunk without texture layers loads with no foliage layers.
pub fn load_chunk_export(dir: impl AsRef<Path>, chunk: &str) -> Result<ChunkExport, ConfigurationError> {
    let dir = dir.as_ref();
    let metadata: TextureMetadata = read_json(&dir.join(format!("tex_{chunk}.json")))?;

    if metadata.layers.is_empty() {
        debug!("Chunk {}: no texture layers, no foliage", chunk);
        return Ok(ChunkExport {
            name: chunk.to_string(),
            mask: DensityMask::blank(0),
            layers: Vec::new(),
        });
    }

    let mut layers = Vec::with_capacity(metadata.layers.len());
    for (index, texture) in metadata.layers.iter().enumerate() {
        let path = dir.join(FOLIAGE_DIR).join(format!("{}.json", texture.effect_id));
        let effect: FoliageEffect = read_json(&path)?;
        layers.push(layer_from_effect(index, &effect)?);
    }

    let mask = DensityMask::load_png(dir.join(format!("tex_{chunk}.png")))?;

    Ok(ChunkExport {
        name: chunk.to_string(),
        mask,
        layers,
    })
}

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// One chunk entry of the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestChunk {
    /// Section name used in the exporter's file names.
    pub chunk: String,
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
    #[serde(default)]
    pub seed: u64,
}

impl ManifestChunk {
    pub fn bounds(&self) -> ChunkBounds {
        ChunkBounds::new(Vec3::from_array(self.bounds_min), Vec3::from_array(self.bounds_max))
    }
}

/// Which chunks to stream and where their data lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoliageManifest {
    #[serde(default = "default_manifest_version")]
    pub version: u32,
    /// Export root; relative paths are resolved against the manifest's directory.
    pub export_dir: PathBuf,
    #[serde(default)]
    pub ground: GroundSpec,
    /// Inline settings; the host's settings file takes precedence when given.
    #[serde(default)]
    pub settings: Option<FoliageSettings>,
    /// Placement bake to seed chunk caches from.
    #[serde(default)]
    pub bake: Option<PathBuf>,
    pub chunks: Vec<ManifestChunk>,
}

fn default_manifest_version() -> u32 {
    MANIFEST_VERSION
}

impl FoliageManifest {
    pub fn from_ron_str(text: &str, path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let mut manifest: FoliageManifest =
            ron::from_str(text).map_err(|source| ConfigurationError::Ron {
                path: path.to_path_buf(),
                source,
            })?;

        if manifest.version != MANIFEST_VERSION {
            return Err(ConfigurationError::InvalidSettings(format!(
                "manifest version {} is not supported (expected {})",
                manifest.version, MANIFEST_VERSION
            )));
        }
        if let Some(settings) = &manifest.settings {
            settings.validate()?;
        }

        let base = path.parent().unwrap_or(Path::new(""));
        manifest.export_dir = base.join(&manifest.export_dir);
        if let Some(bake) = manifest.bake.take() {
            manifest.bake = Some(base.join(bake));
        }
        Ok(manifest)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&text, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_sample_export, TempDir};

    const EFFECT: &str = r#"{
        "ID": 112,
        "Density": 8,
        "Sound": 0,
        "DoodadID": [601, 0, 602, 999],
        "DoodadWeight": [1.0, 1.0, 0.25, 0.5],
        "DoodadModelIDs": {
            "601": { "fileDataID": 189001, "fileName": "elwynngrass01.obj" },
            "602": { "fileDataID": 189002, "fileName": "elwynnflower01.obj" }
        }
    }"#;

    #[test]
    fn test_effect_table_to_layer() {
        let effect: FoliageEffect = serde_json::from_str(EFFECT).unwrap();
        assert_eq!(effect.density, 8.0);

        let layer = layer_from_effect(0, &effect).unwrap();
        let props: Vec<_> = layer.props.iter().map(|p| (p.prop.as_str(), p.weight)).collect();
        assert_eq!(
            props,
            [("foliage/elwynngrass01.obj", 1.0), ("foliage/elwynnflower01.obj", 0.25)]
        );
    }

    #[test]
    fn test_short_weight_table_is_rejected() {
        let mut effect: FoliageEffect = serde_json::from_str(EFFECT).unwrap();
        effect.doodad_weight.truncate(2);
        assert!(matches!(
            layer_from_effect(3, &effect),
            Err(ConfigurationError::DoodadTableMismatch { layer: 3, ids: 4, weights: 2 })
        ));
    }

    #[test]
    fn test_effect_without_usable_doodads_is_a_placeholder() {
        let mut unused: FoliageEffect = serde_json::from_str(EFFECT).unwrap();
        unused.doodad_ids = vec![0, 0, 0, 0];
        let layer = layer_from_effect(1, &unused).unwrap();
        assert!(layer.placeholder);
        assert!(layer.props.is_empty());

        let mut unknown: FoliageEffect = serde_json::from_str(EFFECT).unwrap();
        unknown.doodad_models.clear();
        let layer = layer_from_effect(2, &unknown).unwrap();
        assert!(layer.placeholder);
        assert_eq!(layer.density, 8.0);
    }

    #[test]
    fn test_load_chunk_export() {
        let dir = TempDir::new("export");
        write_sample_export(dir.path(), "32_48_7");

        let export = load_chunk_export(dir.path(), "32_48_7").unwrap();
        assert_eq!(export.name, "32_48_7");
        assert_eq!(export.layers.len(), 2);
        assert_eq!(export.mask.size(), 8);
        assert_eq!(export.layers[1].props[0].prop.as_str(), "foliage/fern.obj");
    }

    #[test]
    fn test_chunk_without_layers_has_no_foliage() {
        let dir = TempDir::new("export_empty");
        std::fs::write(dir.path().join("tex_0_0_0.json"), r#"{ "layers": [] }"#).unwrap();

        let export = load_chunk_export(dir.path(), "0_0_0").unwrap();
        assert!(export.layers.is_empty());
    }

    #[test]
    fn test_missing_files_name_the_path() {
        let dir = TempDir::new("export_missing");
        let err = load_chunk_export(dir.path(), "1_1_1").unwrap_err();
        match err {
            ConfigurationError::Io { path, .. } => assert!(path.ends_with("tex_1_1_1.json")),
            other => panic!("unexpected error: {other}"),
        }

        std::fs::write(dir.path().join("tex_1_1_1.json"), r#"{ "layers": [ { "effectID": 5 } ] }"#).unwrap();
        let err = load_chunk_export(dir.path(), "1_1_1").unwrap_err();
        assert!(matches!(err, ConfigurationError::Io { path, .. } if path.ends_with("foliage/5.json")));
    }

    #[test]
    fn test_manifest_resolves_paths_against_its_directory() {
        let text = r#"(
            export_dir: "export",
            bake: Some("placements.bin"),
            ground: (base_height: 1.5),
            chunks: [
                (chunk: "32_48_7", bounds_min: (0.0, 0.0, 0.0), bounds_max: (33.3, 12.0, 33.3), seed: 7),
            ],
        )"#;
        let manifest = FoliageManifest::from_ron_str(text, "/data/world/manifest.ron").unwrap();

        assert_eq!(manifest.export_dir, PathBuf::from("/data/world/export"));
        assert_eq!(manifest.bake, Some(PathBuf::from("/data/world/placements.bin")));
        assert_eq!(manifest.ground.base_height, 1.5);
        assert_eq!(manifest.chunks[0].bounds().max, Vec3::new(33.3, 12.0, 33.3));
        assert!(manifest.settings.is_none());
    }

    #[test]
    fn test_manifest_version_is_checked() {
        let text = r#"(version: 9, export_dir: ".", chunks: [])"#;
        assert!(FoliageManifest::from_ron_str(text, "m.ron").is_err());
    }
}
