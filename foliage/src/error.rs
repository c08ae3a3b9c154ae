//! Error types.
//!
//! Setup problems surface as [`ConfigurationError`] and keep the chunk out of the scheduler.
//! Bake I/O has its own [`BakeError`]. Candidate rejection and generation cancellation are
//! ordinary control flow and never show up here.

use std::path::PathBuf;

use thiserror::Error;

/// A chunk (or the settings it runs with) could not be set up.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse metadata {path:?}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Ron {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("failed to decode density mask {path:?}: {source}")]
    MaskDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("density mask must be square, got {width}x{height}")]
    MaskNotSquare { width: u32, height: u32 },

    #[error("density mask has {actual} samples, expected {expected}")]
    MaskSize { expected: usize, actual: usize },

    #[error("chunk declares {0} foliage layers, at most 4 are supported")]
    TooManyLayers(usize),

    #[error("layer {layer} has no props with a positive weight")]
    EmptyLayer { layer: usize },

    #[error("layer {layer}: {ids} doodad ids but {weights} weights")]
    DoodadTableMismatch {
        layer: usize,
        ids: usize,
        weights: usize,
    },

    #[error("chunk bounds must have a positive X/Z extent, got {size_x}x{size_z}")]
    DegenerateBounds { size_x: f32, size_z: f32 },

    #[error("invalid foliage settings: {0}")]
    InvalidSettings(String),
}

/// Reading or writing a placement bake failed.
#[derive(Debug, Error)]
pub enum BakeError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bincode: {0}")]
    Codec(#[from] bincode::Error),

    #[error("unsupported placement bake version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}
