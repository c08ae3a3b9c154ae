//! Layer tables: which props a mask layer scatters and how heavily.

use std::fmt;
use std::sync::Arc;

use crate::{ConfigurationError, MAX_LAYERS};

/// Stable identity of a scatterable prop, also the instance pool key.
///
/// For exporter data this is the doodad model path relative to the export directory
/// (`foliage/<model>.obj`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropId(Arc<str>);

impl PropId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PropId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PropId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

/// A prop and its relative weight inside a layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PropWeight {
    pub prop: PropId,
    pub weight: f32,
}

impl PropWeight {
    pub fn new(prop: impl Into<PropId>, weight: f32) -> Self {
        Self {
            prop: prop.into(),
            weight,
        }
    }
}

/// One scatter population. Layer `i` of a chunk reads channel `i` of the decoded mask
/// (0 = black texels, 1..=3 = R/G/B).
#[derive(Debug, Clone, PartialEq)]
pub struct LayerDefinition {
    /// Base density before weighting (the exporter's effect `Density`).
    pub density: f32,
    pub props: Vec<PropWeight>,
    /// Keeps its mask channel but plans nothing (an exported effect without usable doodads).
    pub placeholder: bool,
}

impl LayerDefinition {
    /// Build a layer, dropping entries whose weight is not a positive number.
    pub fn new(density: f32, props: impl IntoIterator<Item = PropWeight>) -> Self {
        Self {
            density,
            props: props
                .into_iter()
                .filter(|p| p.weight.is_finite() && p.weight > 0.0)
                .collect(),
            placeholder: false,
        }
    }

    /// An empty layer that holds its channel slot so later layers keep their mask channels.
    pub fn placeholder(density: f32) -> Self {
        Self {
            density,
            props: Vec::new(),
            placeholder: true,
        }
    }

    /// Props in definition order.
    pub fn props(&self) -> impl Iterator<Item = &PropId> {
        self.props.iter().map(|p| &p.prop)
    }
}

/// Check the per-chunk layer table: at most [`MAX_LAYERS`] layers, none of them empty unless
/// marked as a placeholder.
pub fn validate_layers(layers: &[LayerDefinition]) -> Result<(), ConfigurationError> {
    if layers.len() > MAX_LAYERS {
        return Err(ConfigurationError::TooManyLayers(layers.len()));
    }
    for (layer, def) in layers.iter().enumerate() {
        if def.props.is_empty() && !def.placeholder {
            return Err(ConfigurationError::EmptyLayer { layer });
        }
    }
    Ok(())
}
