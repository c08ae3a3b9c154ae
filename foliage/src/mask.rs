//! Density masks and their decoding into per-layer occupancy maps.
//!
//! The exporter paints one RGB mask per terrain chunk:
//! - pure black texels belong to layer 0 (weight 1)
//! - red/green/blue intensity feeds layers 1/2/3 (weight = channel value)
//!
//! Samples are stored bottom row first, which is how the engine hands texture pixels to
//! gameplay code. The exporter and the engine disagree on the vertical image origin, so the
//! mask is rotated 180° before classification.

use std::path::Path;

use crate::{ConfigurationError, MAX_LAYERS};

/// Normalized RGB sample (each channel in `0.0..=1.0`).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaskSample {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl MaskSample {
    pub const BLACK: MaskSample = MaskSample::rgb(0.0, 0.0, 0.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    fn from_rgba8(px: &[u8]) -> Self {
        Self::rgb(
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
        )
    }
}

/// Square N×N mask, bottom row first.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityMask {
    size: u32,
    samples: Vec<MaskSample>,
}

impl DensityMask {
    /// Wrap samples that are already bottom row first.
    pub fn from_samples(size: u32, samples: Vec<MaskSample>) -> Result<Self, ConfigurationError> {
        let expected = (size as usize) * (size as usize);
        if samples.len() != expected {
            return Err(ConfigurationError::MaskSize {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self { size, samples })
    }

    /// An all-black mask (every texel in layer 0).
    pub fn blank(size: u32) -> Self {
        Self {
            size,
            samples: vec![MaskSample::BLACK; (size as usize) * (size as usize)],
        }
    }

    /// Build from tightly packed RGBA8 bytes laid out top row first (decoded image order).
    pub fn from_rgba8(width: u32, height: u32, bytes: &[u8]) -> Result<Self, ConfigurationError> {
        if width != height {
            return Err(ConfigurationError::MaskNotSquare { width, height });
        }
        let n = width as usize;
        let expected = n * n * 4;
        if bytes.len() != expected {
            return Err(ConfigurationError::MaskSize {
                expected: n * n,
                actual: bytes.len() / 4,
            });
        }

        let mut samples = Vec::with_capacity(n * n);
        for row in (0..n).rev() {
            let start = row * n * 4;
            samples.extend(
                bytes[start..start + n * 4]
                    .chunks_exact(4)
                    .map(MaskSample::from_rgba8),
            );
        }
        Ok(Self {
            size: width,
            samples,
        })
    }

    pub fn from_image(image: &image::DynamicImage) -> Result<Self, ConfigurationError> {
        let rgba = image.to_rgba8();
        Self::from_rgba8(rgba.width(), rgba.height(), rgba.as_raw())
    }

    /// Load the exporter's `tex_<chunk>.png`.
    pub fn load_png(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let image = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
            .map_err(|source| ConfigurationError::MaskDecode {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_image(&image)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn samples(&self) -> &[MaskSample] {
        &self.samples
    }

    /// Point reflection: the texel at `(x, y)` moves to `(N-1-x, N-1-y)`.
    pub fn rotated_180(&self) -> DensityMask {
        let mut samples = self.samples.clone();
        samples.reverse();
        DensityMask {
            size: self.size,
            samples,
        }
    }
}

/// Occupied texels of one layer as `(texel index, weight)`, ascending by index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OccupancyMap {
    texels: Vec<(u32, f32)>,
}

impl OccupancyMap {
    pub fn texels(&self) -> &[(u32, f32)] {
        &self.texels
    }

    pub fn len(&self) -> usize {
        self.texels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texels.is_empty()
    }

    pub fn weight(&self, texel: u32) -> Option<f32> {
        self.texels
            .binary_search_by_key(&texel, |&(idx, _)| idx)
            .ok()
            .map(|i| self.texels[i].1)
    }
}

/// The four occupancy maps of one chunk plus the mask resolution they were decoded from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerOccupancy {
    resolution: u32,
    maps: [OccupancyMap; MAX_LAYERS],
}

impl LayerOccupancy {
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Occupancy of `layer`; layers past the fourth are always empty.
    pub fn layer(&self, layer: usize) -> &[(u32, f32)] {
        self.maps.get(layer).map_or(&[], |m| m.texels())
    }

    pub fn map(&self, layer: usize) -> Option<&OccupancyMap> {
        self.maps.get(layer)
    }

    pub fn total_occupied(&self) -> usize {
        self.maps.iter().map(OccupancyMap::len).sum()
    }
}

/// Rotate the mask 180° and classify every texel into the four layer maps.
pub fn decode(mask: &DensityMask) -> LayerOccupancy {
    let rotated = mask.rotated_180();
    let mut maps: [OccupancyMap; MAX_LAYERS] = Default::default();

    for (i, s) in rotated.samples().iter().enumerate() {
        let idx = i as u32;
        if s.r == 0.0 && s.g == 0.0 && s.b == 0.0 {
            maps[0].texels.push((idx, 1.0));
            continue;
        }
        if s.r > 0.0 {
            maps[1].texels.push((idx, s.r));
        }
        if s.g > 0.0 {
            maps[2].texels.push((idx, s.g));
        }
        if s.b > 0.0 {
            maps[3].texels.push((idx, s.b));
        }
    }

    LayerOccupancy {
        resolution: mask.size(),
        maps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: MaskSample = MaskSample::rgb(1.0, 0.0, 0.0);
    const GREEN: MaskSample = MaskSample::rgb(0.0, 1.0, 0.0);
    const BLUE: MaskSample = MaskSample::rgb(0.0, 0.0, 1.0);

    #[test]
    fn test_two_by_two_classification_through_rotation() {
        let mask = DensityMask::from_samples(2, vec![MaskSample::BLACK, RED, GREEN, BLUE]).unwrap();
        let occupancy = decode(&mask);

        // A 180° rotation of a 2x2 grid maps index i to 3 - i.
        let rotated = |i: u32| 3 - i;
        assert_eq!(occupancy.layer(0), &[(rotated(0), 1.0)]);
        assert_eq!(occupancy.layer(1), &[(rotated(1), 1.0)]);
        assert_eq!(occupancy.layer(2), &[(rotated(2), 1.0)]);
        assert_eq!(occupancy.layer(3), &[(rotated(3), 1.0)]);
        assert_eq!(occupancy.resolution(), 2);
    }

    #[test]
    fn test_mixed_channels_feed_several_layers() {
        let mixed = MaskSample::rgb(0.5, 0.25, 0.0);
        let mask = DensityMask::from_samples(1, vec![mixed]).unwrap();
        let occupancy = decode(&mask);

        assert!(occupancy.layer(0).is_empty());
        assert_eq!(occupancy.layer(1), &[(0, 0.5)]);
        assert_eq!(occupancy.layer(2), &[(0, 0.25)]);
        assert!(occupancy.layer(3).is_empty());
    }

    #[test]
    fn test_rotation_is_a_point_reflection() {
        let n = 4u32;
        let mut samples = vec![MaskSample::BLACK; 16];
        // (x=1, y=0) -> (x=2, y=3)
        samples[1] = RED;
        let rotated = DensityMask::from_samples(n, samples).unwrap().rotated_180();
        assert_eq!(rotated.samples()[(3 * n + 2) as usize], RED);
    }

    #[test]
    fn test_rgba8_rows_are_flipped_to_bottom_first() {
        // Top row red, bottom row black (image order).
        let bytes = [
            255, 0, 0, 255, 255, 0, 0, 255, //
            0, 0, 0, 255, 0, 0, 0, 255,
        ];
        let mask = DensityMask::from_rgba8(2, 2, &bytes).unwrap();
        assert_eq!(mask.samples()[0], MaskSample::BLACK);
        assert_eq!(mask.samples()[2], RED);
    }

    #[test]
    fn test_rejects_non_square_and_short_input() {
        assert!(matches!(
            DensityMask::from_rgba8(2, 1, &[0; 8]),
            Err(ConfigurationError::MaskNotSquare { .. })
        ));
        assert!(matches!(
            DensityMask::from_samples(2, vec![MaskSample::BLACK; 3]),
            Err(ConfigurationError::MaskSize { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_empty_mask_decodes_to_empty_maps() {
        let mask = DensityMask::from_samples(0, Vec::new()).unwrap();
        let occupancy = decode(&mask);
        assert_eq!(occupancy.total_occupied(), 0);
        assert!(occupancy.layer(7).is_empty());
    }

    #[test]
    fn test_blank_export_mask_fills_layer_zero() {
        let occupancy = decode(&DensityMask::blank(crate::MASK_RESOLUTION));
        assert_eq!(occupancy.resolution(), crate::MASK_RESOLUTION);
        assert_eq!(occupancy.layer(0).len(), 64 * 64);
        assert_eq!(occupancy.total_occupied(), 64 * 64);
    }

    #[test]
    fn test_png_round_trip_matches_raw_bytes() {
        let mut img = image::RgbaImage::new(2, 2);
        img.put_pixel(0, 0, image::Rgba([0, 255, 0, 255]));
        let mut png = Vec::new();
        image::DynamicImage::ImageRgba8(img.clone())
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let path = std::env::temp_dir().join(format!("foliage_mask_{}.png", std::process::id()));
        std::fs::write(&path, &png).unwrap();
        let loaded = DensityMask::load_png(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let direct = DensityMask::from_rgba8(2, 2, img.as_raw()).unwrap();
        assert_eq!(loaded, direct);
        // Top-left pixel of the image ends up at the start of the top row (index 2).
        assert_eq!(loaded.samples()[2], GREEN);
    }
}
