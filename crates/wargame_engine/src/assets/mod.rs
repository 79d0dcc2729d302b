//! Asset provider interfaces
//!
//! File parsing is not the renderer's job: meshes and images arrive through these
//! provider traits. [`ImageFileProvider`] is the stock image provider over the `image` crate.

pub mod image_loader;

pub use image_loader::{apply_team_color, team_mask_path, ImageFileProvider};

use std::borrow::Cow;

use thiserror::Error;

use crate::foundation::math::{Vec2, Vec3};
use crate::render::mesh::{MaterialManager, MeshPart};

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// The asset does not exist
    #[error("Asset not found: {0}")]
    NotFound(String),

    /// Decoding failed
    #[error("Failed to load asset: {0}")]
    LoadFailed(String),

    /// The decoded data is inconsistent
    #[error("Invalid asset data: {0}")]
    InvalidData(String),

    /// The file format is not understood
    #[error("Unsupported asset format: {0}")]
    UnsupportedFormat(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pixel layout of texture data handed to the upload functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit RGB
    Rgb8,
    /// 8-bit RGBA
    Rgba8,
    /// 8-bit BGR
    Bgr8,
    /// 8-bit BGRA
    Bgra8,
    /// Single 8-bit channel
    R8,
    /// BC1 blocks, 8 bytes per 4x4 block
    Dxt1,
    /// BC2 blocks, 16 bytes per 4x4 block
    Dxt3,
    /// BC3 blocks, 16 bytes per 4x4 block
    Dxt5,
}

impl PixelFormat {
    /// Bytes per pixel of an uncompressed format
    #[must_use]
    pub const fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            Self::Rgb8 | Self::Bgr8 => Some(3),
            Self::Rgba8 | Self::Bgra8 => Some(4),
            Self::R8 => Some(1),
            Self::Dxt1 | Self::Dxt3 | Self::Dxt5 => None,
        }
    }

    /// Whether the data is block compressed
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        matches!(self, Self::Dxt1 | Self::Dxt3 | Self::Dxt5)
    }

    /// Expected byte size of one `width` x `height` level
    #[must_use]
    pub fn level_size(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self.bytes_per_pixel() {
            Some(bpp) => w * h * bpp,
            None => {
                let block = if self == Self::Dxt1 { 8 } else { 16 };
                w.div_ceil(4).max(1) * h.div_ceil(4).max(1) * block
            }
        }
    }
}

/// One mip level of an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    /// Level width
    pub width: u32,
    /// Level height
    pub height: u32,
    /// Pixel or block data
    pub data: Vec<u8>,
}

/// Decoded image ready for upload: level 0 first, then any precomputed mips
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    /// Pixel layout of every level
    pub format: PixelFormat,
    /// Mip chain, never empty
    pub levels: Vec<MipLevel>,
}

impl TextureImage {
    /// Single-level image
    #[must_use]
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self { format, levels: vec![MipLevel { width, height, data }] }
    }

    /// Single-level RGBA image
    #[must_use]
    pub fn rgba8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self::new(width, height, PixelFormat::Rgba8, data)
    }

    /// Solid color RGBA image
    #[must_use]
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = (width * height) as usize;
        Self::rgba8(width, height, color.repeat(pixel_count))
    }

    /// Width of level 0
    #[must_use]
    pub fn width(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.width)
    }

    /// Height of level 0
    #[must_use]
    pub fn height(&self) -> u32 {
        self.levels.first().map_or(0, |l| l.height)
    }

    /// Data of level 0
    #[must_use]
    pub fn data(&self) -> &[u8] {
        self.levels.first().map_or(&[], |l| l.data.as_slice())
    }

    /// Check that every level holds the bytes its dimensions require
    ///
    /// # Errors
    /// `InvalidData` naming the first inconsistent level.
    pub fn validate(&self) -> Result<(), AssetError> {
        if self.levels.is_empty() {
            return Err(AssetError::InvalidData("image has no levels".to_string()));
        }
        for (i, level) in self.levels.iter().enumerate() {
            let expected = self.format.level_size(level.width, level.height);
            if level.data.len() < expected {
                return Err(AssetError::InvalidData(format!(
                    "level {i} of {}x{} {:?} has {} bytes, expected {expected}",
                    level.width,
                    level.height,
                    self.format,
                    level.data.len()
                )));
            }
        }
        Ok(())
    }

    /// Level `index` converted to tightly packed RGBA8, for APIs without RGB/BGR formats
    ///
    /// Returns `None` for compressed formats and missing levels.
    #[must_use]
    pub fn level_rgba8(&self, index: usize) -> Option<Cow<'_, [u8]>> {
        let level = self.levels.get(index)?;
        let data = level.data.as_slice();
        Some(match self.format {
            PixelFormat::Rgba8 => Cow::Borrowed(data),
            PixelFormat::Bgra8 => Cow::Owned(data.chunks_exact(4).flat_map(|p| [p[2], p[1], p[0], p[3]]).collect()),
            PixelFormat::Rgb8 => Cow::Owned(data.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect()),
            PixelFormat::Bgr8 => Cow::Owned(data.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0], 255]).collect()),
            PixelFormat::R8 => Cow::Owned(data.iter().flat_map(|&a| [255, 255, 255, a]).collect()),
            PixelFormat::Dxt1 | PixelFormat::Dxt3 | PixelFormat::Dxt5 => return None,
        })
    }
}

/// Supplies decoded images for logical texture paths
///
/// Called from texture loader threads, hence `Send + Sync`.
pub trait ImageProvider: Send + Sync {
    /// Decode the image at `path`
    ///
    /// # Errors
    /// `NotFound` when the file is missing, `LoadFailed`/`UnsupportedFormat` when it cannot be decoded.
    fn load(&self, path: &str) -> Result<TextureImage, AssetError>;
}

/// Geometry of one model as delivered by a mesh loader
#[derive(Debug, Clone, Default)]
pub struct ModelData {
    /// Vertex positions
    pub vertices: Vec<Vec3>,
    /// Per-vertex normals (empty when absent)
    pub normals: Vec<Vec3>,
    /// Per-vertex texture coordinates (empty when absent)
    pub tex_coords: Vec<Vec2>,
    /// Triangle indexes (empty for index-free geometry)
    pub indexes: Vec<u32>,
    /// Sorted sub-mesh breakpoints
    pub parts: Vec<MeshPart>,
    /// Materials referenced by `parts`
    pub materials: MaterialManager,
}

/// Supplies meshes for logical model paths
pub trait ModelProvider {
    /// Load the model at `path`
    ///
    /// # Errors
    /// Provider specific.
    fn load(&self, path: &str) -> Result<ModelData, AssetError>;
}

/// Axis-aligned bounds of a model, supplied by the physics layer
pub trait BoundingProvider {
    /// `(min, max)` corners for the model at `path`, if known
    fn bounding(&self, path: &str) -> Option<(Vec3, Vec3)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_image() {
        let img = TextureImage::solid_color(4, 4, [255, 0, 0, 255]);
        assert_eq!(img.width(), 4);
        assert_eq!(img.data().len(), 4 * 4 * 4);
        assert_eq!(&img.data()[0..4], &[255, 0, 0, 255]);
        assert!(img.validate().is_ok());
    }

    #[test]
    fn test_compressed_level_size_rounds_up_to_blocks() {
        assert_eq!(PixelFormat::Dxt1.level_size(4, 4), 8);
        assert_eq!(PixelFormat::Dxt5.level_size(5, 3), 2 * 16);
        assert_eq!(PixelFormat::Dxt1.level_size(1, 1), 8);
    }

    #[test]
    fn test_short_level_fails_validation() {
        let img = TextureImage::new(2, 2, PixelFormat::Rgb8, vec![0; 11]);
        assert!(matches!(img.validate(), Err(AssetError::InvalidData(_))));
    }

    #[test]
    fn test_bgr_converts_to_rgba() {
        let img = TextureImage::new(1, 1, PixelFormat::Bgr8, vec![1, 2, 3]);
        assert_eq!(img.level_rgba8(0).unwrap().as_ref(), &[3, 2, 1, 255]);
        let dxt = TextureImage::new(4, 4, PixelFormat::Dxt1, vec![0; 8]);
        assert!(dxt.level_rgba8(0).is_none());
    }
}
