//! Image loading over the `image` crate
//!
//! Provides PNG, JPEG, BMP and TGA decoding for the texture manager, plus the team-color
//! blending applied to texture variants.

use std::path::Path;

use crate::assets::{AssetError, ImageProvider, PixelFormat, TextureImage};

/// Stock [`ImageProvider`] reading image files from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageFileProvider;

impl ImageFileProvider {
    /// Create the provider
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode an image from memory (useful for embedded resources)
    ///
    /// # Errors
    /// `LoadFailed` when the bytes are not a supported image.
    pub fn from_bytes(bytes: &[u8]) -> Result<TextureImage, AssetError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| AssetError::LoadFailed(format!("Failed to load image from bytes: {e}")))?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Loaded image {}x{} from memory", width, height);
        Ok(TextureImage::rgba8(width, height, rgba.into_raw()))
    }
}

impl ImageProvider for ImageFileProvider {
    fn load(&self, path: &str) -> Result<TextureImage, AssetError> {
        let path_ref = Path::new(path);
        if !path_ref.exists() {
            return Err(AssetError::NotFound(path.to_string()));
        }

        log::debug!("Loading image from: {:?}", path_ref);
        let img = image::open(path_ref).map_err(|e| match e {
            image::ImageError::Unsupported(err) => AssetError::UnsupportedFormat(format!("{path}: {err}")),
            image::ImageError::IoError(err) => AssetError::Io(err),
            other => AssetError::LoadFailed(format!("Failed to load image {path}: {other}")),
        })?;

        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        log::debug!("Loaded image {}x{} from {:?}", width, height, path_ref);
        Ok(TextureImage::rgba8(width, height, rgba.into_raw()))
    }
}

/// Path of the team-color mask for `path`: `<stem><suffix>.<ext>`
#[must_use]
pub fn team_mask_path(path: &str, suffix: &str) -> String {
    match path.rfind('.') {
        Some(dot) if !path[dot..].contains(['/', '\\']) => format!("{}{}{}", &path[..dot], suffix, &path[dot..]),
        _ => format!("{path}{suffix}"),
    }
}

/// Blend the pixels of `image` toward `rgb` by the mask intensity
///
/// The mask's first channel is the blend weight; `image` is converted to RGBA8 first.
///
/// # Errors
/// `InvalidData` when the mask size differs from the image or either image is compressed.
pub fn apply_team_color(image: &mut TextureImage, mask: &TextureImage, rgb: [u8; 3]) -> Result<(), AssetError> {
    if image.width() != mask.width() || image.height() != mask.height() {
        return Err(AssetError::InvalidData(format!(
            "team mask is {}x{}, texture is {}x{}",
            mask.width(),
            mask.height(),
            image.width(),
            image.height()
        )));
    }
    let (Some(pixels), Some(weights)) = (image.level_rgba8(0), mask.level_rgba8(0)) else {
        return Err(AssetError::InvalidData("team colors need uncompressed images".to_string()));
    };

    let mut blended = pixels.into_owned();
    for (pixel, weight) in blended.chunks_exact_mut(4).zip(weights.chunks_exact(4)) {
        let m = f32::from(weight[0]) / 255.0;
        for (channel, team) in pixel.iter_mut().zip(rgb) {
            let value = f32::from(*channel) * (1.0 - m) + f32::from(team) * m;
            *channel = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    let (width, height) = (image.width(), image.height());
    *image = TextureImage::new(width, height, PixelFormat::Rgba8, blended);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_mask_path_inserts_suffix_before_extension() {
        assert_eq!(team_mask_path("models/tank.png", "_mask"), "models/tank_mask.png");
        assert_eq!(team_mask_path("dir.v2/tank", "_mask"), "dir.v2/tank_mask");
    }

    #[test]
    fn test_team_color_blends_by_mask() {
        let mut image = TextureImage::solid_color(2, 1, [100, 100, 100, 255]);
        let mask = TextureImage::rgba8(2, 1, vec![0, 0, 0, 255, 255, 255, 255, 255]);

        apply_team_color(&mut image, &mask, [255, 0, 0]).unwrap();

        assert_eq!(&image.data()[0..4], &[100, 100, 100, 255]);
        assert_eq!(&image.data()[4..8], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_team_mask_size_mismatch() {
        let mut image = TextureImage::solid_color(2, 2, [0; 4]);
        let mask = TextureImage::solid_color(1, 1, [0; 4]);
        assert!(apply_team_color(&mut image, &mask, [0, 0, 0]).is_err());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let provider = ImageFileProvider::new();
        assert!(matches!(provider.load("/definitely/not/here.png"), Err(AssetError::NotFound(_))));
    }

    #[test]
    fn test_decode_png_from_bytes() {
        let mut bytes = Vec::new();
        let img = image::RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 4]));
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();

        let decoded = ImageFileProvider::from_bytes(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (3, 2));
        assert_eq!(&decoded.data()[0..4], &[1, 2, 3, 4]);
    }
}
