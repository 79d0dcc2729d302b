//! Plain value types shared by the renderer contract and every backend

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Primitive assembly for immediate and buffered draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderMode {
    /// Independent triangles, three vertices each
    Triangles,
    /// Triangle strip
    TriangleStrip,
    /// Quads, four vertices each; expanded to triangles before reaching a backend
    Rectangles,
    /// Independent line segments
    Lines,
    /// Closed line loop
    LineLoop,
}

/// Optional renderer capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// `draw_instanced` and per-instance vertex attributes
    Instancing,
    /// Anisotropic texture filtering
    Anisotropy,
    /// Multisampled rendering
    Multisampling,
    /// DXT compressed texture uploads
    CompressedTextures,
    /// Geometry shader stage
    GeometryShaders,
    /// Occlusion queries that report real visibility
    OcclusionQueries,
}

/// Texture binding slots
///
/// Each slot tracks its own binding; unbinding one never touches the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureSlot {
    /// Base color texture
    Diffuse = 0,
    /// Depth texture of a shadow viewport
    ShadowMap = 1,
    /// Specular intensity map
    Specular = 2,
    /// Normal/bump map
    Bump = 3,
    /// Environment cube map
    EnvironmentCube = 4,
}

impl TextureSlot {
    /// Number of slots
    pub const COUNT: usize = 5;

    /// Every slot, in unit order
    pub const ALL: [Self; Self::COUNT] =
        [Self::Diffuse, Self::ShadowMap, Self::Specular, Self::Bump, Self::EnvironmentCube];

    /// Texture unit index of the slot
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Sampler uniform name used by the built-in GL programs
    #[must_use]
    pub const fn sampler_name(self) -> &'static str {
        match self {
            Self::Diffuse => "mainTexture",
            Self::ShadowMap => "shadowMap",
            Self::Specular => "specularMap",
            Self::Bump => "bumpMap",
            Self::EnvironmentCube => "environmentMap",
        }
    }
}

/// Kind of storage behind a cached texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachedTextureType {
    /// Four channel color texture
    Rgba,
    /// Single channel texture sampled as alpha (font atlases)
    Alpha,
    /// Depth texture (shadow maps)
    Depth,
    /// Color texture usable as a render target
    RenderTarget,
}

bitflags! {
    /// Modifiers applied when a texture is loaded; part of the texture cache key
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        /// Clamp instead of repeat
        const NO_WRAP = 1;
        /// Generate or upload mip levels
        const BUILD_MIPMAPS = 1 << 1;
        /// Pixel data is in BGR(A) order
        const BGRA = 1 << 2;
        /// Image has a meaningful alpha channel
        const HAS_ALPHA = 1 << 3;
    }
}

/// Team color variant of a texture
///
/// Pixels covered by the mask image `<stem><suffix>.<ext>` are blended toward `rgb`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamColor {
    /// File name suffix of the mask image
    pub suffix: String,
    /// Team color
    pub rgb: [u8; 3],
}

impl TeamColor {
    /// Create a team color entry
    pub fn new(suffix: impl Into<String>, rgb: [u8; 3]) -> Self {
        Self { suffix: suffix.into(), rgb }
    }
}

/// RGBA color with float components in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    /// Red
    pub r: f32,
    /// Green
    pub g: f32,
    /// Blue
    pub b: f32,
    /// Alpha
    pub a: f32,
}

impl Color {
    /// Opaque white
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);
    /// Opaque black
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);

    /// Color from float components
    #[must_use]
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque color from float components
    #[must_use]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self::rgba(r, g, b, 1.0)
    }

    /// Color from 8-bit components
    #[must_use]
    pub fn from_bytes(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(f32::from(r) / 255.0, f32::from(g) / 255.0, f32::from(b) / 255.0, f32::from(a) / 255.0)
    }

    /// Components as an array, for uniform uploads
    #[must_use]
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<[f32; 4]> for Color {
    fn from(c: [f32; 4]) -> Self {
        Self::rgba(c[0], c[1], c[2], c[3])
    }
}

/// A point light as consumed by the built-in lighting uniforms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    /// Position (w = 1) or direction (w = 0)
    pub position: [f32; 4],
    /// Ambient term
    pub ambient: [f32; 4],
    /// Diffuse term
    pub diffuse: [f32; 4],
    /// Specular term
    pub specular: [f32; 4],
}

impl Default for Light {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 1.0, 0.0],
            ambient: [0.2, 0.2, 0.2, 1.0],
            diffuse: [1.0, 1.0, 1.0, 1.0],
            specular: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

/// Maximum number of lights the built-in programs evaluate
pub const MAX_LIGHTS: usize = 8;

/// Pixel rectangle of a viewport, origin at the bottom-left as in GL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportRect {
    /// Left edge
    pub x: i32,
    /// Bottom edge
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl ViewportRect {
    /// Create a rectangle
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Width over height; 1.0 for a degenerate rectangle
    #[must_use]
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Whether a pixel lies inside the rectangle
    #[must_use]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width as i32 && y < self.y + self.height as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_indices_are_dense() {
        for (i, slot) in TextureSlot::ALL.iter().enumerate() {
            assert_eq!(slot.index(), i);
        }
    }

    #[test]
    fn test_color_from_bytes() {
        let c = Color::from_bytes(255, 0, 51, 255);
        assert_eq!(c.to_array(), [1.0, 0.0, 0.2, 1.0]);
    }

    #[test]
    fn test_viewport_contains() {
        let rect = ViewportRect::new(10, 20, 100, 50);
        assert!(rect.contains(10, 20));
        assert!(rect.contains(109, 69));
        assert!(!rect.contains(110, 20));
        assert!(!rect.contains(9, 30));
        assert_eq!(ViewportRect::new(0, 0, 10, 0).aspect(), 1.0);
    }
}
