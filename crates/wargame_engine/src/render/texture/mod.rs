//! Cached textures
//!
//! A [`CachedTexture`] owns one backend texture. Its native object sits behind an `Rc` so
//! that slot bindings ([`TextureBinding`]) and in-flight frames can keep it alive after the
//! owner drops it; the backend native releases the GPU object when the last reference goes.

pub mod loader;
pub mod manager;

pub use loader::{LoadedImage, TextureLoader};
pub use manager::{TextureKey, TextureManager};

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::assets::TextureImage;
use crate::render::{CachedTextureType, RenderError, RenderResult, TextureFlags};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique texture identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        Self(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// GPU texture owned by its creator
pub struct CachedTexture {
    id: TextureId,
    kind: CachedTextureType,
    width: u32,
    height: u32,
    cubemap: bool,
    ready: bool,
    native: Rc<dyn Any>,
}

impl CachedTexture {
    /// Wrap a backend native texture
    ///
    /// `ready` says whether the texture may be sampled as is (storage allocated and defined).
    pub fn new<T: Any>(kind: CachedTextureType, width: u32, height: u32, cubemap: bool, ready: bool, native: T) -> Self {
        Self { id: TextureId::next(), kind, width, height, cubemap, ready, native: Rc::new(native) }
    }

    /// Unique id
    #[must_use]
    pub const fn id(&self) -> TextureId {
        self.id
    }

    /// Storage kind
    #[must_use]
    pub const fn kind(&self) -> CachedTextureType {
        self.kind
    }

    /// Width of level 0
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height of level 0
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Whether this is a cube map
    #[must_use]
    pub const fn is_cubemap(&self) -> bool {
        self.cubemap
    }

    /// Whether the texture holds defined contents
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Record a completed upload or render pass of the given size
    pub fn mark_ready(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.ready = true;
    }

    /// Backend native, if it is a `T`
    #[must_use]
    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.downcast_ref()
    }

    /// Backend native of a texture this backend must have created
    ///
    /// # Errors
    /// `InvalidOperation` when the texture belongs to another backend.
    pub fn expect_native<T: Any>(&self, backend: &str) -> RenderResult<&T> {
        self.native()
            .ok_or_else(|| RenderError::InvalidOperation(format!("texture {:?} was not created by the {backend} renderer", self.id)))
    }

    /// Shareable reference for binding to a slot
    #[must_use]
    pub fn binding(&self) -> TextureBinding {
        TextureBinding {
            id: self.id,
            kind: self.kind,
            cubemap: self.cubemap,
            ready: self.ready,
            native: Rc::clone(&self.native),
        }
    }
}

impl fmt::Debug for CachedTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedTexture")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("size", &(self.width, self.height))
            .field("cubemap", &self.cubemap)
            .field("ready", &self.ready)
            .finish_non_exhaustive()
    }
}

/// Reference to a texture's native, held by texture slots and drawing lists
#[derive(Clone)]
pub struct TextureBinding {
    id: TextureId,
    kind: CachedTextureType,
    cubemap: bool,
    ready: bool,
    native: Rc<dyn Any>,
}

impl TextureBinding {
    /// Id of the texture this binding refers to
    #[must_use]
    pub const fn id(&self) -> TextureId {
        self.id
    }

    /// Storage kind
    #[must_use]
    pub const fn kind(&self) -> CachedTextureType {
        self.kind
    }

    /// Whether this is a cube map
    #[must_use]
    pub const fn is_cubemap(&self) -> bool {
        self.cubemap
    }

    /// Whether the texture had defined contents when the binding was taken
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Backend native, if it is a `T`
    #[must_use]
    pub fn native<T: Any>(&self) -> Option<&T> {
        self.native.downcast_ref()
    }

    /// Shared backend native, if it is a `T`
    #[must_use]
    pub fn native_rc<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.native).downcast().ok()
    }
}

impl fmt::Debug for TextureBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureBinding").field("id", &self.id).field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Texture creation and upload, implemented by every backend
///
/// The texture manager drives backends through this trait when it turns decoded images into
/// GPU textures.
pub trait TextureHelper {
    /// Texture object without storage; upload or render into it before sampling
    ///
    /// # Errors
    /// `ResourceCreationFailed` when the backend cannot create the object.
    fn create_empty_texture(&mut self, cubemap: bool) -> RenderResult<CachedTexture>;

    /// Texture with storage of `kind`, optionally initialized with `data`
    ///
    /// `data` is RGBA8 for `Rgba`/`RenderTarget`, one byte per pixel for `Alpha` and ignored for `Depth`.
    ///
    /// # Errors
    /// `ResourceCreationFailed` when the backend cannot allocate the texture.
    fn create_texture(
        &mut self,
        data: Option<&[u8]>,
        width: u32,
        height: u32,
        kind: CachedTextureType,
    ) -> RenderResult<CachedTexture>;

    /// Upload an uncompressed image (and its mips) into `texture`
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure, `InvalidOperation` for a foreign texture.
    fn upload_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()>;

    /// Upload a block-compressed image; backends without compressed formats decode or reject it
    ///
    /// # Errors
    /// As [`upload_texture`](Self::upload_texture).
    fn upload_compressed_texture(
        &mut self,
        texture: &mut CachedTexture,
        image: &TextureImage,
        flags: TextureFlags,
    ) -> RenderResult<()>;

    /// Upload six faces (+X, -X, +Y, -Y, +Z, -Z) into a cube map texture
    ///
    /// # Errors
    /// As [`upload_texture`](Self::upload_texture).
    fn upload_cubemap(&mut self, texture: &mut CachedTexture, sides: &[TextureImage; 6], flags: TextureFlags) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = CachedTexture::new(CachedTextureType::Rgba, 1, 1, false, true, 1u32);
        let b = CachedTexture::new(CachedTextureType::Rgba, 1, 1, false, true, 1u32);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_binding_keeps_native_alive() {
        let texture = CachedTexture::new(CachedTextureType::Rgba, 2, 2, false, true, String::from("native"));
        let binding = texture.binding();
        drop(texture);
        assert_eq!(binding.native::<String>().map(String::as_str), Some("native"));
        assert!(binding.native::<u32>().is_none());
    }

    #[test]
    fn test_mark_ready_updates_size() {
        let mut texture = CachedTexture::new(CachedTextureType::RenderTarget, 0, 0, false, false, ());
        assert!(!texture.is_ready());
        texture.mark_ready(64, 32);
        assert!(texture.is_ready());
        assert_eq!((texture.width(), texture.height()), (64, 32));
    }
}
