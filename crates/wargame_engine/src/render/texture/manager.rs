//! Texture manager
//!
//! Resolves logical texture paths (plus modifier flags and team colors) to GPU textures.
//! A texture that is not resident yet is queued on the background loader and the
//! placeholder is returned in its place; `poll` uploads finished loads once per frame.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::assets::ImageProvider;
use crate::core::TextureConfig;
use crate::render::texture::loader::{Completion, LoadedImage, TextureLoader};
use crate::render::texture::{CachedTexture, TextureBinding, TextureHelper};
use crate::render::{CachedTextureType, RenderResult, TeamColor, TextureFlags};

/// Cache key of a managed texture
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TextureKey {
    paths: Vec<String>,
    cube: bool,
    flags: TextureFlags,
    team_colors: Vec<TeamColor>,
}

impl TextureKey {
    /// Key of a 2D texture
    pub fn new(path: impl Into<String>, flags: TextureFlags, team_colors: &[TeamColor]) -> Self {
        Self { paths: vec![path.into()], cube: false, flags, team_colors: team_colors.to_vec() }
    }

    /// Key of a cube map built from six face images (+X, -X, +Y, -Y, +Z, -Z)
    #[must_use]
    pub fn cubemap(faces: &[String; 6], flags: TextureFlags) -> Self {
        Self { paths: faces.to_vec(), cube: true, flags, team_colors: Vec::new() }
    }

    /// Image path (first face for cube maps)
    #[must_use]
    pub fn path(&self) -> &str {
        self.paths.first().map_or("", String::as_str)
    }

    /// Face paths of a cube map key
    #[must_use]
    pub fn cube_faces(&self) -> Option<&[String]> {
        self.cube.then_some(self.paths.as_slice())
    }

    /// Load modifiers
    #[must_use]
    pub const fn flags(&self) -> TextureFlags {
        self.flags
    }

    /// Team color variants applied on load
    #[must_use]
    pub fn team_colors(&self) -> &[TeamColor] {
        &self.team_colors
    }
}

impl fmt::Display for TextureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cube {
            write!(f, "cube[{}]", self.paths.join(", "))?;
        } else {
            f.write_str(self.path())?;
        }
        for team in &self.team_colors {
            write!(f, " +{}", team.suffix)?;
        }
        Ok(())
    }
}

enum Entry {
    Pending,
    Resident(CachedTexture),
    Failed,
}

/// Owner of every path-addressed texture of one renderer
pub struct TextureManager {
    entries: HashMap<TextureKey, Entry>,
    placeholder: Option<CachedTexture>,
    loader: TextureLoader,
    build_mipmaps: bool,
}

impl TextureManager {
    /// Create a manager decoding through `provider`
    ///
    /// # Errors
    /// `ResourceCreationFailed` when the loader threads cannot be started.
    pub fn new(provider: Arc<dyn ImageProvider>, config: &TextureConfig) -> RenderResult<Self> {
        Ok(Self {
            entries: HashMap::new(),
            placeholder: None,
            loader: TextureLoader::new(provider, config.loader_threads)?,
            build_mipmaps: config.build_mipmaps,
        })
    }

    /// The 1x1 white texture bound in place of textures that are not resident
    ///
    /// # Errors
    /// Backend failure creating the texture.
    pub fn placeholder(&mut self, helper: &mut dyn TextureHelper) -> RenderResult<TextureBinding> {
        if let Some(placeholder) = &self.placeholder {
            return Ok(placeholder.binding());
        }
        let placeholder = helper.create_texture(Some(&[255, 255, 255, 255]), 1, 1, CachedTextureType::Rgba)?;
        let binding = placeholder.binding();
        self.placeholder = Some(placeholder);
        Ok(binding)
    }

    /// Texture for `path`, or the placeholder while it loads
    ///
    /// With `force_load_now` the image is decoded and uploaded before returning.
    ///
    /// # Errors
    /// Only backend failures creating the placeholder; asset errors are logged and
    /// answered with the placeholder.
    pub fn get_texture(
        &mut self,
        helper: &mut dyn TextureHelper,
        path: &str,
        flags: TextureFlags,
        team_colors: &[TeamColor],
        force_load_now: bool,
    ) -> RenderResult<TextureBinding> {
        self.resolve(helper, TextureKey::new(path, flags, team_colors), force_load_now)
    }

    /// Cube map built from six face images, or the placeholder while it loads
    ///
    /// # Errors
    /// As [`get_texture`](Self::get_texture).
    pub fn get_cubemap(
        &mut self,
        helper: &mut dyn TextureHelper,
        faces: &[String; 6],
        force_load_now: bool,
    ) -> RenderResult<TextureBinding> {
        self.resolve(helper, TextureKey::cubemap(faces, TextureFlags::NO_WRAP), force_load_now)
    }

    fn resolve(&mut self, helper: &mut dyn TextureHelper, key: TextureKey, force_load_now: bool) -> RenderResult<TextureBinding> {
        match self.entries.get(&key) {
            Some(Entry::Resident(texture)) => return Ok(texture.binding()),
            Some(Entry::Failed) => return self.placeholder(helper),
            Some(Entry::Pending) if !force_load_now => return self.placeholder(helper),
            Some(Entry::Pending) | None => {}
        }

        if force_load_now {
            let loaded = self.loader.load_now(&key);
            let entry = self.finish(helper, &key, loaded);
            self.entries.insert(key.clone(), entry);
            return match self.entries.get(&key) {
                Some(Entry::Resident(texture)) => Ok(texture.binding()),
                _ => self.placeholder(helper),
            };
        }

        self.loader.submit(key.clone());
        self.entries.insert(key, Entry::Pending);
        self.placeholder(helper)
    }

    fn finish(
        &self,
        helper: &mut dyn TextureHelper,
        key: &TextureKey,
        loaded: Result<LoadedImage, crate::assets::AssetError>,
    ) -> Entry {
        let image = match loaded {
            Ok(image) => image,
            Err(err) => {
                log::warn!("Texture {} could not be loaded, using placeholder: {}", key, err);
                return Entry::Failed;
            }
        };

        let mut flags = key.flags();
        if self.build_mipmaps {
            flags |= TextureFlags::BUILD_MIPMAPS;
        }
        match upload(helper, image, flags) {
            Ok(texture) => {
                log::debug!("Texture {} resident ({}x{})", key, texture.width(), texture.height());
                Entry::Resident(texture)
            }
            Err(err) => {
                log::warn!("Texture {} could not be uploaded, using placeholder: {}", key, err);
                Entry::Failed
            }
        }
    }

    fn complete(&mut self, helper: &mut dyn TextureHelper, completion: Completion) {
        if !matches!(self.entries.get(&completion.key), Some(Entry::Pending)) {
            // Already loaded synchronously, or the manager was reset.
            return;
        }
        let entry = self.finish(helper, &completion.key, completion.result);
        self.entries.insert(completion.key, entry);
    }

    /// Upload every finished background load without blocking; returns how many were handled
    pub fn poll(&mut self, helper: &mut dyn TextureHelper) -> usize {
        let mut handled = 0;
        while let Some(completion) = self.loader.try_next() {
            self.complete(helper, completion);
            handled += 1;
        }
        handled
    }

    /// Block until every pending load finished or `timeout` elapsed; returns how many were handled
    pub fn wait_for_pending(&mut self, helper: &mut dyn TextureHelper, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut handled = 0;
        while self.pending_count() > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.loader.next_timeout(remaining) {
                Some(completion) => {
                    self.complete(helper, completion);
                    handled += 1;
                }
                None => break,
            }
        }
        handled
    }

    /// Cancel all background loads; canceled keys are requested again on next use
    pub fn cancel_all(&mut self) {
        self.loader.cancel_all();
        self.entries.retain(|_, entry| !matches!(entry, Entry::Pending));
    }

    /// Cancel loads and release every managed texture except the placeholder
    pub fn reset(&mut self) {
        self.loader.cancel_all();
        self.entries.clear();
    }

    /// Resident texture for `path` without team colors
    #[must_use]
    pub fn texture(&self, path: &str, flags: TextureFlags) -> Option<&CachedTexture> {
        match self.entries.get(&TextureKey::new(path, flags, &[])) {
            Some(Entry::Resident(texture)) => Some(texture),
            _ => None,
        }
    }

    /// Whether `path` without team colors is resident
    #[must_use]
    pub fn is_resident(&self, path: &str, flags: TextureFlags) -> bool {
        self.texture(path, flags).is_some()
    }

    /// Number of resident textures
    #[must_use]
    pub fn resident_count(&self) -> usize {
        self.entries.values().filter(|e| matches!(e, Entry::Resident(_))).count()
    }

    /// Number of loads in flight
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| matches!(e, Entry::Pending)).count()
    }
}

fn upload(helper: &mut dyn TextureHelper, image: LoadedImage, flags: TextureFlags) -> RenderResult<CachedTexture> {
    match image {
        LoadedImage::Flat(image) => {
            let mut texture = helper.create_empty_texture(false)?;
            if image.format.is_compressed() {
                helper.upload_compressed_texture(&mut texture, &image, flags)?;
            } else {
                helper.upload_texture(&mut texture, &image, flags)?;
            }
            Ok(texture)
        }
        LoadedImage::Cube(faces) => {
            let mut texture = helper.create_empty_texture(true)?;
            helper.upload_cubemap(&mut texture, &faces, flags)?;
            Ok(texture)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetError, TextureImage};
    use crate::render::backends::headless::HeadlessBackend;

    struct OneImage;

    impl ImageProvider for OneImage {
        fn load(&self, path: &str) -> Result<TextureImage, AssetError> {
            match path {
                "grass.png" => Ok(TextureImage::solid_color(4, 4, [0, 255, 0, 255])),
                _ => Err(AssetError::NotFound(path.to_string())),
            }
        }
    }

    fn manager() -> TextureManager {
        TextureManager::new(Arc::new(OneImage), &TextureConfig::default()).unwrap()
    }

    #[test]
    fn test_deferred_load_returns_placeholder_first() {
        let mut backend = HeadlessBackend::new();
        let mut textures = manager();
        let placeholder = textures.placeholder(&mut backend).unwrap();

        let first = textures.get_texture(&mut backend, "grass.png", TextureFlags::empty(), &[], false).unwrap();
        assert_eq!(first.id(), placeholder.id());

        textures.wait_for_pending(&mut backend, Duration::from_secs(10));
        let loaded = textures.get_texture(&mut backend, "grass.png", TextureFlags::empty(), &[], false).unwrap();
        assert_ne!(loaded.id(), placeholder.id());
        assert!(textures.is_resident("grass.png", TextureFlags::empty()));
    }

    #[test]
    fn test_force_load_is_immediate() {
        let mut backend = HeadlessBackend::new();
        let mut textures = manager();
        let binding = textures.get_texture(&mut backend, "grass.png", TextureFlags::empty(), &[], true).unwrap();
        let resident = textures.texture("grass.png", TextureFlags::empty()).unwrap();
        assert_eq!(binding.id(), resident.id());
        assert_eq!(resident.width(), 4);
    }

    #[test]
    fn test_missing_texture_uses_placeholder() {
        let mut backend = HeadlessBackend::new();
        let mut textures = manager();
        let placeholder = textures.placeholder(&mut backend).unwrap();
        let binding = textures.get_texture(&mut backend, "missing.png", TextureFlags::empty(), &[], true).unwrap();
        assert_eq!(binding.id(), placeholder.id());
        assert_eq!(textures.resident_count(), 0);
    }

    #[test]
    fn test_flags_are_part_of_the_key() {
        let mut backend = HeadlessBackend::new();
        let mut textures = manager();
        let plain = textures.get_texture(&mut backend, "grass.png", TextureFlags::empty(), &[], true).unwrap();
        let clamped = textures.get_texture(&mut backend, "grass.png", TextureFlags::NO_WRAP, &[], true).unwrap();
        assert_ne!(plain.id(), clamped.id());
        assert_eq!(textures.resident_count(), 2);
    }

    #[test]
    fn test_cancel_all_drops_pending_loads() {
        let mut backend = HeadlessBackend::new();
        let mut textures = manager();
        textures.get_texture(&mut backend, "grass.png", TextureFlags::empty(), &[], false).unwrap();
        textures.cancel_all();
        assert_eq!(textures.pending_count(), 0);

        std::thread::sleep(Duration::from_millis(50));
        textures.poll(&mut backend);
        assert_eq!(textures.resident_count(), 0);
    }
}
