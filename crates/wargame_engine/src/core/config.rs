//! # Unified Configuration System
//!
//! All configuration structures of the engine in one place: backend selection and
//! per-backend tuning, texture loading, view defaults, and engine-wide logging.
//!
//! ## Configuration Categories
//!
//! - **Renderer Config**: backend choice, Vulkan/GL/DirectX specifics
//! - **Texture Config**: loader threads, anisotropy, mipmaps
//! - **View Config**: field of view, clip planes, shadow maps, multisampling
//! - **Engine Config**: logging and debug behaviour

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::config::{Config, ConfigError};

/// Graphics backend selected at renderer construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BackendKind {
    /// Fixed-function era GL 2.1 / GLES 2 path
    LegacyGl,
    /// GL 3.3 core path with VAOs and instancing
    #[default]
    ModernGl,
    /// Vulkan 1.0
    Vulkan,
    /// Direct3D 12 through wgpu
    DirectX,
    /// GPU-less recording backend
    Headless,
}

impl BackendKind {
    /// Human readable backend name, matching `Renderer::name`
    pub fn name(self) -> &'static str {
        match self {
            Self::LegacyGl => "Legacy OpenGL",
            Self::ModernGl => "OpenGL",
            Self::Vulkan => "Vulkan",
            Self::DirectX => "DirectX",
            Self::Headless => "Headless",
        }
    }

    /// Whether the backend draws through a GL context
    #[must_use]
    pub const fn is_gl(self) -> bool {
        matches!(self, Self::LegacyGl | Self::ModernGl)
    }
}

/// # Shader Configuration
///
/// SPIR-V files of the built-in Vulkan scene program. The defaults are looked up in the
/// directories `build.rs` writes to, relative to the usual launch directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Compiled vertex stage
    pub vertex_shader_path: String,
    /// Compiled fragment stage
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    const SEARCH_DIRS: [&'static str; 4] = ["target/shaders", "../target/shaders", "../../target/shaders", "shaders"];

    /// Explicit stage paths
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self { vertex_shader_path: vertex_path.into(), fragment_shader_path: fragment_path.into() }
    }

    /// Stage files looked up by name in the search directories
    ///
    /// A name found nowhere resolves into `target/shaders` so the validation error names the
    /// expected build output.
    pub fn with_path_resolution(vertex_file: &str, fragment_file: &str) -> Self {
        let resolve = |file: &str| {
            Self::SEARCH_DIRS
                .iter()
                .map(|dir| Path::new(dir).join(file))
                .find(|candidate| candidate.exists())
                .unwrap_or_else(|| Path::new(Self::SEARCH_DIRS[0]).join(file))
                .to_string_lossy()
                .into_owned()
        };
        Self::new(resolve(vertex_file), resolve(fragment_file))
    }

    /// Both stage files exist
    pub fn validate(&self) -> Result<(), String> {
        [("vertex", &self.vertex_shader_path), ("fragment", &self.fragment_shader_path)]
            .into_iter()
            .find(|(_, path)| !Path::new(path).exists())
            .map_or(Ok(()), |(stage, path)| Err(format!("SPIR-V {stage} stage missing: {path}")))
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("scene.vert.spv", "scene.frag.spv")
    }
}

/// # Vulkan Renderer Configuration
///
/// Application metadata, frame pacing and the sizes of the per-frame
/// resource rings used by the Vulkan backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VulkanRendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Depth of the command buffer ring
    pub max_frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers
    pub enable_validation: Option<bool>,
    /// Descriptor sets in the first descriptor pool; later pools double
    pub descriptor_pool_size: u32,
    /// Bytes per chunk of the transient vertex cache
    pub vertex_cache_chunk_size: u64,
    /// Bytes of uniform arena per frame
    pub uniform_arena_size: u64,
    /// Occlusion queries available per frame
    pub query_pool_size: u32,
    /// Prefer mailbox presentation over FIFO when available
    pub prefer_mailbox: bool,
    /// Shader configuration
    pub shaders: ShaderConfig,
}

impl VulkanRendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            max_frames_in_flight: 3,
            enable_validation: None,
            descriptor_pool_size: 64,
            vertex_cache_chunk_size: 1 << 20,
            uniform_arena_size: 1 << 20,
            query_pool_size: 1024,
            prefer_mailbox: true,
            shaders: ShaderConfig::default(),
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set maximum frames in flight
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the size of the first descriptor pool
    pub fn with_descriptor_pool_size(mut self, sets: u32) -> Self {
        self.descriptor_pool_size = sets;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if self.max_frames_in_flight == 0 {
            return Err("Max frames in flight must be at least 1".to_string());
        }
        if self.max_frames_in_flight > 8 {
            return Err("Max frames in flight should not exceed 8".to_string());
        }
        if self.descriptor_pool_size == 0 {
            return Err("Descriptor pool size must be at least 1".to_string());
        }
        if self.vertex_cache_chunk_size < 1024 {
            return Err("Vertex cache chunks must hold at least 1 KiB".to_string());
        }
        if self.uniform_arena_size < 1024 {
            return Err("Uniform arena must hold at least 1 KiB".to_string());
        }
        self.shaders.validate()
    }
}

impl Default for VulkanRendererConfig {
    fn default() -> Self {
        Self::new("Wargame Engine")
    }
}

/// DirectX backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectXRendererConfig {
    /// Prefer a discrete adapter
    pub high_performance: bool,
    /// Bytes of uniform data per frame
    pub uniform_arena_size: u64,
    /// Occlusion queries available per frame
    pub query_pool_size: u32,
}

impl Default for DirectXRendererConfig {
    fn default() -> Self {
        Self {
            high_performance: true,
            uniform_arena_size: 1 << 20,
            query_pool_size: 1024,
        }
    }
}

impl DirectXRendererConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.uniform_arena_size < 4096 {
            return Err("uniform_arena_size must be at least 4096 bytes".to_string());
        }
        if self.query_pool_size == 0 {
            return Err("query_pool_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// # Renderer Configuration
///
/// Backend selection plus the per-backend sections. Only the section of the
/// selected backend is consulted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RendererConfig {
    /// Backend to construct
    pub backend: BackendKind,
    /// Vulkan specific settings
    pub vulkan: VulkanRendererConfig,
    /// DirectX specific settings
    pub directx: DirectXRendererConfig,
}

impl RendererConfig {
    /// Create a configuration for the given backend with default sections
    pub fn for_backend(backend: BackendKind) -> Self {
        Self {
            backend,
            ..Self::default()
        }
    }

    /// Validate the section of the selected backend
    pub fn validate(&self) -> Result<(), String> {
        match self.backend {
            BackendKind::Vulkan => self.vulkan.validate(),
            BackendKind::DirectX => self.directx.validate(),
            _ => Ok(()),
        }
    }
}

/// # Texture Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextureConfig {
    /// Threads decoding images in the background; 0 picks the core count
    pub loader_threads: usize,
    /// Anisotropic filtering level applied to new textures (1 disables)
    pub anisotropy: f32,
    /// Generate mipmaps for textures loaded by path
    pub build_mipmaps: bool,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            loader_threads: 2,
            anisotropy: 1.0,
            build_mipmaps: true,
        }
    }
}

/// # View Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewConfig {
    /// Vertical field of view of the main viewport in degrees
    pub field_of_view: f32,
    /// Near clipping plane
    pub near_plane: f32,
    /// Far clipping plane
    pub far_plane: f32,
    /// Shadow map edge length in pixels; 0 disables shadows
    pub shadow_map_size: u32,
    /// Shadow camera field of view in degrees
    pub shadow_angle: f32,
    /// Request multisampled rendering
    pub multisampling: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            field_of_view: 60.0,
            near_plane: 1.0,
            far_plane: 1000.0,
            shadow_map_size: 1024,
            shadow_angle: 65.0,
            multisampling: false,
        }
    }
}

impl ViewConfig {
    /// Validate value ranges
    pub fn validate(&self) -> Result<(), String> {
        if !(1.0..179.0).contains(&self.field_of_view) {
            return Err(format!("Field of view out of range: {}", self.field_of_view));
        }
        if self.near_plane <= 0.0 || self.far_plane <= self.near_plane {
            return Err(format!(
                "Clipping planes must satisfy 0 < near < far, got {} / {}",
                self.near_plane, self.far_plane
            ));
        }
        Ok(())
    }
}

/// # Engine Configuration
///
/// Core engine behavior: logging and debug features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Log level for the engine
    pub log_level: String,
    /// Whether to enable debug features
    pub debug_mode: bool,
    /// Target FPS for frame rate limiting
    pub target_fps: Option<u32>,
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            debug_mode: cfg!(debug_assertions),
            target_fps: None,
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    /// Set target FPS
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Application Configuration
///
/// Top-level configuration file contents.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine wide settings
    pub engine: EngineConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
    /// Texture loading settings
    pub textures: TextureConfig,
    /// View defaults
    pub view: ViewConfig,
}

impl Config for ApplicationConfig {}

impl ApplicationConfig {
    /// Load from file and validate
    pub fn load_validated(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config = Self::load_or_default(path)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.renderer.validate()?;
        self.view.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_vulkan_ring_depth() {
        let config = VulkanRendererConfig::default();
        assert_eq!(config.max_frames_in_flight, 3);
        assert_eq!(config.application_name, "Wargame Engine");
    }

    #[test]
    fn test_vulkan_config_rejects_empty_ring() {
        let config = VulkanRendererConfig::new("test").with_max_frames_in_flight(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_directx_config_validated_when_selected() {
        let mut config = RendererConfig::for_backend(BackendKind::DirectX);
        assert!(config.validate().is_ok());
        config.directx.query_pool_size = 0;
        assert!(config.validate().is_err());
        config.backend = BackendKind::ModernGl;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_view_config_validation() {
        let mut view = ViewConfig::default();
        assert!(view.validate().is_ok());
        view.near_plane = 10.0;
        view.far_plane = 5.0;
        assert!(view.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut config = ApplicationConfig::default();
        config.renderer.backend = BackendKind::Vulkan;
        config.view.field_of_view = 45.0;
        config.save_to_file(&path).unwrap();

        let loaded = ApplicationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.renderer.backend, BackendKind::Vulkan);
        assert_eq!(loaded.view.field_of_view, 45.0);
    }

    #[test]
    fn test_ron_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.ron");
        let mut config = ApplicationConfig::default();
        config.textures.loader_threads = 5;
        config.save_to_file(&path).unwrap();

        let loaded = ApplicationConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.textures.loader_threads, 5);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = ApplicationConfig::load_from_file("settings.ini");
        assert!(matches!(result, Err(ConfigError::Io(_)) | Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ApplicationConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.renderer.backend, BackendKind::ModernGl);
    }
}
