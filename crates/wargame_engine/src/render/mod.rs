//! # Rendering System
//!
//! One drawing contract ([`Renderer`]) over graphics backends with very different
//! resource models: legacy GL, modern GL, Vulkan, DirectX and a headless recorder.
//!
//! ## Architecture
//!
//! - **Renderer**: object-safe contract the scene code draws through (`&mut dyn Renderer`)
//! - **GraphicsEngine**: the shared frontend. Owns the matrix stack, texture manager, texture
//!   slots and drawing-list recorder, and implements [`Renderer`] once for every backend
//! - **RenderBackend**: the seam each graphics API implements (state, buffers, textures, queries)
//! - **Resource types**: cached textures, vertex buffers, drawing lists, occlusion queries
//!
//! Viewports, cameras and materials sit on top of the contract and never see a backend.

pub mod api;
pub mod backend;
pub mod backends;
pub mod camera;
pub mod drawing_list;
pub mod engine;
pub mod handle;
pub mod matrix;
pub mod mesh;
pub mod shader;
pub mod texture;
pub mod types;
pub mod vertex;
pub mod viewport;

#[cfg(feature = "glfw")]
pub mod window;

pub use api::{DrawFn, OcclusionQuery, Renderer};
pub use backend::RenderBackend;
pub use backends::headless::{HeadlessBackend, HeadlessRenderer};
pub use backends::gl::{LegacyGlRenderer, ModernGlRenderer};
pub use backends::vulkan::VulkanRenderer;
pub use backends::dx::DirectXRenderer;
pub use camera::{Camera, FixedCamera, OrbitCamera};
pub use drawing_list::DrawingList;
pub use engine::GraphicsEngine;
pub use handle::Scoped;
pub use matrix::MatrixManager;
pub use mesh::{Material, MaterialManager, MeshPart};
pub use shader::{ShaderManager, ShaderProgram};
pub use texture::{CachedTexture, TextureBinding, TextureHelper, TextureId, TextureManager};
pub use types::{
    CachedTextureType, Color, Feature, Light, RenderMode, TeamColor, TextureFlags, TextureSlot, ViewportRect,
};
pub use vertex::{AttributeStream, VertexArrays, VertexBuffer};
pub use viewport::{Viewport, ViewportKey};

use thiserror::Error;

/// Rendering system errors
///
/// Backend error codes never cross the [`Renderer`] contract; each backend converts its own
/// errors (Vulkan results, GL error strings, wgpu errors) into one of these variants.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Renderer initialization failed during setup
    ///
    /// Occurs when the rendering system cannot be properly initialized, typically
    /// due to missing graphics drivers, incompatible hardware, or configuration issues.
    #[error("Renderer initialization failed: {0}")]
    InitializationFailed(String),

    /// A rendering operation failed during execution
    #[error("Rendering failed: {0}")]
    RenderingFailed(String),

    /// Resource creation or management failed
    ///
    /// Occurs when GPU resources (buffers, textures, shaders) cannot be created
    /// or managed properly, typically due to memory constraints or invalid data.
    #[error("Resource creation failed: {0}")]
    ResourceCreationFailed(String),

    /// Backend-specific error occurred
    #[error("Backend error: {0}")]
    BackendError(String),

    /// The call is not valid in the renderer's current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// An indexed draw addressed indexes past the end of the index buffer
    #[error("Index range {begin}..{} exceeds index buffer of length {len}", begin + count)]
    IndexOutOfRange {
        /// First index of the requested range
        begin: usize,
        /// Number of indexes requested
        count: usize,
        /// Number of indexes in the buffer
        len: usize,
    },

    /// An optional feature was used without checking `supports_feature` first
    #[error("Feature not supported by this renderer: {0:?}")]
    UnsupportedFeature(Feature),

    /// A shader stage failed to compile or link
    #[error("Shader compilation failed ({stage}): {log}")]
    ShaderCompilation {
        /// Stage that failed (`vertex`, `fragment`, `geometry`, `link`)
        stage: String,
        /// Compiler output
        log: String,
    },
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;
