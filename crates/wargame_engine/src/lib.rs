//! # Wargame Engine
//!
//! Rendering engine for tabletop wargames: pieces on a height-mapped table, drawn every frame
//! through a swappable graphics backend.
//!
//! ## Features
//!
//! - **One drawing contract**: scene code draws through `&mut dyn Renderer`
//! - **Five backends**: legacy GL, modern GL, Vulkan, DirectX (through wgpu) and a headless
//!   recorder for tests and tools
//! - **Asynchronous textures**: decoded on a thread pool, uploaded on the render thread
//! - **Viewports**: offscreen targets, shadow maps and per-object occlusion queries
//! - **Drawing lists**: record once, replay on any backend
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wargame_engine::prelude::*;
//!
//! struct NoModels;
//!
//! impl ModelProvider for NoModels {
//!     fn load(&self, path: &str) -> Result<ModelData, AssetError> {
//!         Err(AssetError::NotFound(path.to_string()))
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut renderer = HeadlessRenderer::headless(800, 600)?;
//!     let mut view = GameView::new(Box::new(NoModels), 800, 600, &ViewConfig::default());
//!     view.model_mut().add_object(GameObject::new("tank.obj", Vec3::zeros(), 45.0));
//!     view.draw_frame(&mut renderer)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Configuration
pub mod config;
pub mod core;

// Shared utilities
pub mod assets;
pub mod foundation;

// Rendering and scene composition
pub mod render;
pub mod scene;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        assets::{AssetError, BoundingProvider, ImageFileProvider, ImageProvider, ModelData, ModelProvider},
        config::Config,
        core::{ApplicationConfig, BackendKind, RendererConfig, ViewConfig},
        foundation::math::{Mat4, Vec2, Vec3},
        render::{
            Camera, CachedTexture, Color, FixedCamera, OrbitCamera, RenderError, RenderMode, RenderResult, Renderer,
            TextureFlags, TextureSlot, Viewport, ViewportKey, ViewportRect,
        },
        render::{DirectXRenderer, HeadlessRenderer, LegacyGlRenderer, ModernGlRenderer, VulkanRenderer},
        scene::{GameModel, GameObject, GameView, Landscape, ParticleRenderer, UiLayer},
    };
}
