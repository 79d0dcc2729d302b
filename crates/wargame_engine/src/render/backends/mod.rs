//! Backend implementations for the render module
//!
//! Every backend implements [`RenderBackend`](crate::render::RenderBackend) and is used through
//! [`GraphicsEngine`](crate::render::GraphicsEngine):
//!
//! - `headless`: records commands and evaluates queries on the CPU (tests, tools)
//! - `gl`: GL 2.1 and GL 3.3 core over `glow`
//! - `vulkan`: explicit Vulkan over `ash`
//! - `dx`: Direct3D 12 through `wgpu`

/// Command-recording backend without a GPU
pub mod headless;

/// OpenGL backends
pub mod gl;

/// Vulkan rendering backend implementation
pub mod vulkan;

/// DirectX backend
pub mod dx;
