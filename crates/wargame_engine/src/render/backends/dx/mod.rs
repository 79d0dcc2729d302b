//! DirectX backend
//!
//! Direct3D 12 through `wgpu` restricted to [`wgpu::Backends::DX12`]. The renderer contract is
//! immediate, `wgpu` passes are not: draws are recorded into per-target command lists and
//! encoded into render passes when the frame ends, or when a render-to-texture outside a frame
//! closes. Uniform and streamed vertex data collect in CPU arenas that are written to the GPU
//! right before the lists are encoded.
//!
//! Screen passes convert bottom-left viewports to `wgpu`'s top-left origin. Texture targets
//! keep the bottom-left origin instead and flip the projection, so rendered textures have the
//! row order of uploaded ones.

mod arena;
mod backend;
mod buffers;
mod commands;
mod context;
mod pipeline;
mod query;
mod shader;
mod texture;

use crate::render::engine::GraphicsEngine;
use crate::render::RenderError;

pub use backend::DxBackend;
pub use shader::DxShaderManager;

/// Renderer over a Direct3D 12 device
pub type DirectXRenderer = GraphicsEngine<DxBackend>;

const BACKEND: &str = "DirectX";

fn foreign(what: &str) -> RenderError {
    RenderError::InvalidOperation(format!("{what} was not created by the {BACKEND} renderer"))
}
