//! Backend abstraction trait for the rendering system
//!
//! [`GraphicsEngine`](crate::render::GraphicsEngine) implements the public [`Renderer`]
//! contract once; what differs between graphics APIs is behind [`RenderBackend`]. Backends
//! receive fully resolved draw calls: matrices, color and per-draw flags are attached,
//! quads are already expanded and texture slots are bound through `bind_texture`.
//!
//! [`Renderer`]: crate::render::Renderer

use std::any::Any;
use std::rc::Rc;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{ClipSpace, Mat4};
use crate::render::api::OcclusionQuery;
use crate::render::shader::ShaderManager;
use crate::render::texture::{CachedTexture, TextureBinding, TextureHelper};
use crate::render::vertex::VertexArrays;
use crate::render::{Color, Feature, RenderMode, RenderResult, TextureSlot, ViewportRect};

bitflags! {
    /// Per-draw shader switches, uploaded as the `drawFlags` uniform
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DrawFlags: u32 {
        /// Normals are present; evaluate lighting
        const LIGHTING = 1;
        /// Texture coordinates are present; sample the diffuse slot
        const TEXTURED = 1 << 1;
    }
}

/// Vertices consumed by a draw
#[derive(Clone, Copy)]
pub enum DrawVertices<'a> {
    /// Caller arrays to stream for this draw only
    Streamed(VertexArrays<'a>),
    /// Backend-owned buffer created by `create_vertex_buffer`
    Resident(&'a Rc<dyn Any>),
}

/// Index data of a draw
#[derive(Clone, Copy)]
pub enum DrawIndexes<'a> {
    /// Draw vertices in order
    None,
    /// Range of a backend-owned index buffer
    Resident {
        /// Backend native from `create_index_buffer`
        native: &'a Rc<dyn Any>,
        /// First index
        begin: usize,
        /// Number of indexes
        count: usize,
    },
    /// Indexes to stream for this draw only
    Streamed(&'a [u32]),
}

/// Matrix and color state attached to a draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawUniforms {
    /// Model-view matrix
    pub model_view: Mat4,
    /// Projection matrix
    pub projection: Mat4,
    /// Current color
    pub color: Color,
    /// Matrices changed (or the program switched) since the last draw
    pub matrices_dirty: bool,
    /// Color changed (or the program switched) since the last draw
    pub color_dirty: bool,
}

/// Per-draw block of the explicit APIs: Vulkan push constants, the DirectX draw uniform
///
/// Laid out as `{ mat4 modelView; vec4 color; uint flags; }` padded to 96 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawConstants {
    /// Model-view matrix, column-major
    pub model_view: [f32; 16],
    /// Current color
    pub color: [f32; 4],
    /// [`DrawFlags`] bits
    pub flags: u32,
    _padding: [u32; 3],
}

impl DrawConstants {
    /// Block for a draw with `uniforms` and `flags`
    #[must_use]
    pub fn new(uniforms: &DrawUniforms, flags: DrawFlags) -> Self {
        let mut model_view = [0.0; 16];
        model_view.copy_from_slice(uniforms.model_view.as_slice());
        Self { model_view, color: uniforms.color.to_array(), flags: flags.bits(), _padding: [0; 3] }
    }
}

/// Indexes drawing `indexes` as a line strip that returns to its first vertex
///
/// Explicit APIs have no line loop primitive.
#[must_use]
pub fn close_loop(indexes: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut closed: Vec<u32> = indexes.into_iter().collect();
    if let Some(&first) = closed.first() {
        closed.push(first);
    }
    closed
}

/// A fully resolved draw
#[derive(Clone, Copy)]
pub struct DrawCall<'a> {
    /// Vertex source
    pub vertices: DrawVertices<'a>,
    /// Index source
    pub indexes: DrawIndexes<'a>,
    /// Primitive mode; never `Rectangles`
    pub mode: RenderMode,
    /// Vertices to draw when not indexed
    pub vertex_count: usize,
    /// Instances to draw (1 for plain draws)
    pub instance_count: usize,
    /// Lighting and texturing switches
    pub flags: DrawFlags,
    /// Matrices and color
    pub uniforms: &'a DrawUniforms,
}

impl DrawCall<'_> {
    /// Number of vertices the draw assembles
    #[must_use]
    pub const fn element_count(&self) -> usize {
        match self.indexes {
            DrawIndexes::None => self.vertex_count,
            DrawIndexes::Resident { count, .. } => count,
            DrawIndexes::Streamed(indexes) => indexes.len(),
        }
    }
}

/// Graphics API seam implemented by every backend
pub trait RenderBackend: TextureHelper + 'static {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Clip-space convention projections must target
    fn clip_space(&self) -> ClipSpace;

    /// Whether an optional feature is available
    fn supports_feature(&self, feature: Feature) -> bool;

    /// Program and uniform management
    fn shader_manager(&mut self) -> &mut dyn ShaderManager;

    /// Size of the default framebuffer
    fn surface_size(&self) -> (u32, u32);

    /// Acquire the next backbuffer and start recording
    ///
    /// # Errors
    /// Unrecoverable device errors.
    fn begin_frame(&mut self) -> RenderResult<()>;

    /// Submit and present
    ///
    /// # Errors
    /// Unrecoverable device errors.
    fn end_frame(&mut self) -> RenderResult<()>;

    /// Rebuild size-dependent resources
    ///
    /// # Errors
    /// Failure to recreate the swapchain or surface.
    fn resize(&mut self, width: u32, height: u32) -> RenderResult<()>;

    /// Set the pixel viewport of the current target
    fn set_viewport(&mut self, rect: ViewportRect);

    /// Toggle depth testing
    fn set_depth_test(&mut self, enable: bool);

    /// Toggle alpha blending
    fn set_blending(&mut self, enable: bool);

    /// Set or clear the depth bias `(factor, units)`
    fn set_polygon_offset(&mut self, offset: Option<(f32, f32)>);

    /// Toggle multisampling; returns `false` when unsupported
    fn set_multisampling(&mut self, enable: bool) -> bool;

    /// Enable or disable color and depth writes
    fn set_write_masks(&mut self, enable: bool);

    /// Clear buffers of the current target
    ///
    /// # Errors
    /// Backend failures only.
    fn clear(&mut self, color: bool, depth: bool) -> RenderResult<()>;

    /// Bind (or unbind with `None`) a texture to `slot`
    ///
    /// # Errors
    /// `InvalidOperation` for textures of another backend.
    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<&TextureBinding>) -> RenderResult<()>;

    /// Anisotropy for textures uploaded from now on
    fn set_anisotropy(&mut self, level: f32);

    /// Highest supported anisotropy
    fn max_anisotropy(&self) -> f32;

    /// Upload a persistent copy of `arrays`
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure.
    fn create_vertex_buffer(&mut self, arrays: &VertexArrays<'_>) -> RenderResult<Rc<dyn Any>>;

    /// Upload a persistent index buffer
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure.
    fn create_index_buffer(&mut self, indexes: &[u32]) -> RenderResult<Rc<dyn Any>>;

    /// Execute a draw
    ///
    /// # Errors
    /// `InvalidOperation` for foreign buffers, backend failures.
    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()>;

    /// Redirect subsequent draws into `texture`
    ///
    /// # Errors
    /// `InvalidOperation` when a redirection is active already or the texture is foreign.
    fn begin_render_to_texture(&mut self, texture: &mut CachedTexture, width: u32, height: u32) -> RenderResult<()>;

    /// Return to the previous target
    ///
    /// # Errors
    /// Backend failures finishing the offscreen pass.
    fn end_render_to_texture(&mut self) -> RenderResult<()>;

    /// New occlusion query
    ///
    /// # Errors
    /// Backend failures only.
    fn create_occlusion_query(&mut self) -> RenderResult<Box<dyn OcclusionQuery>>;

    /// Start counting samples for `query`
    ///
    /// # Errors
    /// `InvalidOperation` for foreign or nested queries.
    fn begin_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()>;

    /// Stop counting samples for `query`
    ///
    /// # Errors
    /// `InvalidOperation` for a query that was not begun.
    fn end_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_constants_layout() {
        assert_eq!(std::mem::size_of::<DrawConstants>(), 96);
        assert_eq!(std::mem::offset_of!(DrawConstants, color), 64);
        assert_eq!(std::mem::offset_of!(DrawConstants, flags), 80);
    }

    #[test]
    fn test_draw_constants_copy_uniforms() {
        let uniforms = DrawUniforms {
            model_view: Mat4::new_translation(&nalgebra::Vector3::new(1.0, 2.0, 3.0)),
            projection: Mat4::identity(),
            color: Color::rgba(0.5, 0.25, 1.0, 1.0),
            matrices_dirty: true,
            color_dirty: true,
        };
        let constants = DrawConstants::new(&uniforms, DrawFlags::LIGHTING | DrawFlags::TEXTURED);
        assert_eq!(&constants.model_view[12..15], &[1.0, 2.0, 3.0]);
        assert_eq!(constants.color, [0.5, 0.25, 1.0, 1.0]);
        assert_eq!(constants.flags, 3);
    }

    #[test]
    fn test_close_loop_repeats_first_index() {
        assert_eq!(close_loop([4, 5, 6]), vec![4, 5, 6, 4]);
        assert_eq!(close_loop(0..3), vec![0, 1, 2, 0]);
        assert!(close_loop(std::iter::empty()).is_empty());
    }
}
