//! The renderer contract
//!
//! Scene code draws exclusively through `&mut dyn Renderer`; every backend shows the same
//! observable behaviour behind it. Recoverable conditions (a missing optional extension, a
//! texture that is still loading) are logged and absorbed, caller errors such as unbalanced
//! matrix pops or out-of-range index draws come back as [`RenderError`](crate::render::RenderError).

use std::any::Any;

use crate::assets::TextureImage;
use crate::foundation::math::{ClipSpace, Mat4, Vec2, Vec3};
use crate::render::drawing_list::DrawingList;
use crate::render::mesh::Material;
use crate::render::shader::ShaderManager;
use crate::render::texture::{CachedTexture, TextureBinding, TextureId, TextureManager};
use crate::render::vertex::{VertexArrays, VertexBuffer};
use crate::render::{
    CachedTextureType, Color, Feature, Light, RenderMode, RenderResult, TeamColor, TextureFlags, TextureSlot,
    ViewportRect,
};

/// Drawing callback handed to scoped operations (render-to-texture, queries, 2D overlays, lists)
pub type DrawFn<'a> = dyn FnMut(&mut dyn Renderer) -> RenderResult<()> + 'a;

/// Per-object visibility test
///
/// Created by [`Renderer::create_occlusion_query`]; the backend that created it downcasts
/// it through [`as_any_mut`](Self::as_any_mut) when the query runs.
pub trait OcclusionQuery: Any {
    /// Whether anything drawn during the last run passed the depth test
    ///
    /// A query that never ran, or whose result is not available yet, reports visible.
    fn is_visible(&self) -> bool;

    /// Backend access to the concrete query
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn OcclusionQuery {
    /// Run `handler` while recording visibility
    ///
    /// With `render_to_screen == false` color and depth writes are disabled during `handler`.
    ///
    /// # Errors
    /// Errors of `handler` or of the backend query.
    pub fn query(&mut self, renderer: &mut dyn Renderer, render_to_screen: bool, handler: &mut DrawFn<'_>) -> RenderResult<()> {
        renderer.run_occlusion_query(self, render_to_screen, handler)
    }
}

/// The drawing contract implemented by every backend
pub trait Renderer {
    // === Identity ===

    /// Backend name for logs and diagnostics
    fn name(&self) -> &str;

    /// Whether an optional feature may be used
    fn supports_feature(&self, feature: Feature) -> bool;

    /// Program and uniform management
    fn shader_manager(&mut self) -> &mut dyn ShaderManager;

    /// Path-addressed texture cache
    fn texture_manager(&mut self) -> &mut TextureManager;

    /// Clip-space convention of the backend's projections
    fn clip_space(&self) -> ClipSpace;

    // === Frame ===

    /// Start a frame: upload finished texture loads and acquire the backbuffer
    ///
    /// # Errors
    /// Unrecoverable device errors.
    fn begin_frame(&mut self) -> RenderResult<()>;

    /// Submit and present the frame
    ///
    /// # Errors
    /// Unrecoverable device errors.
    fn end_frame(&mut self) -> RenderResult<()>;

    /// React to a new window size
    ///
    /// # Errors
    /// Failure to rebuild size-dependent resources.
    fn resize(&mut self, width: u32, height: u32) -> RenderResult<()>;

    // === Immediate geometry ===

    /// Draw caller arrays right away; empty normals or tex coords disable lighting or texturing
    ///
    /// # Errors
    /// `InvalidOperation` for empty vertices or mismatched array lengths.
    fn render_arrays(&mut self, mode: RenderMode, vertices: &[Vec3], normals: &[Vec3], tex_coords: &[Vec2]) -> RenderResult<()>;

    /// Draw integer pixel-space vertices (2D overlays)
    ///
    /// # Errors
    /// As [`render_arrays`](Self::render_arrays).
    fn render_arrays_2d(&mut self, mode: RenderMode, vertices: &[[i32; 2]], tex_coords: &[Vec2]) -> RenderResult<()>;

    // === Vertex buffers ===

    /// Upload a persistent copy of `arrays`
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure.
    fn create_vertex_buffer(&mut self, arrays: &VertexArrays<'_>) -> RenderResult<VertexBuffer<'static>>;

    /// Buffer referencing `arrays` without copying; streamed when drawn
    ///
    /// # Errors
    /// Backend failures only.
    fn create_temp_vertex_buffer<'a>(&mut self, arrays: VertexArrays<'a>) -> RenderResult<VertexBuffer<'a>>;

    /// Attach triangle indexes to `buffer`
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure.
    fn set_index_buffer(&mut self, buffer: &mut VertexBuffer<'_>, indexes: &[u32]) -> RenderResult<()>;

    /// Draw `count` indexes starting at `begin` as triangles
    ///
    /// # Errors
    /// `IndexOutOfRange` when the range exceeds the index buffer.
    fn draw_indexes(&mut self, buffer: &VertexBuffer<'_>, begin: usize, count: usize) -> RenderResult<()>;

    /// Draw the first `count` vertices with `mode`
    ///
    /// # Errors
    /// `InvalidOperation` when `count` exceeds the vertex count.
    fn draw_arrays(&mut self, buffer: &VertexBuffer<'_>, mode: RenderMode, count: usize) -> RenderResult<()>;

    /// Draw the first `count` vertices as triangles
    ///
    /// # Errors
    /// As [`draw_arrays`](Self::draw_arrays).
    fn draw_all(&mut self, buffer: &VertexBuffer<'_>, count: usize) -> RenderResult<()> {
        self.draw_arrays(buffer, RenderMode::Triangles, count)
    }

    /// Draw `size` vertices `instance_count` times
    ///
    /// # Errors
    /// `UnsupportedFeature(Instancing)` on backends without instancing.
    fn draw_instanced(&mut self, buffer: &VertexBuffer<'_>, size: usize, instance_count: usize) -> RenderResult<()>;

    // === Drawing lists ===

    /// Record the calls `record` makes into a replayable list
    ///
    /// # Errors
    /// Errors of `record`; `InvalidOperation` when already recording.
    fn create_drawing_list(&mut self, record: &mut DrawFn<'_>) -> RenderResult<DrawingList>;

    // === Matrices ===

    /// Push a copy of the model-view matrix
    fn push_matrix(&mut self);

    /// Restore the model-view matrix of the matching push
    ///
    /// # Errors
    /// `InvalidOperation` without a matching push.
    fn pop_matrix(&mut self) -> RenderResult<()>;

    /// Translate the current frame
    fn translate(&mut self, dx: f32, dy: f32, dz: f32);

    /// Rotate the current frame by `angle` degrees around `(x, y, z)`
    fn rotate(&mut self, angle: f32, x: f32, y: f32, z: f32);

    /// Uniformly scale the current frame
    fn scale(&mut self, factor: f32);

    /// Set the model-view matrix to a camera at `position` looking at `target`
    fn look_at(&mut self, position: Vec3, target: Vec3, up: Vec3);

    /// Reset the model-view matrix to identity
    fn reset_view_matrix(&mut self);

    /// Current model-view matrix
    fn view_matrix(&self) -> Mat4;

    /// Current projection matrix
    fn projection_matrix(&self) -> Mat4;

    /// Replace the projection matrix; applied immediately, never recorded into drawing lists
    fn set_projection_matrix(&mut self, projection: Mat4);

    /// Depth of the model-view stack (1 when balanced)
    fn matrix_depth(&self) -> usize;

    // === Color, material and lights ===

    /// Color multiplied into subsequent draws
    fn set_color(&mut self, color: Color);

    /// Material colors of subsequent draws
    fn set_material(&mut self, material: &Material);

    /// Number of active lights
    fn set_number_of_lights(&mut self, count: usize);

    /// Parameters of light `index`
    fn set_up_light(&mut self, index: usize, light: &Light);

    // === Textures ===

    /// Bind the texture at `path` to the diffuse slot
    ///
    /// Without `force_load_now` a texture that is not resident yet is loaded in the background
    /// and the placeholder is bound until it arrives.
    ///
    /// # Errors
    /// Backend failures only; missing files fall back to the placeholder.
    fn set_texture(&mut self, path: &str, force_load_now: bool, flags: TextureFlags) -> RenderResult<()>;

    /// Bind the texture at `path` to `slot`
    ///
    /// # Errors
    /// As [`set_texture`](Self::set_texture).
    fn set_texture_in_slot(&mut self, path: &str, slot: TextureSlot, flags: TextureFlags) -> RenderResult<()>;

    /// Bind a team-colored variant of `path` to the diffuse slot
    ///
    /// # Errors
    /// As [`set_texture`](Self::set_texture).
    fn set_team_texture(&mut self, path: &str, team_colors: &[TeamColor], flags: TextureFlags) -> RenderResult<()>;

    /// Bind a cube map built from six face images to `slot`
    ///
    /// # Errors
    /// As [`set_texture`](Self::set_texture).
    fn set_cubemap_texture(&mut self, faces: &[String; 6], slot: TextureSlot) -> RenderResult<()>;

    /// Bind a texture reference to `slot`
    ///
    /// # Errors
    /// `InvalidOperation` for textures of another backend.
    fn set_texture_binding(&mut self, binding: &TextureBinding, slot: TextureSlot) -> RenderResult<()>;

    /// Bind `texture` to `slot`; a texture without contents binds the placeholder
    ///
    /// # Errors
    /// As [`set_texture_binding`](Self::set_texture_binding).
    fn set_texture_handle(&mut self, texture: &CachedTexture, slot: TextureSlot) -> RenderResult<()> {
        self.set_texture_binding(&texture.binding(), slot)
    }

    /// Unbind `slot` only
    fn unbind_texture(&mut self, slot: TextureSlot);

    /// Texture bound to `slot`
    fn bound_texture(&self, slot: TextureSlot) -> Option<TextureId>;

    /// Texture with storage, optionally initialized with `data`
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure.
    fn create_texture(&mut self, data: Option<&[u8]>, width: u32, height: u32, kind: CachedTextureType) -> RenderResult<CachedTexture>;

    /// Texture without storage, to be filled by an upload
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure.
    fn create_empty_texture(&mut self, cubemap: bool) -> RenderResult<CachedTexture>;

    /// Upload an uncompressed image into `texture`
    ///
    /// # Errors
    /// `ResourceCreationFailed` on allocation failure.
    fn upload_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()>;

    /// Upload a block-compressed image into `texture`
    ///
    /// # Errors
    /// As [`upload_texture`](Self::upload_texture).
    fn upload_compressed_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()>;

    /// Upload six cube faces into `texture`
    ///
    /// # Errors
    /// As [`upload_texture`](Self::upload_texture).
    fn upload_cubemap(&mut self, texture: &mut CachedTexture, sides: &[TextureImage; 6], flags: TextureFlags) -> RenderResult<()>;

    /// Anisotropic filtering level for textures uploaded from now on (clamped to the maximum)
    fn set_texture_anisotropy(&mut self, value: f32);

    /// Highest supported anisotropy, 1.0 without the extension
    fn max_anisotropy(&self) -> f32;

    /// Redirect the draws of `func` into `texture`
    ///
    /// Target, viewport, matrices and texture bindings are restored afterwards, also when
    /// `func` fails.
    ///
    /// # Errors
    /// Errors of `func` or of the target switch.
    fn render_to_texture(&mut self, texture: &mut CachedTexture, width: u32, height: u32, func: &mut DrawFn<'_>) -> RenderResult<()>;

    // === Occlusion ===

    /// New occlusion query
    ///
    /// # Errors
    /// Backend failures only.
    fn create_occlusion_query(&mut self) -> RenderResult<Box<dyn OcclusionQuery>>;

    /// Run `handler` inside `query`
    ///
    /// # Errors
    /// Errors of `handler`; `InvalidOperation` for queries of another backend.
    fn run_occlusion_query(&mut self, query: &mut dyn OcclusionQuery, render_to_screen: bool, handler: &mut DrawFn<'_>) -> RenderResult<()>;

    // === View state ===

    /// Set the pixel viewport and a perspective projection (`field_of_view` in degrees)
    fn set_up_viewport(&mut self, rect: ViewportRect, field_of_view: f32, near: f32, far: f32);

    /// Current pixel viewport
    fn viewport_rect(&self) -> ViewportRect;

    /// Toggle depth testing
    fn enable_depth_test(&mut self, enable: bool);

    /// Toggle alpha blending
    fn enable_blending(&mut self, enable: bool);

    /// Toggle depth bias for subsequent draws
    fn enable_polygon_offset(&mut self, enable: bool, factor: f32, units: f32);

    /// Active depth bias as `(factor, units)`, `None` when disabled
    fn polygon_offset(&self) -> Option<(f32, f32)>;

    /// Toggle multisampling; a logged no-op where unsupported
    fn enable_multisampling(&mut self, enable: bool);

    /// Clear the color and/or depth buffer of the current target
    ///
    /// # Errors
    /// Backend failures only.
    fn clear_buffers(&mut self, color: bool, depth: bool) -> RenderResult<()>;

    /// Run `handler` with a pixel-space orthographic projection, y growing downward
    ///
    /// # Errors
    /// Errors of `handler`.
    fn draw_in_2d(&mut self, handler: &mut DrawFn<'_>) -> RenderResult<()>;
}

/// Pop the model-view stack back down to `depth`
///
/// # Errors
/// `InvalidOperation` when the stack is already below `depth`; pops that fail are passed on.
pub(crate) fn unwind_matrices(renderer: &mut dyn Renderer, depth: usize) -> RenderResult<()> {
    while renderer.matrix_depth() > depth {
        renderer.pop_matrix()?;
    }
    if renderer.matrix_depth() < depth {
        return Err(crate::render::RenderError::InvalidOperation(format!(
            "model-view stack at depth {}, expected {depth}",
            renderer.matrix_depth()
        )));
    }
    Ok(())
}
