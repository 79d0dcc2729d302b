//! OpenGL backends over `glow`
//!
//! One backend type, [`GlBackend`], parameterized by a [`GlProfile`]:
//!
//! - [`Legacy`]: GL 2.1 compatibility contexts, GLSL 1.20, `SAMPLES_PASSED` queries
//! - [`Modern`]: GL 3.3 core contexts, GLSL 3.30, one vertex array object per persistent
//!   buffer plus a main one for streamed geometry, instanced draws and `ANY_SAMPLES_PASSED`
//!   queries (conservative on GL 4.3)
//!
//! The context must be current on the calling thread for the whole lifetime of the backend.
//! Presenting is the window's job: swap buffers after [`Renderer::end_frame`](crate::render::Renderer::end_frame).

mod buffer;
mod query;
mod shader;
mod texture;

use std::any::Any;
use std::marker::PhantomData;
use std::rc::Rc;

use glow::HasContext;

use self::buffer::{GlIndexBuffer, GlVertexBuffer, StreamBuffers};
use self::query::GlQuery;
use self::shader::BuiltinSources;
pub use self::shader::GlShaderManager;
use self::texture::GlTexture;
use crate::foundation::math::ClipSpace;
use crate::render::api::OcclusionQuery;
use crate::render::backend::{DrawCall, DrawIndexes, DrawVertices, RenderBackend};
use crate::render::engine::GraphicsEngine;
use crate::render::handle::Scoped;
use crate::render::shader::{names, ShaderManager};
use crate::render::texture::{CachedTexture, TextureBinding};
use crate::render::vertex::VertexArrays;
use crate::render::{Feature, RenderError, RenderMode, RenderResult, TextureSlot, ViewportRect};

mod sealed {
    pub trait Sealed {}
}

/// GL context flavor a backend targets
pub trait GlProfile: sealed::Sealed + 'static {
    /// Backend name for logs
    const NAME: &'static str;
    /// Built-in vertex program
    const VERTEX_SOURCE: &'static str;
    /// Built-in fragment program
    const FRAGMENT_SOURCE: &'static str;
    /// Core profiles require a bound vertex array object
    const USES_VERTEX_ARRAYS: bool;
    /// Instanced draws and unsigned uniforms
    const INSTANCING: bool;
    /// Alpha textures are stored as `R8` and swizzled; core profiles dropped `ALPHA`
    const SWIZZLED_ALPHA: bool;

    /// Occlusion query target on a driver with `caps`
    fn query_target(caps: &GlCaps) -> u32;
}

/// GL 2.1 with GLSL 1.20
#[derive(Debug, Clone, Copy)]
pub struct Legacy;

/// GL 3.3 core with GLSL 3.30
#[derive(Debug, Clone, Copy)]
pub struct Modern;

impl sealed::Sealed for Legacy {}
impl sealed::Sealed for Modern {}

impl GlProfile for Legacy {
    const NAME: &'static str = "OpenGL (legacy)";
    const VERTEX_SOURCE: &'static str = include_str!("../../../../shaders/gl/legacy.vert");
    const FRAGMENT_SOURCE: &'static str = include_str!("../../../../shaders/gl/legacy.frag");
    const USES_VERTEX_ARRAYS: bool = false;
    const INSTANCING: bool = false;
    const SWIZZLED_ALPHA: bool = false;

    fn query_target(_caps: &GlCaps) -> u32 {
        glow::SAMPLES_PASSED
    }
}

impl GlProfile for Modern {
    const NAME: &'static str = "OpenGL (modern)";
    const VERTEX_SOURCE: &'static str = include_str!("../../../../shaders/gl/modern.vert");
    const FRAGMENT_SOURCE: &'static str = include_str!("../../../../shaders/gl/modern.frag");
    const USES_VERTEX_ARRAYS: bool = true;
    const INSTANCING: bool = true;
    const SWIZZLED_ALPHA: bool = true;

    fn query_target(caps: &GlCaps) -> u32 {
        if caps.version >= (4, 3) {
            glow::ANY_SAMPLES_PASSED_CONSERVATIVE
        } else {
            glow::ANY_SAMPLES_PASSED
        }
    }
}

/// Renderer over a GL 2.1 context
pub type LegacyGlRenderer = GraphicsEngine<GlBackend<Legacy>>;

/// Renderer over a GL 3.3 core context
pub type ModernGlRenderer = GraphicsEngine<GlBackend<Modern>>;

/// Optional driver capabilities
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlCaps {
    /// Context version
    pub version: (u32, u32),
    /// Highest anisotropy when `EXT_texture_filter_anisotropic` is present
    pub max_anisotropy: Option<f32>,
    /// `EXT_texture_compression_s3tc`
    pub s3tc: bool,
    /// Occlusion queries (GL 1.5 or `ARB_occlusion_query`)
    pub occlusion_queries: bool,
    /// Samples of the default framebuffer
    pub samples: i32,
}

impl GlCaps {
    fn detect(gl: &glow::Context) -> Self {
        let version = gl.version();
        let version = (version.major, version.minor);
        let extensions = gl.supported_extensions();
        let has = |name: &str| extensions.contains(name);

        let max_anisotropy = (has("GL_EXT_texture_filter_anisotropic") || has("GL_ARB_texture_filter_anisotropic"))
            .then(|| unsafe { gl.get_parameter_f32(glow::MAX_TEXTURE_MAX_ANISOTROPY_EXT) });
        Self {
            version,
            max_anisotropy,
            s3tc: has("GL_EXT_texture_compression_s3tc"),
            occlusion_queries: version >= (1, 5) || has("GL_ARB_occlusion_query"),
            samples: unsafe { gl.get_parameter_i32(glow::SAMPLES) },
        }
    }
}

/// GL implementation of [`RenderBackend`]
pub struct GlBackend<P: GlProfile> {
    shaders: GlShaderManager,
    stream: StreamBuffers,
    vertex_array: Option<Scoped<glow::VertexArray>>,
    caps: GlCaps,
    size: (u32, u32),
    render_target_active: bool,
    anisotropy: f32,
    query_active: bool,
    gl: Rc<glow::Context>,
    profile: PhantomData<P>,
}

impl<P: GlProfile> GlBackend<P> {
    /// Backend over a context that is current on this thread
    ///
    /// # Errors
    /// `InitializationFailed` when the built-in program does not compile or buffers cannot
    /// be created.
    pub fn new(gl: glow::Context, width: u32, height: u32) -> RenderResult<Self> {
        let gl = Rc::new(gl);
        let caps = GlCaps::detect(&gl);
        log::info!("{} on GL {}.{}: {:?}", P::NAME, caps.version.0, caps.version.1, caps);

        let sources = BuiltinSources { vertex: P::VERTEX_SOURCE, fragment: P::FRAGMENT_SOURCE };
        let shaders = GlShaderManager::new(Rc::clone(&gl), sources, P::INSTANCING)
            .map_err(|e| RenderError::InitializationFailed(format!("built-in program: {e}")))?;
        let stream = StreamBuffers::new(&gl).map_err(|e| RenderError::InitializationFailed(e.to_string()))?;

        let vertex_array = if P::USES_VERTEX_ARRAYS {
            let vao = unsafe { gl.create_vertex_array() }.map_err(RenderError::InitializationFailed)?;
            unsafe { gl.bind_vertex_array(Some(vao)) };
            let owner = Rc::clone(&gl);
            Some(Scoped::new(vao, move |v| unsafe { owner.delete_vertex_array(v) }))
        } else {
            None
        };

        unsafe {
            gl.depth_func(glow::LEQUAL);
            gl.blend_func(glow::SRC_ALPHA, glow::ONE_MINUS_SRC_ALPHA);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
        }

        Ok(Self {
            shaders,
            stream,
            vertex_array,
            caps,
            size: (width, height),
            render_target_active: false,
            anisotropy: 1.0,
            query_active: false,
            gl,
            profile: PhantomData,
        })
    }

    /// Backend over a context whose entry points `loader` resolves
    ///
    /// # Errors
    /// As [`new`](Self::new).
    ///
    /// # Safety
    /// The context `loader` belongs to must be current on this thread and stay current for
    /// the lifetime of the backend.
    pub unsafe fn from_loader(
        loader: impl FnMut(&str) -> *const std::ffi::c_void,
        width: u32,
        height: u32,
    ) -> RenderResult<Self> {
        let gl = glow::Context::from_loader_function(loader);
        Self::new(gl, width, height)
    }

    /// Detected driver capabilities
    #[must_use]
    pub const fn caps(&self) -> &GlCaps {
        &self.caps
    }

    fn bind_main_vertex_array(&self) {
        if let Some(vao) = &self.vertex_array {
            unsafe { self.gl.bind_vertex_array(Some(vao.raw())) };
        }
    }

    fn upload_uniforms(&mut self, call: &DrawCall<'_>) {
        let uniforms = call.uniforms;
        if uniforms.matrices_dirty {
            let mvp = uniforms.projection * uniforms.model_view;
            self.shaders.set_uniform_f32(names::MVP_MATRIX, 16, 1, mvp.as_slice());
            self.shaders.set_uniform_f32(names::MODEL_VIEW_MATRIX, 16, 1, uniforms.model_view.as_slice());
            self.shaders.set_uniform_f32(names::PROJECTION_MATRIX, 16, 1, uniforms.projection.as_slice());
        }
        if uniforms.color_dirty {
            self.shaders.set_uniform_f32(names::COLOR, 4, 1, &uniforms.color.to_array());
        }
        self.shaders.set_uniform_u32(names::DRAW_FLAGS, 1, 1, &[call.flags.bits()]);
    }
}

const fn primitive(mode: RenderMode) -> Option<u32> {
    match mode {
        RenderMode::Triangles => Some(glow::TRIANGLES),
        RenderMode::TriangleStrip => Some(glow::TRIANGLE_STRIP),
        RenderMode::Lines => Some(glow::LINES),
        RenderMode::LineLoop => Some(glow::LINE_LOOP),
        RenderMode::Rectangles => None,
    }
}

fn foreign(what: &str, backend: &str) -> RenderError {
    RenderError::InvalidOperation(format!("{what} was not created by the {backend} renderer"))
}

impl<P: GlProfile> RenderBackend for GlBackend<P> {
    fn name(&self) -> &'static str {
        P::NAME
    }

    fn clip_space(&self) -> ClipSpace {
        ClipSpace::NegativeOneToOne
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::Instancing => P::INSTANCING,
            Feature::Anisotropy => self.caps.max_anisotropy.is_some(),
            Feature::Multisampling => self.caps.samples > 0,
            Feature::CompressedTextures => self.caps.s3tc,
            Feature::GeometryShaders => self.caps.version >= (3, 2),
            Feature::OcclusionQueries => self.caps.occlusion_queries,
        }
    }

    fn shader_manager(&mut self) -> &mut dyn ShaderManager {
        &mut self.shaders
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        self.bind_main_vertex_array();
        Ok(())
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        if self.render_target_active {
            return Err(RenderError::InvalidOperation("frame ended inside render_to_texture".to_string()));
        }
        unsafe { self.gl.flush() };
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.size = (width, height);
        Ok(())
    }

    fn set_viewport(&mut self, rect: ViewportRect) {
        unsafe { self.gl.viewport(rect.x, rect.y, rect.width as i32, rect.height as i32) };
    }

    fn set_depth_test(&mut self, enable: bool) {
        unsafe {
            if enable {
                self.gl.enable(glow::DEPTH_TEST);
            } else {
                self.gl.disable(glow::DEPTH_TEST);
            }
        }
    }

    fn set_blending(&mut self, enable: bool) {
        unsafe {
            if enable {
                self.gl.enable(glow::BLEND);
            } else {
                self.gl.disable(glow::BLEND);
            }
        }
    }

    fn set_polygon_offset(&mut self, offset: Option<(f32, f32)>) {
        unsafe {
            match offset {
                Some((factor, units)) => {
                    self.gl.enable(glow::POLYGON_OFFSET_FILL);
                    self.gl.polygon_offset(factor, units);
                }
                None => self.gl.disable(glow::POLYGON_OFFSET_FILL),
            }
        }
    }

    fn set_multisampling(&mut self, enable: bool) -> bool {
        if self.caps.samples == 0 {
            return false;
        }
        unsafe {
            if enable {
                self.gl.enable(glow::MULTISAMPLE);
            } else {
                self.gl.disable(glow::MULTISAMPLE);
            }
        }
        true
    }

    fn set_write_masks(&mut self, enable: bool) {
        unsafe {
            self.gl.color_mask(enable, enable, enable, enable);
            self.gl.depth_mask(enable);
        }
    }

    fn clear(&mut self, color: bool, depth: bool) -> RenderResult<()> {
        let mut mask = 0;
        if color {
            mask |= glow::COLOR_BUFFER_BIT;
        }
        if depth {
            mask |= glow::DEPTH_BUFFER_BIT;
        }
        if mask != 0 {
            unsafe { self.gl.clear(mask) };
        }
        Ok(())
    }

    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<&TextureBinding>) -> RenderResult<()> {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + slot.index() as u32) };
        match texture {
            Some(binding) => {
                let native = binding.native::<GlTexture>().ok_or_else(|| foreign("texture", P::NAME))?;
                unsafe { self.gl.bind_texture(native.target(), Some(native.raw())) };
            }
            None => unsafe {
                self.gl.bind_texture(glow::TEXTURE_2D, None);
                self.gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
            },
        }
        unsafe { self.gl.active_texture(glow::TEXTURE0) };
        Ok(())
    }

    fn set_anisotropy(&mut self, level: f32) {
        self.anisotropy = level.clamp(1.0, self.max_anisotropy());
    }

    fn max_anisotropy(&self) -> f32 {
        self.caps.max_anisotropy.unwrap_or(1.0)
    }

    fn create_vertex_buffer(&mut self, arrays: &VertexArrays<'_>) -> RenderResult<Rc<dyn Any>> {
        let buffer = GlVertexBuffer::new(&self.gl, &arrays.pack(), P::USES_VERTEX_ARRAYS)?;
        self.bind_main_vertex_array();
        Ok(Rc::new(buffer))
    }

    fn create_index_buffer(&mut self, indexes: &[u32]) -> RenderResult<Rc<dyn Any>> {
        Ok(Rc::new(GlIndexBuffer::new(&self.gl, indexes)?))
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        let mode = primitive(call.mode)
            .ok_or_else(|| RenderError::InvalidOperation("rectangles reached the backend unexpanded".to_string()))?;
        self.upload_uniforms(call);

        match call.vertices {
            DrawVertices::Streamed(arrays) => {
                self.bind_main_vertex_array();
                self.stream.stream_vertices(&self.gl, &arrays.pack());
            }
            DrawVertices::Resident(native) => {
                native.downcast_ref::<GlVertexBuffer>().ok_or_else(|| foreign("vertex buffer", P::NAME))?.bind(&self.gl);
            }
        }

        let instances = call.instance_count as i32;
        let instanced = P::INSTANCING && call.instance_count != 1;
        let gl = &self.gl;
        let (first_index, count) = match call.indexes {
            DrawIndexes::None => {
                unsafe {
                    if instanced {
                        gl.draw_arrays_instanced(mode, 0, call.vertex_count as i32, instances);
                    } else {
                        gl.draw_arrays(mode, 0, call.vertex_count as i32);
                    }
                }
                return Ok(());
            }
            DrawIndexes::Resident { native, begin, count } => {
                native.downcast_ref::<GlIndexBuffer>().ok_or_else(|| foreign("index buffer", P::NAME))?.bind(gl);
                (begin, count)
            }
            DrawIndexes::Streamed(indexes) => {
                self.stream.stream_indexes(gl, indexes);
                (0, indexes.len())
            }
        };
        let offset = (first_index * std::mem::size_of::<u32>()) as i32;
        unsafe {
            if instanced {
                gl.draw_elements_instanced(mode, count as i32, glow::UNSIGNED_INT, offset, instances);
            } else {
                gl.draw_elements(mode, count as i32, glow::UNSIGNED_INT, offset);
            }
        }
        Ok(())
    }

    fn begin_render_to_texture(&mut self, texture: &mut CachedTexture, width: u32, height: u32) -> RenderResult<()> {
        if self.render_target_active {
            return Err(RenderError::InvalidOperation("render_to_texture is already active".to_string()));
        }
        self.bind_render_target(texture, width, height)?;
        self.render_target_active = true;
        Ok(())
    }

    fn end_render_to_texture(&mut self) -> RenderResult<()> {
        if !self.render_target_active {
            return Err(RenderError::InvalidOperation("no render_to_texture is active".to_string()));
        }
        unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, None) };
        self.render_target_active = false;
        Ok(())
    }

    fn create_occlusion_query(&mut self) -> RenderResult<Box<dyn OcclusionQuery>> {
        Ok(Box::new(GlQuery::new(&self.gl, self.caps.occlusion_queries)?))
    }

    fn begin_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        let query = query.as_any_mut().downcast_mut::<GlQuery>().ok_or_else(|| foreign("occlusion query", P::NAME))?;
        if self.query_active {
            return Err(RenderError::InvalidOperation("occlusion queries cannot nest".to_string()));
        }
        query.begin(P::query_target(&self.caps));
        self.query_active = true;
        Ok(())
    }

    fn end_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        let query = query.as_any_mut().downcast_mut::<GlQuery>().ok_or_else(|| foreign("occlusion query", P::NAME))?;
        if !self.query_active {
            return Err(RenderError::InvalidOperation("occlusion query was not begun".to_string()));
        }
        query.end(P::query_target(&self.caps));
        self.query_active = false;
        Ok(())
    }
}
