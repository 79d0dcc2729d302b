//! Headless backend
//!
//! Records every backend call into a command log instead of talking to a GPU. Occlusion
//! queries are answered on the CPU: by default a query sees whatever vertex of its draws lands
//! inside the clip volume; a custom predicate over the eye-space vertices of each draw can
//! replace that test. Used by the test suite and by tools that need a renderer without a window.

use std::any::Any;
use std::collections::HashMap;
use std::rc::Rc;

use crate::assets::TextureImage;
use crate::foundation::math::{ClipSpace, Mat4, Vec3, Vec4};
use crate::render::api::OcclusionQuery;
use crate::render::backend::{DrawCall, DrawFlags, DrawIndexes, DrawVertices, RenderBackend};
use crate::render::engine::GraphicsEngine;
use crate::render::shader::{names, ProgramChangeCallback, ProgramStack, ShaderManager, ShaderProgram};
use crate::render::texture::{CachedTexture, TextureBinding, TextureHelper, TextureId};
use crate::render::vertex::{PackedVertices, VertexArrays};
use crate::render::{
    CachedTextureType, Color, Feature, RenderError, RenderMode, RenderResult, TextureFlags, TextureSlot, ViewportRect,
};

const BACKEND: &str = "headless";

/// Decides whether a draw inside an occlusion query is visible, given its eye-space vertices
pub type VisibilityPredicate = Box<dyn Fn(&[Vec3]) -> bool>;

/// Renderer without a GPU
pub type HeadlessRenderer = GraphicsEngine<HeadlessBackend>;

/// A draw as the backend received it
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Primitive mode after quad expansion
    pub mode: RenderMode,
    /// Assembled vertices
    pub element_count: usize,
    /// First index of a resident index range
    pub first_index: Option<usize>,
    /// Instances
    pub instance_count: usize,
    /// Lighting and texturing switches
    pub flags: DrawFlags,
    /// Model-view matrix
    pub model_view: Mat4,
    /// Projection matrix
    pub projection: Mat4,
    /// Color
    pub color: Color,
    /// Drawn from a persistent buffer
    pub resident: bool,
    /// Matrices were uploaded for this draw
    pub matrices_uploaded: bool,
    /// Color was uploaded for this draw
    pub color_uploaded: bool,
    /// Material diffuse color in effect, `None` before any material was set
    pub diffuse: Option<Vec<f32>>,
    /// Positions of the assembled vertices in clip space
    pub clip_positions: Vec<Vec4>,
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq)]
pub enum HeadlessCommand {
    /// Frame started
    BeginFrame,
    /// Frame presented
    EndFrame,
    /// Surface resized
    Resize(u32, u32),
    /// Viewport set
    Viewport(ViewportRect),
    /// Depth test toggled
    DepthTest(bool),
    /// Blending toggled
    Blending(bool),
    /// Depth bias set or cleared
    PolygonOffset(Option<(f32, f32)>),
    /// Color and depth writes toggled
    WriteMasks(bool),
    /// Buffers cleared
    Clear {
        /// Color buffer cleared
        color: bool,
        /// Depth buffer cleared
        depth: bool,
    },
    /// Texture bound or unbound
    BindTexture {
        /// Slot
        slot: TextureSlot,
        /// Bound texture, `None` when unbound
        texture: Option<TextureId>,
    },
    /// Draw executed
    Draw(Box<DrawRecord>),
    /// Draws redirected into a texture
    BeginRenderTarget {
        /// Target texture
        texture: TextureId,
        /// Target width
        width: u32,
        /// Target height
        height: u32,
    },
    /// Redirection ended
    EndRenderTarget,
    /// Occlusion query started
    BeginQuery,
    /// Occlusion query finished with its visibility
    EndQuery(bool),
}

struct HeadlessTexture;

struct HeadlessVertexBuffer(PackedVertices);

struct HeadlessIndexBuffer(Vec<u32>);

/// CPU-evaluated occlusion query
#[derive(Debug, Default)]
pub struct HeadlessQuery {
    visible: Option<bool>,
}

impl OcclusionQuery for HeadlessQuery {
    fn is_visible(&self) -> bool {
        self.visible.unwrap_or(true)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Uniform value stored by [`HeadlessShaderManager`]
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    /// Float components
    F32(Vec<f32>),
    /// Signed integer components
    I32(Vec<i32>),
    /// Unsigned integer components
    U32(Vec<u32>),
}

/// Shader manager that stores programs and uniforms in memory
pub struct HeadlessShaderManager {
    next_program: u32,
    programs: ProgramStack,
    uniforms: HashMap<String, UniformValue>,
    attributes: HashMap<String, Vec<f32>>,
}

impl HeadlessShaderManager {
    fn new() -> Self {
        Self { next_program: 1, programs: ProgramStack::new(ShaderProgram(0)), uniforms: HashMap::new(), attributes: HashMap::new() }
    }

    /// Last value set for uniform `name`
    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    /// Float components of uniform `name`
    #[must_use]
    pub fn uniform_f32(&self, name: &str) -> Option<&[f32]> {
        match self.uniforms.get(name) {
            Some(UniformValue::F32(values)) => Some(values),
            _ => None,
        }
    }

    /// Values streamed for attribute `name`, `None` when disabled
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[f32]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    fn store(&mut self, name: &str, element_size: usize, count: usize, value: UniformValue) {
        log::trace!("Uniform {} ({}x{})", name, count, element_size);
        self.uniforms.insert(name.to_string(), value);
    }
}

impl ShaderManager for HeadlessShaderManager {
    fn new_program(&mut self, vertex_path: &str, fragment_path: &str, geometry_path: &str) -> RenderResult<ShaderProgram> {
        let read = |path: &str| -> RenderResult<String> {
            if path.is_empty() {
                return Ok(String::new());
            }
            std::fs::read_to_string(path)
                .map_err(|e| RenderError::ResourceCreationFailed(format!("Failed to read shader {path}: {e}")))
        };
        let vertex = read(vertex_path)?;
        let fragment = read(fragment_path)?;
        let geometry = read(geometry_path)?;
        self.new_program_source(&vertex, &fragment, &geometry)
    }

    fn new_program_source(&mut self, _vertex: &str, _fragment: &str, _geometry: &str) -> RenderResult<ShaderProgram> {
        let program = ShaderProgram(self.next_program);
        self.next_program += 1;
        Ok(program)
    }

    fn default_program(&self) -> ShaderProgram {
        self.programs.default_program()
    }

    fn active_program(&self) -> ShaderProgram {
        self.programs.active()
    }

    fn push_program(&mut self, program: ShaderProgram) {
        self.programs.push(program);
    }

    fn pop_program(&mut self) -> RenderResult<()> {
        self.programs.pop().map(|_| ())
    }

    fn set_uniform_f32(&mut self, name: &str, element_size: usize, count: usize, values: &[f32]) {
        self.store(name, element_size, count, UniformValue::F32(values.to_vec()));
    }

    fn set_uniform_i32(&mut self, name: &str, element_size: usize, count: usize, values: &[i32]) {
        self.store(name, element_size, count, UniformValue::I32(values.to_vec()));
    }

    fn set_uniform_u32(&mut self, name: &str, element_size: usize, count: usize, values: &[u32]) {
        self.store(name, element_size, count, UniformValue::U32(values.to_vec()));
    }

    fn set_vertex_attribute_f32(&mut self, name: &str, _element_size: usize, _count: usize, values: &[f32], _per_instance: bool) {
        self.attributes.insert(name.to_string(), values.to_vec());
    }

    fn set_vertex_attribute_i32(&mut self, name: &str, _element_size: usize, _count: usize, values: &[i32], _per_instance: bool) {
        self.attributes.insert(name.to_string(), values.iter().map(|&v| v as f32).collect());
    }

    fn disable_vertex_attribute_f32(&mut self, name: &str, _element_size: usize, _default: &[f32]) {
        self.attributes.remove(name);
    }

    fn disable_vertex_attribute_i32(&mut self, name: &str, _element_size: usize, _default: &[i32]) {
        self.attributes.remove(name);
    }

    fn on_program_change(&mut self, callback: ProgramChangeCallback) {
        self.programs.set_callback(callback);
    }
}

/// Backend that records commands
pub struct HeadlessBackend {
    size: (u32, u32),
    clip: ClipSpace,
    features: Vec<Feature>,
    shaders: HeadlessShaderManager,
    commands: Vec<HeadlessCommand>,
    render_target: Option<TextureId>,
    query_visible: Option<bool>,
    visibility: Option<VisibilityPredicate>,
    anisotropy: f32,
}

impl HeadlessBackend {
    /// 800x600 surface with GL conventions and every optional feature
    #[must_use]
    pub fn new() -> Self {
        Self::with_size(800, 600)
    }

    /// Surface of `width` x `height`
    #[must_use]
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            clip: ClipSpace::NegativeOneToOne,
            features: vec![Feature::Instancing, Feature::Anisotropy, Feature::Multisampling, Feature::OcclusionQueries],
            shaders: HeadlessShaderManager::new(),
            commands: Vec::new(),
            render_target: None,
            query_visible: None,
            visibility: None,
            anisotropy: 1.0,
        }
    }

    /// Restrict the optional features reported as supported
    #[must_use]
    pub fn with_features(mut self, features: &[Feature]) -> Self {
        self.features = features.to_vec();
        self
    }

    /// Use another clip-space convention
    #[must_use]
    pub const fn with_clip_space(mut self, clip: ClipSpace) -> Self {
        self.clip = clip;
        self
    }

    /// Replace the clip-volume visibility test of occlusion queries
    pub fn set_visibility_predicate(&mut self, predicate: impl Fn(&[Vec3]) -> bool + 'static) {
        self.visibility = Some(Box::new(predicate));
    }

    /// Recorded commands
    #[must_use]
    pub fn commands(&self) -> &[HeadlessCommand] {
        &self.commands
    }

    /// Take the recorded commands, leaving the log empty
    pub fn take_commands(&mut self) -> Vec<HeadlessCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Recorded draws
    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> {
        self.commands.iter().filter_map(|c| match c {
            HeadlessCommand::Draw(record) => Some(record.as_ref()),
            _ => None,
        })
    }

    /// Texture currently receiving draws
    #[must_use]
    pub const fn render_target(&self) -> Option<TextureId> {
        self.render_target
    }

    /// Stored uniforms and attributes
    #[must_use]
    pub const fn shaders(&self) -> &HeadlessShaderManager {
        &self.shaders
    }

    fn push(&mut self, command: HeadlessCommand) {
        self.commands.push(command);
    }

    fn clip_positions(&self, call: &DrawCall<'_>) -> RenderResult<Vec<Vec4>> {
        let mvp = call.uniforms.projection * call.uniforms.model_view;
        Ok(self.assembled(call)?.into_iter().map(|p| mvp * p.push(1.0)).collect())
    }

    fn eye_positions(&self, call: &DrawCall<'_>) -> RenderResult<Vec<Vec3>> {
        let model_view = call.uniforms.model_view;
        Ok(self.assembled(call)?.into_iter().map(|p| (model_view * p.push(1.0)).xyz()).collect())
    }

    /// Object-space positions of the vertices a draw assembles
    fn assembled(&self, call: &DrawCall<'_>) -> RenderResult<Vec<Vec3>> {
        let packed;
        let positions: &[f32] = match call.vertices {
            DrawVertices::Streamed(arrays) => {
                packed = arrays.pack();
                packed.positions()
            }
            DrawVertices::Resident(native) => match native.downcast_ref::<HeadlessVertexBuffer>() {
                Some(buffer) => buffer.0.positions(),
                None => return Err(foreign("vertex buffer")),
            },
        };
        let elements: Vec<usize> = match call.indexes {
            DrawIndexes::None => (0..call.vertex_count).collect(),
            DrawIndexes::Streamed(indexes) => indexes.iter().map(|&i| i as usize).collect(),
            DrawIndexes::Resident { native, begin, count } => match native.downcast_ref::<HeadlessIndexBuffer>() {
                Some(buffer) => buffer.0.get(begin..begin + count).unwrap_or_default().iter().map(|&i| i as usize).collect(),
                None => return Err(foreign("index buffer")),
            },
        };

        Ok(elements
            .into_iter()
            .filter_map(|i| positions.get(i * 3..i * 3 + 3))
            .map(|p| Vec3::new(p[0], p[1], p[2]))
            .collect())
    }

    fn inside_clip_volume(&self, clip: &Vec4) -> bool {
        let w = clip.w;
        if w <= 0.0 || clip.x.abs() > w || clip.y.abs() > w {
            return false;
        }
        match self.clip {
            ClipSpace::NegativeOneToOne => clip.z.abs() <= w,
            ClipSpace::ZeroToOne | ClipSpace::ZeroToOneFlipY => (0.0..=w).contains(&clip.z),
        }
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn foreign(what: &str) -> RenderError {
    RenderError::InvalidOperation(format!("{what} was not created by the {BACKEND} backend"))
}

impl TextureHelper for HeadlessBackend {
    fn create_empty_texture(&mut self, cubemap: bool) -> RenderResult<CachedTexture> {
        Ok(CachedTexture::new(CachedTextureType::Rgba, 0, 0, cubemap, false, HeadlessTexture))
    }

    fn create_texture(&mut self, data: Option<&[u8]>, width: u32, height: u32, kind: CachedTextureType) -> RenderResult<CachedTexture> {
        let bytes_per_pixel = match kind {
            CachedTextureType::Rgba | CachedTextureType::RenderTarget => 4,
            CachedTextureType::Alpha => 1,
            CachedTextureType::Depth => 0,
        };
        if let Some(data) = data {
            let expected = width as usize * height as usize * bytes_per_pixel;
            if bytes_per_pixel > 0 && data.len() < expected {
                return Err(RenderError::ResourceCreationFailed(format!(
                    "{width}x{height} {kind:?} texture needs {expected} bytes, got {}",
                    data.len()
                )));
            }
        }
        Ok(CachedTexture::new(kind, width, height, false, true, HeadlessTexture))
    }

    fn upload_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, _flags: TextureFlags) -> RenderResult<()> {
        texture.expect_native::<HeadlessTexture>(BACKEND)?;
        image.validate().map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        texture.mark_ready(image.width(), image.height());
        Ok(())
    }

    fn upload_compressed_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        self.upload_texture(texture, image, flags)
    }

    fn upload_cubemap(&mut self, texture: &mut CachedTexture, sides: &[TextureImage; 6], flags: TextureFlags) -> RenderResult<()> {
        if !texture.is_cubemap() {
            return Err(RenderError::InvalidOperation("cube faces uploaded into a flat texture".to_string()));
        }
        let size = (sides[0].width(), sides[0].height());
        if sides.iter().any(|side| (side.width(), side.height()) != size) {
            return Err(RenderError::ResourceCreationFailed("cube faces differ in size".to_string()));
        }
        self.upload_texture(texture, &sides[0], flags)
    }
}

impl RenderBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn clip_space(&self) -> ClipSpace {
        self.clip
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    fn shader_manager(&mut self) -> &mut dyn ShaderManager {
        &mut self.shaders
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        self.push(HeadlessCommand::BeginFrame);
        Ok(())
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        if self.render_target.is_some() {
            return Err(RenderError::InvalidOperation("frame ended inside render_to_texture".to_string()));
        }
        self.push(HeadlessCommand::EndFrame);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.size = (width, height);
        self.push(HeadlessCommand::Resize(width, height));
        Ok(())
    }

    fn set_viewport(&mut self, rect: ViewportRect) {
        self.push(HeadlessCommand::Viewport(rect));
    }

    fn set_depth_test(&mut self, enable: bool) {
        self.push(HeadlessCommand::DepthTest(enable));
    }

    fn set_blending(&mut self, enable: bool) {
        self.push(HeadlessCommand::Blending(enable));
    }

    fn set_polygon_offset(&mut self, offset: Option<(f32, f32)>) {
        self.push(HeadlessCommand::PolygonOffset(offset));
    }

    fn set_multisampling(&mut self, _enable: bool) -> bool {
        self.supports_feature(Feature::Multisampling)
    }

    fn set_write_masks(&mut self, enable: bool) {
        self.push(HeadlessCommand::WriteMasks(enable));
    }

    fn clear(&mut self, color: bool, depth: bool) -> RenderResult<()> {
        self.push(HeadlessCommand::Clear { color, depth });
        Ok(())
    }

    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<&TextureBinding>) -> RenderResult<()> {
        if let Some(binding) = texture {
            if binding.native::<HeadlessTexture>().is_none() {
                return Err(foreign("texture"));
            }
        }
        self.push(HeadlessCommand::BindTexture { slot, texture: texture.map(TextureBinding::id) });
        Ok(())
    }

    fn set_anisotropy(&mut self, level: f32) {
        self.anisotropy = level;
    }

    fn max_anisotropy(&self) -> f32 {
        if self.supports_feature(Feature::Anisotropy) {
            16.0
        } else {
            1.0
        }
    }

    fn create_vertex_buffer(&mut self, arrays: &VertexArrays<'_>) -> RenderResult<Rc<dyn Any>> {
        Ok(Rc::new(HeadlessVertexBuffer(arrays.pack())))
    }

    fn create_index_buffer(&mut self, indexes: &[u32]) -> RenderResult<Rc<dyn Any>> {
        Ok(Rc::new(HeadlessIndexBuffer(indexes.to_vec())))
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        if call.mode == RenderMode::Rectangles {
            return Err(RenderError::InvalidOperation("rectangles reached the backend unexpanded".to_string()));
        }
        let clip_positions = self.clip_positions(call)?;
        if let Some(visible) = self.query_visible {
            let seen = match &self.visibility {
                Some(predicate) => {
                    let eye = self.eye_positions(call)?;
                    predicate(&eye)
                }
                None => clip_positions.iter().any(|p| self.inside_clip_volume(p)),
            };
            self.query_visible = Some(visible || seen);
        }
        let record = DrawRecord {
            mode: call.mode,
            element_count: call.element_count(),
            first_index: match call.indexes {
                DrawIndexes::Resident { begin, .. } => Some(begin),
                _ => None,
            },
            instance_count: call.instance_count,
            flags: call.flags,
            model_view: call.uniforms.model_view,
            projection: call.uniforms.projection,
            color: call.uniforms.color,
            resident: matches!(call.vertices, DrawVertices::Resident(_)),
            matrices_uploaded: call.uniforms.matrices_dirty,
            color_uploaded: call.uniforms.color_dirty,
            diffuse: self.shaders.uniform_f32(names::MATERIAL_DIFFUSE).map(<[f32]>::to_vec),
            clip_positions,
        };
        self.push(HeadlessCommand::Draw(Box::new(record)));
        Ok(())
    }

    fn begin_render_to_texture(&mut self, texture: &mut CachedTexture, width: u32, height: u32) -> RenderResult<()> {
        if self.render_target.is_some() {
            return Err(RenderError::InvalidOperation("render_to_texture is already active".to_string()));
        }
        texture.expect_native::<HeadlessTexture>(BACKEND)?;
        self.render_target = Some(texture.id());
        self.push(HeadlessCommand::BeginRenderTarget { texture: texture.id(), width, height });
        Ok(())
    }

    fn end_render_to_texture(&mut self) -> RenderResult<()> {
        if self.render_target.take().is_none() {
            return Err(RenderError::InvalidOperation("no render_to_texture is active".to_string()));
        }
        self.push(HeadlessCommand::EndRenderTarget);
        Ok(())
    }

    fn create_occlusion_query(&mut self) -> RenderResult<Box<dyn OcclusionQuery>> {
        Ok(Box::new(HeadlessQuery::default()))
    }

    fn begin_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        if query.as_any_mut().downcast_mut::<HeadlessQuery>().is_none() {
            return Err(foreign("occlusion query"));
        }
        if self.query_visible.is_some() {
            return Err(RenderError::InvalidOperation("occlusion queries cannot nest".to_string()));
        }
        self.query_visible = Some(false);
        self.push(HeadlessCommand::BeginQuery);
        Ok(())
    }

    fn end_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        let Some(query) = query.as_any_mut().downcast_mut::<HeadlessQuery>() else {
            return Err(foreign("occlusion query"));
        };
        let Some(visible) = self.query_visible.take() else {
            return Err(RenderError::InvalidOperation("occlusion query was not begun".to_string()));
        };
        query.visible = Some(visible);
        self.push(HeadlessCommand::EndQuery(visible));
        Ok(())
    }
}

impl GraphicsEngine<HeadlessBackend> {
    /// Headless renderer of `width` x `height` loading textures from disk
    ///
    /// # Errors
    /// `ResourceCreationFailed` when the texture loader cannot start.
    pub fn headless(width: u32, height: u32) -> RenderResult<Self> {
        Self::with_provider(
            HeadlessBackend::with_size(width, height),
            std::sync::Arc::new(crate::assets::image_loader::ImageFileProvider::new()),
            &crate::core::TextureConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Mat4Ext;
    use crate::render::backend::DrawUniforms;

    fn uniforms(projection: Mat4) -> DrawUniforms {
        DrawUniforms {
            model_view: Mat4::identity(),
            projection,
            color: Color::WHITE,
            matrices_dirty: true,
            color_dirty: true,
        }
    }

    fn triangle_at(z: f32) -> Vec<f32> {
        vec![-0.5, -0.5, z, 0.5, -0.5, z, 0.0, 0.5, z]
    }

    fn run_query(backend: &mut HeadlessBackend, positions: &[f32]) -> bool {
        let projection = Mat4::perspective(60.0_f32.to_radians(), 1.0, 0.1, 100.0, ClipSpace::NegativeOneToOne);
        let uniforms = uniforms(projection);
        let arrays = VertexArrays::separate(positions, &[], &[]).unwrap();
        let mut query = backend.create_occlusion_query().unwrap();
        backend.begin_occlusion_query(query.as_mut()).unwrap();
        backend
            .draw(&DrawCall {
                vertices: DrawVertices::Streamed(arrays),
                indexes: DrawIndexes::None,
                mode: RenderMode::Triangles,
                vertex_count: 3,
                instance_count: 1,
                flags: DrawFlags::empty(),
                uniforms: &uniforms,
            })
            .unwrap();
        backend.end_occlusion_query(query.as_mut()).unwrap();
        query.is_visible()
    }

    #[test]
    fn test_query_sees_geometry_in_front() {
        let mut backend = HeadlessBackend::new();
        assert!(run_query(&mut backend, &triangle_at(-5.0)));
    }

    #[test]
    fn test_query_misses_geometry_behind() {
        let mut backend = HeadlessBackend::new();
        assert!(!run_query(&mut backend, &triangle_at(5.0)));
    }

    #[test]
    fn test_visibility_predicate_replaces_clip_test() {
        let mut backend = HeadlessBackend::new();
        backend.set_visibility_predicate(|eye| eye.iter().all(|p| p.x > 10.0));
        assert!(!run_query(&mut backend, &triangle_at(-5.0)));
    }

    #[test]
    fn test_unrun_query_reports_visible() {
        let query = HeadlessQuery::default();
        assert!(query.is_visible());
    }

    #[test]
    fn test_nested_render_targets_are_rejected() {
        let mut backend = HeadlessBackend::new();
        let mut a = backend.create_texture(None, 4, 4, CachedTextureType::RenderTarget).unwrap();
        let mut b = backend.create_texture(None, 4, 4, CachedTextureType::RenderTarget).unwrap();
        backend.begin_render_to_texture(&mut a, 4, 4).unwrap();
        assert!(backend.begin_render_to_texture(&mut b, 4, 4).is_err());
        backend.end_render_to_texture().unwrap();
        assert_eq!(backend.render_target(), None);
    }

    #[test]
    fn test_foreign_texture_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let foreign = CachedTexture::new(CachedTextureType::Rgba, 1, 1, false, true, 7u32);
        assert!(backend.bind_texture(TextureSlot::Diffuse, Some(&foreign.binding())).is_err());
    }
}
