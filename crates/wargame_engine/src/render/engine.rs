//! # Graphics Engine
//!
//! The renderer frontend shared by every backend. `GraphicsEngine<B>` owns the state the
//! [`Renderer`] contract talks about (matrix stack, texture slots, color, texture manager,
//! drawing-list recorder) and turns contract calls into resolved [`DrawCall`]s for its
//! [`RenderBackend`].
//!
//! ## Responsibilities
//!
//! - **Matrix state**: uploads matrices only when the stack changed or the program switched
//! - **Texture slots**: one binding per slot, placeholder for textures without contents
//! - **Recording**: captures drawing lists instead of drawing while a list is recorded
//! - **Scoped passes**: render-to-texture, occlusion queries and 2D overlays restore what they touch

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use crate::assets::{ImageProvider, TextureImage};
use crate::core::TextureConfig;
use crate::foundation::math::{ClipSpace, Mat4, Vec2, Vec3};
use crate::render::api::{DrawFn, OcclusionQuery};
use crate::render::backend::{DrawCall, DrawFlags, DrawIndexes, DrawUniforms, DrawVertices, RenderBackend};
use crate::render::drawing_list::{DrawingList, ListCommand};
use crate::render::matrix::{MatrixManager, MatrixSnapshot};
use crate::render::mesh::Material;
use crate::render::shader::{names, ShaderManager};
use crate::render::texture::{CachedTexture, TextureBinding, TextureId, TextureManager};
use crate::render::types::MAX_LIGHTS;
use crate::render::vertex::{quad_indexes, IndexBuffer, VertexArrays, VertexBuffer, VertexSource};
use crate::render::{
    CachedTextureType, Color, Feature, Light, RenderError, RenderMode, RenderResult, Renderer, TeamColor,
    TextureFlags, TextureSlot, ViewportRect,
};

/// State restored when a render-to-texture scope closes
struct SavedTarget {
    viewport: ViewportRect,
    matrices: MatrixSnapshot,
    slots: [Option<TextureBinding>; TextureSlot::COUNT],
    depth_test: bool,
    blending: bool,
    polygon_offset: Option<(f32, f32)>,
}

/// Renderer frontend over a backend `B`
pub struct GraphicsEngine<B: RenderBackend> {
    matrices: MatrixManager,
    textures: TextureManager,
    slots: [Option<TextureBinding>; TextureSlot::COUNT],
    color: Color,
    viewport: ViewportRect,
    depth_test: bool,
    blending: bool,
    polygon_offset: Option<(f32, f32)>,
    anisotropy: f32,
    uploaded_generation: Option<u64>,
    color_dirty: bool,
    program_changed: Rc<Cell<bool>>,
    recorder: Option<Vec<ListCommand>>,
    render_target_depth: usize,
    frame_count: u64,
    // Dropped last: textures, slots and recorded lists release into it
    backend: B,
}

impl<B: RenderBackend> GraphicsEngine<B> {
    /// Wrap `backend`, using `textures` for path-addressed textures
    pub fn new(mut backend: B, textures: TextureManager) -> Self {
        let program_changed = Rc::new(Cell::new(true));
        let flag = Rc::clone(&program_changed);
        backend.shader_manager().on_program_change(Box::new(move || flag.set(true)));

        let (width, height) = backend.surface_size();
        let viewport = ViewportRect::new(0, 0, width, height);
        backend.set_viewport(viewport);
        backend.set_depth_test(true);

        log::info!("Renderer '{}' ready ({}x{})", backend.name(), width, height);
        Self {
            matrices: MatrixManager::new(backend.clip_space()),
            backend,
            textures,
            slots: Default::default(),
            color: Color::WHITE,
            viewport,
            depth_test: true,
            blending: false,
            polygon_offset: None,
            anisotropy: 1.0,
            uploaded_generation: None,
            color_dirty: true,
            program_changed,
            recorder: None,
            render_target_depth: 0,
            frame_count: 0,
        }
    }

    /// Wrap `backend` with a texture manager decoding through `provider`
    ///
    /// # Errors
    /// `ResourceCreationFailed` when the texture loader cannot start.
    pub fn with_provider(backend: B, provider: Arc<dyn ImageProvider>, config: &TextureConfig) -> RenderResult<Self> {
        let textures = TextureManager::new(provider, config)?;
        let mut engine = Self::new(backend, textures);
        if config.anisotropy > 1.0 {
            engine.set_texture_anisotropy(config.anisotropy);
        }
        Ok(engine)
    }

    /// Backend
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Backend, mutably
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Matrix state
    pub const fn matrices(&self) -> &MatrixManager {
        &self.matrices
    }

    /// Frames started so far
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn record(&mut self, command: ListCommand) -> bool {
        match &mut self.recorder {
            Some(list) => {
                list.push(command);
                true
            }
            None => false,
        }
    }

    fn reject_while_recording(&self, what: &str) -> RenderResult<()> {
        if self.recorder.is_some() {
            return Err(RenderError::InvalidOperation(format!("{what} cannot be recorded into a drawing list")));
        }
        Ok(())
    }

    fn draw_uniforms(&mut self) -> DrawUniforms {
        let program_changed = self.program_changed.replace(false);
        let generation = self.matrices.generation();
        let matrices_dirty = program_changed || self.uploaded_generation != Some(generation);
        self.uploaded_generation = Some(generation);
        let color_dirty = program_changed || std::mem::take(&mut self.color_dirty);

        DrawUniforms {
            model_view: *self.matrices.model_view(),
            projection: *self.matrices.projection(),
            color: self.color,
            matrices_dirty,
            color_dirty,
        }
    }

    fn submit(
        &mut self,
        vertices: DrawVertices<'_>,
        indexes: DrawIndexes<'_>,
        mode: RenderMode,
        vertex_count: usize,
        instance_count: usize,
        flags: DrawFlags,
    ) -> RenderResult<()> {
        let uniforms = self.draw_uniforms();
        let quads;
        let (mode, indexes) = match (mode, indexes) {
            (RenderMode::Rectangles, DrawIndexes::None) => {
                quads = quad_indexes(vertex_count);
                (RenderMode::Triangles, DrawIndexes::Streamed(&quads))
            }
            (RenderMode::Rectangles, indexes) => (RenderMode::Triangles, indexes),
            other => other,
        };
        self.backend.draw(&DrawCall { vertices, indexes, mode, vertex_count, instance_count, flags, uniforms: &uniforms })
    }

    fn buffer_flags(has_normals: bool, has_tex_coords: bool) -> DrawFlags {
        let mut flags = DrawFlags::empty();
        flags.set(DrawFlags::LIGHTING, has_normals);
        flags.set(DrawFlags::TEXTURED, has_tex_coords);
        flags
    }

    fn render_vertex_arrays(&mut self, mode: RenderMode, arrays: VertexArrays<'_>) -> RenderResult<()> {
        let count = arrays.vertex_count();
        if self.recorder.is_some() {
            let buffer = self.create_vertex_buffer(&arrays)?;
            self.record(ListCommand::DrawArrays { buffer, mode, count });
            return Ok(());
        }
        let flags = Self::buffer_flags(arrays.normals().is_some(), arrays.tex_coords().is_some());
        self.submit(DrawVertices::Streamed(arrays), DrawIndexes::None, mode, count, 1, flags)
    }

    /// Persistent handle to `buffer`, copying the vertices of a temporary buffer
    fn persistent(&mut self, buffer: &VertexBuffer<'_>) -> RenderResult<VertexBuffer<'static>> {
        if let Some(shared) = buffer.share() {
            return Ok(shared);
        }
        let VertexSource::Borrowed(arrays) = buffer.source() else {
            return Err(RenderError::InvalidOperation("vertex buffer has no vertices".to_string()));
        };
        let mut baked = self.create_vertex_buffer(arrays)?;
        if let Some(indexes) = buffer.indexes() {
            baked.set_indexes(indexes.clone());
        }
        Ok(baked)
    }

    fn bind_slot(&mut self, slot: TextureSlot, binding: TextureBinding) -> RenderResult<()> {
        let binding = if binding.is_ready() {
            binding
        } else {
            log::debug!("Texture {:?} has no contents yet, binding placeholder to {:?}", binding.id(), slot);
            self.textures.placeholder(&mut self.backend)?
        };
        self.backend.bind_texture(slot, Some(&binding))?;
        self.slots[slot.index()] = Some(binding);
        Ok(())
    }

    fn apply_viewport(&mut self, rect: ViewportRect) {
        self.viewport = rect;
        self.backend.set_viewport(rect);
    }

    fn save_target(&self) -> SavedTarget {
        SavedTarget {
            viewport: self.viewport,
            matrices: self.matrices.snapshot(),
            slots: self.slots.clone(),
            depth_test: self.depth_test,
            blending: self.blending,
            polygon_offset: self.polygon_offset,
        }
    }

    fn restore_target(&mut self, saved: SavedTarget) {
        self.apply_viewport(saved.viewport);
        self.matrices.restore(saved.matrices);
        for slot in TextureSlot::ALL {
            let binding = &saved.slots[slot.index()];
            if let Err(err) = self.backend.bind_texture(slot, binding.as_ref()) {
                log::warn!("Failed to restore texture slot {:?}: {}", slot, err);
            }
        }
        self.slots = saved.slots;
        self.depth_test = saved.depth_test;
        self.backend.set_depth_test(saved.depth_test);
        self.blending = saved.blending;
        self.backend.set_blending(saved.blending);
        self.polygon_offset = saved.polygon_offset;
        self.backend.set_polygon_offset(saved.polygon_offset);
    }
}

/// Open render-to-texture redirection; restores the previous target when closed or dropped
struct TargetScope<'e, B: RenderBackend> {
    engine: &'e mut GraphicsEngine<B>,
    saved: Option<SavedTarget>,
}

impl<B: RenderBackend> TargetScope<'_, B> {
    fn finish(mut self) -> RenderResult<()> {
        let ended = self.engine.backend.end_render_to_texture();
        if let Some(saved) = self.saved.take() {
            self.engine.restore_target(saved);
        }
        self.engine.render_target_depth -= 1;
        ended
    }
}

impl<B: RenderBackend> Drop for TargetScope<'_, B> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(err) = self.engine.backend.end_render_to_texture() {
                log::error!("Failed to close render target: {}", err);
            }
            self.engine.restore_target(saved);
            self.engine.render_target_depth -= 1;
        }
    }
}

impl<B: RenderBackend> Renderer for GraphicsEngine<B> {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        self.backend.supports_feature(feature)
    }

    fn shader_manager(&mut self) -> &mut dyn ShaderManager {
        self.backend.shader_manager()
    }

    fn texture_manager(&mut self) -> &mut TextureManager {
        &mut self.textures
    }

    fn clip_space(&self) -> ClipSpace {
        self.backend.clip_space()
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        let uploaded = self.textures.poll(&mut self.backend);
        if uploaded > 0 {
            log::trace!("Uploaded {} textures", uploaded);
        }
        self.backend.begin_frame()?;
        self.frame_count += 1;
        log::trace!("Begin frame {}", self.frame_count);
        Ok(())
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        if self.matrices.depth() != 1 {
            log::warn!("Frame {} ended with {} unbalanced push_matrix calls", self.frame_count, self.matrices.depth() - 1);
        }
        self.backend.end_frame()
    }

    fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let (old_width, old_height) = self.backend.surface_size();
        self.backend.resize(width, height)?;
        if self.viewport == ViewportRect::new(0, 0, old_width, old_height) {
            self.apply_viewport(ViewportRect::new(0, 0, width, height));
        }
        Ok(())
    }

    fn render_arrays(&mut self, mode: RenderMode, vertices: &[Vec3], normals: &[Vec3], tex_coords: &[Vec2]) -> RenderResult<()> {
        let arrays = VertexArrays::from_vectors(vertices, normals, tex_coords)?;
        self.render_vertex_arrays(mode, arrays)
    }

    fn render_arrays_2d(&mut self, mode: RenderMode, vertices: &[[i32; 2]], tex_coords: &[Vec2]) -> RenderResult<()> {
        let positions: Vec<f32> = vertices.iter().flat_map(|v| [v[0] as f32, v[1] as f32, 0.0]).collect();
        let arrays = VertexArrays::separate(&positions, &[], bytemuck::cast_slice(tex_coords))?;
        self.render_vertex_arrays(mode, arrays)
    }

    fn create_vertex_buffer(&mut self, arrays: &VertexArrays<'_>) -> RenderResult<VertexBuffer<'static>> {
        let native = self.backend.create_vertex_buffer(arrays)?;
        Ok(VertexBuffer::resident(
            native,
            arrays.vertex_count(),
            arrays.normals().is_some(),
            arrays.tex_coords().is_some(),
        ))
    }

    fn create_temp_vertex_buffer<'a>(&mut self, arrays: VertexArrays<'a>) -> RenderResult<VertexBuffer<'a>> {
        Ok(VertexBuffer::borrowed(arrays))
    }

    fn set_index_buffer(&mut self, buffer: &mut VertexBuffer<'_>, indexes: &[u32]) -> RenderResult<()> {
        if let Some(&max) = indexes.iter().max() {
            if max as usize >= buffer.vertex_count() {
                return Err(RenderError::InvalidOperation(format!(
                    "index {max} addresses a buffer of {} vertices",
                    buffer.vertex_count()
                )));
            }
        }
        let native = self.backend.create_index_buffer(indexes)?;
        buffer.set_indexes(IndexBuffer::new(indexes.len(), native));
        Ok(())
    }

    fn draw_indexes(&mut self, buffer: &VertexBuffer<'_>, begin: usize, count: usize) -> RenderResult<()> {
        buffer.check_index_range(begin, count)?;
        if count == 0 {
            return Ok(());
        }
        if self.recorder.is_some() {
            let buffer = self.persistent(buffer)?;
            self.record(ListCommand::DrawIndexes { buffer, begin, count });
            return Ok(());
        }

        let Some(indexes) = buffer.indexes() else {
            return Err(RenderError::IndexOutOfRange { begin, count, len: 0 });
        };
        let vertices = match buffer.source() {
            VertexSource::Borrowed(arrays) => DrawVertices::Streamed(*arrays),
            VertexSource::Resident(native) => DrawVertices::Resident(native),
        };
        let flags = Self::buffer_flags(buffer.has_normals(), buffer.has_tex_coords());
        let indexes = DrawIndexes::Resident { native: indexes.native(), begin, count };
        self.submit(vertices, indexes, RenderMode::Triangles, buffer.vertex_count(), 1, flags)
    }

    fn draw_arrays(&mut self, buffer: &VertexBuffer<'_>, mode: RenderMode, count: usize) -> RenderResult<()> {
        if count > buffer.vertex_count() {
            return Err(RenderError::InvalidOperation(format!(
                "draw of {count} vertices from a buffer of {}",
                buffer.vertex_count()
            )));
        }
        if count == 0 {
            return Ok(());
        }
        if self.recorder.is_some() {
            let buffer = self.persistent(buffer)?;
            self.record(ListCommand::DrawArrays { buffer, mode, count });
            return Ok(());
        }

        let vertices = match buffer.source() {
            VertexSource::Borrowed(arrays) => DrawVertices::Streamed(*arrays),
            VertexSource::Resident(native) => DrawVertices::Resident(native),
        };
        let flags = Self::buffer_flags(buffer.has_normals(), buffer.has_tex_coords());
        self.submit(vertices, DrawIndexes::None, mode, count, 1, flags)
    }

    fn draw_instanced(&mut self, buffer: &VertexBuffer<'_>, size: usize, instance_count: usize) -> RenderResult<()> {
        if !self.backend.supports_feature(Feature::Instancing) {
            return Err(RenderError::UnsupportedFeature(Feature::Instancing));
        }
        if size > buffer.vertex_count() {
            return Err(RenderError::InvalidOperation(format!(
                "instanced draw of {size} vertices from a buffer of {}",
                buffer.vertex_count()
            )));
        }
        if size == 0 || instance_count == 0 {
            return Ok(());
        }
        if self.recorder.is_some() {
            let buffer = self.persistent(buffer)?;
            self.record(ListCommand::DrawInstanced { buffer, size, instances: instance_count });
            return Ok(());
        }

        let vertices = match buffer.source() {
            VertexSource::Borrowed(arrays) => DrawVertices::Streamed(*arrays),
            VertexSource::Resident(native) => DrawVertices::Resident(native),
        };
        let flags = Self::buffer_flags(buffer.has_normals(), buffer.has_tex_coords());
        self.submit(vertices, DrawIndexes::None, RenderMode::Triangles, size, instance_count, flags)
    }

    fn create_drawing_list(&mut self, record: &mut DrawFn<'_>) -> RenderResult<DrawingList> {
        self.reject_while_recording("create_drawing_list")?;
        self.recorder = Some(Vec::new());
        let result = record(self);
        let commands = self.recorder.take().unwrap_or_default();
        result?;
        log::debug!("Recorded drawing list of {} commands", commands.len());
        Ok(DrawingList::from_commands(commands))
    }

    fn push_matrix(&mut self) {
        if !self.record(ListCommand::PushMatrix) {
            self.matrices.push_matrix();
        }
    }

    fn pop_matrix(&mut self) -> RenderResult<()> {
        if self.record(ListCommand::PopMatrix) {
            return Ok(());
        }
        self.matrices.pop_matrix()
    }

    fn translate(&mut self, dx: f32, dy: f32, dz: f32) {
        if !self.record(ListCommand::Translate(Vec3::new(dx, dy, dz))) {
            self.matrices.translate(dx, dy, dz);
        }
    }

    fn rotate(&mut self, angle: f32, x: f32, y: f32, z: f32) {
        let axis = Vec3::new(x, y, z);
        if !self.record(ListCommand::Rotate(angle, axis)) {
            self.matrices.rotate(angle, axis);
        }
    }

    fn scale(&mut self, factor: f32) {
        if !self.record(ListCommand::Scale(factor)) {
            self.matrices.scale(factor);
        }
    }

    fn look_at(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        if !self.record(ListCommand::LookAt { position, target, up }) {
            self.matrices.look_at(position, target, up);
        }
    }

    fn reset_view_matrix(&mut self) {
        if !self.record(ListCommand::ResetViewMatrix) {
            self.matrices.reset_model_view();
        }
    }

    fn view_matrix(&self) -> Mat4 {
        *self.matrices.model_view()
    }

    fn projection_matrix(&self) -> Mat4 {
        *self.matrices.projection()
    }

    fn set_projection_matrix(&mut self, projection: Mat4) {
        self.matrices.set_projection(projection);
    }

    fn matrix_depth(&self) -> usize {
        self.matrices.depth()
    }

    fn set_color(&mut self, color: Color) {
        if !self.record(ListCommand::SetColor(color)) {
            self.color = color;
            self.color_dirty = true;
        }
    }

    fn set_material(&mut self, material: &Material) {
        if self.record(ListCommand::SetMaterial(Box::new(material.clone()))) {
            return;
        }
        let shaders = self.backend.shader_manager();
        shaders.set_uniform_f32(names::MATERIAL_AMBIENT, 4, 1, &material.ambient);
        shaders.set_uniform_f32(names::MATERIAL_DIFFUSE, 4, 1, &material.diffuse);
        shaders.set_uniform_f32(names::MATERIAL_SPECULAR, 4, 1, &material.specular);
        shaders.set_uniform_f32(names::MATERIAL_SHININESS, 1, 1, &[material.shininess]);
    }

    fn set_number_of_lights(&mut self, count: usize) {
        if self.record(ListCommand::SetNumberOfLights(count)) {
            return;
        }
        if count > MAX_LIGHTS {
            log::warn!("{} lights requested, only {} are supported", count, MAX_LIGHTS);
        }
        let count = count.min(MAX_LIGHTS) as i32;
        self.backend.shader_manager().set_uniform_i32(names::LIGHTS_COUNT, 1, 1, &[count]);
    }

    fn set_up_light(&mut self, index: usize, light: &Light) {
        if self.record(ListCommand::SetUpLight(index, *light)) {
            return;
        }
        if index >= MAX_LIGHTS {
            log::warn!("Light {} ignored, only {} are supported", index, MAX_LIGHTS);
            return;
        }
        let shaders = self.backend.shader_manager();
        shaders.set_uniform_f32(&names::light(index, "pos"), 4, 1, &light.position);
        shaders.set_uniform_f32(&names::light(index, "ambient"), 4, 1, &light.ambient);
        shaders.set_uniform_f32(&names::light(index, "diffuse"), 4, 1, &light.diffuse);
        shaders.set_uniform_f32(&names::light(index, "specular"), 4, 1, &light.specular);
    }

    fn set_texture(&mut self, path: &str, force_load_now: bool, flags: TextureFlags) -> RenderResult<()> {
        let command =
            ListCommand::SetTexture { path: path.to_string(), slot: TextureSlot::Diffuse, flags, team_colors: Vec::new(), force_load_now };
        if self.record(command) {
            return Ok(());
        }
        let binding = self.textures.get_texture(&mut self.backend, path, flags, &[], force_load_now)?;
        self.bind_slot(TextureSlot::Diffuse, binding)
    }

    fn set_texture_in_slot(&mut self, path: &str, slot: TextureSlot, flags: TextureFlags) -> RenderResult<()> {
        let command = ListCommand::SetTexture { path: path.to_string(), slot, flags, team_colors: Vec::new(), force_load_now: false };
        if self.record(command) {
            return Ok(());
        }
        let binding = self.textures.get_texture(&mut self.backend, path, flags, &[], false)?;
        self.bind_slot(slot, binding)
    }

    fn set_team_texture(&mut self, path: &str, team_colors: &[TeamColor], flags: TextureFlags) -> RenderResult<()> {
        let command = ListCommand::SetTexture {
            path: path.to_string(),
            slot: TextureSlot::Diffuse,
            flags,
            team_colors: team_colors.to_vec(),
            force_load_now: false,
        };
        if self.record(command) {
            return Ok(());
        }
        let binding = self.textures.get_texture(&mut self.backend, path, flags, team_colors, false)?;
        self.bind_slot(TextureSlot::Diffuse, binding)
    }

    fn set_cubemap_texture(&mut self, faces: &[String; 6], slot: TextureSlot) -> RenderResult<()> {
        if self.record(ListCommand::SetCubemap { faces: Box::new(faces.clone()), slot }) {
            return Ok(());
        }
        let binding = self.textures.get_cubemap(&mut self.backend, faces, false)?;
        self.bind_slot(slot, binding)
    }

    fn set_texture_binding(&mut self, binding: &TextureBinding, slot: TextureSlot) -> RenderResult<()> {
        if self.record(ListCommand::BindTexture { binding: binding.clone(), slot }) {
            return Ok(());
        }
        self.bind_slot(slot, binding.clone())
    }

    fn unbind_texture(&mut self, slot: TextureSlot) {
        if self.record(ListCommand::UnbindTexture(slot)) {
            return;
        }
        self.slots[slot.index()] = None;
        if let Err(err) = self.backend.bind_texture(slot, None) {
            log::warn!("Failed to unbind texture slot {:?}: {}", slot, err);
        }
    }

    fn bound_texture(&self, slot: TextureSlot) -> Option<TextureId> {
        self.slots[slot.index()].as_ref().map(TextureBinding::id)
    }

    fn create_texture(&mut self, data: Option<&[u8]>, width: u32, height: u32, kind: CachedTextureType) -> RenderResult<CachedTexture> {
        self.backend.create_texture(data, width, height, kind)
    }

    fn create_empty_texture(&mut self, cubemap: bool) -> RenderResult<CachedTexture> {
        self.backend.create_empty_texture(cubemap)
    }

    fn upload_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        self.backend.upload_texture(texture, image, flags)
    }

    fn upload_compressed_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        self.backend.upload_compressed_texture(texture, image, flags)
    }

    fn upload_cubemap(&mut self, texture: &mut CachedTexture, sides: &[TextureImage; 6], flags: TextureFlags) -> RenderResult<()> {
        self.backend.upload_cubemap(texture, sides, flags)
    }

    fn set_texture_anisotropy(&mut self, value: f32) {
        if !self.backend.supports_feature(Feature::Anisotropy) {
            if value > 1.0 {
                log::info!("Anisotropic filtering not supported by {}, ignoring level {}", self.backend.name(), value);
            }
            return;
        }
        self.anisotropy = value.clamp(1.0, self.backend.max_anisotropy());
        self.backend.set_anisotropy(self.anisotropy);
    }

    fn max_anisotropy(&self) -> f32 {
        self.backend.max_anisotropy()
    }

    fn render_to_texture(&mut self, texture: &mut CachedTexture, width: u32, height: u32, func: &mut DrawFn<'_>) -> RenderResult<()> {
        self.reject_while_recording("render_to_texture")?;
        let saved = self.save_target();
        self.backend.begin_render_to_texture(texture, width, height)?;
        self.render_target_depth += 1;

        let scope = TargetScope { engine: self, saved: Some(saved) };
        scope.engine.apply_viewport(ViewportRect::new(0, 0, width, height));
        scope.engine.matrices.set_orthographic_projection(0.0, width as f32, 0.0, height as f32);
        scope.engine.matrices.reset_model_view();

        let clear_color = texture.kind() != CachedTextureType::Depth;
        let result = scope.engine.backend.clear(clear_color, true).and_then(|()| func(&mut *scope.engine));
        let finished = scope.finish();

        if result.is_ok() && finished.is_ok() {
            texture.mark_ready(width, height);
        }
        result.and(finished)
    }

    fn create_occlusion_query(&mut self) -> RenderResult<Box<dyn OcclusionQuery>> {
        self.backend.create_occlusion_query()
    }

    fn run_occlusion_query(&mut self, query: &mut dyn OcclusionQuery, render_to_screen: bool, handler: &mut DrawFn<'_>) -> RenderResult<()> {
        self.reject_while_recording("run_occlusion_query")?;
        if !render_to_screen {
            self.backend.set_write_masks(false);
        }
        let result = match self.backend.begin_occlusion_query(query) {
            Ok(()) => {
                let drawn = handler(self);
                let ended = self.backend.end_occlusion_query(query);
                drawn.and(ended)
            }
            Err(err) => Err(err),
        };
        if !render_to_screen {
            self.backend.set_write_masks(true);
        }
        result
    }

    fn set_up_viewport(&mut self, rect: ViewportRect, field_of_view: f32, near: f32, far: f32) {
        if self.recorder.is_some() {
            log::debug!("set_up_viewport is applied immediately, not recorded");
        }
        self.apply_viewport(rect);
        self.matrices.set_up_viewport(rect.width, rect.height, field_of_view, near, far);
    }

    fn viewport_rect(&self) -> ViewportRect {
        self.viewport
    }

    fn enable_depth_test(&mut self, enable: bool) {
        if !self.record(ListCommand::DepthTest(enable)) {
            self.depth_test = enable;
            self.backend.set_depth_test(enable);
        }
    }

    fn enable_blending(&mut self, enable: bool) {
        if !self.record(ListCommand::Blending(enable)) {
            self.blending = enable;
            self.backend.set_blending(enable);
        }
    }

    fn enable_polygon_offset(&mut self, enable: bool, factor: f32, units: f32) {
        if !self.record(ListCommand::PolygonOffset { enable, factor, units }) {
            self.polygon_offset = enable.then_some((factor, units));
            self.backend.set_polygon_offset(self.polygon_offset);
        }
    }

    fn polygon_offset(&self) -> Option<(f32, f32)> {
        self.polygon_offset
    }

    fn enable_multisampling(&mut self, enable: bool) {
        if !self.backend.set_multisampling(enable) && enable {
            log::info!("Multisampling not supported by {}, ignoring", self.backend.name());
        }
    }

    fn clear_buffers(&mut self, color: bool, depth: bool) -> RenderResult<()> {
        self.backend.clear(color, depth)
    }

    fn draw_in_2d(&mut self, handler: &mut DrawFn<'_>) -> RenderResult<()> {
        self.reject_while_recording("draw_in_2d")?;
        let rect = self.viewport;
        self.matrices.save_matrices();
        self.matrices.set_orthographic_projection(0.0, rect.width as f32, rect.height as f32, 0.0);
        self.matrices.reset_model_view();

        let result = handler(self);
        let restored = self.matrices.restore_matrices();
        result.and(restored)
    }
}
