//! The DirectX [`RenderBackend`]

use std::any::Any;
use std::rc::Rc;

use nalgebra::Vector3;
use wgpu::util::DeviceExt;

use super::arena::{CpuArena, GpuBuffer};
use super::buffers::{DxIndexBuffer, DxVertexBuffer};
use super::commands::{encode_pass, viewport_state, BufferSource, EncodeResources, PassCommand, PassTarget, RecordedDraw, RecordedPass};
use super::context::{Acquired, DxContext};
use super::pipeline::{topology, Layouts, PassKind, PipelineCache, PipelineKey};
use super::query::{DxQuery, QuerySets};
use super::shader::DxShaderManager;
use super::texture::{DxTexture, Placeholders};
use super::{foreign, BACKEND};
use crate::core::DirectXRendererConfig;
use crate::foundation::math::{ClipSpace, Mat4};
use crate::render::api::OcclusionQuery;
use crate::render::backend::{close_loop, DrawCall, DrawConstants, DrawIndexes, DrawVertices, RenderBackend};
use crate::render::shader::{names, scene_block, ShaderManager};
use crate::render::texture::{CachedTexture, TextureBinding};
use crate::render::vertex::VertexArrays;
use crate::render::{Feature, RenderError, RenderMode, RenderResult, TextureSlot, ViewportRect};

const CLEAR_COLOR: wgpu::Color = wgpu::Color::BLACK;

/// Frames whose occlusion results may be in flight
const FRAME_SLOTS: usize = 3;

const STREAM_ALIGNMENT: usize = 16;
const STREAM_INITIAL_SIZE: u64 = 1 << 20;

/// Normal (0, 0, 1) followed by uv (0, 0), read with stride 0 when a stream is missing
const DEFAULT_ATTRIBUTES: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
const DEFAULT_UV_OFFSET: u64 = 16;

/// How the active render-to-texture is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redirect {
    /// Between two screen passes of the open frame
    InFrame,
    /// On its own, submitted when the redirection ends
    Standalone,
}

/// Fixed-function state folded into pipeline keys
#[derive(Debug, Clone, Copy)]
struct DrawState {
    viewport: ViewportRect,
    depth_test: bool,
    blending: bool,
    write_masks: bool,
    depth_bias: Option<(f32, f32)>,
}

/// The open frame
struct Frame {
    surface: wgpu::SurfaceTexture,
    screen: PassTarget,
}

/// Projection for a texture target: y is flipped so the first row holds the bottom of the image
fn texture_target_projection(projection: &Mat4) -> Mat4 {
    Mat4::new_nonuniform_scaling(&Vector3::new(1.0, -1.0, 1.0)) * projection
}

fn uniform_group(device: &wgpu::Device, layouts: &Layouts, buffer: &wgpu::Buffer) -> wgpu::BindGroup {
    let binding = |binding: u32, size: usize| wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer,
            offset: 0,
            size: wgpu::BufferSize::new(size as u64),
        }),
    };
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Uniforms Bind Group"),
        layout: &layouts.uniforms,
        entries: &[binding(0, scene_block::SIZE), binding(1, std::mem::size_of::<DrawConstants>())],
    })
}

/// DirectX implementation of [`RenderBackend`]
pub struct DxBackend {
    shaders: DxShaderManager,
    state: DrawState,
    slots: [Option<Rc<DxTexture>>; TextureSlot::COUNT],
    placeholders: Placeholders,
    pub(super) anisotropy: f32,

    frame: Option<Frame>,
    pass: Option<RecordedPass>,
    pass_kind: PassKind,
    finished: Vec<RecordedPass>,
    redirect: Option<Redirect>,
    pending_resize: Option<(u32, u32)>,
    frame_number: u64,
    frame_slot: usize,
    scene_offset: Option<u32>,
    query_active: bool,
    warned_outside_frame: bool,

    uniforms: CpuArena,
    stream: CpuArena,
    uniform_alignment: usize,
    uniform_buffer: GpuBuffer,
    uniform_group: wgpu::BindGroup,
    stream_buffer: GpuBuffer,
    defaults: wgpu::Buffer,

    queries: Rc<QuerySets>,
    pipelines: PipelineCache,
    pub(super) layouts: Layouts,
    pub(super) context: DxContext,
}

impl DxBackend {
    /// Open a DX12 device presenting to `target`
    ///
    /// # Errors
    /// `InitializationFailed` for an invalid configuration, on hosts without a DX12 adapter
    /// or when the built-in program does not compile.
    ///
    /// # Safety
    /// The window behind `target` must outlive the backend.
    pub unsafe fn new(target: wgpu::SurfaceTargetUnsafe, size: (u32, u32), config: &DirectXRendererConfig) -> RenderResult<Self> {
        config.validate().map_err(RenderError::InitializationFailed)?;
        let context = DxContext::new(target, size, config)?;
        let device = Rc::clone(&context.device);

        let layouts = Layouts::new(&device);
        let shaders = DxShaderManager::new(&device)
            .map_err(|e| RenderError::InitializationFailed(format!("built-in program: {e}")))?;
        let placeholders = Placeholders::new(&device, &context.queue, &layouts);
        let uniform_buffer = GpuBuffer::new(&device, "Uniform Arena", wgpu::BufferUsages::UNIFORM, config.uniform_arena_size);
        let uniform_group = uniform_group(&device, &layouts, uniform_buffer.buffer());
        let stream_buffer = GpuBuffer::new(
            &device,
            "Vertex Stream",
            wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::INDEX,
            STREAM_INITIAL_SIZE,
        );
        let defaults = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Default Attributes"),
            contents: bytemuck::cast_slice(&DEFAULT_ATTRIBUTES),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let uniform_alignment = device.limits().min_uniform_buffer_offset_alignment as usize;
        let queries = QuerySets::new(&device, FRAME_SLOTS, config.query_pool_size);
        let size = context.size();
        log::info!("{} backend ready: {}x{}, {:?}", BACKEND, size.0, size.1, context.color_format());

        Ok(Self {
            shaders,
            state: DrawState {
                viewport: ViewportRect::new(0, 0, size.0, size.1),
                depth_test: false,
                blending: false,
                write_masks: true,
                depth_bias: None,
            },
            slots: Default::default(),
            placeholders,
            anisotropy: 1.0,
            frame: None,
            pass: None,
            pass_kind: PassKind::Screen,
            finished: Vec::new(),
            redirect: None,
            pending_resize: None,
            frame_number: 0,
            frame_slot: 0,
            scene_offset: None,
            query_active: false,
            warned_outside_frame: false,
            uniforms: CpuArena::default(),
            stream: CpuArena::default(),
            uniform_alignment,
            uniform_buffer,
            uniform_group,
            stream_buffer,
            defaults,
            queries,
            pipelines: PipelineCache::new(context.color_format()),
            layouts,
            context,
        })
    }

    /// Upload the arenas, encode `passes` and submit them
    fn submit(&mut self, passes: Vec<RecordedPass>, query_slot: Option<usize>) {
        let device = &self.context.device;
        let queue = &self.context.queue;
        if self.uniform_buffer.write(device, queue, self.uniforms.padded()) {
            self.uniform_group = uniform_group(device, &self.layouts, self.uniform_buffer.buffer());
        }
        if !self.stream.is_empty() {
            self.stream_buffer.write(device, queue, self.stream.padded());
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") });
        let resources = EncodeResources {
            uniforms: &self.uniform_group,
            stream: self.stream_buffer.buffer(),
            defaults: &self.defaults,
            queries: query_slot.map(|slot| self.queries.set(slot)),
        };
        for pass in &passes {
            encode_pass(&mut encoder, pass, &resources);
        }
        if let Some(slot) = query_slot {
            self.queries.resolve(&mut encoder, slot);
        }
        queue.submit(Some(encoder.finish()));
        if let Some(slot) = query_slot {
            self.queries.map_results(slot);
        }
        log::trace!("Submitted {} passes", passes.len());

        self.uniforms.reset();
        self.stream.reset();
        self.scene_offset = None;
    }

    /// Dynamic offset of the scene block, staging it when it changed
    fn scene_offset(&mut self) -> u32 {
        let dirty = self.shaders.block_mut().take_dirty();
        if let (false, Some(offset)) = (dirty, self.scene_offset) {
            return offset;
        }
        let offset = self.uniforms.push(self.shaders.block_mut().bytes(), self.uniform_alignment) as u32;
        self.scene_offset = Some(offset);
        offset
    }

    /// Bind group sampling `slot`; empty slots, cube maps and mismatched kinds sample a placeholder
    fn slot_group(&self, slot: TextureSlot, depth: bool) -> Rc<wgpu::BindGroup> {
        self.slots[slot.index()].as_ref().and_then(|texture| texture.bind_group(depth)).unwrap_or_else(|| {
            Rc::clone(if depth { &self.placeholders.depth } else { &self.placeholders.color })
        })
    }

    /// Source, offset, first index and count of the indexes of `call`, if indexed
    fn index_source(&mut self, call: &DrawCall<'_>) -> RenderResult<Option<(BufferSource, u64, u32, u32)>> {
        let closing = call.mode == RenderMode::LineLoop;
        let closed = match call.indexes {
            DrawIndexes::None if closing => close_loop(0..call.vertex_count as u32),
            DrawIndexes::None => return Ok(None),
            DrawIndexes::Resident { native, begin, count } => {
                let buffer = native.downcast_ref::<DxIndexBuffer>().ok_or_else(|| foreign("index buffer"))?;
                if !closing {
                    return Ok(Some((BufferSource::Resident(Rc::clone(&buffer.buffer)), 0, begin as u32, count as u32)));
                }
                let range = buffer.indexes.get(begin..begin + count).ok_or(RenderError::IndexOutOfRange {
                    begin,
                    count,
                    len: buffer.indexes.len(),
                })?;
                close_loop(range.iter().copied())
            }
            DrawIndexes::Streamed(indexes) if closing => close_loop(indexes.iter().copied()),
            DrawIndexes::Streamed(indexes) => indexes.to_vec(),
        };
        let offset = self.stream.push(bytemuck::cast_slice(&closed), STREAM_ALIGNMENT);
        Ok(Some((BufferSource::Stream, offset, 0, closed.len() as u32)))
    }

    fn warn_outside_frame(&mut self) {
        if !self.warned_outside_frame {
            log::warn!("Draw outside begin_frame/end_frame ignored");
            self.warned_outside_frame = true;
        }
    }
}

impl RenderBackend for DxBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn clip_space(&self) -> ClipSpace {
        ClipSpace::ZeroToOne
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::Instancing | Feature::OcclusionQueries | Feature::Anisotropy => true,
            Feature::CompressedTextures => self.context.compressed_bc,
            Feature::Multisampling | Feature::GeometryShaders => false,
        }
    }

    fn shader_manager(&mut self) -> &mut dyn ShaderManager {
        &mut self.shaders
    }

    fn surface_size(&self) -> (u32, u32) {
        self.context.size()
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        if self.frame.is_some() || self.redirect.is_some() {
            return Err(RenderError::InvalidOperation("begin_frame inside an open frame".to_string()));
        }
        if let Some((width, height)) = self.pending_resize.take() {
            self.context.resize(width, height);
        }
        let surface = match self.context.acquire()? {
            Acquired::Frame(surface) => surface,
            Acquired::Skip => return Ok(()),
        };

        self.frame_number += 1;
        self.queries.begin_slot(self.frame_slot, self.frame_number);
        let view = surface.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let screen = PassTarget {
            color: Some(Rc::new(view)),
            depth: self.context.depth_view(),
            size: (surface.texture.width(), surface.texture.height()),
            flip: true,
        };
        let mut pass = RecordedPass::load(screen.clone(), true);
        pass.clear_color = Some(CLEAR_COLOR);
        pass.clear_depth = Some(1.0);
        self.pass = Some(pass);
        self.pass_kind = PassKind::Screen;
        self.frame = Some(Frame { surface, screen });
        Ok(())
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        if self.redirect.is_some() {
            return Err(RenderError::InvalidOperation("frame ended inside render_to_texture".to_string()));
        }
        let Some(Frame { surface, .. }) = self.frame.take() else { return Ok(()) };

        let mut passes = std::mem::take(&mut self.finished);
        passes.extend(self.pass.take());
        self.submit(passes, Some(self.frame_slot));

        let suboptimal = surface.suboptimal;
        surface.present();
        self.frame_slot = (self.frame_slot + 1) % FRAME_SLOTS;
        if let Some((width, height)) = self.pending_resize.take() {
            self.context.resize(width, height);
        } else if suboptimal {
            log::debug!("Surface suboptimal, reconfiguring");
            self.context.reconfigure();
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if self.frame.is_some() {
            self.pending_resize = Some((width, height));
        } else {
            self.context.resize(width, height);
        }
        Ok(())
    }

    fn set_viewport(&mut self, rect: ViewportRect) {
        self.state.viewport = rect;
    }

    fn set_depth_test(&mut self, enable: bool) {
        self.state.depth_test = enable;
    }

    fn set_blending(&mut self, enable: bool) {
        self.state.blending = enable;
    }

    fn set_polygon_offset(&mut self, offset: Option<(f32, f32)>) {
        self.state.depth_bias = offset;
    }

    fn set_multisampling(&mut self, _enable: bool) -> bool {
        false
    }

    fn set_write_masks(&mut self, enable: bool) {
        self.state.write_masks = enable;
    }

    fn clear(&mut self, color: bool, depth: bool) -> RenderResult<()> {
        let Some(pass) = self.pass.as_mut() else { return Ok(()) };
        let color = color && pass.target.color.is_some();
        if !color && !depth {
            return Ok(());
        }
        if !pass.commands.is_empty() {
            if self.query_active {
                log::warn!("Clear inside an occlusion query ignored");
                return Ok(());
            }
            let next = pass.next();
            self.finished.push(std::mem::replace(pass, next));
        }
        if color {
            pass.clear_color = Some(CLEAR_COLOR);
        }
        if depth {
            pass.clear_depth = Some(1.0);
        }
        Ok(())
    }

    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<&TextureBinding>) -> RenderResult<()> {
        self.slots[slot.index()] = match texture {
            Some(binding) => Some(binding.native_rc::<DxTexture>().ok_or_else(|| foreign("texture"))?),
            None => None,
        };
        Ok(())
    }

    fn set_anisotropy(&mut self, level: f32) {
        self.anisotropy = level.clamp(1.0, self.max_anisotropy());
    }

    fn max_anisotropy(&self) -> f32 {
        f32::from(self.context.max_anisotropy)
    }

    fn create_vertex_buffer(&mut self, arrays: &VertexArrays<'_>) -> RenderResult<Rc<dyn Any>> {
        Ok(Rc::new(DxVertexBuffer::new(&self.context.device, &arrays.pack())))
    }

    fn create_index_buffer(&mut self, indexes: &[u32]) -> RenderResult<Rc<dyn Any>> {
        Ok(Rc::new(DxIndexBuffer::new(&self.context.device, indexes)))
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        let topology = topology(call.mode)
            .ok_or_else(|| RenderError::InvalidOperation("rectangles reached the backend unexpanded".to_string()))?;
        let Some(target) = self.pass.as_ref().map(|pass| (pass.target.size, pass.target.flip)) else {
            self.warn_outside_frame();
            return Ok(());
        };
        if call.element_count() == 0 || call.instance_count == 0 {
            return Ok(());
        }
        let (target_size, flip) = target;
        let Some((viewport, scissor)) = viewport_state(self.state.viewport, target_size, flip) else {
            return Ok(());
        };

        let uniforms = call.uniforms;
        let projection = if flip { uniforms.projection } else { texture_target_projection(&uniforms.projection) };
        self.shaders.set_uniform_f32(names::PROJECTION_MATRIX, 16, 1, projection.as_slice());
        let scene_offset = self.scene_offset();
        let draw_offset = self.uniforms.push(bytemuck::bytes_of(&DrawConstants::new(uniforms, call.flags)), self.uniform_alignment) as u32;

        let (source, offsets) = match call.vertices {
            DrawVertices::Streamed(arrays) => {
                let packed = arrays.pack();
                let base = self.stream.push(bytemuck::cast_slice(&packed.data), STREAM_ALIGNMENT);
                (BufferSource::Stream, packed.byte_offsets(base))
            }
            DrawVertices::Resident(native) => {
                let buffer = native.downcast_ref::<DxVertexBuffer>().ok_or_else(|| foreign("vertex buffer"))?;
                (BufferSource::Resident(Rc::clone(&buffer.buffer)), buffer.offsets)
            }
        };
        let indexes = self.index_source(call)?;

        let key = PipelineKey {
            program: self.shaders.active_program(),
            topology,
            depth_test: self.state.depth_test,
            blending: self.state.blending,
            write_masks: self.state.write_masks,
            depth_bias: PipelineKey::bias_bits(self.state.depth_bias),
            pass: self.pass_kind,
            normals: offsets.normals.is_some(),
            tex_coords: offsets.tex_coords.is_some(),
        };
        let program = self
            .shaders
            .program(key.program)
            .ok_or_else(|| RenderError::InvalidOperation(format!("unknown program {:?}", key.program)))?;
        let pipeline = self.pipelines.get_or_create(&self.context.device, &self.layouts, key, program)?;

        let stream_of = |offset: Option<u64>, default: u64| match offset {
            Some(offset) => (source.clone(), offset),
            None => (BufferSource::Defaults, default),
        };
        let draw = RecordedDraw {
            pipeline,
            viewport,
            scissor,
            uniform_offsets: [scene_offset, draw_offset],
            diffuse: self.slot_group(TextureSlot::Diffuse, false),
            shadow: self.slot_group(TextureSlot::ShadowMap, true),
            vertex_buffers: [
                (source.clone(), offsets.positions),
                stream_of(offsets.normals, 0),
                stream_of(offsets.tex_coords, DEFAULT_UV_OFFSET),
            ],
            indexes,
            vertex_count: call.vertex_count as u32,
            instances: call.instance_count as u32,
        };
        if let Some(pass) = self.pass.as_mut() {
            pass.commands.push(PassCommand::Draw(Box::new(draw)));
        }
        Ok(())
    }

    fn begin_render_to_texture(&mut self, texture: &mut CachedTexture, width: u32, height: u32) -> RenderResult<()> {
        if self.redirect.is_some() {
            return Err(RenderError::InvalidOperation("render_to_texture is already active".to_string()));
        }
        if self.query_active {
            return Err(RenderError::InvalidOperation("render_to_texture inside an occlusion query".to_string()));
        }
        let target = self.prepare_render_target(texture, width, height)?;

        let redirect = if self.frame.is_some() {
            self.finished.extend(self.pass.take());
            Redirect::InFrame
        } else {
            Redirect::Standalone
        };
        let pass_target = PassTarget { color: target.color, depth: target.depth, size: target.size, flip: false };
        self.pass = Some(RecordedPass::load(pass_target, redirect == Redirect::InFrame));
        self.pass_kind = target.pass;
        self.redirect = Some(redirect);
        Ok(())
    }

    fn end_render_to_texture(&mut self) -> RenderResult<()> {
        let Some(redirect) = self.redirect.take() else {
            return Err(RenderError::InvalidOperation("no render_to_texture is active".to_string()));
        };
        let Some(pass) = self.pass.take() else { return Ok(()) };

        match redirect {
            Redirect::Standalone => self.submit(vec![pass], None),
            Redirect::InFrame => {
                self.finished.push(pass);
                let Some(frame) = &self.frame else {
                    return Err(RenderError::RenderingFailed("frame lost its surface during render_to_texture".to_string()));
                };
                self.pass = Some(RecordedPass::load(frame.screen.clone(), true));
                self.pass_kind = PassKind::Screen;
            }
        }
        Ok(())
    }

    fn create_occlusion_query(&mut self) -> RenderResult<Box<dyn OcclusionQuery>> {
        Ok(Box::new(DxQuery::new(&self.queries)))
    }

    fn begin_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        let query = query.as_any_mut().downcast_mut::<DxQuery>().ok_or_else(|| foreign("occlusion query"))?;
        if self.query_active {
            return Err(RenderError::InvalidOperation("occlusion queries cannot nest".to_string()));
        }
        self.query_active = true;
        query.active = None;

        let pass = match (self.redirect, self.pass.as_mut()) {
            (Some(Redirect::Standalone), _) | (_, None) => {
                log::warn!("Occlusion query outside a frame is not counted");
                return Ok(());
            }
            (_, Some(pass)) => pass,
        };
        match self.queries.allocate(self.frame_slot) {
            Some(slot) => {
                pass.commands.push(PassCommand::BeginQuery(slot.index));
                query.active = Some(slot);
            }
            None => log::warn!("Occlusion query set of frame {} is full", self.frame_number),
        }
        Ok(())
    }

    fn end_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        let query = query.as_any_mut().downcast_mut::<DxQuery>().ok_or_else(|| foreign("occlusion query"))?;
        if !self.query_active {
            return Err(RenderError::InvalidOperation("occlusion query was not begun".to_string()));
        }
        self.query_active = false;
        if let (Some(slot), Some(pass)) = (query.active.take(), self.pass.as_mut()) {
            pass.commands.push(PassCommand::EndQuery);
            query.submitted(slot);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_texture_target_projection_flips_y() {
        let projection = Mat4::new_orthographic(0.0, 10.0, 0.0, 10.0, -1.0, 1.0);
        let flipped = texture_target_projection(&projection);
        let top = flipped.transform_point(&Point3::new(5.0, 10.0, 0.0));
        let bottom = flipped.transform_point(&Point3::new(5.0, 0.0, 0.0));
        assert!((top.y + 1.0).abs() < 1e-6);
        assert!((bottom.y - 1.0).abs() < 1e-6);
        assert_eq!(top.x, projection.transform_point(&Point3::new(5.0, 10.0, 0.0)).x);
    }

    #[test]
    fn test_default_attributes() {
        let uv = DEFAULT_UV_OFFSET as usize / std::mem::size_of::<f32>();
        assert_eq!(&DEFAULT_ATTRIBUTES[..3], &[0.0, 0.0, 1.0]);
        assert_eq!(&DEFAULT_ATTRIBUTES[uv..uv + 2], &[0.0, 0.0]);
    }
}
