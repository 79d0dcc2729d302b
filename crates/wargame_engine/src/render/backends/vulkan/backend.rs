//! The Vulkan [`RenderBackend`]

use std::any::Any;
use std::rc::Rc;

use ash::vk;

use super::arena::{StreamArena, UniformArena};
use super::buffers::{VulkanIndexBuffer, VulkanVertexBuffer};
use super::commands::CommandPool;
use super::context::{SurfaceSource, VulkanDevice, VulkanInstance, VulkanSurface};
use super::descriptors::{DescriptorAllocator, DescriptorLayouts};
use super::memory::Buffer;
use super::pipeline::{topology, PassKind, PipelineCache, PipelineKey, PipelineLayout, RenderPasses};
use super::query::{QueryPools, VulkanQuery};
use super::release::ReleaseQueue;
use super::shader::VulkanShaderManager;
use super::swapchain::{choose_surface_format, Acquired, Swapchain};
use super::sync::FrameSync;
use super::texture::VulkanTexture;
use super::{VulkanError, VulkanResult};
use crate::core::VulkanRendererConfig;
use crate::foundation::math::ClipSpace;
use crate::render::api::OcclusionQuery;
use crate::render::backend::{close_loop, DrawCall, DrawConstants, DrawIndexes, DrawVertices, RenderBackend};
use crate::render::shader::{names, ShaderManager};
use crate::render::texture::{CachedTexture, TextureBinding};
use crate::render::vertex::VertexArrays;
use crate::render::{Feature, RenderError, RenderMode, RenderResult, TextureSlot, ViewportRect};

const NAME: &str = "Vulkan";

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

const STREAM_ALIGNMENT: u64 = 16;

/// Normal (0, 0, 1) followed by uv (0, 0), read with stride 0 when a stream is missing
const DEFAULT_ATTRIBUTES: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
const DEFAULT_UV_OFFSET: vk::DeviceSize = 16;

/// One entry of the command buffer ring
struct FrameSlot {
    sync: FrameSync,
    cmd: vk::CommandBuffer,
    stream: StreamArena,
    uniforms: UniformArena,
    /// Last frame number submitted from this slot
    submitted: u64,
}

/// Render pass instance receiving draws
#[derive(Debug, Clone, Copy)]
struct Target {
    cmd: vk::CommandBuffer,
    pass: PassKind,
    extent: vk::Extent2D,
}

/// How the active render-to-texture was recorded
#[derive(Debug, Clone, Copy)]
enum Redirect {
    /// Inside the frame's command buffer, between two screen passes
    InFrame,
    /// In a command buffer of its own, submitted when the redirection ends
    OneShot(vk::CommandBuffer),
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

/// Vulkan implementation of [`RenderBackend`]
pub struct VulkanBackend {
    shaders: VulkanShaderManager,
    state: DrawState,
    slots: [Option<Rc<VulkanTexture>>; TextureSlot::COUNT],
    white: Option<Rc<VulkanTexture>>,
    defaults: Buffer,
    pub(super) anisotropy: f32,

    target: Option<Target>,
    redirect: Option<Redirect>,
    frame: Option<u32>,
    frame_number: u64,
    frame_slot: usize,
    scene_offset: Option<u32>,
    query_active: bool,
    warned_outside_frame: bool,

    queries: Rc<QueryPools>,
    frames: Vec<FrameSlot>,
    pipelines: PipelineCache,
    pipeline_layout: PipelineLayout,
    swapchain: Option<Swapchain>,
    needs_rebuild: bool,
    size: (u32, u32),
    prefer_mailbox: bool,
    pub(super) passes: RenderPasses,
    pub(super) descriptors: DescriptorAllocator,
    pub(super) layouts: DescriptorLayouts,
    pub(super) commands: CommandPool,
    pub(super) release: Rc<ReleaseQueue>,
    surface: VulkanSurface,
    pub(super) device: Rc<VulkanDevice>,
}

impl VulkanBackend {
    /// Create the instance, device and swapchain for `source`
    ///
    /// # Errors
    /// `InitializationFailed` for an invalid configuration, a missing Vulkan 1.1 device or
    /// unreadable built-in shaders; API errors otherwise.
    pub fn new(source: &dyn SurfaceSource, config: &VulkanRendererConfig) -> RenderResult<Self> {
        config.validate().map_err(RenderError::InitializationFailed)?;

        let instance = Rc::new(VulkanInstance::new(source, config)?);
        let surface = VulkanSurface::new(&instance, source)?;
        let device = Rc::new(VulkanDevice::new(&instance, &surface)?);

        let formats = unsafe { surface.loader.get_physical_device_surface_formats(device.physical, surface.surface) }
            .map_err(VulkanError::Api)?;
        let screen_format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))?
            .format;
        let passes = RenderPasses::new(&device, screen_format)?;

        let size = source.framebuffer_size();
        let swapchain = if size.0 > 0 && size.1 > 0 {
            Some(Swapchain::new(&device, &surface, size, config.prefer_mailbox, None, passes.screen_first)?)
        } else {
            None
        };

        let release = ReleaseQueue::new(&device);
        let commands = CommandPool::new(&device)?;
        let layouts = DescriptorLayouts::new(&device)?;
        let mut descriptors = DescriptorAllocator::new(&device, config.descriptor_pool_size)?;

        let frames = commands
            .allocate(config.max_frames_in_flight as u32)?
            .into_iter()
            .map(|cmd| -> VulkanResult<FrameSlot> {
                Ok(FrameSlot {
                    sync: FrameSync::new(&device)?,
                    cmd,
                    stream: StreamArena::new(&device, config.vertex_cache_chunk_size),
                    uniforms: UniformArena::new(&device, &mut descriptors, layouts.uniforms, config.uniform_arena_size)?,
                    submitted: 0,
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        let shaders = VulkanShaderManager::new(&device, &config.shaders)
            .map_err(|e| RenderError::InitializationFailed(format!("built-in program: {e}")))?;
        let defaults = Buffer::device_local(
            &device,
            &commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(&DEFAULT_ATTRIBUTES),
        )?;
        let pipeline_layout = PipelineLayout::new(&device, &layouts)?;
        let queries = QueryPools::new(&device, frames.len(), config.query_pool_size)?;

        let mut backend = Self {
            shaders,
            state: DrawState {
                viewport: ViewportRect::new(0, 0, size.0, size.1),
                depth_test: false,
                blending: false,
                write_masks: true,
                depth_bias: None,
            },
            slots: Default::default(),
            white: None,
            defaults,
            anisotropy: 1.0,
            target: None,
            redirect: None,
            frame: None,
            frame_number: 0,
            frame_slot: 0,
            scene_offset: None,
            query_active: false,
            warned_outside_frame: false,
            queries,
            frames,
            pipelines: PipelineCache::new(&device),
            pipeline_layout,
            swapchain,
            needs_rebuild: false,
            size,
            prefer_mailbox: config.prefer_mailbox,
            passes,
            descriptors,
            layouts,
            commands,
            release,
            surface,
            device,
        };
        backend.white = Some(backend.create_white_texture()?);

        log::info!(
            "{} backend ready: {}x{}, {:?}, {} frames in flight",
            NAME,
            size.0,
            size.1,
            screen_format,
            backend.frames.len()
        );
        Ok(backend)
    }

    /// Wait for the current slot's previous frame and recycle what it used
    fn recycle_slot(&mut self) -> VulkanResult<()> {
        let slot = &mut self.frames[self.frame_slot];
        slot.sync.wait()?;
        let released = self.release.collect(slot.submitted);
        if released > 0 {
            log::trace!("Released {} objects of frame {}", released, slot.submitted);
        }
        slot.stream.reset();
        slot.uniforms.reset();
        self.scene_offset = None;
        Ok(())
    }

    fn rebuild_swapchain(&mut self) -> VulkanResult<()> {
        self.needs_rebuild = false;
        self.device.wait_idle();
        let old = self.swapchain.take();
        if self.size.0 == 0 || self.size.1 == 0 {
            log::debug!("Surface has no area, swapchain released");
            return Ok(());
        }
        let swapchain =
            Swapchain::new(&self.device, &self.surface, self.size, self.prefer_mailbox, old.as_ref(), self.passes.screen_first)?;
        let extent = swapchain.extent();
        log::debug!("Swapchain rebuilt at {}x{}", extent.width, extent.height);
        self.swapchain = Some(swapchain);
        Ok(())
    }

    /// Next swapchain image, rebuilding once when the swapchain is out of date
    fn acquire(&mut self) -> VulkanResult<Option<u32>> {
        for _ in 0..2 {
            let Some(swapchain) = &self.swapchain else { return Ok(None) };
            match swapchain.acquire(self.frames[self.frame_slot].sync.image_available)? {
                Acquired::Image(index) => return Ok(Some(index)),
                Acquired::OutOfDate => {
                    self.rebuild_swapchain()?;
                    self.frames[self.frame_slot].sync.renew_image_available()?;
                }
            }
        }
        Ok(None)
    }

    fn begin_pass(&self, cmd: vk::CommandBuffer, render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, extent: vk::Extent2D) {
        let clear_values = [
            vk::ClearValue { color: vk::ClearColorValue { float32: CLEAR_COLOR } },
            vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 } },
        ];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D { offset: vk::Offset2D::default(), extent })
            .clear_values(&clear_values);
        unsafe { self.device.device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE) };
    }

    /// Dynamic offset of the scene block, uploading it when it changed
    fn scene_offset(&mut self) -> VulkanResult<u32> {
        let dirty = self.shaders.block_mut().take_dirty();
        if let (false, Some(offset)) = (dirty, self.scene_offset) {
            return Ok(offset);
        }
        let slot = &mut self.frames[self.frame_slot];
        let offset =
            slot.uniforms.push(self.shaders.block_mut().bytes(), &mut self.descriptors, self.layouts.uniforms, &self.release)?;
        self.scene_offset = Some(offset);
        Ok(offset)
    }

    /// Descriptor set sampling `slot`; empty slots and cube maps sample white
    fn sampler_set(&self, slot: TextureSlot) -> vk::DescriptorSet {
        self.slots[slot.index()]
            .as_ref()
            .filter(|texture| !texture.is_cubemap())
            .and_then(|texture| texture.descriptor_set())
            .or_else(|| self.white.as_ref().and_then(|white| white.descriptor_set()))
            .unwrap_or_default()
    }

    /// Buffer, offset, first index and count of the indexes of `call`, if indexed
    fn index_source(&mut self, call: &DrawCall<'_>) -> RenderResult<Option<(vk::Buffer, vk::DeviceSize, u32, u32)>> {
        let closing = call.mode == RenderMode::LineLoop;
        let closed = match call.indexes {
            DrawIndexes::None if closing => close_loop(0..call.vertex_count as u32),
            DrawIndexes::None => return Ok(None),
            DrawIndexes::Resident { native, begin, count } => {
                let buffer = native.downcast_ref::<VulkanIndexBuffer>().ok_or_else(|| foreign("index buffer"))?;
                if !closing {
                    return Ok(Some((buffer.handle(), 0, begin as u32, count as u32)));
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
        let (buffer, offset) = self.frames[self.frame_slot].stream.push(bytemuck::cast_slice(&closed), STREAM_ALIGNMENT)?;
        Ok(Some((buffer, offset, 0, closed.len() as u32)))
    }

    fn warn_outside_frame(&mut self) {
        if !self.warned_outside_frame {
            log::warn!("Draw outside begin_frame/end_frame ignored");
            self.warned_outside_frame = true;
        }
    }
}

/// Viewport and scissor of `rect` on a target `target_height` pixels high
///
/// Screen passes flip y through a negative viewport height, so bottom-left rectangles and
/// y-up projections come out upright. Texture targets are not flipped: their first row then
/// holds the bottom of the image, the same row order uploaded textures have.
fn viewport_state(rect: ViewportRect, target_height: u32, flip: bool) -> (vk::Viewport, vk::Rect2D) {
    let (width, height) = (rect.width as f32, rect.height as f32);
    let top = if flip { target_height as i32 - (rect.y + rect.height as i32) } else { rect.y };
    let viewport = if flip {
        vk::Viewport { x: rect.x as f32, y: top as f32 + height, width, height: -height, min_depth: 0.0, max_depth: 1.0 }
    } else {
        vk::Viewport { x: rect.x as f32, y: top as f32, width, height, min_depth: 0.0, max_depth: 1.0 }
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: rect.x.max(0), y: top.max(0) },
        extent: vk::Extent2D { width: rect.width, height: rect.height },
    };
    (viewport, scissor)
}

fn foreign(what: &str) -> RenderError {
    RenderError::InvalidOperation(format!("{what} was not created by the {NAME} renderer"))
}

impl RenderBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn clip_space(&self) -> ClipSpace {
        ClipSpace::ZeroToOne
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        match feature {
            Feature::Instancing | Feature::OcclusionQueries => true,
            Feature::Anisotropy => self.device.features.anisotropy,
            Feature::Multisampling => false,
            Feature::CompressedTextures => self.device.features.compressed_bc,
            Feature::GeometryShaders => self.device.features.geometry_shader,
        }
    }

    fn shader_manager(&mut self) -> &mut dyn ShaderManager {
        &mut self.shaders
    }

    fn surface_size(&self) -> (u32, u32) {
        self.swapchain.as_ref().map_or(self.size, |swapchain| {
            let extent = swapchain.extent();
            (extent.width, extent.height)
        })
    }

    fn begin_frame(&mut self) -> RenderResult<()> {
        if self.frame.is_some() || self.redirect.is_some() {
            return Err(RenderError::InvalidOperation("begin_frame inside an open frame".to_string()));
        }
        if self.needs_rebuild {
            self.rebuild_swapchain()?;
        }
        if self.swapchain.is_none() {
            return Ok(());
        }
        self.recycle_slot()?;
        let Some(image_index) = self.acquire()? else {
            log::warn!("Swapchain unavailable, frame skipped");
            return Ok(());
        };

        self.frame_number += 1;
        self.release.set_frame(self.frame_number);
        let cmd = self.frames[self.frame_slot].cmd;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.device.begin_command_buffer(cmd, &begin_info) }.map_err(VulkanError::Api)?;
        self.queries.begin_slot(cmd, self.frame_slot, self.frame_number);

        let Some(swapchain) = &self.swapchain else { return Ok(()) };
        let (framebuffer, extent) = (swapchain.framebuffer(image_index), swapchain.extent());
        self.begin_pass(cmd, self.passes.screen_first, framebuffer, extent);
        self.target = Some(Target { cmd, pass: PassKind::Screen, extent });
        self.frame = Some(image_index);
        Ok(())
    }

    fn end_frame(&mut self) -> RenderResult<()> {
        if self.redirect.is_some() {
            return Err(RenderError::InvalidOperation("frame ended inside render_to_texture".to_string()));
        }
        let Some(image_index) = self.frame.take() else { return Ok(()) };
        self.target = None;

        let slot = &mut self.frames[self.frame_slot];
        let raw = &self.device.device;
        unsafe {
            raw.cmd_end_render_pass(slot.cmd);
            raw.end_command_buffer(slot.cmd).map_err(VulkanError::Api)?;
        }
        slot.sync.reset()?;

        let waits = [slot.sync.image_available];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let buffers = [slot.cmd];
        let signals = [slot.sync.render_finished];
        let submit = vk::SubmitInfo::builder()
            .wait_semaphores(&waits)
            .wait_dst_stage_mask(&stages)
            .command_buffers(&buffers)
            .signal_semaphores(&signals)
            .build();
        unsafe { raw.queue_submit(self.device.graphics_queue, &[submit], slot.sync.in_flight) }.map_err(VulkanError::Api)?;
        slot.submitted = self.frame_number;

        let presented = match &self.swapchain {
            Some(swapchain) => swapchain.present(self.device.present_queue, image_index, slot.sync.render_finished)?,
            None => true,
        };
        self.frame_slot = (self.frame_slot + 1) % self.frames.len();
        if !presented || self.needs_rebuild {
            self.rebuild_swapchain()?;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.size = (width, height);
        if self.frame.is_some() {
            self.needs_rebuild = true;
            return Ok(());
        }
        Ok(self.rebuild_swapchain()?)
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
        let Some(target) = self.target else { return Ok(()) };
        let mut attachments = Vec::with_capacity(2);
        if color && target.pass != PassKind::DepthTarget {
            attachments.push(vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                color_attachment: 0,
                clear_value: vk::ClearValue { color: vk::ClearColorValue { float32: CLEAR_COLOR } },
            });
        }
        if depth {
            attachments.push(vk::ClearAttachment {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                color_attachment: 0,
                clear_value: vk::ClearValue { depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 } },
            });
        }
        if attachments.is_empty() {
            return Ok(());
        }
        let rect = vk::ClearRect {
            rect: vk::Rect2D { offset: vk::Offset2D::default(), extent: target.extent },
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe { self.device.device.cmd_clear_attachments(target.cmd, &attachments, &[rect]) };
        Ok(())
    }

    fn bind_texture(&mut self, slot: TextureSlot, texture: Option<&TextureBinding>) -> RenderResult<()> {
        self.slots[slot.index()] = match texture {
            Some(binding) => Some(binding.native_rc::<VulkanTexture>().ok_or_else(|| foreign("texture"))?),
            None => None,
        };
        Ok(())
    }

    fn set_anisotropy(&mut self, level: f32) {
        self.anisotropy = level.clamp(1.0, self.max_anisotropy());
    }

    fn max_anisotropy(&self) -> f32 {
        if self.device.features.anisotropy {
            self.device.limits.max_sampler_anisotropy
        } else {
            1.0
        }
    }

    fn create_vertex_buffer(&mut self, arrays: &VertexArrays<'_>) -> RenderResult<Rc<dyn Any>> {
        Ok(Rc::new(VulkanVertexBuffer::new(&self.device, &self.commands, &self.release, &arrays.pack())?))
    }

    fn create_index_buffer(&mut self, indexes: &[u32]) -> RenderResult<Rc<dyn Any>> {
        Ok(Rc::new(VulkanIndexBuffer::new(&self.device, &self.commands, &self.release, indexes)?))
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> RenderResult<()> {
        let topology = topology(call.mode)
            .ok_or_else(|| RenderError::InvalidOperation("rectangles reached the backend unexpanded".to_string()))?;
        let Some(target) = self.target else {
            self.warn_outside_frame();
            return Ok(());
        };
        if call.element_count() == 0 || call.instance_count == 0 {
            return Ok(());
        }

        let uniforms = call.uniforms;
        if uniforms.matrices_dirty {
            self.shaders.set_uniform_f32(names::PROJECTION_MATRIX, 16, 1, uniforms.projection.as_slice());
        }
        let scene_offset = self.scene_offset()?;

        let (vertex_buffer, offsets) = match call.vertices {
            DrawVertices::Streamed(arrays) => {
                let packed = arrays.pack();
                let (buffer, base) =
                    self.frames[self.frame_slot].stream.push(bytemuck::cast_slice(&packed.data), STREAM_ALIGNMENT)?;
                (buffer, packed.byte_offsets(base))
            }
            DrawVertices::Resident(native) => {
                let buffer = native.downcast_ref::<VulkanVertexBuffer>().ok_or_else(|| foreign("vertex buffer"))?;
                (buffer.handle(), buffer.offsets)
            }
        };
        let indexes = self.index_source(call)?;

        let key = PipelineKey {
            program: self.shaders.active_program(),
            topology,
            depth_test: self.state.depth_test,
            blending: self.state.blending,
            write_masks: self.state.write_masks,
            depth_bias: self.state.depth_bias.is_some(),
            pass: target.pass,
            normals: offsets.normals.is_some(),
            tex_coords: offsets.tex_coords.is_some(),
        };
        let program = self
            .shaders
            .program(key.program)
            .ok_or_else(|| RenderError::InvalidOperation(format!("unknown program {:?}", key.program)))?;
        let pipeline = self.pipelines.get_or_create(key, program, self.pipeline_layout.layout, &self.passes)?;

        let (viewport, scissor) = viewport_state(self.state.viewport, target.extent.height, target.pass == PassKind::Screen);
        let (bias_factor, bias_units) = self.state.depth_bias.unwrap_or((0.0, 0.0));
        let sets = [
            self.frames[self.frame_slot].uniforms.set(),
            self.sampler_set(TextureSlot::Diffuse),
            self.sampler_set(TextureSlot::ShadowMap),
        ];
        let push = DrawConstants::new(uniforms, call.flags);
        let buffers = [
            vertex_buffer,
            if offsets.normals.is_some() { vertex_buffer } else { self.defaults.handle() },
            if offsets.tex_coords.is_some() { vertex_buffer } else { self.defaults.handle() },
        ];
        let buffer_offsets = [offsets.positions, offsets.normals.unwrap_or(0), offsets.tex_coords.unwrap_or(DEFAULT_UV_OFFSET)];
        let instances = call.instance_count as u32;

        let raw = &self.device.device;
        let cmd = target.cmd;
        unsafe {
            raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            raw.cmd_set_viewport(cmd, 0, &[viewport]);
            raw.cmd_set_scissor(cmd, 0, &[scissor]);
            raw.cmd_set_depth_bias(cmd, bias_units, 0.0, bias_factor);
            raw.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout.layout,
                0,
                &sets,
                &[scene_offset],
            );
            raw.cmd_push_constants(
                cmd,
                self.pipeline_layout.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(&push),
            );
            raw.cmd_bind_vertex_buffers(cmd, 0, &buffers, &buffer_offsets);
            match indexes {
                Some((buffer, offset, first, count)) => {
                    raw.cmd_bind_index_buffer(cmd, buffer, offset, vk::IndexType::UINT32);
                    raw.cmd_draw_indexed(cmd, count, instances, first, 0, 0);
                }
                None => raw.cmd_draw(cmd, call.vertex_count as u32, instances, 0, 0),
            }
        }
        Ok(())
    }

    fn begin_render_to_texture(&mut self, texture: &mut CachedTexture, width: u32, height: u32) -> RenderResult<()> {
        check_redirect(self.redirect.is_some(), self.query_active)?;
        let (framebuffer, pass, extent) = self.prepare_render_target(texture, width, height)?;

        let (cmd, redirect) = match self.target {
            Some(screen) if self.frame.is_some() => {
                unsafe { self.device.device.cmd_end_render_pass(screen.cmd) };
                (screen.cmd, Redirect::InFrame)
            }
            _ => {
                self.recycle_slot()?;
                let cmd = self.commands.begin_one_shot()?;
                (cmd, Redirect::OneShot(cmd))
            }
        };
        self.begin_pass(cmd, self.passes.compatible(pass), framebuffer, extent);
        self.target = Some(Target { cmd, pass, extent });
        self.redirect = Some(redirect);
        Ok(())
    }

    fn end_render_to_texture(&mut self) -> RenderResult<()> {
        let Some(redirect) = self.redirect.take() else {
            return Err(RenderError::InvalidOperation("no render_to_texture is active".to_string()));
        };
        let Some(target) = self.target.take() else { return Ok(()) };
        unsafe { self.device.device.cmd_end_render_pass(target.cmd) };

        match redirect {
            Redirect::OneShot(cmd) => {
                self.commands.submit_and_wait(cmd)?;
                self.scene_offset = None;
            }
            Redirect::InFrame => {
                let (Some(image_index), Some(swapchain)) = (self.frame, &self.swapchain) else {
                    return Err(RenderError::RenderingFailed("frame lost its swapchain during render_to_texture".to_string()));
                };
                let (framebuffer, extent) = (swapchain.framebuffer(image_index), swapchain.extent());
                self.begin_pass(target.cmd, self.passes.screen_resume, framebuffer, extent);
                self.target = Some(Target { cmd: target.cmd, pass: PassKind::Screen, extent });
            }
        }
        Ok(())
    }

    fn create_occlusion_query(&mut self) -> RenderResult<Box<dyn OcclusionQuery>> {
        Ok(Box::new(VulkanQuery::new(&self.queries)))
    }

    fn begin_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        let query = query.as_any_mut().downcast_mut::<VulkanQuery>().ok_or_else(|| foreign("occlusion query"))?;
        if self.query_active {
            return Err(RenderError::InvalidOperation("occlusion queries cannot nest".to_string()));
        }
        self.query_active = true;
        query.active = None;

        let target = match (self.redirect, self.target) {
            (Some(Redirect::OneShot(_)), _) | (_, None) => {
                log::warn!("Occlusion query outside a frame is not counted");
                return Ok(());
            }
            (_, Some(target)) => target,
        };
        match self.queries.allocate(self.frame_slot) {
            Some((pool, slot)) => {
                unsafe { self.device.device.cmd_begin_query(target.cmd, pool, slot.index, vk::QueryControlFlags::empty()) };
                query.active = Some((pool, slot));
            }
            None => log::warn!("Occlusion query pool of frame {} is full", self.frame_number),
        }
        Ok(())
    }

    fn end_occlusion_query(&mut self, query: &mut dyn OcclusionQuery) -> RenderResult<()> {
        let query = query.as_any_mut().downcast_mut::<VulkanQuery>().ok_or_else(|| foreign("occlusion query"))?;
        if !self.query_active {
            return Err(RenderError::InvalidOperation("occlusion query was not begun".to_string()));
        }
        self.query_active = false;
        if let (Some((pool, slot)), Some(target)) = (query.active.take(), self.target) {
            unsafe { self.device.device.cmd_end_query(target.cmd, pool, slot.index) };
            query.submitted(slot);
        }
        Ok(())
    }
}

/// Render-to-texture ends the screen pass, and a query has to end in the subpass it began in
fn check_redirect(redirecting: bool, query_active: bool) -> RenderResult<()> {
    if redirecting {
        return Err(RenderError::InvalidOperation("render_to_texture is already active".to_string()));
    }
    if query_active {
        return Err(RenderError::InvalidOperation("render_to_texture inside an occlusion query".to_string()));
    }
    Ok(())
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.device.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_viewport_flips_y() {
        let (viewport, scissor) = viewport_state(ViewportRect::new(10, 20, 300, 200), 600, true);
        assert_eq!(viewport.x, 10.0);
        assert_eq!(viewport.y, 580.0);
        assert_eq!(viewport.height, -200.0);
        assert_eq!(scissor.offset, vk::Offset2D { x: 10, y: 380 });
        assert_eq!(scissor.extent, vk::Extent2D { width: 300, height: 200 });
    }

    #[test]
    fn test_texture_viewport_keeps_rows() {
        let (viewport, scissor) = viewport_state(ViewportRect::new(0, 16, 64, 32), 128, false);
        assert_eq!(viewport.y, 16.0);
        assert_eq!(viewport.height, 32.0);
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 16 });
    }

    #[test]
    fn test_scissor_clamps_to_target() {
        let (_, scissor) = viewport_state(ViewportRect::new(-5, 0, 100, 700), 600, true);
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
    }

    #[test]
    fn test_redirect_rejected_during_query() {
        assert!(check_redirect(false, false).is_ok());
        assert!(matches!(check_redirect(true, false), Err(RenderError::InvalidOperation(_))));
        let error = check_redirect(false, true).unwrap_err();
        assert!(error.to_string().contains("occlusion query"));
    }

    #[test]
    fn test_default_attributes() {
        let uv = DEFAULT_UV_OFFSET as usize / std::mem::size_of::<f32>();
        assert_eq!(&DEFAULT_ATTRIBUTES[..3], &[0.0, 0.0, 1.0]);
        assert_eq!(&DEFAULT_ATTRIBUTES[uv..uv + 2], &[0.0, 0.0]);
    }
}
