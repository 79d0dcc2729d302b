//! Render passes, the shared pipeline layout and the pipeline cache
//!
//! Every program uses one layout: set 0 holds the scene uniform block at a dynamic offset,
//! sets 1 and 2 the diffuse and shadow-map samplers, and a 96-byte push constant range carries
//! the model-view matrix, color and draw flags. Pipelines are created on first use for each
//! combination of program and fixed-function state.

use std::collections::HashMap;
use std::rc::Rc;

use ash::vk;

use super::context::VulkanDevice;
use super::descriptors::DescriptorLayouts;
use super::shader::VulkanProgram;
use super::swapchain::DEPTH_FORMAT;
use super::{VulkanError, VulkanResult};
use crate::render::backend::DrawConstants;
use crate::render::{RenderMode, ShaderProgram};

/// Color format of render-to-texture targets
pub(crate) const TARGET_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// Attachment set a pipeline renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PassKind {
    /// Swapchain color and depth
    Screen,
    /// Offscreen color texture with its own depth buffer
    ColorTarget,
    /// Offscreen depth texture only
    DepthTarget,
}

/// The four render passes of the backend
pub(crate) struct RenderPasses {
    device: Rc<VulkanDevice>,
    /// First screen pass of a frame; clears both attachments
    pub screen_first: vk::RenderPass,
    /// Screen pass resumed after render-to-texture; keeps both attachments
    pub screen_resume: vk::RenderPass,
    pub color_target: vk::RenderPass,
    pub depth_target: vk::RenderPass,
}

#[derive(Clone, Copy)]
struct AttachmentOps {
    load: vk::AttachmentLoadOp,
    store: vk::AttachmentStoreOp,
    initial: vk::ImageLayout,
    final_layout: vk::ImageLayout,
}

impl RenderPasses {
    pub(crate) fn new(device: &Rc<VulkanDevice>, screen_format: vk::Format) -> VulkanResult<Self> {
        let mut passes = Self {
            device: Rc::clone(device),
            screen_first: vk::RenderPass::null(),
            screen_resume: vk::RenderPass::null(),
            color_target: vk::RenderPass::null(),
            depth_target: vk::RenderPass::null(),
        };
        let depth_attachment = vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL;
        let present = vk::ImageLayout::PRESENT_SRC_KHR;

        passes.screen_first = create_render_pass(
            device,
            Some((
                screen_format,
                AttachmentOps {
                    load: vk::AttachmentLoadOp::CLEAR,
                    store: vk::AttachmentStoreOp::STORE,
                    initial: vk::ImageLayout::UNDEFINED,
                    final_layout: present,
                },
            )),
            AttachmentOps {
                load: vk::AttachmentLoadOp::CLEAR,
                store: vk::AttachmentStoreOp::STORE,
                initial: vk::ImageLayout::UNDEFINED,
                final_layout: depth_attachment,
            },
        )?;
        passes.screen_resume = create_render_pass(
            device,
            Some((
                screen_format,
                AttachmentOps {
                    load: vk::AttachmentLoadOp::LOAD,
                    store: vk::AttachmentStoreOp::STORE,
                    initial: present,
                    final_layout: present,
                },
            )),
            AttachmentOps {
                load: vk::AttachmentLoadOp::LOAD,
                store: vk::AttachmentStoreOp::STORE,
                initial: depth_attachment,
                final_layout: depth_attachment,
            },
        )?;
        passes.color_target = create_render_pass(
            device,
            Some((
                TARGET_COLOR_FORMAT,
                AttachmentOps {
                    load: vk::AttachmentLoadOp::DONT_CARE,
                    store: vk::AttachmentStoreOp::STORE,
                    initial: vk::ImageLayout::UNDEFINED,
                    final_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                },
            )),
            AttachmentOps {
                load: vk::AttachmentLoadOp::DONT_CARE,
                store: vk::AttachmentStoreOp::DONT_CARE,
                initial: vk::ImageLayout::UNDEFINED,
                final_layout: depth_attachment,
            },
        )?;
        passes.depth_target = create_render_pass(
            device,
            None,
            AttachmentOps {
                load: vk::AttachmentLoadOp::DONT_CARE,
                store: vk::AttachmentStoreOp::STORE,
                initial: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
            },
        )?;
        Ok(passes)
    }

    /// Pass pipelines for `kind` are created against
    pub(crate) const fn compatible(&self, kind: PassKind) -> vk::RenderPass {
        match kind {
            PassKind::Screen => self.screen_first,
            PassKind::ColorTarget => self.color_target,
            PassKind::DepthTarget => self.depth_target,
        }
    }
}

impl Drop for RenderPasses {
    fn drop(&mut self) {
        let raw = &self.device.device;
        for pass in [self.screen_first, self.screen_resume, self.color_target, self.depth_target] {
            if pass != vk::RenderPass::null() {
                unsafe { raw.destroy_render_pass(pass, None) };
            }
        }
    }
}

fn create_render_pass(
    device: &VulkanDevice,
    color: Option<(vk::Format, AttachmentOps)>,
    depth: AttachmentOps,
) -> VulkanResult<vk::RenderPass> {
    let mut attachments = Vec::with_capacity(2);
    if let Some((format, ops)) = color {
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(ops.load)
                .store_op(ops.store)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(ops.initial)
                .final_layout(ops.final_layout)
                .build(),
        );
    }
    let depth_index = attachments.len() as u32;
    attachments.push(
        vk::AttachmentDescription::builder()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(depth.load)
            .store_op(depth.store)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(depth.initial)
            .final_layout(depth.final_layout)
            .build(),
    );

    let color_refs = [vk::AttachmentReference { attachment: 0, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL }];
    let depth_ref = vk::AttachmentReference { attachment: depth_index, layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL };
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .depth_stencil_attachment(&depth_ref);
    if color.is_some() {
        subpass = subpass.color_attachments(&color_refs);
    }
    let subpasses = [subpass.build()];

    let attachment_stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    let attachment_writes = vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
    let dependencies = [
        vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(attachment_stages | vk::PipelineStageFlags::FRAGMENT_SHADER)
            .src_access_mask(attachment_writes)
            .dst_stage_mask(attachment_stages)
            .dst_access_mask(
                attachment_writes
                    | vk::AccessFlags::COLOR_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
            )
            .build(),
        vk::SubpassDependency::builder()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(attachment_stages)
            .src_access_mask(attachment_writes)
            .dst_stage_mask(vk::PipelineStageFlags::FRAGMENT_SHADER)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .build(),
    ];

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    unsafe { device.device.create_render_pass(&create_info, None) }.map_err(VulkanError::Api)
}

/// Pipeline layout shared by all programs
pub(crate) struct PipelineLayout {
    device: Rc<VulkanDevice>,
    pub layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub(crate) fn new(device: &Rc<VulkanDevice>, sets: &DescriptorLayouts) -> VulkanResult<Self> {
        let set_layouts = [sets.uniforms, sets.sampler, sets.sampler];
        let push_ranges = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: std::mem::size_of::<DrawConstants>() as u32,
        }];
        let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts).push_constant_ranges(&push_ranges);
        let layout = unsafe { device.device.create_pipeline_layout(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device: Rc::clone(device), layout })
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_pipeline_layout(self.layout, None) };
    }
}

/// Everything a pipeline bakes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub program: ShaderProgram,
    pub topology: vk::PrimitiveTopology,
    pub depth_test: bool,
    pub blending: bool,
    pub write_masks: bool,
    pub depth_bias: bool,
    pub pass: PassKind,
    /// Normals come from a real stream rather than the defaults buffer
    pub normals: bool,
    /// Texture coordinates come from a real stream rather than the defaults buffer
    pub tex_coords: bool,
}

/// Topology of a mode; line loops are drawn as strips closed by a repeated first index
pub(crate) const fn topology(mode: RenderMode) -> Option<vk::PrimitiveTopology> {
    match mode {
        RenderMode::Triangles => Some(vk::PrimitiveTopology::TRIANGLE_LIST),
        RenderMode::TriangleStrip => Some(vk::PrimitiveTopology::TRIANGLE_STRIP),
        RenderMode::Lines => Some(vk::PrimitiveTopology::LINE_LIST),
        RenderMode::LineLoop => Some(vk::PrimitiveTopology::LINE_STRIP),
        RenderMode::Rectangles => None,
    }
}

/// Vertex input: positions, normals and texture coordinates in bindings 0, 1 and 2
///
/// A missing stream is bound to a small defaults buffer with stride 0, so every vertex reads
/// the same normal or uv.
fn vertex_bindings(key: &PipelineKey) -> [vk::VertexInputBindingDescription; 3] {
    let binding = |binding: u32, stride: u32| vk::VertexInputBindingDescription {
        binding,
        stride,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    [
        binding(0, 12),
        binding(1, if key.normals { 12 } else { 0 }),
        binding(2, if key.tex_coords { 8 } else { 0 }),
    ]
}

const VERTEX_ATTRIBUTES: [vk::VertexInputAttributeDescription; 3] = [
    vk::VertexInputAttributeDescription { location: 0, binding: 0, format: vk::Format::R32G32B32_SFLOAT, offset: 0 },
    vk::VertexInputAttributeDescription { location: 1, binding: 1, format: vk::Format::R32G32B32_SFLOAT, offset: 0 },
    vk::VertexInputAttributeDescription { location: 2, binding: 2, format: vk::Format::R32G32_SFLOAT, offset: 0 },
];

/// Pipelines created so far, by key
pub(crate) struct PipelineCache {
    device: Rc<VulkanDevice>,
    pipelines: HashMap<PipelineKey, vk::Pipeline>,
}

impl PipelineCache {
    pub(crate) fn new(device: &Rc<VulkanDevice>) -> Self {
        Self { device: Rc::clone(device), pipelines: HashMap::new() }
    }

    /// Pipeline for `key`, created on first request
    pub(crate) fn get_or_create(
        &mut self,
        key: PipelineKey,
        program: &VulkanProgram,
        layout: vk::PipelineLayout,
        passes: &RenderPasses,
    ) -> VulkanResult<vk::Pipeline> {
        if let Some(&pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline);
        }
        let pipeline = self.create(&key, program, layout, passes.compatible(key.pass))?;
        log::debug!("Created pipeline #{} for {:?}", self.pipelines.len() + 1, key);
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    fn create(
        &self,
        key: &PipelineKey,
        program: &VulkanProgram,
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<vk::Pipeline> {
        let stages = program.stage_infos();
        let bindings = vertex_bindings(key);
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&VERTEX_ATTRIBUTES);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder().topology(key.topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder().viewport_count(1).scissor_count(1);
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(key.depth_bias)
            .line_width(1.0);
        let multisampling =
            vk::PipelineMultisampleStateCreateInfo::builder().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        // GL semantics: no depth writes while the depth test is off
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(key.depth_test)
            .depth_write_enable(key.depth_test && key.write_masks)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL);

        let color_mask = if key.write_masks { vk::ColorComponentFlags::RGBA } else { vk::ColorComponentFlags::empty() };
        let blend_attachment = [vk::PipelineColorBlendAttachmentState::builder()
            .blend_enable(key.blending)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(color_mask)
            .build()];
        let attachments: &[vk::PipelineColorBlendAttachmentState] =
            if key.pass == PassKind::DepthTarget { &[] } else { &blend_attachment };
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder().attachments(attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR, vk::DynamicState::DEPTH_BIAS];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            self.device.device.create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| VulkanError::Api(e))?;
        pipelines.into_iter().next().ok_or(VulkanError::Api(vk::Result::ERROR_INITIALIZATION_FAILED))
    }
}

impl Drop for PipelineCache {
    fn drop(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            unsafe { self.device.device.destroy_pipeline(pipeline, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(normals: bool, tex_coords: bool) -> PipelineKey {
        PipelineKey {
            program: ShaderProgram(0),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            depth_test: true,
            blending: false,
            write_masks: true,
            depth_bias: false,
            pass: PassKind::Screen,
            normals,
            tex_coords,
        }
    }

    #[test]
    fn test_missing_streams_use_stride_zero() {
        let full = vertex_bindings(&key(true, true));
        assert_eq!([full[0].stride, full[1].stride, full[2].stride], [12, 12, 8]);
        let bare = vertex_bindings(&key(false, false));
        assert_eq!([bare[0].stride, bare[1].stride, bare[2].stride], [12, 0, 0]);
    }

    #[test]
    fn test_line_loop_draws_as_strip() {
        assert_eq!(topology(RenderMode::LineLoop), Some(vk::PrimitiveTopology::LINE_STRIP));
        assert_eq!(topology(RenderMode::Rectangles), None);
    }
}
