//! Bind group layouts, vertex layout and the pipeline cache
//!
//! Group 0 holds the scene block and the per-draw block of the uniform arena, both at dynamic
//! offsets. Groups 1 and 2 hold the diffuse texture and the shadow map with their samplers.

use std::collections::HashMap;
use std::rc::Rc;

use super::context::DEPTH_FORMAT;
use super::shader::{DxProgram, FRAGMENT_ENTRY, VERTEX_ENTRY};
use crate::render::backend::DrawConstants;
use crate::render::shader::scene_block;
use crate::render::{RenderError, RenderMode, RenderResult, ShaderProgram};

/// Color format of render-to-texture targets
pub(crate) const TARGET_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Attachment set a pipeline renders into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PassKind {
    /// Surface color and screen depth
    Screen,
    /// Offscreen color texture with its own depth buffer
    ColorTarget,
    /// Offscreen depth texture only
    DepthTarget,
}

/// Program and fixed-function state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PipelineKey {
    pub program: ShaderProgram,
    pub topology: wgpu::PrimitiveTopology,
    pub depth_test: bool,
    pub blending: bool,
    pub write_masks: bool,
    /// `(factor, units)` as bits; `wgpu` depth bias is pipeline state
    pub depth_bias: Option<(u32, u32)>,
    pub pass: PassKind,
    pub normals: bool,
    pub tex_coords: bool,
}

impl PipelineKey {
    pub(crate) fn bias_bits(offset: Option<(f32, f32)>) -> Option<(u32, u32)> {
        offset.map(|(factor, units)| (factor.to_bits(), units.to_bits()))
    }

    fn depth_bias(&self) -> wgpu::DepthBiasState {
        match self.depth_bias {
            Some((factor, units)) => {
                wgpu::DepthBiasState { constant: f32::from_bits(units) as i32, slope_scale: f32::from_bits(factor), clamp: 0.0 }
            }
            None => wgpu::DepthBiasState::default(),
        }
    }
}

pub(crate) const fn topology(mode: RenderMode) -> Option<wgpu::PrimitiveTopology> {
    match mode {
        RenderMode::Triangles => Some(wgpu::PrimitiveTopology::TriangleList),
        RenderMode::TriangleStrip => Some(wgpu::PrimitiveTopology::TriangleStrip),
        RenderMode::Lines => Some(wgpu::PrimitiveTopology::LineList),
        RenderMode::LineLoop => Some(wgpu::PrimitiveTopology::LineStrip),
        RenderMode::Rectangles => None,
    }
}

/// The three bind group layouts and the pipeline layout over them
pub(crate) struct Layouts {
    pub uniforms: wgpu::BindGroupLayout,
    pub color: wgpu::BindGroupLayout,
    pub depth: wgpu::BindGroupLayout,
    pub pipeline: wgpu::PipelineLayout,
}

impl Layouts {
    pub(crate) fn new(device: &wgpu::Device) -> Self {
        let uniform = |binding: u32, size: usize| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(size as u64),
            },
            count: None,
        };
        let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Uniforms Layout"),
            entries: &[uniform(0, scene_block::SIZE), uniform(1, std::mem::size_of::<DrawConstants>())],
        });
        let sampled = |label: &str, sample_type: wgpu::TextureSampleType, sampler: wgpu::SamplerBindingType| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(sampler),
                        count: None,
                    },
                ],
            })
        };
        let color = sampled(
            "Diffuse Layout",
            wgpu::TextureSampleType::Float { filterable: true },
            wgpu::SamplerBindingType::Filtering,
        );
        let depth = sampled("Shadow Layout", wgpu::TextureSampleType::Depth, wgpu::SamplerBindingType::NonFiltering);
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &[&uniforms, &color, &depth],
            push_constant_ranges: &[],
        });
        Self { uniforms, color, depth, pipeline }
    }
}

/// Positions, normals and texture coordinates in buffers 0, 1 and 2
///
/// A missing stream reads a defaults buffer with stride 0.
fn vertex_layouts(key: &PipelineKey) -> [wgpu::VertexBufferLayout<'static>; 3] {
    const POSITION: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
    const NORMAL: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x3];
    const TEX_COORD: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Float32x2];
    let layout = |array_stride: u64, attributes: &'static [wgpu::VertexAttribute]| wgpu::VertexBufferLayout {
        array_stride,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes,
    };
    [
        layout(12, &POSITION),
        layout(if key.normals { 12 } else { 0 }, &NORMAL),
        layout(if key.tex_coords { 8 } else { 0 }, &TEX_COORD),
    ]
}

/// Pipelines created so far, by key
pub(crate) struct PipelineCache {
    screen_format: wgpu::TextureFormat,
    pipelines: HashMap<PipelineKey, Rc<wgpu::RenderPipeline>>,
}

impl PipelineCache {
    pub(crate) fn new(screen_format: wgpu::TextureFormat) -> Self {
        Self { screen_format, pipelines: HashMap::new() }
    }

    /// Pipeline for `key`, created on first request
    ///
    /// # Errors
    /// `ShaderCompilation` when the program does not fit the shared layout.
    pub(crate) fn get_or_create(
        &mut self,
        device: &wgpu::Device,
        layouts: &Layouts,
        key: PipelineKey,
        program: &DxProgram,
    ) -> RenderResult<Rc<wgpu::RenderPipeline>> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(Rc::clone(pipeline));
        }
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self.create(device, layouts, &key, program);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::ShaderCompilation { stage: "link".to_string(), log: error.to_string() });
        }
        log::debug!("Created pipeline #{} for {:?}", self.pipelines.len() + 1, key);
        let pipeline = Rc::new(pipeline);
        self.pipelines.insert(key, Rc::clone(&pipeline));
        Ok(pipeline)
    }

    fn create(&self, device: &wgpu::Device, layouts: &Layouts, key: &PipelineKey, program: &DxProgram) -> wgpu::RenderPipeline {
        let buffers = vertex_layouts(key);
        let color_format = match key.pass {
            PassKind::Screen => Some(self.screen_format),
            PassKind::ColorTarget => Some(TARGET_COLOR_FORMAT),
            PassKind::DepthTarget => None,
        };
        let targets: Vec<Option<wgpu::ColorTargetState>> = color_format
            .map(|format| wgpu::ColorTargetState {
                format,
                blend: key.blending.then_some(wgpu::BlendState::ALPHA_BLENDING),
                write_mask: if key.write_masks { wgpu::ColorWrites::ALL } else { wgpu::ColorWrites::empty() },
            })
            .into_iter()
            .map(Some)
            .collect();
        let strip_index_format = matches!(
            key.topology,
            wgpu::PrimitiveTopology::TriangleStrip | wgpu::PrimitiveTopology::LineStrip
        )
        .then_some(wgpu::IndexFormat::Uint32);

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Scene Pipeline"),
            layout: Some(&layouts.pipeline),
            vertex: wgpu::VertexState {
                module: &program.vertex,
                entry_point: Some(VERTEX_ENTRY),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &buffers,
            },
            fragment: color_format.map(|_| wgpu::FragmentState {
                module: &program.fragment,
                entry_point: Some(FRAGMENT_ENTRY),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: key.topology,
                strip_index_format,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            // GL semantics: no depth writes while the depth test is off
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: key.depth_test && key.write_masks,
                depth_compare: if key.depth_test { wgpu::CompareFunction::LessEqual } else { wgpu::CompareFunction::Always },
                stencil: wgpu::StencilState::default(),
                bias: key.depth_bias(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(normals: bool, tex_coords: bool) -> PipelineKey {
        PipelineKey {
            program: ShaderProgram(0),
            topology: wgpu::PrimitiveTopology::TriangleList,
            depth_test: true,
            blending: false,
            write_masks: true,
            depth_bias: None,
            pass: PassKind::Screen,
            normals,
            tex_coords,
        }
    }

    #[test]
    fn test_missing_streams_use_stride_zero() {
        let layouts = vertex_layouts(&key(false, true));
        assert_eq!(layouts[0].array_stride, 12);
        assert_eq!(layouts[1].array_stride, 0);
        assert_eq!(layouts[2].array_stride, 8);
        assert_eq!(layouts[2].attributes[0].shader_location, 2);
    }

    #[test]
    fn test_depth_bias_state() {
        let mut biased = key(true, true);
        biased.depth_bias = PipelineKey::bias_bits(Some((1.5, 4.0)));
        let state = biased.depth_bias();
        assert_eq!(state.constant, 4);
        assert_eq!(state.slope_scale, 1.5);
        assert_eq!(key(true, true).depth_bias(), wgpu::DepthBiasState::default());
    }

    #[test]
    fn test_line_loops_draw_as_strips() {
        assert_eq!(topology(RenderMode::LineLoop), Some(wgpu::PrimitiveTopology::LineStrip));
        assert_eq!(topology(RenderMode::Rectangles), None);
    }
}
