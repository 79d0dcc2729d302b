//! Recorded passes and their encoding into `wgpu` render passes

use std::rc::Rc;

use crate::render::ViewportRect;

/// Buffer a recorded draw reads
#[derive(Clone)]
pub(crate) enum BufferSource {
    /// The submission's stream buffer
    Stream,
    /// Constant normal and uv
    Defaults,
    Resident(Rc<wgpu::Buffer>),
}

/// Everything needed to replay one draw
pub(crate) struct RecordedDraw {
    pub pipeline: Rc<wgpu::RenderPipeline>,
    pub viewport: [f32; 4],
    pub scissor: [u32; 4],
    pub uniform_offsets: [u32; 2],
    pub diffuse: Rc<wgpu::BindGroup>,
    pub shadow: Rc<wgpu::BindGroup>,
    pub vertex_buffers: [(BufferSource, u64); 3],
    /// Buffer, byte offset, first index and count
    pub indexes: Option<(BufferSource, u64, u32, u32)>,
    pub vertex_count: u32,
    pub instances: u32,
}

pub(crate) enum PassCommand {
    Draw(Box<RecordedDraw>),
    BeginQuery(u32),
    EndQuery,
}

/// Attachments of a recorded pass
#[derive(Clone)]
pub(crate) struct PassTarget {
    pub color: Option<Rc<wgpu::TextureView>>,
    pub depth: Rc<wgpu::TextureView>,
    pub size: (u32, u32),
    /// Whether bottom-left viewports are converted to `wgpu`'s top-left origin
    pub flip: bool,
}

/// Draws recorded against one target, between two load/store boundaries
pub(crate) struct RecordedPass {
    pub target: PassTarget,
    pub clear_color: Option<wgpu::Color>,
    pub clear_depth: Option<f32>,
    pub commands: Vec<PassCommand>,
    /// Whether the frame's query set is attached
    pub queries: bool,
}

impl RecordedPass {
    /// Pass keeping the target's contents
    pub(crate) const fn load(target: PassTarget, queries: bool) -> Self {
        Self { target, clear_color: None, clear_depth: None, commands: Vec::new(), queries }
    }

    /// Pass continuing this one on the same target
    pub(crate) fn next(&self) -> Self {
        Self::load(self.target.clone(), self.queries)
    }
}

/// Buffers recorded draws refer to
pub(crate) struct EncodeResources<'a> {
    pub uniforms: &'a wgpu::BindGroup,
    pub stream: &'a wgpu::Buffer,
    pub defaults: &'a wgpu::Buffer,
    pub queries: Option<&'a wgpu::QuerySet>,
}

impl EncodeResources<'_> {
    fn buffer<'b>(&'b self, source: &'b BufferSource) -> &'b wgpu::Buffer {
        match source {
            BufferSource::Stream => self.stream,
            BufferSource::Defaults => self.defaults,
            BufferSource::Resident(buffer) => buffer,
        }
    }
}

pub(crate) fn encode_pass(encoder: &mut wgpu::CommandEncoder, pass: &RecordedPass, resources: &EncodeResources<'_>) {
    let color_attachment = pass.target.color.as_deref().map(|view| wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: pass.clear_color.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
            store: wgpu::StoreOp::Store,
        },
    });
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Scene Pass"),
        color_attachments: &[color_attachment],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &pass.target.depth,
            depth_ops: Some(wgpu::Operations {
                load: pass.clear_depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        timestamp_writes: None,
        occlusion_query_set: if pass.queries { resources.queries } else { None },
    });

    for command in &pass.commands {
        match command {
            PassCommand::BeginQuery(index) => render_pass.begin_occlusion_query(*index),
            PassCommand::EndQuery => render_pass.end_occlusion_query(),
            PassCommand::Draw(draw) => {
                let [x, y, width, height] = draw.viewport;
                let [sx, sy, sw, sh] = draw.scissor;
                render_pass.set_pipeline(&draw.pipeline);
                render_pass.set_viewport(x, y, width, height, 0.0, 1.0);
                render_pass.set_scissor_rect(sx, sy, sw, sh);
                render_pass.set_bind_group(0, resources.uniforms, &draw.uniform_offsets);
                render_pass.set_bind_group(1, draw.diffuse.as_ref(), &[]);
                render_pass.set_bind_group(2, draw.shadow.as_ref(), &[]);
                for (slot, (source, offset)) in draw.vertex_buffers.iter().enumerate() {
                    render_pass.set_vertex_buffer(slot as u32, resources.buffer(source).slice(*offset..));
                }
                match &draw.indexes {
                    Some((source, offset, first, count)) => {
                        render_pass.set_index_buffer(resources.buffer(source).slice(*offset..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(*first..first + count, 0, 0..draw.instances);
                    }
                    None => render_pass.draw(0..draw.vertex_count, 0..draw.instances),
                }
            }
        }
    }
}

/// Viewport and scissor of `rect` on a target, clipped to it; `None` when nothing is visible
///
/// `rect` has a bottom-left origin. With `flip` it is converted to the top-left origin of
/// `wgpu`; without, its rows are used as they are and the projection is flipped instead.
pub(crate) fn viewport_state(rect: ViewportRect, (target_width, target_height): (u32, u32), flip: bool) -> Option<([f32; 4], [u32; 4])> {
    let top = if flip { target_height as i32 - (rect.y + rect.height as i32) } else { rect.y };
    let left = rect.x;
    let (right, bottom) = (left + rect.width as i32, top + rect.height as i32);

    let clip_x = |v: i32| v.clamp(0, target_width as i32);
    let clip_y = |v: i32| v.clamp(0, target_height as i32);
    let (x0, y0, x1, y1) = (clip_x(left), clip_y(top), clip_x(right), clip_y(bottom));
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    let viewport = [x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32];
    let scissor = [x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32];
    Some((viewport, scissor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_viewport_moves_origin_to_top() {
        let (viewport, scissor) = viewport_state(ViewportRect::new(10, 20, 300, 200), (800, 600), true).unwrap();
        assert_eq!(viewport, [10.0, 380.0, 300.0, 200.0]);
        assert_eq!(scissor, [10, 380, 300, 200]);
    }

    #[test]
    fn test_texture_viewport_keeps_rows() {
        let (viewport, _) = viewport_state(ViewportRect::new(0, 16, 64, 32), (64, 128), false).unwrap();
        assert_eq!(viewport, [0.0, 16.0, 64.0, 32.0]);
    }

    #[test]
    fn test_viewport_is_clipped_to_target() {
        let (viewport, scissor) = viewport_state(ViewportRect::new(-50, 0, 100, 700), (800, 600), true).unwrap();
        assert_eq!(viewport, [0.0, 0.0, 50.0, 600.0]);
        assert_eq!(scissor, [0, 0, 50, 600]);
        assert!(viewport_state(ViewportRect::new(900, 0, 10, 10), (800, 600), true).is_none());
        assert!(viewport_state(ViewportRect::new(0, 0, 0, 10), (800, 600), false).is_none());
    }
}
