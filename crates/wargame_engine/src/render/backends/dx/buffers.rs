//! Resident vertex and index buffers

use std::rc::Rc;

use wgpu::util::DeviceExt;

use crate::render::vertex::{PackedVertices, StreamOffsets};

/// Native vertex buffer of the DirectX backend
pub(crate) struct DxVertexBuffer {
    pub buffer: Rc<wgpu::Buffer>,
    pub offsets: StreamOffsets,
}

impl DxVertexBuffer {
    pub(crate) fn new(device: &wgpu::Device, packed: &PackedVertices) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(&packed.data),
            usage: wgpu::BufferUsages::VERTEX,
        });
        Self { buffer: Rc::new(buffer), offsets: packed.byte_offsets(0) }
    }
}

/// Native index buffer of the DirectX backend
///
/// Keeps a CPU copy of the indexes for line loops, drawn as closed strips.
pub(crate) struct DxIndexBuffer {
    pub buffer: Rc<wgpu::Buffer>,
    pub indexes: Vec<u32>,
}

impl DxIndexBuffer {
    pub(crate) fn new(device: &wgpu::Device, indexes: &[u32]) -> Self {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Index Buffer"),
            contents: bytemuck::cast_slice(indexes),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self { buffer: Rc::new(buffer), indexes: indexes.to_vec() }
    }
}
