//! Resident vertex and index buffers
//!
//! Both are device-local and immutable. Their owners may drop them mid-frame, so the buffers
//! go to the release queue instead of being destroyed on the spot.

use std::rc::Rc;

use ash::vk;

use super::commands::CommandPool;
use super::context::VulkanDevice;
use super::memory::Buffer;
use super::release::ReleaseQueue;
use super::VulkanResult;
use crate::render::vertex::{PackedVertices, StreamOffsets};

/// Native vertex buffer of the Vulkan backend
pub(crate) struct VulkanVertexBuffer {
    release: Rc<ReleaseQueue>,
    buffer: Option<Buffer>,
    pub offsets: StreamOffsets,
}

impl VulkanVertexBuffer {
    pub(crate) fn new(
        device: &Rc<VulkanDevice>,
        commands: &CommandPool,
        release: &Rc<ReleaseQueue>,
        packed: &PackedVertices,
    ) -> VulkanResult<Self> {
        let buffer = Buffer::device_local(device, commands, vk::BufferUsageFlags::VERTEX_BUFFER, bytemuck::cast_slice(&packed.data))?;
        Ok(Self { release: Rc::clone(release), buffer: Some(buffer), offsets: packed.byte_offsets(0) })
    }

    pub(crate) fn handle(&self) -> vk::Buffer {
        self.buffer.as_ref().map_or(vk::Buffer::null(), Buffer::handle)
    }
}

impl Drop for VulkanVertexBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.release.retire(buffer);
        }
    }
}

/// Native index buffer of the Vulkan backend
///
/// Keeps a CPU copy of the indexes: line loops are drawn as strips with the first index
/// repeated, which needs the indexes of the requested range.
pub(crate) struct VulkanIndexBuffer {
    release: Rc<ReleaseQueue>,
    buffer: Option<Buffer>,
    pub indexes: Vec<u32>,
}

impl VulkanIndexBuffer {
    pub(crate) fn new(
        device: &Rc<VulkanDevice>,
        commands: &CommandPool,
        release: &Rc<ReleaseQueue>,
        indexes: &[u32],
    ) -> VulkanResult<Self> {
        let buffer = Buffer::device_local(device, commands, vk::BufferUsageFlags::INDEX_BUFFER, bytemuck::cast_slice(indexes))?;
        Ok(Self { release: Rc::clone(release), buffer: Some(buffer), indexes: indexes.to_vec() })
    }

    pub(crate) fn handle(&self) -> vk::Buffer {
        self.buffer.as_ref().map_or(vk::Buffer::null(), Buffer::handle)
    }
}

impl Drop for VulkanIndexBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.release.retire(buffer);
        }
    }
}
