//! Per-frame linear allocators
//!
//! Streamed vertices, streamed indexes and scene uniform snapshots are written into
//! persistently mapped buffers owned by one frame slot. A slot's arenas are rewound when
//! its fence has signaled, so nothing written in a frame is overwritten while in flight.

use std::rc::Rc;

use ash::vk;

use super::context::VulkanDevice;
use super::descriptors::{DescriptorAllocator, DescriptorSet};
use super::memory::Buffer;
use super::release::ReleaseQueue;
use super::VulkanResult;
use crate::render::shader::scene_block;

/// Round `value` up to a multiple of `alignment`
pub(crate) const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// Write position inside a list of chunks
#[derive(Debug, Default, Clone, Copy)]
struct Cursor {
    chunk: usize,
    offset: u64,
}

impl Cursor {
    /// Reserve `len` bytes in the first chunk at or after the cursor with room for them
    fn place(&mut self, capacities: &[u64], len: u64, alignment: u64) -> Option<(usize, u64)> {
        while let Some(&capacity) = capacities.get(self.chunk) {
            let start = align_up(self.offset, alignment);
            if start + len <= capacity {
                self.offset = start + len;
                return Some((self.chunk, start));
            }
            self.chunk += 1;
            self.offset = 0;
        }
        None
    }
}

/// Vertex and index data streamed during one frame
pub(crate) struct StreamArena {
    device: Rc<VulkanDevice>,
    chunk_size: u64,
    chunks: Vec<Buffer>,
    capacities: Vec<u64>,
    cursor: Cursor,
}

impl StreamArena {
    pub(crate) fn new(device: &Rc<VulkanDevice>, chunk_size: u64) -> Self {
        Self { device: Rc::clone(device), chunk_size: chunk_size.max(1024), chunks: Vec::new(), capacities: Vec::new(), cursor: Cursor::default() }
    }

    /// Rewind; chunks are kept for the slot's next frame
    pub(crate) fn reset(&mut self) {
        self.cursor = Cursor::default();
    }

    /// Copy `bytes` into the arena, returning the buffer and offset holding them
    pub(crate) fn push(&mut self, bytes: &[u8], alignment: u64) -> VulkanResult<(vk::Buffer, vk::DeviceSize)> {
        let len = bytes.len() as u64;
        let (chunk, offset) = match self.cursor.place(&self.capacities, len, alignment) {
            Some(placed) => placed,
            None => {
                let size = self.chunk_size.max(len);
                log::debug!("Stream arena grows by a chunk of {} bytes ({} chunks)", size, self.chunks.len() + 1);
                self.chunks.push(Buffer::host_visible(
                    &self.device,
                    size,
                    vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER,
                )?);
                self.capacities.push(size);
                self.cursor = Cursor { chunk: self.chunks.len() - 1, offset: 0 };
                self.cursor.place(&self.capacities, len, alignment).unwrap_or((self.chunks.len() - 1, 0))
            }
        };
        let buffer = &self.chunks[chunk];
        buffer.write(offset, bytes)?;
        Ok((buffer.handle(), offset))
    }
}

/// Scene uniform snapshots of one frame, bound through a dynamic offset
pub(crate) struct UniformArena {
    device: Rc<VulkanDevice>,
    buffer: Buffer,
    set: DescriptorSet,
    alignment: u64,
    cursor: u64,
}

impl UniformArena {
    pub(crate) fn new(
        device: &Rc<VulkanDevice>,
        descriptors: &mut DescriptorAllocator,
        layout: vk::DescriptorSetLayout,
        size: u64,
    ) -> VulkanResult<Self> {
        let alignment = device.limits.min_uniform_buffer_offset_alignment.max(1);
        let size = align_up(size.max(scene_block::SIZE as u64), alignment);
        let (buffer, set) = Self::allocate(device, descriptors, layout, size)?;
        Ok(Self { device: Rc::clone(device), buffer, set, alignment, cursor: 0 })
    }

    fn allocate(
        device: &Rc<VulkanDevice>,
        descriptors: &mut DescriptorAllocator,
        layout: vk::DescriptorSetLayout,
        size: u64,
    ) -> VulkanResult<(Buffer, DescriptorSet)> {
        let buffer = Buffer::host_visible(device, size, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
        let set = descriptors.allocate(layout)?;
        set.write_uniform_buffer(buffer.handle(), scene_block::SIZE as u64);
        Ok((buffer, set))
    }

    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
    }

    /// Copy one block snapshot, returning its dynamic offset
    ///
    /// A full arena is replaced by one twice its size; the old buffer and set go to `release`
    /// because draws recorded earlier in the frame still read them.
    pub(crate) fn push(
        &mut self,
        bytes: &[u8],
        descriptors: &mut DescriptorAllocator,
        layout: vk::DescriptorSetLayout,
        release: &ReleaseQueue,
    ) -> VulkanResult<u32> {
        let len = bytes.len() as u64;
        let start = align_up(self.cursor, self.alignment);
        if start + len > self.buffer.size() {
            let size = align_up((self.buffer.size() * 2).max(len), self.alignment);
            log::debug!("Uniform arena of {} bytes exhausted, growing to {}", self.buffer.size(), size);
            let (buffer, set) = Self::allocate(&self.device, descriptors, layout, size)?;
            release.retire((std::mem::replace(&mut self.buffer, buffer), std::mem::replace(&mut self.set, set)));
            self.cursor = 0;
            return self.push(bytes, descriptors, layout, release);
        }
        self.buffer.write(start, bytes)?;
        self.cursor = start + len;
        Ok(start as u32)
    }

    pub(crate) const fn set(&self) -> vk::DescriptorSet {
        self.set.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(704, 256), 768);
        assert_eq!(align_up(13, 0), 13);
        assert_eq!(align_up(13, 1), 13);
    }

    #[test]
    fn test_cursor_moves_to_next_chunk_when_full() {
        let capacities = [100, 100];
        let mut cursor = Cursor::default();
        assert_eq!(cursor.place(&capacities, 60, 4), Some((0, 0)));
        assert_eq!(cursor.place(&capacities, 30, 16), Some((0, 64)));
        assert_eq!(cursor.place(&capacities, 30, 4), Some((1, 0)));
        assert_eq!(cursor.place(&capacities, 80, 4), None);
    }

    #[test]
    fn test_cursor_skips_small_chunks_for_large_writes() {
        let capacities = [16, 4096];
        let mut cursor = Cursor::default();
        assert_eq!(cursor.place(&capacities, 1000, 4), Some((1, 0)));
        assert_eq!(cursor.place(&capacities, 8, 4), Some((1, 1000)));
    }
}
