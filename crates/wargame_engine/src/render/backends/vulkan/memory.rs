//! Buffers and images with their device memory
//!
//! Host-visible buffers stay mapped for their whole life; writes go straight through the
//! mapping. Device-local buffers are filled once through a staging copy.

use std::rc::Rc;

use ash::vk;

use super::commands::CommandPool;
use super::context::VulkanDevice;
use super::{VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub(crate) struct Buffer {
    device: Rc<VulkanDevice>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<*mut u8>,
}

impl Buffer {
    /// Create a new buffer with memory allocation
    pub(crate) fn new(
        device: &Rc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        let raw = &device.device;
        let buffer_info = vk::BufferCreateInfo::builder().size(size.max(4)).usage(usage).sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { raw.create_buffer(&buffer_info, None) }.map_err(VulkanError::Api)?;

        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };
        let memory = match device
            .find_memory_type(requirements.memory_type_bits, properties)
            .and_then(|memory_type| allocate(device, requirements.size, memory_type))
        {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };
        let mut created = Self { device: Rc::clone(device), buffer, memory, size, mapped: None };
        unsafe { raw.bind_buffer_memory(buffer, memory, 0) }.map_err(VulkanError::Api)?;

        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let pointer = unsafe { raw.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) }
                .map_err(VulkanError::Api)?;
            created.mapped = Some(pointer.cast());
        }
        Ok(created)
    }

    /// Persistently mapped, coherent buffer
    pub(crate) fn host_visible(device: &Rc<VulkanDevice>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> VulkanResult<Self> {
        Self::new(device, size, usage, vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT)
    }

    /// Device-local buffer initialized with `bytes`
    pub(crate) fn device_local(
        device: &Rc<VulkanDevice>,
        commands: &CommandPool,
        usage: vk::BufferUsageFlags,
        bytes: &[u8],
    ) -> VulkanResult<Self> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = Self::host_visible(device, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(0, bytes)?;
        let buffer = Self::new(device, size, usage | vk::BufferUsageFlags::TRANSFER_DST, vk::MemoryPropertyFlags::DEVICE_LOCAL)?;
        commands.one_shot(|cmd| {
            let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size: size.max(4) };
            unsafe { device.device.cmd_copy_buffer(cmd, staging.handle(), buffer.handle(), &[region]) };
            Ok(())
        })?;
        Ok(buffer)
    }

    /// Copy `bytes` into a mapped buffer at `offset`
    pub(crate) fn write(&self, offset: vk::DeviceSize, bytes: &[u8]) -> VulkanResult<()> {
        let Some(mapped) = self.mapped else {
            return Err(VulkanError::InvalidOperation { reason: "write into a buffer that is not host visible".to_string() });
        };
        let end = offset + bytes.len() as vk::DeviceSize;
        if end > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {offset} overflows a buffer of {}", bytes.len(), self.size),
            });
        }
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.add(offset as usize), bytes.len()) };
        Ok(())
    }

    /// Read back `len` bytes at `offset` from a mapped buffer
    pub(crate) fn read(&self, offset: vk::DeviceSize, len: usize) -> Option<&[u8]> {
        let mapped = self.mapped?;
        (offset + len as vk::DeviceSize <= self.size)
            .then(|| unsafe { std::slice::from_raw_parts(mapped.add(offset as usize), len) })
    }

    /// Get buffer handle
    pub(crate) const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Get size
    pub(crate) const fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let raw = &self.device.device;
        unsafe {
            if self.mapped.take().is_some() {
                raw.unmap_memory(self.memory);
            }
            raw.destroy_buffer(self.buffer, None);
            raw.free_memory(self.memory, None);
        }
    }
}

fn allocate(device: &VulkanDevice, size: vk::DeviceSize, memory_type: u32) -> VulkanResult<vk::DeviceMemory> {
    let alloc_info = vk::MemoryAllocateInfo::builder().allocation_size(size).memory_type_index(memory_type);
    unsafe { device.device.allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)
}

/// Parameters of an image allocation
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub mip_levels: u32,
    pub cube: bool,
    pub swizzle: vk::ComponentMapping,
}

impl ImageDesc {
    pub(crate) fn new(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        let aspect = if is_depth_format(format) { vk::ImageAspectFlags::DEPTH } else { vk::ImageAspectFlags::COLOR };
        Self {
            extent: vk::Extent2D { width: width.max(1), height: height.max(1) },
            format,
            usage,
            aspect,
            mip_levels: 1,
            cube: false,
            swizzle: vk::ComponentMapping::default(),
        }
    }

    pub(crate) const fn layers(&self) -> u32 {
        if self.cube {
            6
        } else {
            1
        }
    }

    pub(crate) fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.layers(),
        }
    }
}

pub(crate) const fn is_depth_format(format: vk::Format) -> bool {
    matches!(format, vk::Format::D32_SFLOAT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM)
}

/// Mip levels of a full chain for `width` x `height`
pub(crate) fn mip_chain_length(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Device-local image with a view over all of it
pub(crate) struct Image {
    device: Rc<VulkanDevice>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    desc: ImageDesc,
}

impl Image {
    pub(crate) fn new(device: &Rc<VulkanDevice>, desc: ImageDesc) -> VulkanResult<Self> {
        let raw = &device.device;
        let flags = if desc.cube { vk::ImageCreateFlags::CUBE_COMPATIBLE } else { vk::ImageCreateFlags::empty() };
        let image_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D { width: desc.extent.width, height: desc.extent.height, depth: 1 })
            .mip_levels(desc.mip_levels)
            .array_layers(desc.layers())
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { raw.create_image(&image_info, None) }.map_err(VulkanError::Api)?;

        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let memory = match device
            .find_memory_type(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory_type| allocate(device, requirements.size, memory_type))
        {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { raw.destroy_image(image, None) };
                return Err(e);
            }
        };
        let mut created = Self { device: Rc::clone(device), image, memory, view: vk::ImageView::null(), desc };
        unsafe { raw.bind_image_memory(image, memory, 0) }.map_err(VulkanError::Api)?;

        let view_type = if desc.cube { vk::ImageViewType::CUBE } else { vk::ImageViewType::TYPE_2D };
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(view_type)
            .format(desc.format)
            .components(desc.swizzle)
            .subresource_range(desc.full_range());
        created.view = unsafe { raw.create_image_view(&view_info, None) }.map_err(VulkanError::Api)?;
        Ok(created)
    }

    pub(crate) const fn handle(&self) -> vk::Image {
        self.image
    }

    pub(crate) const fn view(&self) -> vk::ImageView {
        self.view
    }

    pub(crate) const fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Record a whole-image layout transition
    pub(crate) fn transition(
        &self,
        cmd: vk::CommandBuffer,
        from: vk::ImageLayout,
        to: vk::ImageLayout,
        (src_stage, src_access): (vk::PipelineStageFlags, vk::AccessFlags),
        (dst_stage, dst_access): (vk::PipelineStageFlags, vk::AccessFlags),
    ) {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(from)
            .new_layout(to)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.desc.full_range())
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .build();
        unsafe {
            self.device.device.cmd_pipeline_barrier(
                cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let raw = &self.device.device;
        unsafe {
            if self.view != vk::ImageView::null() {
                raw.destroy_image_view(self.view, None);
            }
            raw.destroy_image(self.image, None);
            raw.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip_chain_length() {
        assert_eq!(mip_chain_length(1, 1), 1);
        assert_eq!(mip_chain_length(256, 256), 9);
        assert_eq!(mip_chain_length(256, 64), 9);
        assert_eq!(mip_chain_length(300, 10), 9);
        assert_eq!(mip_chain_length(0, 0), 1);
    }

    #[test]
    fn test_image_desc_picks_aspect_from_format() {
        let depth = ImageDesc::new(16, 16, vk::Format::D32_SFLOAT, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);
        let mut color = ImageDesc::new(0, 0, vk::Format::R8G8B8A8_UNORM, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(color.aspect, vk::ImageAspectFlags::COLOR);
        assert_eq!(color.extent, vk::Extent2D { width: 1, height: 1 });
        color.cube = true;
        assert_eq!(color.full_range().layer_count, 6);
    }
}
