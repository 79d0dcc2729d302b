//! Descriptor set layouts, pools and sets
//!
//! Sets are allocated from the newest pool. When it runs dry a pool twice its size is created
//! and the allocation retried once; a second failure is an error. Sets free themselves into
//! the pool they came from, and a pool lives until its last set is gone.

use std::rc::Rc;

use ash::vk;

use super::context::VulkanDevice;
use super::{VulkanError, VulkanResult};

/// Set layouts shared by every program
pub(crate) struct DescriptorLayouts {
    device: Rc<VulkanDevice>,
    /// Set 0: the scene uniform block at a dynamic offset
    pub uniforms: vk::DescriptorSetLayout,
    /// Sets 1 and 2: one combined image sampler
    pub sampler: vk::DescriptorSetLayout,
}

impl DescriptorLayouts {
    pub(crate) fn new(device: &Rc<VulkanDevice>) -> VulkanResult<Self> {
        let mut layouts = Self {
            device: Rc::clone(device),
            uniforms: vk::DescriptorSetLayout::null(),
            sampler: vk::DescriptorSetLayout::null(),
        };
        let uniform_binding = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT | vk::ShaderStageFlags::GEOMETRY)
            .build()];
        let sampler_binding = [vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];

        let raw = &device.device;
        unsafe {
            layouts.uniforms = raw
                .create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::builder().bindings(&uniform_binding), None)
                .map_err(VulkanError::Api)?;
            layouts.sampler = raw
                .create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::builder().bindings(&sampler_binding), None)
                .map_err(VulkanError::Api)?;
        }
        Ok(layouts)
    }
}

impl Drop for DescriptorLayouts {
    fn drop(&mut self) {
        let raw = &self.device.device;
        unsafe {
            if self.sampler != vk::DescriptorSetLayout::null() {
                raw.destroy_descriptor_set_layout(self.sampler, None);
            }
            if self.uniforms != vk::DescriptorSetLayout::null() {
                raw.destroy_descriptor_set_layout(self.uniforms, None);
            }
        }
    }
}

/// Descriptor pool wrapper with RAII cleanup
pub(crate) struct DescriptorPool {
    device: Rc<VulkanDevice>,
    pool: vk::DescriptorPool,
}

impl DescriptorPool {
    fn new(device: &Rc<VulkanDevice>, max_sets: u32) -> VulkanResult<Self> {
        let sizes = [
            vk::DescriptorPoolSize { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count: max_sets },
            vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count: max_sets },
        ];
        let create_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { device.device.create_descriptor_pool(&create_info, None) }.map_err(VulkanError::Api)?;
        log::debug!("Created descriptor pool of {} sets", max_sets);
        Ok(Self { device: Rc::clone(device), pool })
    }

    fn try_allocate(&self, layout: vk::DescriptorSetLayout) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder().descriptor_pool(self.pool).set_layouts(&layouts);
        let sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }?;
        sets.into_iter().next().ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
    }
}

/// Descriptor set that returns itself to its pool when dropped
pub(crate) struct DescriptorSet {
    pool: Rc<DescriptorPool>,
    set: vk::DescriptorSet,
}

impl DescriptorSet {
    pub(crate) const fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Point binding 0 at a uniform buffer range
    pub(crate) fn write_uniform_buffer(&self, buffer: vk::Buffer, range: vk::DeviceSize) {
        let buffer_info = [vk::DescriptorBufferInfo { buffer, offset: 0, range }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&buffer_info)
            .build();
        unsafe { self.pool.device.device.update_descriptor_sets(&[write], &[]) };
    }

    /// Point binding 0 at an image view and sampler
    pub(crate) fn write_image(&self, view: vk::ImageView, sampler: vk::Sampler, layout: vk::ImageLayout) {
        let image_info = [vk::DescriptorImageInfo { sampler, image_view: view, image_layout: layout }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();
        unsafe { self.pool.device.device.update_descriptor_sets(&[write], &[]) };
    }
}

impl Drop for DescriptorSet {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.pool.device.device.free_descriptor_sets(self.pool.pool, &[self.set]) } {
            log::warn!("Failed to free descriptor set: {:?}", e);
        }
    }
}

/// Growing descriptor pool chain
pub(crate) struct DescriptorAllocator {
    device: Rc<VulkanDevice>,
    current: Rc<DescriptorPool>,
    current_size: u32,
}

impl DescriptorAllocator {
    pub(crate) fn new(device: &Rc<VulkanDevice>, initial_sets: u32) -> VulkanResult<Self> {
        let size = initial_sets.max(1);
        Ok(Self { device: Rc::clone(device), current: Rc::new(DescriptorPool::new(device, size)?), current_size: size })
    }

    /// Allocate a set with `layout`
    pub(crate) fn allocate(&mut self, layout: vk::DescriptorSetLayout) -> VulkanResult<DescriptorSet> {
        let set = allocate_with_growth(self, |allocator| allocator.current.try_allocate(layout), Self::grow)?;
        Ok(DescriptorSet { pool: Rc::clone(&self.current), set })
    }

    fn grow(&mut self) -> VulkanResult<()> {
        let size = self.current_size.saturating_mul(2);
        log::debug!("Descriptor pool of {} sets exhausted, growing to {}", self.current_size, size);
        self.current = Rc::new(DescriptorPool::new(&self.device, size)?);
        self.current_size = size;
        Ok(())
    }
}

const fn is_exhausted(result: vk::Result) -> bool {
    matches!(result, vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
}

/// Run `attempt`; on pool exhaustion run `grow` and retry exactly once
fn allocate_with_growth<S, T>(
    state: &mut S,
    mut attempt: impl FnMut(&mut S) -> Result<T, vk::Result>,
    grow: impl FnOnce(&mut S) -> VulkanResult<()>,
) -> VulkanResult<T> {
    match attempt(state) {
        Ok(value) => Ok(value),
        Err(result) if is_exhausted(result) => {
            grow(state)?;
            attempt(state).map_err(|result| if is_exhausted(result) { VulkanError::DescriptorPoolExhausted } else { VulkanError::Api(result) })
        }
        Err(result) => Err(VulkanError::Api(result)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePool {
        free: u32,
        size: u32,
        grows: u32,
    }

    fn try_take(pool: &mut FakePool) -> Result<u32, vk::Result> {
        if pool.free == 0 {
            return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
        }
        pool.free -= 1;
        Ok(pool.free)
    }

    fn grow(pool: &mut FakePool) -> VulkanResult<()> {
        pool.size *= 2;
        pool.free = pool.size;
        pool.grows += 1;
        Ok(())
    }

    #[test]
    fn test_exhaustion_doubles_and_retries() {
        let mut pool = FakePool { free: 0, size: 4, grows: 0 };
        assert!(allocate_with_growth(&mut pool, try_take, grow).is_ok());
        assert_eq!(pool.size, 8);
        assert_eq!(pool.grows, 1);
    }

    #[test]
    fn test_second_exhaustion_fails() {
        let mut pool = FakePool { free: 0, size: 0, grows: 0 };
        let result = allocate_with_growth(&mut pool, try_take, grow);
        assert!(matches!(result, Err(VulkanError::DescriptorPoolExhausted)));
        assert_eq!(pool.grows, 1);
    }

    #[test]
    fn test_other_errors_do_not_grow() {
        let mut pool = FakePool { free: 0, size: 4, grows: 0 };
        let result = allocate_with_growth(&mut pool, |_| Err::<u32, _>(vk::Result::ERROR_DEVICE_LOST), grow);
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))));
        assert_eq!(pool.grows, 0);
    }
}
