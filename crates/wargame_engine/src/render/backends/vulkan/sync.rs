//! Per-frame synchronization objects

use std::rc::Rc;

use ash::vk;

use super::context::VulkanDevice;
use super::{VulkanError, VulkanResult};

/// Semaphores and fence of one frame slot
pub(crate) struct FrameSync {
    device: Rc<VulkanDevice>,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create the objects; the fence starts signaled so the first wait returns immediately
    pub(crate) fn new(device: &Rc<VulkanDevice>) -> VulkanResult<Self> {
        let raw = &device.device;
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            device: Rc::clone(device),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };
        unsafe {
            sync.image_available = raw.create_semaphore(&semaphore_info, None).map_err(VulkanError::Api)?;
            sync.render_finished = raw.create_semaphore(&semaphore_info, None).map_err(VulkanError::Api)?;
            sync.in_flight = raw.create_fence(&fence_info, None).map_err(VulkanError::Api)?;
        }
        Ok(sync)
    }

    /// Block until the GPU finished the slot's previous frame
    pub(crate) fn wait(&self) -> VulkanResult<()> {
        unsafe { self.device.device.wait_for_fences(&[self.in_flight], true, u64::MAX) }.map_err(VulkanError::Api)
    }

    /// Unsignal the fence before resubmitting
    pub(crate) fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.device.reset_fences(&[self.in_flight]) }.map_err(VulkanError::Api)
    }

    /// Replace the image-available semaphore, which a failed acquire may leave in an unknown state
    pub(crate) fn renew_image_available(&mut self) -> VulkanResult<()> {
        let raw = &self.device.device;
        let fresh = unsafe { raw.create_semaphore(&vk::SemaphoreCreateInfo::default(), None) }.map_err(VulkanError::Api)?;
        unsafe { raw.destroy_semaphore(std::mem::replace(&mut self.image_available, fresh), None) };
        Ok(())
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let raw = &self.device.device;
        unsafe {
            if self.in_flight != vk::Fence::null() {
                let _ = raw.wait_for_fences(&[self.in_flight], true, u64::MAX);
                raw.destroy_fence(self.in_flight, None);
            }
            if self.render_finished != vk::Semaphore::null() {
                raw.destroy_semaphore(self.render_finished, None);
            }
            if self.image_available != vk::Semaphore::null() {
                raw.destroy_semaphore(self.image_available, None);
            }
        }
    }
}
