//! Command pools and one-shot submissions

use std::rc::Rc;

use ash::vk;

use super::context::VulkanDevice;
use super::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub(crate) struct CommandPool {
    device: Rc<VulkanDevice>,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a pool on the graphics queue family
    pub(crate) fn new(device: &Rc<VulkanDevice>) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(device.graphics_family);
        let command_pool = unsafe { device.device.create_command_pool(&pool_create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Self { device: Rc::clone(device), command_pool })
    }

    /// Allocate primary command buffers
    pub(crate) fn allocate(&self, count: u32) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)
    }

    /// Start a command buffer that is submitted once with [`submit_and_wait`](Self::submit_and_wait)
    pub(crate) fn begin_one_shot(&self) -> VulkanResult<vk::CommandBuffer> {
        let cmd = self.allocate(1)?.pop().ok_or(VulkanError::Api(vk::Result::ERROR_OUT_OF_HOST_MEMORY))?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(e) = unsafe { self.device.device.begin_command_buffer(cmd, &begin_info) } {
            self.free(cmd);
            return Err(VulkanError::Api(e));
        }
        Ok(cmd)
    }

    /// End, submit and wait for a buffer from [`begin_one_shot`](Self::begin_one_shot), then free it
    pub(crate) fn submit_and_wait(&self, cmd: vk::CommandBuffer) -> VulkanResult<()> {
        let raw = &self.device.device;
        let result = (|| unsafe {
            raw.end_command_buffer(cmd)?;
            let fence = raw.create_fence(&vk::FenceCreateInfo::default(), None)?;
            let buffers = [cmd];
            let submit = vk::SubmitInfo::builder().command_buffers(&buffers).build();
            let submitted = raw
                .queue_submit(self.device.graphics_queue, &[submit], fence)
                .and_then(|()| raw.wait_for_fences(&[fence], true, u64::MAX));
            raw.destroy_fence(fence, None);
            submitted
        })();
        self.free(cmd);
        result.map_err(VulkanError::Api)
    }

    /// Record with `record` and execute right away
    pub(crate) fn one_shot(&self, record: impl FnOnce(vk::CommandBuffer) -> VulkanResult<()>) -> VulkanResult<()> {
        let cmd = self.begin_one_shot()?;
        if let Err(e) = record(cmd) {
            unsafe {
                let _ = self.device.device.end_command_buffer(cmd);
            }
            self.free(cmd);
            return Err(e);
        }
        self.submit_and_wait(cmd)
    }

    fn free(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.device.free_command_buffers(self.command_pool, &[cmd]) };
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}
