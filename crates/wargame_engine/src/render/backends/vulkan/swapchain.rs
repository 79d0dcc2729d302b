//! Vulkan swapchain management
//!
//! The swapchain owns its image views, the shared depth buffer and one framebuffer per image.
//! It is rebuilt as a whole whenever acquire or present reports it out of date.

use std::rc::Rc;

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::vk;

use super::context::{VulkanDevice, VulkanSurface};
use super::memory::{Image, ImageDesc};
use super::{VulkanError, VulkanResult};

/// Depth format of the screen and of render targets
pub(crate) const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Outcome of acquiring the next image
pub(crate) enum Acquired {
    Image(u32),
    OutOfDate,
}

/// Swapchain management wrapper with RAII cleanup
pub(crate) struct Swapchain {
    device: Rc<VulkanDevice>,
    loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    depth: Image,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain for `surface` with framebuffers compatible with `render_pass`
    pub(crate) fn new(
        device: &Rc<VulkanDevice>,
        surface: &VulkanSurface,
        window_size: (u32, u32),
        prefer_mailbox: bool,
        old_swapchain: Option<&Swapchain>,
        render_pass: vk::RenderPass,
    ) -> VulkanResult<Self> {
        let loader = SwapchainLoader::new(&device.instance.instance, &device.device);
        let (caps, formats, present_modes) = unsafe {
            (
                surface.loader.get_physical_device_surface_capabilities(device.physical, surface.surface)?,
                surface.loader.get_physical_device_surface_formats(device.physical, surface.surface)?,
                surface.loader.get_physical_device_surface_present_modes(device.physical, surface.surface)?,
            )
        };

        let format = choose_surface_format(&formats)
            .ok_or_else(|| VulkanError::InitializationFailed("surface reports no formats".to_string()))?;
        let present_mode = choose_present_mode(&present_modes, prefer_mailbox);
        let extent = choose_extent(&caps, window_size);
        let image_count = choose_image_count(&caps);

        let families = [device.graphics_family, device.present_family];
        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.map_or(vk::SwapchainKHR::null(), |old| old.swapchain));
        create_info = if device.graphics_family == device.present_family {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::CONCURRENT).queue_family_indices(&families)
        };

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }?;
        let depth = match Image::new(
            device,
            ImageDesc::new(extent.width, extent.height, DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
        ) {
            Ok(depth) => depth,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        let mut created = Self {
            device: Rc::clone(device),
            loader,
            swapchain,
            views: Vec::new(),
            framebuffers: Vec::new(),
            depth,
            format,
            extent,
        };
        created.create_views_and_framebuffers(render_pass)?;

        log::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            created.views.len(),
            format.format,
            present_mode
        );
        Ok(created)
    }

    fn create_views_and_framebuffers(&mut self, render_pass: vk::RenderPass) -> VulkanResult<()> {
        let raw = &self.device.device;
        let images = unsafe { self.loader.get_swapchain_images(self.swapchain) }?;
        for image in images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { raw.create_image_view(&view_info, None) }?;
            self.views.push(view);

            let attachments = [view, self.depth.view()];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);
            self.framebuffers.push(unsafe { raw.create_framebuffer(&framebuffer_info, None) }?);
        }
        Ok(())
    }

    /// Acquire the next image, signaling `semaphore` when it is ready
    pub(crate) fn acquire(&self, semaphore: vk::Semaphore) -> VulkanResult<Acquired> {
        match unsafe { self.loader.acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null()) } {
            Ok((index, false)) => Ok(Acquired::Image(index)),
            Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    /// Queue `index` for presentation; returns `false` when the swapchain must be rebuilt
    pub(crate) fn present(&self, queue: vk::Queue, index: u32, wait: vk::Semaphore) -> VulkanResult<bool> {
        let swapchains = [self.swapchain];
        let indices = [index];
        let waits = [wait];
        let present_info = vk::PresentInfoKHR::builder().wait_semaphores(&waits).swapchains(&swapchains).image_indices(&indices);
        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(true),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(false),
            Err(e) => Err(VulkanError::Api(e)),
        }
    }

    pub(crate) fn framebuffer(&self, index: u32) -> vk::Framebuffer {
        self.framebuffers[index as usize]
    }

    pub(crate) const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub(crate) const fn color_format(&self) -> vk::Format {
        self.format.format
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let raw = &self.device.device;
        unsafe {
            for framebuffer in self.framebuffers.drain(..) {
                raw.destroy_framebuffer(framebuffer, None);
            }
            for view in self.views.drain(..) {
                raw.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Surface format of the swapchain images
///
/// Colors are written as given, so a UNORM format is preferred over an sRGB one.
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let preferred = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];
    preferred
        .iter()
        .find_map(|wanted| {
            formats
                .iter()
                .find(|sf| sf.format == *wanted && sf.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
        })
        .or_else(|| formats.first())
        .copied()
}

pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, (width, height): (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR }
    }

    #[test]
    fn test_surface_format_prefers_unorm() {
        let formats = [surface_format(vk::Format::B8G8R8A8_SRGB), surface_format(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(choose_surface_format(&formats).map(|f| f.format), Some(vk::Format::B8G8R8A8_UNORM));

        let only_srgb = [surface_format(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(choose_surface_format(&only_srgb).map(|f| f.format), Some(vk::Format::B8G8R8A8_SRGB));
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[vk::PresentModeKHR::FIFO], true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_extent_clamps_when_surface_is_flexible() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 2048 },
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, (5000, 600)), vk::Extent2D { width: 4096, height: 600 });
        assert_eq!(choose_image_count(&caps), 2);

        let fixed = vk::SurfaceCapabilitiesKHR { current_extent: vk::Extent2D { width: 800, height: 600 }, ..caps };
        assert_eq!(choose_extent(&fixed, (1, 1)), vk::Extent2D { width: 800, height: 600 });
    }
}
