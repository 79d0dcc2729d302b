//! Vulkan textures and render targets
//!
//! A texture's storage (image, sampler, descriptor set and, for render targets, framebuffer)
//! is immutable once built. Uploading or resizing builds new storage and retires the old one
//! to the release queue, so frames in flight keep sampling what they recorded.

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use ash::vk;

use super::backend::VulkanBackend;
use super::context::VulkanDevice;
use super::descriptors::DescriptorSet;
use super::memory::{mip_chain_length, Buffer, Image, ImageDesc};
use super::pipeline::{PassKind, TARGET_COLOR_FORMAT};
use super::release::ReleaseQueue;
use super::swapchain::DEPTH_FORMAT;
use super::{VulkanError, VulkanResult};
use crate::assets::{PixelFormat, TextureImage};
use crate::render::texture::{CachedTexture, TextureHelper};
use crate::render::{CachedTextureType, RenderError, RenderResult, TextureFlags};

const BACKEND: &str = "Vulkan";

/// Sampler wrapper with RAII cleanup
struct Sampler {
    device: Rc<VulkanDevice>,
    sampler: vk::Sampler,
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}

/// Framebuffer of a render target
pub(crate) struct RenderAttachments {
    device: Rc<VulkanDevice>,
    framebuffer: vk::Framebuffer,
    _depth: Option<Image>,
    pass: PassKind,
}

impl RenderAttachments {
    pub(crate) const fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub(crate) const fn pass(&self) -> PassKind {
        self.pass
    }
}

impl Drop for RenderAttachments {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

/// Everything one version of a texture's contents needs
struct TextureStorage {
    // Set first: it references the view and sampler
    set: DescriptorSet,
    attachments: Option<RenderAttachments>,
    _sampler: Sampler,
    image: Image,
}

/// Native texture of the Vulkan backend
pub(crate) struct VulkanTexture {
    release: Rc<ReleaseQueue>,
    storage: RefCell<Option<TextureStorage>>,
    cubemap: bool,
}

impl VulkanTexture {
    fn new(release: &Rc<ReleaseQueue>, cubemap: bool) -> Self {
        Self { release: Rc::clone(release), storage: RefCell::new(None), cubemap }
    }

    fn replace(&self, storage: TextureStorage) {
        if let Some(old) = self.storage.borrow_mut().replace(storage) {
            self.release.retire(old);
        }
    }

    pub(crate) const fn is_cubemap(&self) -> bool {
        self.cubemap
    }

    /// Descriptor set sampling the current contents
    pub(crate) fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.storage.borrow().as_ref().map(|s| s.set.handle())
    }

    /// Framebuffer and pass of the current render target storage, if it is `width` x `height`
    pub(crate) fn render_target(&self, width: u32, height: u32) -> Option<(vk::Framebuffer, PassKind, vk::Extent2D)> {
        let storage = self.storage.borrow();
        let storage = storage.as_ref()?;
        let attachments = storage.attachments.as_ref()?;
        let extent = storage.image.desc().extent;
        (extent.width == width && extent.height == height).then_some((attachments.framebuffer(), attachments.pass(), extent))
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.get_mut().take() {
            self.release.retire(storage);
        }
    }
}

/// Texel data of one level of one layer
struct LevelData<'a> {
    width: u32,
    height: u32,
    layer: u32,
    level: u32,
    bytes: Cow<'a, [u8]>,
}

const fn compressed_format(format: PixelFormat) -> Option<vk::Format> {
    match format {
        PixelFormat::Dxt1 => Some(vk::Format::BC1_RGBA_UNORM_BLOCK),
        PixelFormat::Dxt3 => Some(vk::Format::BC2_UNORM_BLOCK),
        PixelFormat::Dxt5 => Some(vk::Format::BC3_UNORM_BLOCK),
        _ => None,
    }
}

/// Format and swizzle of a storage kind
fn storage_format(kind: CachedTextureType) -> (vk::Format, vk::ComponentMapping) {
    match kind {
        CachedTextureType::Rgba | CachedTextureType::RenderTarget => (TARGET_COLOR_FORMAT, vk::ComponentMapping::default()),
        CachedTextureType::Alpha => (
            vk::Format::R8_UNORM,
            vk::ComponentMapping {
                r: vk::ComponentSwizzle::ONE,
                g: vk::ComponentSwizzle::ONE,
                b: vk::ComponentSwizzle::ONE,
                a: vk::ComponentSwizzle::R,
            },
        ),
        CachedTextureType::Depth => (DEPTH_FORMAT, vk::ComponentMapping::default()),
    }
}

/// Layout an image of `format` is sampled in
fn sampled_layout(format: vk::Format) -> vk::ImageLayout {
    if format == DEPTH_FORMAT {
        vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
    } else {
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
    }
}

/// Record a layout transition of a range of levels
#[allow(clippy::too_many_arguments)]
fn level_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: &Image,
    levels: (u32, u32),
    from: vk::ImageLayout,
    to: vk::ImageLayout,
    (src_stage, src_access): (vk::PipelineStageFlags, vk::AccessFlags),
    (dst_stage, dst_access): (vk::PipelineStageFlags, vk::AccessFlags),
) {
    let mut range = image.desc().full_range();
    range.base_mip_level = levels.0;
    range.level_count = levels.1;
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(from)
        .new_layout(to)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image.handle())
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();
    unsafe { device.cmd_pipeline_barrier(cmd, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], &[], &[barrier]) };
}

const TRANSFER_WRITE: (vk::PipelineStageFlags, vk::AccessFlags) =
    (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE);
const TRANSFER_READ: (vk::PipelineStageFlags, vk::AccessFlags) =
    (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ);
const SHADER_READ: (vk::PipelineStageFlags, vk::AccessFlags) =
    (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ);
const NOTHING: (vk::PipelineStageFlags, vk::AccessFlags) = (vk::PipelineStageFlags::TOP_OF_PIPE, vk::AccessFlags::empty());

impl VulkanBackend {
    fn native_texture<'t>(texture: &'t CachedTexture) -> RenderResult<&'t VulkanTexture> {
        texture.expect_native::<VulkanTexture>(BACKEND)
    }

    /// Owned handle on the native, so `texture` stays free for `mark_ready`
    fn shared_native(texture: &CachedTexture) -> RenderResult<Rc<VulkanTexture>> {
        Self::native_texture(texture)?;
        texture
            .binding()
            .native_rc::<VulkanTexture>()
            .ok_or_else(|| RenderError::InvalidOperation(format!("texture {:?} has no {BACKEND} native", texture.id())))
    }

    fn create_sampler(&self, flags: TextureFlags, mip_levels: u32, depth: bool) -> VulkanResult<Sampler> {
        let address = if flags.contains(TextureFlags::NO_WRAP) || depth {
            vk::SamplerAddressMode::CLAMP_TO_EDGE
        } else {
            vk::SamplerAddressMode::REPEAT
        };
        let anisotropy = self.anisotropy > 1.0 && self.device.features.anisotropy && !depth;
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(address)
            .address_mode_v(address)
            .address_mode_w(address)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(if anisotropy { self.anisotropy } else { 1.0 })
            .min_lod(0.0)
            .max_lod(mip_levels as f32);
        let sampler = unsafe { self.device.device.create_sampler(&create_info, None) }.map_err(VulkanError::Api)?;
        Ok(Sampler { device: Rc::clone(&self.device), sampler })
    }

    fn finish_storage(
        &mut self,
        image: Image,
        flags: TextureFlags,
        attachments: Option<RenderAttachments>,
    ) -> VulkanResult<TextureStorage> {
        let desc = *image.desc();
        let sampler = self.create_sampler(flags, desc.mip_levels, desc.format == DEPTH_FORMAT)?;
        let set = self.descriptors.allocate(self.layouts.sampler)?;
        set.write_image(image.view(), sampler.sampler, sampled_layout(desc.format));
        Ok(TextureStorage { set, attachments, _sampler: sampler, image })
    }

    /// Image with `levels` copied in, optionally completed to a full mip chain by blits
    fn upload_image(&mut self, mut desc: ImageDesc, levels: &[LevelData<'_>], build_mips: bool) -> VulkanResult<Image> {
        let linear_blit = self
            .device
            .format_properties(desc.format)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);
        let generate = build_mips && linear_blit && !desc.cube;
        if generate {
            desc.mip_levels = mip_chain_length(desc.extent.width, desc.extent.height);
            desc.usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        } else if build_mips && !linear_blit {
            log::debug!("{:?} cannot be blitted linearly, skipping mipmap generation", desc.format);
        }
        desc.usage |= vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;

        // Offsets aligned for both 4-byte texels and 16-byte compressed blocks
        let mut staging_bytes = Vec::new();
        let mut regions = Vec::with_capacity(levels.len());
        for level in levels {
            staging_bytes.resize(staging_bytes.len().next_multiple_of(16), 0);
            regions.push(
                vk::BufferImageCopy::builder()
                    .buffer_offset(staging_bytes.len() as u64)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: desc.aspect,
                        mip_level: level.level,
                        base_array_layer: level.layer,
                        layer_count: 1,
                    })
                    .image_extent(vk::Extent3D { width: level.width.max(1), height: level.height.max(1), depth: 1 })
                    .build(),
            );
            staging_bytes.extend_from_slice(&level.bytes);
        }

        let staging = Buffer::host_visible(&self.device, staging_bytes.len() as u64, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(0, &staging_bytes)?;
        let image = Image::new(&self.device, desc)?;
        let raw = &self.device.device;
        let mip_levels = desc.mip_levels;

        self.commands.one_shot(|cmd| {
            image.transition(cmd, vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL, NOTHING, TRANSFER_WRITE);
            unsafe {
                raw.cmd_copy_buffer_to_image(cmd, staging.handle(), image.handle(), vk::ImageLayout::TRANSFER_DST_OPTIMAL, &regions);
            }
            if !generate {
                image.transition(cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, TRANSFER_WRITE, SHADER_READ);
                return Ok(());
            }

            let (mut width, mut height) = (desc.extent.width as i32, desc.extent.height as i32);
            for level in 1..mip_levels {
                level_barrier(raw, cmd, &image, (level - 1, 1), vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::TRANSFER_SRC_OPTIMAL, TRANSFER_WRITE, TRANSFER_READ);
                let (next_width, next_height) = ((width / 2).max(1), (height / 2).max(1));
                let layers = |mip_level| vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level,
                    base_array_layer: 0,
                    layer_count: 1,
                };
                let blit = vk::ImageBlit::builder()
                    .src_subresource(layers(level - 1))
                    .src_offsets([vk::Offset3D::default(), vk::Offset3D { x: width, y: height, z: 1 }])
                    .dst_subresource(layers(level))
                    .dst_offsets([vk::Offset3D::default(), vk::Offset3D { x: next_width, y: next_height, z: 1 }])
                    .build();
                unsafe {
                    raw.cmd_blit_image(
                        cmd,
                        image.handle(),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image.handle(),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                }
                level_barrier(raw, cmd, &image, (level - 1, 1), vk::ImageLayout::TRANSFER_SRC_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, TRANSFER_READ, SHADER_READ);
                (width, height) = (next_width, next_height);
            }
            level_barrier(raw, cmd, &image, (mip_levels - 1, 1), vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, TRANSFER_WRITE, SHADER_READ);
            Ok(())
        })?;
        Ok(image)
    }

    /// Storage of `kind` with undefined contents, moved to its sampling layout
    fn blank_image(&mut self, kind: CachedTextureType, width: u32, height: u32, extra_usage: vk::ImageUsageFlags) -> VulkanResult<Image> {
        let (format, swizzle) = storage_format(kind);
        let attachment = if format == DEPTH_FORMAT {
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        } else {
            vk::ImageUsageFlags::COLOR_ATTACHMENT
        };
        let mut desc = ImageDesc::new(width, height, format, vk::ImageUsageFlags::SAMPLED | attachment | extra_usage);
        desc.swizzle = swizzle;
        let image = Image::new(&self.device, desc)?;
        let layout = sampled_layout(format);
        self.commands.one_shot(|cmd| {
            image.transition(cmd, vk::ImageLayout::UNDEFINED, layout, NOTHING, SHADER_READ);
            Ok(())
        })?;
        Ok(image)
    }

    /// Framebuffer, pass and extent rendering into `texture`, rebuilding its storage when needed
    pub(super) fn prepare_render_target(
        &mut self,
        texture: &mut CachedTexture,
        width: u32,
        height: u32,
    ) -> RenderResult<(vk::Framebuffer, PassKind, vk::Extent2D)> {
        if texture.is_cubemap() {
            return Err(RenderError::InvalidOperation("cube maps cannot be render targets".to_string()));
        }
        let kind = match texture.kind() {
            CachedTextureType::Depth => CachedTextureType::Depth,
            _ => CachedTextureType::RenderTarget,
        };
        let native = Self::shared_native(texture)?;
        if let Some(target) = native.render_target(width, height) {
            return Ok(target);
        }

        let (width, height) = (width.max(1), height.max(1));
        let image = Image::new(&self.device, {
            let (format, _) = storage_format(kind);
            let attachment = if kind == CachedTextureType::Depth {
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::ImageUsageFlags::COLOR_ATTACHMENT
            };
            ImageDesc::new(width, height, format, vk::ImageUsageFlags::SAMPLED | attachment)
        })?;
        let (pass, render_pass, depth) = if kind == CachedTextureType::Depth {
            (PassKind::DepthTarget, self.passes.depth_target, None)
        } else {
            let depth = Image::new(
                &self.device,
                ImageDesc::new(width, height, DEPTH_FORMAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
            )?;
            (PassKind::ColorTarget, self.passes.color_target, Some(depth))
        };

        let views: Vec<vk::ImageView> = std::iter::once(image.view()).chain(depth.as_ref().map(Image::view)).collect();
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&views)
            .width(width)
            .height(height)
            .layers(1);
        let framebuffer = unsafe { self.device.device.create_framebuffer(&framebuffer_info, None) }.map_err(VulkanError::Api)?;
        let attachments = RenderAttachments { device: Rc::clone(&self.device), framebuffer, _depth: depth, pass };
        let storage = self.finish_storage(image, TextureFlags::NO_WRAP, Some(attachments))?;
        native.replace(storage);
        log::debug!("Created {}x{} {:?} render target", width, height, kind);

        texture.mark_ready(width, height);
        native
            .render_target(width, height)
            .ok_or_else(|| RenderError::ResourceCreationFailed("render target storage vanished".to_string()))
    }

    /// 1x1 white texture bound to empty slots
    pub(super) fn create_white_texture(&mut self) -> VulkanResult<Rc<VulkanTexture>> {
        let texture = VulkanTexture::new(&self.release, false);
        let desc = ImageDesc::new(1, 1, TARGET_COLOR_FORMAT, vk::ImageUsageFlags::SAMPLED);
        let level = LevelData { width: 1, height: 1, layer: 0, level: 0, bytes: Cow::Borrowed(&[255, 255, 255, 255]) };
        let image = self.upload_image(desc, &[level], false)?;
        texture.replace(self.finish_storage(image, TextureFlags::empty(), None)?);
        Ok(Rc::new(texture))
    }
}

impl TextureHelper for VulkanBackend {
    fn create_empty_texture(&mut self, cubemap: bool) -> RenderResult<CachedTexture> {
        Ok(CachedTexture::new(CachedTextureType::Rgba, 0, 0, cubemap, false, VulkanTexture::new(&self.release, cubemap)))
    }

    fn create_texture(&mut self, data: Option<&[u8]>, width: u32, height: u32, kind: CachedTextureType) -> RenderResult<CachedTexture> {
        let texture = VulkanTexture::new(&self.release, false);
        let (format, swizzle) = storage_format(kind);
        let image = match data {
            Some(bytes) if kind != CachedTextureType::Depth => {
                let mut desc = ImageDesc::new(width, height, format, vk::ImageUsageFlags::SAMPLED);
                desc.swizzle = swizzle;
                if kind == CachedTextureType::RenderTarget {
                    desc.usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
                }
                let level = LevelData { width, height, layer: 0, level: 0, bytes: Cow::Borrowed(bytes) };
                self.upload_image(desc, &[level], false)?
            }
            _ => self.blank_image(kind, width, height, vk::ImageUsageFlags::empty())?,
        };
        let flags = if kind == CachedTextureType::Rgba { TextureFlags::empty() } else { TextureFlags::NO_WRAP };
        texture.replace(self.finish_storage(image, flags, None)?);
        Ok(CachedTexture::new(kind, width, height, false, true, texture))
    }

    fn upload_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        image.validate().map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        let mut levels = Vec::with_capacity(image.levels.len());
        for (index, mip) in image.levels.iter().enumerate() {
            let Some(bytes) = image.level_rgba8(index) else {
                return Err(RenderError::InvalidOperation(format!("{:?} is not an uncompressed format", image.format)));
            };
            levels.push(LevelData { width: mip.width, height: mip.height, layer: 0, level: index as u32, bytes });
        }
        let mut desc = ImageDesc::new(image.width(), image.height(), TARGET_COLOR_FORMAT, vk::ImageUsageFlags::SAMPLED);
        desc.mip_levels = levels.len() as u32;
        let build_mips = levels.len() == 1 && flags.contains(TextureFlags::BUILD_MIPMAPS);

        let native = Self::shared_native(texture)?;
        let uploaded = self.upload_image(desc, &levels, build_mips)?;
        native.replace(self.finish_storage(uploaded, flags, None)?);
        texture.mark_ready(image.width(), image.height());
        Ok(())
    }

    fn upload_compressed_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        let Some(format) = compressed_format(image.format) else {
            return self.upload_texture(texture, image, flags);
        };
        if !self.device.features.compressed_bc {
            log::warn!("BC textures not supported by this device, texture stays a placeholder");
            return Ok(());
        }
        image.validate().map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        Self::native_texture(texture)?;

        let levels: Vec<LevelData<'_>> = image
            .levels
            .iter()
            .enumerate()
            .map(|(index, mip)| LevelData {
                width: mip.width,
                height: mip.height,
                layer: 0,
                level: index as u32,
                bytes: Cow::Borrowed(mip.data.as_slice()),
            })
            .collect();
        let mut desc = ImageDesc::new(image.width(), image.height(), format, vk::ImageUsageFlags::SAMPLED);
        desc.mip_levels = levels.len() as u32;
        let uploaded = self.upload_image(desc, &levels, false)?;
        let storage = self.finish_storage(uploaded, flags, None)?;
        Self::native_texture(texture)?.replace(storage);
        texture.mark_ready(image.width(), image.height());
        Ok(())
    }

    fn upload_cubemap(&mut self, texture: &mut CachedTexture, sides: &[TextureImage; 6], flags: TextureFlags) -> RenderResult<()> {
        if !Self::native_texture(texture)?.cubemap {
            return Err(RenderError::InvalidOperation("cube faces uploaded into a flat texture".to_string()));
        }
        let (width, height) = (sides[0].width(), sides[0].height());
        let mut levels = Vec::with_capacity(6);
        for (face, side) in sides.iter().enumerate() {
            if (side.width(), side.height()) != (width, height) {
                return Err(RenderError::InvalidOperation(format!("cube face {face} differs in size from face 0")));
            }
            let Some(bytes) = side.level_rgba8(0) else {
                return Err(RenderError::InvalidOperation("compressed cube faces are not supported".to_string()));
            };
            levels.push(LevelData { width, height, layer: face as u32, level: 0, bytes });
        }
        let mut desc = ImageDesc::new(width, height, TARGET_COLOR_FORMAT, vk::ImageUsageFlags::SAMPLED);
        desc.cube = true;
        let uploaded = self.upload_image(desc, &levels, false)?;
        let storage = self.finish_storage(uploaded, flags | TextureFlags::NO_WRAP, None)?;
        Self::native_texture(texture)?.replace(storage);
        texture.mark_ready(width, height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_textures_swizzle_into_alpha() {
        let (format, swizzle) = storage_format(CachedTextureType::Alpha);
        assert_eq!(format, vk::Format::R8_UNORM);
        assert_eq!(swizzle.a, vk::ComponentSwizzle::R);
        assert_eq!(swizzle.r, vk::ComponentSwizzle::ONE);
    }

    #[test]
    fn test_depth_textures_sample_read_only() {
        assert_eq!(storage_format(CachedTextureType::Depth).0, DEPTH_FORMAT);
        assert_eq!(sampled_layout(DEPTH_FORMAT), vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL);
        assert_eq!(sampled_layout(TARGET_COLOR_FORMAT), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_compressed_formats() {
        assert_eq!(compressed_format(PixelFormat::Dxt1), Some(vk::Format::BC1_RGBA_UNORM_BLOCK));
        assert_eq!(compressed_format(PixelFormat::Dxt5), Some(vk::Format::BC3_UNORM_BLOCK));
        assert_eq!(compressed_format(PixelFormat::Rgba8), None);
    }
}
