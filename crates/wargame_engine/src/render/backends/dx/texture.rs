//! DirectX textures and render targets
//!
//! Each upload builds new storage (texture, view, sampler and bind group) and swaps it in.
//! Recorded passes hold their own references to the bind groups they sample, so replacing
//! storage mid-frame is safe.

use std::cell::RefCell;
use std::rc::Rc;

use image::imageops::FilterType;

use super::backend::DxBackend;
use super::context::DEPTH_FORMAT;
use super::pipeline::{Layouts, PassKind, TARGET_COLOR_FORMAT};
use crate::assets::{PixelFormat, TextureImage};
use crate::render::texture::{CachedTexture, TextureHelper};
use crate::render::{CachedTextureType, RenderError, RenderResult, TextureFlags};

const BACKEND: &str = "DirectX";

/// Views a render-to-texture pass draws into
#[derive(Clone)]
pub(crate) struct RenderTarget {
    pub color: Option<Rc<wgpu::TextureView>>,
    pub depth: Rc<wgpu::TextureView>,
    pub pass: PassKind,
    pub size: (u32, u32),
}

/// Everything one version of a texture's contents needs
struct TextureStorage {
    /// `None` for cube maps, which no built-in slot samples
    bind_group: Option<Rc<wgpu::BindGroup>>,
    depth: bool,
    target: Option<RenderTarget>,
    size: (u32, u32),
    _texture: wgpu::Texture,
}

/// Native texture of the DirectX backend
pub(crate) struct DxTexture {
    storage: RefCell<Option<TextureStorage>>,
    cubemap: bool,
}

impl DxTexture {
    const fn new(cubemap: bool) -> Self {
        Self { storage: RefCell::new(None), cubemap }
    }

    fn replace(&self, storage: TextureStorage) {
        *self.storage.borrow_mut() = Some(storage);
    }

    /// Bind group sampling the current contents, if they are a flat texture of the wanted kind
    pub(crate) fn bind_group(&self, depth: bool) -> Option<Rc<wgpu::BindGroup>> {
        let storage = self.storage.borrow();
        let storage = storage.as_ref().filter(|s| s.depth == depth)?;
        storage.bind_group.clone()
    }

    fn render_target(&self, width: u32, height: u32) -> Option<RenderTarget> {
        let storage = self.storage.borrow();
        let storage = storage.as_ref()?;
        storage.target.clone().filter(|_| storage.size == (width, height))
    }
}

/// Bind groups sampled by empty or mismatched slots: opaque white and a depth of 1.0
pub(crate) struct Placeholders {
    pub color: Rc<wgpu::BindGroup>,
    pub depth: Rc<wgpu::BindGroup>,
    _textures: [wgpu::Texture; 2],
}

impl Placeholders {
    pub(crate) fn new(device: &wgpu::Device, queue: &wgpu::Queue, layouts: &Layouts) -> Self {
        let white = create_texture(device, (1, 1), TARGET_COLOR_FORMAT, 1, 1, wgpu::TextureUsages::empty());
        write_rgba_level(queue, &white, 0, 0, (1, 1), &[255, 255, 255, 255]);
        let depth = create_texture(device, (1, 1), DEPTH_FORMAT, 1, 1, wgpu::TextureUsages::RENDER_ATTACHMENT);
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Placeholder Clear") });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Placeholder Clear"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &depth_view,
                depth_ops: Some(wgpu::Operations { load: wgpu::LoadOp::Clear(1.0), store: wgpu::StoreOp::Store }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        queue.submit(Some(encoder.finish()));

        let color_view = white.create_view(&wgpu::TextureViewDescriptor::default());
        let color = bind_group(device, &layouts.color, &color_view, &create_sampler(device, TextureFlags::empty(), 1, 1.0, false));
        let depth_group = bind_group(device, &layouts.depth, &depth_view, &create_sampler(device, TextureFlags::NO_WRAP, 1, 1.0, true));
        Self { color: Rc::new(color), depth: Rc::new(depth_group), _textures: [white, depth] }
    }
}

fn create_texture(
    device: &wgpu::Device,
    (width, height): (u32, u32),
    format: wgpu::TextureFormat,
    layers: u32,
    mip_levels: u32,
    extra_usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    // Depth textures are only ever rendered to
    let copy = if format == DEPTH_FORMAT { wgpu::TextureUsages::empty() } else { wgpu::TextureUsages::COPY_DST };
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Texture"),
        size: wgpu::Extent3d { width: width.max(1), height: height.max(1), depth_or_array_layers: layers },
        mip_level_count: mip_levels,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | copy | extra_usage,
        view_formats: &[],
    })
}

/// Highest power of two not above `level`, within what `wgpu` accepts
fn anisotropy_clamp(level: f32) -> u16 {
    let level = level.clamp(1.0, 16.0) as u16;
    1 << (15 - level.leading_zeros())
}

fn create_sampler(device: &wgpu::Device, flags: TextureFlags, mip_levels: u32, anisotropy: f32, depth: bool) -> wgpu::Sampler {
    let address = if flags.contains(TextureFlags::NO_WRAP) || depth {
        wgpu::AddressMode::ClampToEdge
    } else {
        wgpu::AddressMode::Repeat
    };
    let filter = if depth { wgpu::FilterMode::Nearest } else { wgpu::FilterMode::Linear };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("Texture Sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        lod_min_clamp: 0.0,
        lod_max_clamp: mip_levels as f32,
        compare: None,
        anisotropy_clamp: if depth { 1 } else { anisotropy_clamp(anisotropy) },
        border_color: None,
    })
}

fn bind_group(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, view: &wgpu::TextureView, sampler: &wgpu::Sampler) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Texture Bind Group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(view) },
            wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(sampler) },
        ],
    })
}

fn write_level(
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    level: u32,
    layer: u32,
    extent: (u32, u32),
    bytes: &[u8],
    (bytes_per_row, rows): (u32, u32),
) {
    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: level,
            origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
            aspect: wgpu::TextureAspect::All,
        },
        bytes,
        wgpu::ImageDataLayout { offset: 0, bytes_per_row: Some(bytes_per_row), rows_per_image: Some(rows) },
        wgpu::Extent3d { width: extent.0, height: extent.1, depth_or_array_layers: 1 },
    );
}

fn write_rgba_level(queue: &wgpu::Queue, texture: &wgpu::Texture, level: u32, layer: u32, (width, height): (u32, u32), bytes: &[u8]) {
    write_level(queue, texture, level, layer, (width, height), bytes, (4 * width, height));
}

const fn compressed_format(format: PixelFormat) -> Option<(wgpu::TextureFormat, u32)> {
    match format {
        PixelFormat::Dxt1 => Some((wgpu::TextureFormat::Bc1RgbaUnorm, 8)),
        PixelFormat::Dxt3 => Some((wgpu::TextureFormat::Bc2RgbaUnorm, 16)),
        PixelFormat::Dxt5 => Some((wgpu::TextureFormat::Bc3RgbaUnorm, 16)),
        _ => None,
    }
}

/// Levels 1.. of the mip chain of an RGBA image, filtered on the CPU
fn build_mip_chain(width: u32, height: u32, rgba: &[u8]) -> Vec<image::RgbaImage> {
    let Some(mut current) = image::RgbaImage::from_raw(width, height, rgba.to_vec()) else {
        return Vec::new();
    };
    let mut levels = Vec::new();
    let (mut w, mut h) = (width, height);
    while w > 1 || h > 1 {
        (w, h) = ((w / 2).max(1), (h / 2).max(1));
        current = image::imageops::resize(&current, w, h, FilterType::Triangle);
        levels.push(current.clone());
    }
    levels
}

/// Tightly packed RGBA of the data given to `create_texture`
fn expand_to_rgba(kind: CachedTextureType, data: &[u8]) -> Vec<u8> {
    match kind {
        CachedTextureType::Alpha => data.iter().flat_map(|&a| [255, 255, 255, a]).collect(),
        _ => data.to_vec(),
    }
}

impl DxBackend {
    fn native_texture<'t>(texture: &'t CachedTexture) -> RenderResult<&'t DxTexture> {
        texture.expect_native::<DxTexture>(BACKEND)
    }

    fn shared_native(texture: &CachedTexture) -> RenderResult<Rc<DxTexture>> {
        Self::native_texture(texture)?;
        texture
            .binding()
            .native_rc::<DxTexture>()
            .ok_or_else(|| RenderError::InvalidOperation(format!("texture {:?} has no {BACKEND} native", texture.id())))
    }

    fn finish_storage(
        &self,
        texture: wgpu::Texture,
        flags: TextureFlags,
        cubemap: bool,
        target: Option<RenderTarget>,
    ) -> TextureStorage {
        let depth = texture.format() == DEPTH_FORMAT;
        let size = (texture.width(), texture.height());
        let bind_group = (!cubemap).then(|| {
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let sampler = create_sampler(&self.context.device, flags, texture.mip_level_count(), self.anisotropy, depth);
            let layout = if depth { &self.layouts.depth } else { &self.layouts.color };
            Rc::new(bind_group(&self.context.device, layout, &view, &sampler))
        });
        TextureStorage { bind_group, depth, target, size, _texture: texture }
    }

    /// RGBA texture from `levels`, completed to a full chain when `build_mips` is set
    fn upload_rgba(&self, (width, height): (u32, u32), levels: &[&[u8]], build_mips: bool) -> wgpu::Texture {
        let generated = if build_mips { build_mip_chain(width, height, levels[0]) } else { Vec::new() };
        let mip_levels = (levels.len() + generated.len()) as u32;
        let texture = create_texture(&self.context.device, (width, height), TARGET_COLOR_FORMAT, 1, mip_levels, wgpu::TextureUsages::empty());
        let (mut w, mut h) = (width, height);
        for (level, bytes) in levels.iter().enumerate() {
            write_rgba_level(&self.context.queue, &texture, level as u32, 0, (w, h), bytes);
            (w, h) = ((w / 2).max(1), (h / 2).max(1));
        }
        for (offset, mip) in generated.iter().enumerate() {
            write_rgba_level(&self.context.queue, &texture, (levels.len() + offset) as u32, 0, mip.dimensions(), mip.as_raw());
        }
        texture
    }

    /// Views rendering into `texture`, rebuilding its storage when the size changed
    pub(super) fn prepare_render_target(&mut self, texture: &mut CachedTexture, width: u32, height: u32) -> RenderResult<RenderTarget> {
        if texture.is_cubemap() {
            return Err(RenderError::InvalidOperation("cube maps cannot be render targets".to_string()));
        }
        let native = Self::shared_native(texture)?;
        let (width, height) = (width.max(1), height.max(1));
        if let Some(target) = native.render_target(width, height) {
            return Ok(target);
        }

        let device = &self.context.device;
        let depth_kind = texture.kind() == CachedTextureType::Depth;
        let format = if depth_kind { DEPTH_FORMAT } else { TARGET_COLOR_FORMAT };
        let image = create_texture(device, (width, height), format, 1, 1, wgpu::TextureUsages::RENDER_ATTACHMENT);
        let view = Rc::new(image.create_view(&wgpu::TextureViewDescriptor::default()));
        let target = if depth_kind {
            RenderTarget { color: None, depth: view, pass: PassKind::DepthTarget, size: (width, height) }
        } else {
            let depth = create_texture(device, (width, height), DEPTH_FORMAT, 1, 1, wgpu::TextureUsages::RENDER_ATTACHMENT);
            let depth_view = Rc::new(depth.create_view(&wgpu::TextureViewDescriptor::default()));
            RenderTarget { color: Some(view), depth: depth_view, pass: PassKind::ColorTarget, size: (width, height) }
        };
        native.replace(self.finish_storage(image, TextureFlags::NO_WRAP, false, Some(target.clone())));
        log::debug!("Created {}x{} {:?} render target", width, height, target.pass);
        texture.mark_ready(width, height);
        Ok(target)
    }
}

impl TextureHelper for DxBackend {
    fn create_empty_texture(&mut self, cubemap: bool) -> RenderResult<CachedTexture> {
        Ok(CachedTexture::new(CachedTextureType::Rgba, 0, 0, cubemap, false, DxTexture::new(cubemap)))
    }

    fn create_texture(&mut self, data: Option<&[u8]>, width: u32, height: u32, kind: CachedTextureType) -> RenderResult<CachedTexture> {
        let native = DxTexture::new(false);
        let texture = match (kind, data) {
            (CachedTextureType::Depth, _) => {
                create_texture(&self.context.device, (width, height), DEPTH_FORMAT, 1, 1, wgpu::TextureUsages::RENDER_ATTACHMENT)
            }
            (_, Some(bytes)) => {
                let rgba = expand_to_rgba(kind, bytes);
                let expected = (width * height * 4) as usize;
                if rgba.len() < expected {
                    return Err(RenderError::ResourceCreationFailed(format!(
                        "{width}x{height} {kind:?} texture needs {expected} bytes, got {}",
                        rgba.len()
                    )));
                }
                self.upload_rgba((width, height), &[&rgba[..expected]], false)
            }
            (_, None) => {
                let usage = if kind == CachedTextureType::RenderTarget {
                    wgpu::TextureUsages::RENDER_ATTACHMENT
                } else {
                    wgpu::TextureUsages::empty()
                };
                create_texture(&self.context.device, (width, height), TARGET_COLOR_FORMAT, 1, 1, usage)
            }
        };
        let flags = if kind == CachedTextureType::Rgba { TextureFlags::empty() } else { TextureFlags::NO_WRAP };
        native.replace(self.finish_storage(texture, flags, false, None));
        Ok(CachedTexture::new(kind, width, height, false, true, native))
    }

    fn upload_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        image.validate().map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        let mut levels = Vec::with_capacity(image.levels.len());
        for index in 0..image.levels.len() {
            let Some(bytes) = image.level_rgba8(index) else {
                return Err(RenderError::InvalidOperation(format!("{:?} is not an uncompressed format", image.format)));
            };
            levels.push(bytes);
        }
        let borrowed: Vec<&[u8]> = levels.iter().map(AsRef::as_ref).collect();
        let build_mips = levels.len() == 1 && flags.contains(TextureFlags::BUILD_MIPMAPS);

        let native = Self::shared_native(texture)?;
        let uploaded = self.upload_rgba((image.width(), image.height()), &borrowed, build_mips);
        native.replace(self.finish_storage(uploaded, flags, false, None));
        texture.mark_ready(image.width(), image.height());
        Ok(())
    }

    fn upload_compressed_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        let Some((format, block_bytes)) = compressed_format(image.format) else {
            return self.upload_texture(texture, image, flags);
        };
        if !self.context.compressed_bc {
            log::warn!("BC textures not supported by this adapter, texture stays a placeholder");
            return Ok(());
        }
        let (width, height) = (image.width(), image.height());
        if width % 4 != 0 || height % 4 != 0 {
            log::warn!("{}x{} BC texture is not made of whole blocks, texture stays a placeholder", width, height);
            return Ok(());
        }
        image.validate().map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        let native = Self::shared_native(texture)?;

        let uploaded =
            create_texture(&self.context.device, (width, height), format, 1, image.levels.len() as u32, wgpu::TextureUsages::empty());
        for (level, mip) in image.levels.iter().enumerate() {
            let (blocks_wide, blocks_high) = (mip.width.div_ceil(4).max(1), mip.height.div_ceil(4).max(1));
            write_level(
                &self.context.queue,
                &uploaded,
                level as u32,
                0,
                (blocks_wide * 4, blocks_high * 4),
                &mip.data,
                (blocks_wide * block_bytes, blocks_high),
            );
        }
        native.replace(self.finish_storage(uploaded, flags, false, None));
        texture.mark_ready(width, height);
        Ok(())
    }

    fn upload_cubemap(&mut self, texture: &mut CachedTexture, sides: &[TextureImage; 6], flags: TextureFlags) -> RenderResult<()> {
        let native = Self::shared_native(texture)?;
        if !native.cubemap {
            return Err(RenderError::InvalidOperation("cube faces uploaded into a flat texture".to_string()));
        }
        let (width, height) = (sides[0].width(), sides[0].height());
        let cube = create_texture(&self.context.device, (width, height), TARGET_COLOR_FORMAT, 6, 1, wgpu::TextureUsages::empty());
        for (face, side) in sides.iter().enumerate() {
            if (side.width(), side.height()) != (width, height) {
                return Err(RenderError::InvalidOperation(format!("cube face {face} differs in size from face 0")));
            }
            let Some(bytes) = side.level_rgba8(0) else {
                return Err(RenderError::InvalidOperation("compressed cube faces are not supported".to_string()));
            };
            write_rgba_level(&self.context.queue, &cube, 0, face as u32, (width, height), &bytes);
        }
        native.replace(self.finish_storage(cube, flags | TextureFlags::NO_WRAP, true, None));
        texture.mark_ready(width, height);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anisotropy_rounds_down_to_power_of_two() {
        assert_eq!(anisotropy_clamp(0.5), 1);
        assert_eq!(anisotropy_clamp(3.0), 2);
        assert_eq!(anisotropy_clamp(8.0), 8);
        assert_eq!(anisotropy_clamp(12.0), 8);
        assert_eq!(anisotropy_clamp(64.0), 16);
    }

    #[test]
    fn test_mip_chain_halves_to_one_pixel() {
        let levels = build_mip_chain(4, 2, &[128; 4 * 2 * 4]);
        let sizes: Vec<(u32, u32)> = levels.iter().map(image::RgbaImage::dimensions).collect();
        assert_eq!(sizes, vec![(2, 1), (1, 1)]);
        assert_eq!(levels[1].get_pixel(0, 0).0, [128, 128, 128, 128]);
    }

    #[test]
    fn test_mip_chain_rejects_short_data() {
        assert!(build_mip_chain(4, 4, &[0; 8]).is_empty());
    }

    #[test]
    fn test_alpha_data_expands_to_white() {
        assert_eq!(expand_to_rgba(CachedTextureType::Alpha, &[7, 9]), vec![255, 255, 255, 7, 255, 255, 255, 9]);
        assert_eq!(expand_to_rgba(CachedTextureType::Rgba, &[1, 2, 3, 4]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_compressed_formats() {
        assert_eq!(compressed_format(PixelFormat::Dxt1), Some((wgpu::TextureFormat::Bc1RgbaUnorm, 8)));
        assert_eq!(compressed_format(PixelFormat::Dxt3), Some((wgpu::TextureFormat::Bc2RgbaUnorm, 16)));
        assert_eq!(compressed_format(PixelFormat::Bgra8), None);
    }
}
