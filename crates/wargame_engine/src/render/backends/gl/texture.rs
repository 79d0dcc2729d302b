//! GL textures and render targets

use std::cell::RefCell;
use std::rc::Rc;

use glow::HasContext;

use super::{GlBackend, GlProfile};
use crate::assets::{PixelFormat, TextureImage};
use crate::render::handle::Scoped;
use crate::render::texture::{CachedTexture, TextureHelper};
use crate::render::{CachedTextureType, RenderError, RenderResult, TextureFlags};

const BACKEND: &str = "OpenGL";

/// Framebuffer rendering into a texture
struct RenderAttachments {
    framebuffer: Scoped<glow::Framebuffer>,
    _depth: Option<Scoped<glow::Renderbuffer>>,
    size: (u32, u32),
}

/// Native texture of the GL backends
pub(crate) struct GlTexture {
    texture: Scoped<glow::Texture>,
    target: u32,
    attachments: RefCell<Option<RenderAttachments>>,
}

impl GlTexture {
    fn new(gl: &Rc<glow::Context>, target: u32) -> RenderResult<Self> {
        let texture = unsafe { gl.create_texture() }.map_err(RenderError::ResourceCreationFailed)?;
        let owner = Rc::clone(gl);
        Ok(Self {
            texture: Scoped::new(texture, move |t| unsafe { owner.delete_texture(t) }),
            target,
            attachments: RefCell::new(None),
        })
    }

    pub(crate) fn raw(&self) -> glow::Texture {
        self.texture.raw()
    }

    pub(crate) const fn target(&self) -> u32 {
        self.target
    }
}

/// (internal format, format, type) of a storage kind
fn storage_format(kind: CachedTextureType, swizzled_alpha: bool) -> (i32, u32, u32) {
    match kind {
        CachedTextureType::Rgba | CachedTextureType::RenderTarget => (glow::RGBA8 as i32, glow::RGBA, glow::UNSIGNED_BYTE),
        CachedTextureType::Alpha if swizzled_alpha => (glow::R8 as i32, glow::RED, glow::UNSIGNED_BYTE),
        CachedTextureType::Alpha => (glow::ALPHA as i32, glow::ALPHA, glow::UNSIGNED_BYTE),
        CachedTextureType::Depth => (glow::DEPTH_COMPONENT24 as i32, glow::DEPTH_COMPONENT, glow::UNSIGNED_INT),
    }
}

const fn compressed_format(format: PixelFormat) -> Option<u32> {
    match format {
        PixelFormat::Dxt1 => Some(glow::COMPRESSED_RGBA_S3TC_DXT1_EXT),
        PixelFormat::Dxt3 => Some(glow::COMPRESSED_RGBA_S3TC_DXT3_EXT),
        PixelFormat::Dxt5 => Some(glow::COMPRESSED_RGBA_S3TC_DXT5_EXT),
        _ => None,
    }
}

impl<P: GlProfile> GlBackend<P> {
    fn native_texture<'t>(&self, texture: &'t CachedTexture) -> RenderResult<&'t GlTexture> {
        texture.expect_native::<GlTexture>(BACKEND)
    }

    fn apply_sampling(&self, target: u32, flags: TextureFlags, mipmapped: bool) {
        let wrap = if flags.contains(TextureFlags::NO_WRAP) { glow::CLAMP_TO_EDGE } else { glow::REPEAT };
        let min_filter = if mipmapped { glow::LINEAR_MIPMAP_LINEAR } else { glow::LINEAR };
        unsafe {
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_S, wrap as i32);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_WRAP_T, wrap as i32);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, min_filter as i32);
            self.gl.tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            if self.caps.max_anisotropy.is_some() && self.anisotropy > 1.0 {
                self.gl.tex_parameter_f32(target, glow::TEXTURE_MAX_ANISOTROPY_EXT, self.anisotropy);
            }
        }
    }

    fn allocate(&self, native: &GlTexture, kind: CachedTextureType, width: u32, height: u32, data: Option<&[u8]>) {
        let swizzled_alpha = P::SWIZZLED_ALPHA;
        let (internal, format, ty) = storage_format(kind, swizzled_alpha);
        let gl = &self.gl;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(native.raw()));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.tex_image_2d(glow::TEXTURE_2D, 0, internal, width as i32, height as i32, 0, format, ty, data);
            if kind == CachedTextureType::Alpha && swizzled_alpha {
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_R, glow::ONE as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_G, glow::ONE as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_B, glow::ONE as i32);
                gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_SWIZZLE_A, glow::RED as i32);
            }
        }
        let flags = if kind == CachedTextureType::Depth { TextureFlags::NO_WRAP } else { TextureFlags::empty() };
        self.apply_sampling(glow::TEXTURE_2D, flags, false);
    }

    /// Framebuffer drawing into `texture`, created (or resized) on demand
    pub(super) fn bind_render_target(&self, texture: &mut CachedTexture, width: u32, height: u32) -> RenderResult<()> {
        let kind = texture.kind();
        let native = self.native_texture(texture)?;
        if native.target() != glow::TEXTURE_2D {
            return Err(RenderError::InvalidOperation("cube maps cannot be render targets".to_string()));
        }

        let mut attachments = native.attachments.borrow_mut();
        if attachments.as_ref().map(|a| a.size) != Some((width, height)) {
            *attachments = None;
            self.allocate(native, kind, width, height, None);

            let gl = &self.gl;
            let framebuffer = unsafe { gl.create_framebuffer() }.map_err(RenderError::ResourceCreationFailed)?;
            let owner = Rc::clone(gl);
            let framebuffer = Scoped::new(framebuffer, move |f| unsafe { owner.delete_framebuffer(f) });
            let mut depth = None;
            unsafe {
                gl.bind_framebuffer(glow::FRAMEBUFFER, Some(framebuffer.raw()));
                if kind == CachedTextureType::Depth {
                    gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::DEPTH_ATTACHMENT, glow::TEXTURE_2D, Some(native.raw()), 0);
                    gl.draw_buffer(glow::NONE);
                    gl.read_buffer(glow::NONE);
                } else {
                    gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, glow::TEXTURE_2D, Some(native.raw()), 0);
                    let renderbuffer = gl.create_renderbuffer().map_err(RenderError::ResourceCreationFailed)?;
                    gl.bind_renderbuffer(glow::RENDERBUFFER, Some(renderbuffer));
                    gl.renderbuffer_storage(glow::RENDERBUFFER, glow::DEPTH_COMPONENT24, width as i32, height as i32);
                    gl.framebuffer_renderbuffer(glow::FRAMEBUFFER, glow::DEPTH_ATTACHMENT, glow::RENDERBUFFER, Some(renderbuffer));
                    let owner = Rc::clone(gl);
                    depth = Some(Scoped::new(renderbuffer, move |r| owner.delete_renderbuffer(r)));
                }
                let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
                if status != glow::FRAMEBUFFER_COMPLETE {
                    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                    return Err(RenderError::ResourceCreationFailed(format!("Framebuffer incomplete: 0x{status:x}")));
                }
            }
            log::debug!("Created {}x{} {:?} render target", width, height, kind);
            *attachments = Some(RenderAttachments { framebuffer, _depth: depth, size: (width, height) });
        }

        if let Some(current) = attachments.as_ref() {
            unsafe { self.gl.bind_framebuffer(glow::FRAMEBUFFER, Some(current.framebuffer.raw())) };
        }
        Ok(())
    }
}

impl<P: GlProfile> TextureHelper for GlBackend<P> {
    fn create_empty_texture(&mut self, cubemap: bool) -> RenderResult<CachedTexture> {
        let target = if cubemap { glow::TEXTURE_CUBE_MAP } else { glow::TEXTURE_2D };
        let native = GlTexture::new(&self.gl, target)?;
        Ok(CachedTexture::new(CachedTextureType::Rgba, 0, 0, cubemap, false, native))
    }

    fn create_texture(&mut self, data: Option<&[u8]>, width: u32, height: u32, kind: CachedTextureType) -> RenderResult<CachedTexture> {
        let native = GlTexture::new(&self.gl, glow::TEXTURE_2D)?;
        let data = if kind == CachedTextureType::Depth { None } else { data };
        self.allocate(&native, kind, width, height, data);
        Ok(CachedTexture::new(kind, width, height, false, true, native))
    }

    fn upload_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        image.validate().map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        let native = self.native_texture(texture)?;
        let gl = &self.gl;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(native.raw()));
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
        }
        for (level, mip) in image.levels.iter().enumerate() {
            let Some(pixels) = image.level_rgba8(level) else {
                return Err(RenderError::InvalidOperation(format!("{:?} is not an uncompressed format", image.format)));
            };
            unsafe {
                gl.tex_image_2d(
                    glow::TEXTURE_2D,
                    level as i32,
                    glow::RGBA8 as i32,
                    mip.width as i32,
                    mip.height as i32,
                    0,
                    glow::RGBA,
                    glow::UNSIGNED_BYTE,
                    Some(&pixels),
                );
            }
        }
        let generate = image.levels.len() == 1 && flags.contains(TextureFlags::BUILD_MIPMAPS);
        if generate {
            unsafe { gl.generate_mipmap(glow::TEXTURE_2D) };
        }
        self.apply_sampling(glow::TEXTURE_2D, flags, generate || image.levels.len() > 1);
        texture.mark_ready(image.width(), image.height());
        Ok(())
    }

    fn upload_compressed_texture(&mut self, texture: &mut CachedTexture, image: &TextureImage, flags: TextureFlags) -> RenderResult<()> {
        let Some(internal) = compressed_format(image.format) else {
            return self.upload_texture(texture, image, flags);
        };
        if !self.caps.s3tc {
            log::warn!("S3TC textures not supported by this driver, texture stays a placeholder");
            return Ok(());
        }
        image.validate().map_err(|e| RenderError::ResourceCreationFailed(e.to_string()))?;
        let native = self.native_texture(texture)?;
        let gl = &self.gl;
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, Some(native.raw()));
            for (level, mip) in image.levels.iter().enumerate() {
                gl.compressed_tex_image_2d(
                    glow::TEXTURE_2D,
                    level as i32,
                    internal as i32,
                    mip.width as i32,
                    mip.height as i32,
                    0,
                    mip.data.len() as i32,
                    &mip.data,
                );
            }
        }
        self.apply_sampling(glow::TEXTURE_2D, flags, image.levels.len() > 1);
        texture.mark_ready(image.width(), image.height());
        Ok(())
    }

    fn upload_cubemap(&mut self, texture: &mut CachedTexture, sides: &[TextureImage; 6], flags: TextureFlags) -> RenderResult<()> {
        if !texture.is_cubemap() {
            return Err(RenderError::InvalidOperation("cube faces uploaded into a flat texture".to_string()));
        }
        let native = self.native_texture(texture)?;
        let gl = &self.gl;
        unsafe { gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(native.raw())) };
        for (face, side) in sides.iter().enumerate() {
            let Some(pixels) = side.level_rgba8(0) else {
                return Err(RenderError::InvalidOperation("compressed cube faces are not supported".to_string()));
            };
            unsafe {
                gl.tex_image_2d(
                    glow::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
                    0,
                    glow::RGBA8 as i32,
                    side.width() as i32,
                    side.height() as i32,
                    0,
                    glow::RGBA,
                    glow::UNSIGNED_BYTE,
                    Some(&pixels),
                );
            }
        }
        self.apply_sampling(glow::TEXTURE_CUBE_MAP, flags | TextureFlags::NO_WRAP, false);
        texture.mark_ready(sides[0].width(), sides[0].height());
        Ok(())
    }
}
