//! Adapter, device and surface

use std::rc::Rc;

use crate::core::DirectXRendererConfig;
use crate::render::{RenderError, RenderResult};

/// Depth format of the screen and of color render targets
pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Device, queue and the configured window surface
pub(crate) struct DxContext {
    pub surface: wgpu::Surface<'static>,
    pub surface_config: wgpu::SurfaceConfiguration,
    pub device: Rc<wgpu::Device>,
    pub queue: wgpu::Queue,
    pub compressed_bc: bool,
    pub max_anisotropy: u16,
    /// Screen depth buffer, recreated with the surface
    depth: Rc<wgpu::TextureView>,
}

/// A surface texture being drawn
pub(crate) enum Acquired {
    Frame(wgpu::SurfaceTexture),
    /// Nothing to draw into this frame
    Skip,
}

impl DxContext {
    /// Open a DX12 device presenting to `target`
    ///
    /// # Safety
    /// The window behind `target` must outlive the context.
    pub(crate) unsafe fn new(
        target: wgpu::SurfaceTargetUnsafe,
        size: (u32, u32),
        config: &DirectXRendererConfig,
    ) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor { backends: wgpu::Backends::DX12, ..Default::default() });
        let surface = instance
            .create_surface_unsafe(target)
            .map_err(|e| RenderError::InitializationFailed(format!("Failed to create surface: {e}")))?;

        let power_preference =
            if config.high_performance { wgpu::PowerPreference::HighPerformance } else { wgpu::PowerPreference::LowPower };
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        }))
        .ok_or_else(|| RenderError::InitializationFailed("No DX12 adapter found".to_string()))?;
        let info = adapter.get_info();
        log::info!("DirectX adapter: {} ({:?})", info.name, info.device_type);

        let compressed_bc = adapter.features().contains(wgpu::Features::TEXTURE_COMPRESSION_BC);
        let required_features =
            if compressed_bc { wgpu::Features::TEXTURE_COMPRESSION_BC } else { wgpu::Features::empty() };
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Wargame Device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| RenderError::InitializationFailed(format!("Failed to create device: {e}")))?;
        device.on_uncaptured_error(Box::new(|error| log::error!("DirectX device error: {error}")));

        let caps = surface.get_capabilities(&adapter);
        let format = choose_surface_format(&caps.formats)
            .ok_or_else(|| RenderError::InitializationFailed("Surface is not compatible with the adapter".to_string()))?;
        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.0.max(1),
            height: size.1.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            desired_maximum_frame_latency: 2,
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
        };
        surface.configure(&device, &surface_config);
        let depth = create_depth_view(&device, surface_config.width, surface_config.height);

        Ok(Self { surface, surface_config, device: Rc::new(device), queue, compressed_bc, max_anisotropy: 16, depth })
    }

    pub(crate) const fn size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    pub(crate) const fn color_format(&self) -> wgpu::TextureFormat {
        self.surface_config.format
    }

    pub(crate) fn depth_view(&self) -> Rc<wgpu::TextureView> {
        Rc::clone(&self.depth)
    }

    /// Reconfigure the surface; zero sizes keep the old configuration
    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.reconfigure();
    }

    pub(crate) fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.surface_config);
        self.depth = create_depth_view(&self.device, self.surface_config.width, self.surface_config.height);
    }

    /// Next surface texture; outdated or lost surfaces are reconfigured and retried once
    pub(crate) fn acquire(&mut self) -> RenderResult<Acquired> {
        for attempt in 0..2 {
            match self.surface.get_current_texture() {
                Ok(frame) => return Ok(Acquired::Frame(frame)),
                Err(wgpu::SurfaceError::Timeout) => {
                    log::warn!("Surface timed out, frame skipped");
                    return Ok(Acquired::Skip);
                }
                Err(e @ (wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost)) => {
                    log::debug!("Surface {:?} on attempt {}, reconfiguring", e, attempt + 1);
                    self.reconfigure();
                }
                Err(e) => return Err(RenderError::RenderingFailed(format!("Failed to acquire surface texture: {e}"))),
            }
        }
        log::warn!("Surface still unusable after reconfiguring, frame skipped");
        Ok(Acquired::Skip)
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> Rc<wgpu::TextureView> {
    let view = device
        .create_texture(&wgpu::TextureDescriptor {
            label: Some("Screen Depth"),
            size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&wgpu::TextureViewDescriptor::default());
    Rc::new(view)
}

/// Linear 8-bit formats first; the built-in program writes display values
fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    [wgpu::TextureFormat::Bgra8Unorm, wgpu::TextureFormat::Rgba8Unorm]
        .into_iter()
        .find(|preferred| formats.contains(preferred))
        .or_else(|| formats.first().copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_surface_format_prefers_linear() {
        let formats = [wgpu::TextureFormat::Bgra8UnormSrgb, wgpu::TextureFormat::Rgba8Unorm];
        assert_eq!(choose_surface_format(&formats), Some(wgpu::TextureFormat::Rgba8Unorm));
        assert_eq!(
            choose_surface_format(&[wgpu::TextureFormat::Rgba16Float]),
            Some(wgpu::TextureFormat::Rgba16Float)
        );
        assert_eq!(choose_surface_format(&[]), None);
    }
}
