//! GLFW window helpers
//!
//! Opens a window prepared for one backend family and hands the backend what it needs:
//! a Vulkan surface ([`SurfaceSource`]), GL entry points (a proc loader for
//! [`GlBackend::from_loader`](crate::render::backends::gl::GlBackend::from_loader)) or a raw
//! surface target for the DirectX backend.

use std::ffi::{c_void, CString};

use ash::{vk, Entry, Instance};
use thiserror::Error;

use crate::core::BackendKind;
use crate::render::backends::vulkan::{SurfaceSource, VulkanError, VulkanResult};

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not start
    #[error("GLFW initialization failed: {0}")]
    InitializationFailed(String),

    /// The window or its context could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// The platform handles of the window are unavailable
    #[error("Window handle unavailable: {0}")]
    HandleUnavailable(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window owning its event queue
pub struct GlfwWindow {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    backend: BackendKind,
}

impl GlfwWindow {
    /// Open a resizable window for `backend`
    ///
    /// GL backends get a current context (2.1 for legacy, 3.3 core for modern); Vulkan and
    /// DirectX get a window without client API.
    ///
    /// # Errors
    /// `InitializationFailed` when GLFW cannot start, `CreationFailed` when the window or
    /// context cannot be created.
    pub fn new(title: &str, width: u32, height: u32, backend: BackendKind) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|e| WindowError::InitializationFailed(format!("{e:?}")))?;

        match backend {
            BackendKind::LegacyGl => {
                glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::OpenGl));
                glfw.window_hint(glfw::WindowHint::ContextVersion(2, 1));
            }
            BackendKind::ModernGl => {
                glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::OpenGl));
                glfw.window_hint(glfw::WindowHint::ContextVersion(3, 3));
                glfw.window_hint(glfw::WindowHint::OpenGlProfile(glfw::OpenGlProfileHint::Core));
                glfw.window_hint(glfw::WindowHint::OpenGlForwardCompat(true));
            }
            BackendKind::Vulkan | BackendKind::DirectX | BackendKind::Headless => {
                glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
            }
        }
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;
        if backend.is_gl() {
            window.make_current();
        }

        window.set_key_polling(true);
        window.set_mouse_button_polling(true);
        window.set_cursor_pos_polling(true);
        window.set_scroll_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Window '{title}' created ({width}x{height}) for {backend:?}");
        Ok(Self { glfw, window, events, backend })
    }

    /// Backend family the window was prepared for
    #[must_use]
    pub const fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Whether the user asked to close the window
    #[must_use]
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Process pending events and return them
    pub fn poll_events(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events).map(|(_, event)| event).collect()
    }

    /// Drawable size in pixels
    #[must_use]
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Cursor position in pixels, top-left origin
    #[must_use]
    pub fn cursor_position(&self) -> (i32, i32) {
        let (x, y) = self.window.get_cursor_pos();
        (x as i32, y as i32)
    }

    /// Window title
    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }

    /// Address of a GL entry point of the window's context
    pub fn gl_proc_address(&mut self, name: &str) -> *const c_void {
        self.window.get_proc_address(name) as *const c_void
    }

    /// Present the back buffer of a GL context
    pub fn swap_buffers(&mut self) {
        if self.backend.is_gl() {
            use glfw::Context;
            self.window.swap_buffers();
        }
    }

    /// Surface target for the DirectX backend
    ///
    /// # Errors
    /// `HandleUnavailable` when the platform handles cannot be read.
    ///
    /// # Safety
    /// The window must outlive the surface created from the target.
    pub unsafe fn surface_target(&self) -> WindowResult<wgpu::SurfaceTargetUnsafe> {
        wgpu::SurfaceTargetUnsafe::from_window(&*self.window).map_err(|e| WindowError::HandleUnavailable(e.to_string()))
    }
}

impl SurfaceSource for GlfwWindow {
    fn required_extensions(&self) -> VulkanResult<Vec<CString>> {
        let names = self
            .glfw
            .get_required_instance_extensions()
            .ok_or_else(|| VulkanError::InitializationFailed("GLFW reports no Vulkan support".to_string()))?;
        names
            .into_iter()
            .map(|name| CString::new(name).map_err(|e| VulkanError::InitializationFailed(e.to_string())))
            .collect()
    }

    fn create_surface(&self, _entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance.handle(), std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(VulkanError::Api(result))
        }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        Self::framebuffer_size(self)
    }
}

impl std::fmt::Debug for GlfwWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlfwWindow")
            .field("backend", &self.backend)
            .field("framebuffer_size", &self.framebuffer_size())
            .finish_non_exhaustive()
    }
}
