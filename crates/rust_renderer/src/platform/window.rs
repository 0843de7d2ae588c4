//! Window management using GLFW
//!
//! The backend only needs three things from a window: the instance
//! extensions it requires, a surface, and the current framebuffer extent.
//! [`PresentationWindow`] captures that; [`GlfwWindow`] implements it.

use crate::error::{RenderError, RenderResult};
use ash::vk;
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialised
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Vulkan is not usable through GLFW on this system
    #[error("Vulkan not supported by GLFW")]
    VulkanUnsupported,
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Surface provider for the renderer
pub trait PresentationWindow {
    /// Instance extensions the surface needs
    fn required_instance_extensions(&self) -> RenderResult<Vec<String>>;

    /// Create a presentation surface for `instance`
    fn create_surface(&self, instance: &ash::Instance) -> RenderResult<vk::SurfaceKHR>;

    /// Framebuffer size in pixels; zero while minimized
    fn framebuffer_extent(&self) -> vk::Extent2D;
}

/// GLFW window wrapper
pub struct GlfwWindow {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    resized: bool,
}

impl GlfwWindow {
    /// Create a resizable window without a client API context
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw =
            glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;
        if !glfw.vulkan_supported() {
            return Err(WindowError::VulkanUnsupported);
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("Created {}x{} window '{}'", width, height, title);
        Ok(Self {
            glfw,
            window,
            events,
            resized: false,
        })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request the window to close
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the event queue; records resizes and closes on Escape
    pub fn poll_events(&mut self) {
        self.glfw.poll_events();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("Framebuffer resized to {}x{}", width, height);
                    self.resized = true;
                }
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    self.window.set_should_close(true);
                }
                _ => {}
            }
        }
    }

    /// Block until an event arrives, used while minimized
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Return and clear the resize flag
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    /// Set the window title
    pub fn set_title(&mut self, title: &str) {
        self.window.set_title(title);
    }
}

impl PresentationWindow for GlfwWindow {
    fn required_instance_extensions(&self) -> RenderResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| RenderError::graphics("GLFW reports no Vulkan instance extensions"))
    }

    fn create_surface(&self, instance: &ash::Instance) -> RenderResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result =
            self.window
                .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(RenderError::vulkan("glfwCreateWindowSurface", result))
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.window.get_framebuffer_size();
        vk::Extent2D {
            width: u32::try_from(width).unwrap_or(0),
            height: u32::try_from(height).unwrap_or(0),
        }
    }
}
