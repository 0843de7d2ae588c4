//! Windowing collaborator consumed by the Vulkan backend

mod window;

pub use window::{GlfwWindow, PresentationWindow, WindowError, WindowResult};
