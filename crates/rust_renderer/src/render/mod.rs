//! Rendering: the Vulkan backend and the scene description it draws

pub mod backends;
pub mod scene;
