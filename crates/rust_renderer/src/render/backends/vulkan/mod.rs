//! Vulkan implementation of the renderer backend

pub mod initialization;
pub mod renderer;
pub mod rendering;
pub mod resources;
pub mod state;

pub use renderer::{DefaultTextures, OverlayRenderer, OverlayTarget, RendererBackend};
