//! # Rust Renderer
//!
//! Vulkan backend for a real-time 3D renderer: device selection, vk-mem
//! allocation, swapchain negotiation, per-frame synchronization, command
//! recording, and the ownership discipline for GPU resources.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rust_renderer::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::default();
//!     let context = EngineContext::new(config);
//!     let mut window = GlfwWindow::new("Viewer", 1280, 720)?;
//!     let mut renderer = RendererBackend::new(&context, &window)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         if window.take_resized() {
//!             renderer.notify_resized();
//!         }
//!         renderer.render(&window, &DrawContext::default(), None)?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(
    clippy::module_name_repetitions,
    clippy::similar_names,
    clippy::too_many_arguments,
    clippy::missing_errors_doc,
    clippy::missing_safety_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

pub mod assets;
pub mod config;
pub mod error;
pub mod foundation;
pub mod platform;
pub mod render;

pub use error::{ErrorMode, RenderError, RenderResult, SourceLocation};

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        assets::{ImageData, MeshData, Vertex},
        config::{Config, RendererConfig, ShaderConfig},
        error::{ErrorMode, RenderError, RenderResult},
        foundation::context::EngineContext,
        platform::{GlfwWindow, PresentationWindow},
        render::backends::vulkan::{OverlayRenderer, RendererBackend},
        render::scene::{DrawContext, MaterialPass, SceneGraph},
    };
}
