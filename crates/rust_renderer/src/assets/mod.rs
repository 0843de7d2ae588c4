//! CPU-side asset data handed to the renderer
//!
//! Decoding file formats is left to the caller; this module only holds the
//! decoded vertex/index spans and RGBA8 pixel buffers the backend uploads.

mod image_loader;
mod mesh_data;

pub use image_loader::ImageData;
pub use mesh_data::{MeshData, Vertex};
