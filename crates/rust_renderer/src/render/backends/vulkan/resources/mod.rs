//! GPU resources: allocation, ownership and descriptors

pub mod allocator;
pub mod buffer;
pub mod descriptor_set;
pub mod image;
pub mod resource;
pub mod texture;

pub use allocator::{GpuAllocator, MemoryLocation};
pub use buffer::BasicBuffer;
pub use descriptor_set::{DescriptorAllocator, DescriptorLayoutBuilder, DescriptorWriter, PoolSizeRatio};
pub use image::{AllocatedImage, ImageDesc};
pub use resource::{GpuResource, Owned};
pub use texture::{Texture, TextureOptions};

use crate::render::backends::vulkan::rendering::commands::CommandManager;
use std::sync::Arc;

/// What an upload needs: memory and a queue to copy on
#[derive(Clone, Copy)]
pub struct UploadContext<'a> {
    /// Allocator for staging and destination resources
    pub allocator: &'a Arc<GpuAllocator>,
    /// One-shot submission
    pub commands: &'a CommandManager,
}
