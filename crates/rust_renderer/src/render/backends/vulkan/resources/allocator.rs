//! vk-mem backed memory allocator
//!
//! One allocator per device, shared through `Arc` by every buffer and image.
//! The allocator keeps the device alive so teardown order cannot invert.

use crate::error::{RenderResult, VkResultExt};
use crate::render::backends::vulkan::initialization::Device;
use ash::vk;
use std::sync::Arc;
use vk_mem::Alloc;

/// Where an allocation should live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, not mappable
    GpuOnly,
    /// Host-visible and coherent, written sequentially by the CPU
    CpuToGpu,
}

impl MemoryLocation {
    fn create_info(self) -> vk_mem::AllocationCreateInfo {
        match self {
            Self::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                ..Default::default()
            },
            Self::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                    | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        }
    }
}

/// Shared GPU memory allocator
pub struct GpuAllocator {
    inner: vk_mem::Allocator,
    device: Arc<Device>,
}

impl GpuAllocator {
    /// Create the allocator for `device`
    pub fn new(device: &Arc<Device>) -> RenderResult<Arc<Self>> {
        let create_info = vk_mem::AllocatorCreateInfo::new(
            device.instance(),
            device.handle(),
            device.physical(),
        );
        let inner = vk_mem::Allocator::new(create_info).check("vmaCreateAllocator")?;
        log::debug!("GPU allocator created for '{}'", device.name());
        Ok(Arc::new(Self {
            inner,
            device: Arc::clone(device),
        }))
    }

    /// Device the allocator serves
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Create a buffer with bound memory
    pub fn create_buffer(
        &self,
        info: &vk::BufferCreateInfo,
        location: MemoryLocation,
    ) -> RenderResult<(vk::Buffer, vk_mem::Allocation)> {
        unsafe { self.inner.create_buffer(info, &location.create_info()) }.check("vmaCreateBuffer")
    }

    /// Create an image with bound memory
    pub fn create_image(
        &self,
        info: &vk::ImageCreateInfo,
        location: MemoryLocation,
    ) -> RenderResult<(vk::Image, vk_mem::Allocation)> {
        unsafe { self.inner.create_image(info, &location.create_info()) }.check("vmaCreateImage")
    }

    /// Copy `bytes` into a host-visible allocation at `offset`
    ///
    /// # Safety
    /// `allocation` must come from this allocator, be host-visible, and hold at
    /// least `offset + bytes.len()` bytes.
    pub unsafe fn write(
        &self,
        allocation: &mut vk_mem::Allocation,
        offset: usize,
        bytes: &[u8],
    ) -> RenderResult<()> {
        let mapped = self.inner.map_memory(allocation).check("vmaMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), mapped.add(offset), bytes.len());
        self.inner.unmap_memory(allocation);
        Ok(())
    }

    /// Destroy a buffer and free its memory
    ///
    /// # Safety
    /// The buffer must not be in use by the GPU.
    pub unsafe fn destroy_buffer(&self, buffer: vk::Buffer, allocation: &mut vk_mem::Allocation) {
        self.inner.destroy_buffer(buffer, allocation);
    }

    /// Destroy an image and free its memory
    ///
    /// # Safety
    /// The image must not be in use by the GPU.
    pub unsafe fn destroy_image(&self, image: vk::Image, allocation: &mut vk_mem::Allocation) {
        self.inner.destroy_image(image, allocation);
    }
}
