//! Buffers backed by vk-mem allocations

use super::allocator::{GpuAllocator, MemoryLocation};
use super::resource::{GpuResource, Owned};
use crate::error::{RenderError, RenderResult};
use ash::vk;
use bytemuck::Pod;
use std::fmt;
use std::sync::Arc;

/// A buffer and the memory bound to it
pub struct BasicBuffer {
    allocator: Arc<GpuAllocator>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    location: MemoryLocation,
}

impl BasicBuffer {
    /// Allocate a buffer of `size` bytes
    ///
    /// When `queue_families` names more than one distinct family the buffer
    /// is created with concurrent sharing across them.
    pub fn new(
        allocator: &Arc<GpuAllocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        queue_families: &[u32],
    ) -> RenderResult<Owned<Self>> {
        if size == 0 {
            return Err(RenderError::graphics("cannot create a zero-sized buffer"));
        }

        let mut families = queue_families.to_vec();
        families.sort_unstable();
        families.dedup();

        let mut info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        info = if families.len() > 1 {
            info.sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let (buffer, allocation) = allocator.create_buffer(&info, location)?;
        log::trace!("Created {} byte buffer ({:?}, {:?})", size, usage, location);

        Ok(Owned::new(Self {
            allocator: Arc::clone(allocator),
            buffer,
            allocation,
            size,
            location,
        }))
    }

    /// Host-visible staging buffer filled with `bytes`
    pub fn staging(allocator: &Arc<GpuAllocator>, bytes: &[u8]) -> RenderResult<Owned<Self>> {
        let mut staging = Self::new(
            allocator,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &[],
        )?;
        staging.try_get_mut()?.write_bytes(0, bytes)?;
        Ok(staging)
    }

    /// Buffer handle
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Copy raw bytes into the buffer at `offset`
    pub fn write_bytes(&mut self, offset: vk::DeviceSize, bytes: &[u8]) -> RenderResult<()> {
        if self.location != MemoryLocation::CpuToGpu {
            return Err(RenderError::graphics("buffer is not host-visible"));
        }
        let end = offset.saturating_add(bytes.len() as vk::DeviceSize);
        if end > self.size {
            return Err(RenderError::graphics(format!(
                "write of {} bytes at offset {} overflows {} byte buffer",
                bytes.len(),
                offset,
                self.size
            )));
        }
        unsafe {
            self.allocator
                .write(&mut self.allocation, offset as usize, bytes)
        }
    }

    /// Copy plain-old-data values into the buffer at `offset`
    pub fn write<T: Pod>(&mut self, offset: vk::DeviceSize, data: &[T]) -> RenderResult<()> {
        self.write_bytes(offset, bytemuck::cast_slice(data))
    }
}

impl GpuResource for BasicBuffer {
    fn release(mut self) {
        unsafe {
            self.allocator
                .destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}

impl fmt::Debug for BasicBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicBuffer")
            .field("buffer", &self.buffer)
            .field("size", &self.size)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}
