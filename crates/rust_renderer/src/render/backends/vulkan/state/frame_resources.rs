//! Resources owned by one frame slot

use super::deletion_queue::DeletionQueue;
use super::sync::{wait_fence, FrameSync};
use crate::error::RenderResult;
use crate::render::backends::vulkan::rendering::commands::{allocate_primary, create_command_pool};
use crate::render::backends::vulkan::resources::{
    BasicBuffer, DescriptorAllocator, GpuAllocator, MemoryLocation, Owned, PoolSizeRatio,
};
use crate::render::backends::vulkan::resources::resource::CommandPool;
use crate::render::scene::SceneData;
use ash::vk;
use std::mem::size_of;
use std::sync::Arc;

/// Sets each slot's descriptor pool can hand out before its next reset
pub const FRAME_DESCRIPTOR_SETS: u32 = 1000;

/// Descriptor mix of the per-frame pool
pub const FRAME_DESCRIPTOR_RATIOS: [PoolSizeRatio; 4] = [
    PoolSizeRatio { ty: vk::DescriptorType::STORAGE_IMAGE, ratio: 3.0 },
    PoolSizeRatio { ty: vk::DescriptorType::STORAGE_BUFFER, ratio: 3.0 },
    PoolSizeRatio { ty: vk::DescriptorType::UNIFORM_BUFFER, ratio: 3.0 },
    PoolSizeRatio { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, ratio: 4.0 },
];

/// Command buffer, sync objects and transient allocations of one slot
///
/// Fields drop in declaration order: pending deletions run first, the
/// semaphores and fence go last.
pub struct FrameResources {
    /// Resources retired during this slot's last frame
    pub deletion_queue: DeletionQueue,
    /// Transient descriptor sets, reset on every reclaim
    pub descriptors: Owned<DescriptorAllocator>,
    /// Host-visible uniform holding this frame's [`SceneData`]
    pub scene_buffer: Owned<BasicBuffer>,
    /// Primary command buffer, re-recorded each frame
    pub command_buffer: vk::CommandBuffer,
    /// Pool the command buffer came from
    pub command_pool: Owned<CommandPool>,
    /// Semaphores and in-flight fence
    pub sync: FrameSync,
}

impl FrameResources {
    /// Create everything a slot needs
    pub fn new(allocator: &Arc<GpuAllocator>) -> RenderResult<Self> {
        let device = allocator.device();
        let raw = device.handle();

        let command_pool = create_command_pool(raw, device.families().graphics)?;
        let command_buffer = allocate_primary(raw, command_pool.raw())?;
        let descriptors = DescriptorAllocator::new(raw, FRAME_DESCRIPTOR_SETS, &FRAME_DESCRIPTOR_RATIOS)?;
        let scene_buffer = BasicBuffer::new(
            allocator,
            size_of::<SceneData>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            &[],
        )?;

        Ok(Self {
            deletion_queue: DeletionQueue::new(),
            descriptors,
            scene_buffer,
            command_buffer,
            command_pool,
            sync: FrameSync::new(raw)?,
        })
    }

    /// Wait for the slot's previous submission, then release what it used
    pub fn wait_and_reclaim(&mut self, device: &ash::Device) -> RenderResult<()> {
        wait_fence(device, self.sync.in_flight.raw())?;
        self.deletion_queue.flush();
        self.descriptors.try_get()?.reset()
    }
}
