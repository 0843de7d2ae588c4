//! Command pools, command buffers and one-shot submission

use crate::error::{RenderResult, VkResultExt};
use crate::render::backends::vulkan::initialization::{Device, QueueKind};
use crate::render::backends::vulkan::resources::resource::{CommandPool, DeviceObject, Fence, Owned};
use crate::render::backends::vulkan::state::sync::create_fence;
use ash::vk;
use std::sync::Arc;

/// Create a resettable command pool for `family`
pub fn create_command_pool(device: &ash::Device, family: u32) -> RenderResult<Owned<CommandPool>> {
    let info = vk::CommandPoolCreateInfo::builder()
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .queue_family_index(family);
    let pool = unsafe { device.create_command_pool(&info, None) }.check("vkCreateCommandPool")?;
    Ok(DeviceObject::owned(device, pool))
}

/// Allocate one primary command buffer from `pool`
pub fn allocate_primary(device: &ash::Device, pool: vk::CommandPool) -> RenderResult<vk::CommandBuffer> {
    let info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let buffers = unsafe { device.allocate_command_buffers(&info) }.check("vkAllocateCommandBuffers")?;
    Ok(buffers[0])
}

/// Reset `cmd` and begin a one-time-submit recording
pub fn begin_one_time(device: &ash::Device, cmd: vk::CommandBuffer) -> RenderResult<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .check("vkResetCommandBuffer")?;
        device
            .begin_command_buffer(cmd, &begin_info)
            .check("vkBeginCommandBuffer")
    }
}

/// Finish recording `cmd`
pub fn end(device: &ash::Device, cmd: vk::CommandBuffer) -> RenderResult<()> {
    unsafe { device.end_command_buffer(cmd) }.check("vkEndCommandBuffer")
}

/// Graphics and transfer command pools plus blocking one-shot submission
pub struct CommandManager {
    device: Arc<Device>,
    graphics_pool: Owned<CommandPool>,
    transfer_pool: Owned<CommandPool>,
    graphics_cmd: vk::CommandBuffer,
    transfer_cmd: vk::CommandBuffer,
    fence: Owned<Fence>,
}

impl CommandManager {
    /// Create pools on the graphics and transfer families
    pub fn new(device: &Arc<Device>) -> RenderResult<Self> {
        let raw = device.handle();
        let families = device.families();

        let graphics_pool = create_command_pool(raw, families.graphics)?;
        let transfer_pool = create_command_pool(raw, families.transfer)?;
        let graphics_cmd = allocate_primary(raw, graphics_pool.raw())?;
        let transfer_cmd = allocate_primary(raw, transfer_pool.raw())?;
        let fence = create_fence(raw, false)?;

        log::debug!(
            "Command manager ready (graphics family {}, transfer family {})",
            families.graphics,
            families.transfer
        );
        Ok(Self {
            device: Arc::clone(device),
            graphics_pool,
            transfer_pool,
            graphics_cmd,
            transfer_cmd,
            fence,
        })
    }

    /// Record with `record`, submit to the `kind` queue and wait for completion
    ///
    /// Only graphics queues may blit with filtering, so mip generation must
    /// use [`QueueKind::Graphics`]. [`QueueKind::Present`] is served by the
    /// graphics pool.
    pub fn immediate_submit<F>(&self, kind: QueueKind, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> RenderResult<()>,
    {
        let device = self.device.handle();
        let (cmd, queue) = match kind {
            QueueKind::Transfer => (self.transfer_cmd, self.device.queue(QueueKind::Transfer)),
            QueueKind::Graphics | QueueKind::Present => {
                (self.graphics_cmd, self.device.queue(QueueKind::Graphics))
            }
        };
        let fence = self.fence.raw();

        begin_one_time(device, cmd)?;
        record(device, cmd)?;
        end(device, cmd)?;

        let command_buffers = [cmd];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            device
                .reset_fences(&[fence])
                .check("vkResetFences")?;
            device
                .queue_submit(queue, &[submit.build()], fence)
                .check("vkQueueSubmit")?;
            device
                .wait_for_fences(&[fence], true, u64::MAX)
                .check("vkWaitForFences")
        }
    }
}
