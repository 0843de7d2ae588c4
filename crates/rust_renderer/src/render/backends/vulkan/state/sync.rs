//! Semaphores, fences and per-frame synchronization objects

use crate::error::{RenderResult, VkResultExt};
use crate::render::backends::vulkan::resources::resource::{DeviceObject, Fence, Owned, Semaphore};
use ash::vk;

/// Create a binary semaphore
pub fn create_semaphore(device: &ash::Device) -> RenderResult<Owned<Semaphore>> {
    let info = vk::SemaphoreCreateInfo::builder();
    let semaphore = unsafe { device.create_semaphore(&info, None) }.check("vkCreateSemaphore")?;
    Ok(DeviceObject::owned(device, semaphore))
}

/// Create a fence, optionally already signaled
pub fn create_fence(device: &ash::Device, signaled: bool) -> RenderResult<Owned<Fence>> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let info = vk::FenceCreateInfo::builder().flags(flags);
    let fence = unsafe { device.create_fence(&info, None) }.check("vkCreateFence")?;
    Ok(DeviceObject::owned(device, fence))
}

/// Block on `fence` without a timeout
pub fn wait_fence(device: &ash::Device, fence: vk::Fence) -> RenderResult<()> {
    unsafe { device.wait_for_fences(&[fence], true, u64::MAX) }.check("vkWaitForFences")
}

/// Return `fence` to the unsignaled state
pub fn reset_fence(device: &ash::Device, fence: vk::Fence) -> RenderResult<()> {
    unsafe { device.reset_fences(&[fence]) }.check("vkResetFences")
}

/// Synchronization objects owned by one frame slot
pub struct FrameSync {
    /// Signaled when the acquired swapchain image is ready
    pub image_available: Owned<Semaphore>,
    /// Signaled when rendering finishes; presentation waits on it
    pub render_finished: Owned<Semaphore>,
    /// Signaled when the slot's submission completes; created signaled
    pub in_flight: Owned<Fence>,
}

impl FrameSync {
    /// Create the slot's objects
    pub fn new(device: &ash::Device) -> RenderResult<Self> {
        Ok(Self {
            image_available: create_semaphore(device)?,
            render_finished: create_semaphore(device)?,
            in_flight: create_fence(device, true)?,
        })
    }
}
