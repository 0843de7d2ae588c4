//! Ownership discipline for GPU resources
//!
//! Every resource kind implements [`GpuResource`], which knows how to release
//! its API objects. [`Owned`] is the only way the renderer holds one: it is
//! move-only, destroys its contents exactly once, and an emptied or already
//! destroyed handle is a no-op on destruction.

use crate::error::{RenderError, RenderResult};
use ash::vk;
use std::fmt;

/// A GPU object with a destruction routine
pub trait GpuResource {
    /// Release the underlying API objects
    fn release(self);
}

/// Move-only owning handle for a [`GpuResource`]
pub struct Owned<R: GpuResource> {
    inner: Option<R>,
}

impl<R: GpuResource> Owned<R> {
    /// Take ownership of `resource`
    pub const fn new(resource: R) -> Self {
        Self {
            inner: Some(resource),
        }
    }

    /// Handle that owns nothing
    #[must_use]
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    /// Whether nothing is owned
    pub const fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    /// Borrow the resource, if any
    pub const fn get(&self) -> Option<&R> {
        self.inner.as_ref()
    }

    /// Mutably borrow the resource, if any
    pub fn get_mut(&mut self) -> Option<&mut R> {
        self.inner.as_mut()
    }

    /// Borrow the resource or fail if it was destroyed or moved out
    #[track_caller]
    pub fn try_get(&self) -> RenderResult<&R> {
        self.inner
            .as_ref()
            .ok_or_else(|| RenderError::generic("use of destroyed or moved-from GPU resource"))
    }

    /// Mutable variant of [`Owned::try_get`]
    #[track_caller]
    pub fn try_get_mut(&mut self) -> RenderResult<&mut R> {
        self.inner
            .as_mut()
            .ok_or_else(|| RenderError::generic("use of destroyed or moved-from GPU resource"))
    }

    /// Move the contents out, leaving this handle empty
    #[must_use]
    pub fn take(&mut self) -> Self {
        Self {
            inner: self.inner.take(),
        }
    }

    /// Destroy the current contents, then take over `other`'s
    pub fn assign(&mut self, mut other: Self) {
        self.destroy();
        self.inner = other.inner.take();
    }

    /// Destroy the contents now; later calls do nothing
    pub fn destroy(&mut self) {
        if let Some(resource) = self.inner.take() {
            resource.release();
        }
    }
}

impl<R: GpuResource> Default for Owned<R> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<R: GpuResource> Drop for Owned<R> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<R: GpuResource + fmt::Debug> fmt::Debug for Owned<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(resource) => f.debug_tuple("Owned").field(resource).finish(),
            None => f.write_str("Owned(<empty>)"),
        }
    }
}

/// Vulkan handle destroyed through the logical device
pub trait DeviceHandle: vk::Handle + Copy {
    /// Destroy `handle`
    ///
    /// # Safety
    /// `handle` must have been created from `device` and not be in use by the GPU.
    unsafe fn destroy(self, device: &ash::Device);
}

macro_rules! device_handle {
    ($($handle:ty => $destroy:ident),* $(,)?) => {
        $(
            impl DeviceHandle for $handle {
                unsafe fn destroy(self, device: &ash::Device) {
                    device.$destroy(self, None);
                }
            }
        )*
    };
}

device_handle! {
    vk::Pipeline => destroy_pipeline,
    vk::PipelineLayout => destroy_pipeline_layout,
    vk::DescriptorSetLayout => destroy_descriptor_set_layout,
    vk::DescriptorPool => destroy_descriptor_pool,
    vk::Sampler => destroy_sampler,
    vk::ShaderModule => destroy_shader_module,
    vk::ImageView => destroy_image_view,
    vk::Semaphore => destroy_semaphore,
    vk::Fence => destroy_fence,
    vk::CommandPool => destroy_command_pool,
}

/// A plain device object: one handle, one destroy call
pub struct DeviceObject<H: DeviceHandle> {
    device: ash::Device,
    handle: H,
}

impl<H: DeviceHandle> DeviceObject<H> {
    /// Wrap a handle created from `device`
    pub fn owned(device: &ash::Device, handle: H) -> Owned<Self> {
        Owned::new(Self {
            device: device.clone(),
            handle,
        })
    }

    /// Raw handle
    pub const fn handle(&self) -> H {
        self.handle
    }
}

impl<H: DeviceHandle> GpuResource for DeviceObject<H> {
    fn release(self) {
        unsafe { self.handle.destroy(&self.device) };
    }
}

impl<H: DeviceHandle + fmt::Debug> fmt::Debug for DeviceObject<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DeviceObject").field(&self.handle).finish()
    }
}

/// Owned graphics or compute pipeline
pub type Pipeline = DeviceObject<vk::Pipeline>;
/// Owned pipeline layout
pub type PipelineLayout = DeviceObject<vk::PipelineLayout>;
/// Owned descriptor set layout
pub type DescriptorSetLayout = DeviceObject<vk::DescriptorSetLayout>;
/// Owned sampler
pub type Sampler = DeviceObject<vk::Sampler>;
/// Owned shader module
pub type ShaderModule = DeviceObject<vk::ShaderModule>;
/// Owned semaphore
pub type Semaphore = DeviceObject<vk::Semaphore>;
/// Owned fence
pub type Fence = DeviceObject<vk::Fence>;
/// Owned command pool
pub type CommandPool = DeviceObject<vk::CommandPool>;

impl<H: DeviceHandle> Owned<DeviceObject<H>> {
    /// Raw handle, or a null handle when empty
    pub fn raw(&self) -> H {
        self.get().map_or_else(|| H::from_raw(0), DeviceObject::handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counting {
        id: u32,
        releases: Rc<Cell<u32>>,
    }

    impl GpuResource for Counting {
        fn release(self) {
            self.releases.set(self.releases.get() + 1);
        }
    }

    fn counting(id: u32) -> (Owned<Counting>, Rc<Cell<u32>>) {
        let releases = Rc::new(Cell::new(0));
        (
            Owned::new(Counting {
                id,
                releases: Rc::clone(&releases),
            }),
            releases,
        )
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (mut handle, releases) = counting(1);
        handle.destroy();
        handle.destroy();
        drop(handle);
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn test_moved_from_handle_is_noop() {
        let (mut source, releases) = counting(2);
        let mut target = source.take();

        assert!(source.is_empty());
        assert_eq!(target.get().map(|r| r.id), Some(2));
        source.destroy();
        drop(source);
        assert_eq!(releases.get(), 0);

        target.destroy();
        assert_eq!(releases.get(), 1);
    }

    #[test]
    fn test_assign_destroys_current_first() {
        let (mut slot, old_releases) = counting(3);
        let (replacement, new_releases) = counting(4);

        slot.assign(replacement);
        assert_eq!(old_releases.get(), 1);
        assert_eq!(new_releases.get(), 0);
        assert_eq!(slot.get().map(|r| r.id), Some(4));

        drop(slot);
        assert_eq!(new_releases.get(), 1);
    }

    #[test]
    fn test_empty_handle_reports_error_on_use() {
        let empty: Owned<Counting> = Owned::empty();
        assert!(empty.try_get().is_err());
    }

    #[test]
    fn test_empty_device_object_is_null() {
        let pipeline: Owned<Pipeline> = Owned::empty();
        assert_eq!(pipeline.raw(), vk::Pipeline::null());
    }
}
