//! Swapchain creation and teardown
//!
//! A swapchain is never resized in place. On resize the renderer destroys the
//! whole thing (views first, then the handle) and builds a new one from
//! freshly refreshed [`SurfaceDetails`].

use crate::error::{RenderResult, VkResultExt};
use crate::render::backends::vulkan::initialization::{Device, QueueFamilies, Surface, SurfaceDetails};
use crate::render::backends::vulkan::resources::resource::{DeviceObject, GpuResource, Owned};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

/// Owned swapchain image view
pub type SwapchainView = DeviceObject<vk::ImageView>;

/// Usage of presentable images: the frame is blitted in and the overlay draws on top
pub const SWAPCHAIN_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Presentable images and their views
pub struct Swapchain {
    device: Arc<Device>,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<Owned<SwapchainView>>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain from the parameters chosen in `details`
    pub fn new(
        device: &Arc<Device>,
        surface: &Surface,
        details: &SurfaceDetails,
    ) -> RenderResult<Owned<Self>> {
        let families = device.families();
        let family_indices = [families.graphics, families.present];
        let sharing = sharing_mode(families);

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle())
            .min_image_count(details.image_count())
            .image_format(details.chosen_format.format)
            .image_color_space(details.chosen_format.color_space)
            .image_extent(details.chosen_extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_USAGE)
            .image_sharing_mode(sharing)
            .pre_transform(details.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(details.chosen_present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());
        if sharing == vk::SharingMode::CONCURRENT {
            create_info = create_info.queue_family_indices(&family_indices);
        }

        let loader = device.swapchain_loader();
        let handle = unsafe { loader.create_swapchain(&create_info, None) }.check("vkCreateSwapchainKHR")?;

        // From here on the handle is owned, so a failing view creation still destroys it.
        let mut swapchain = Owned::new(Self {
            device: Arc::clone(device),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format: details.chosen_format.format,
            extent: details.chosen_extent,
            present_mode: details.chosen_present_mode,
        });
        let inner = swapchain.try_get_mut()?;
        inner.images = unsafe { loader.get_swapchain_images(handle) }.check("vkGetSwapchainImagesKHR")?;
        for &image in &inner.images {
            let info = view_info(image, inner.format);
            let view = unsafe { device.handle().create_image_view(&info, None) }
                .check("vkCreateImageView (swapchain)")?;
            inner.views.push(DeviceObject::owned(device.handle(), view));
        }

        log::info!(
            "Swapchain created: {} images, {}x{}, {:?}, {:?}",
            inner.images.len(),
            inner.extent.width,
            inner.extent.height,
            inner.format,
            inner.present_mode
        );
        Ok(swapchain)
    }

    /// Raw handle
    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Presentable images; owned by the swapchain
    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    /// View of image `index`
    pub fn view(&self, index: usize) -> vk::ImageView {
        self.views[index].raw()
    }

    /// Number of presentable images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image format the surface was created with
    pub const fn format(&self) -> vk::Format {
        self.format
    }

    /// Size of every swapchain image
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Present mode chosen at creation
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Acquire the next image, signaling `signal` when it is ready
    ///
    /// Returns the raw result so the caller can treat out-of-date as recoverable.
    pub fn acquire_next_image(&self, signal: vk::Semaphore) -> VkResult<(u32, bool)> {
        unsafe {
            self.device
                .swapchain_loader()
                .acquire_next_image(self.handle, u64::MAX, signal, vk::Fence::null())
        }
    }

    /// Queue image `index` for presentation once `wait` is signaled
    ///
    /// `Ok(true)` means the swapchain is suboptimal.
    pub fn present(&self, queue: vk::Queue, wait: vk::Semaphore, index: u32) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.handle];
        let indices = [index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);
        unsafe { self.device.swapchain_loader().queue_present(queue, &info) }
    }
}

impl GpuResource for Swapchain {
    fn release(mut self) {
        for view in &mut self.views {
            view.destroy();
        }
        unsafe {
            self.device.swapchain_loader().destroy_swapchain(self.handle, None);
        }
        log::debug!("Swapchain destroyed");
    }
}

/// Concurrent sharing when graphics and present live in different families
#[must_use]
pub fn sharing_mode(families: QueueFamilies) -> vk::SharingMode {
    if families.graphics == families.present {
        vk::SharingMode::EXCLUSIVE
    } else {
        vk::SharingMode::CONCURRENT
    }
}

/// 2D color view with identity swizzle, one mip and one layer
#[must_use]
pub fn view_info(image: vk::Image, format: vk::Format) -> vk::ImageViewCreateInfo {
    vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn test_view_is_single_mip_single_layer() {
        let info = view_info(vk::Image::from_raw(9), vk::Format::B8G8R8A8_SRGB);
        assert_eq!(info.view_type, vk::ImageViewType::TYPE_2D);
        assert_eq!(info.subresource_range.level_count, 1);
        assert_eq!(info.subresource_range.layer_count, 1);
        assert_eq!(info.components.r, vk::ComponentSwizzle::IDENTITY);
        assert_eq!(info.components.a, vk::ComponentSwizzle::IDENTITY);
    }

    #[test]
    fn test_sharing_mode_follows_families() {
        let shared = QueueFamilies { graphics: 0, present: 0, transfer: 1 };
        let split = QueueFamilies { graphics: 0, present: 2, transfer: 1 };
        assert_eq!(sharing_mode(shared), vk::SharingMode::EXCLUSIVE);
        assert_eq!(sharing_mode(split), vk::SharingMode::CONCURRENT);
    }

    #[test]
    fn test_usage_allows_blit_and_overlay() {
        assert!(SWAPCHAIN_USAGE.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(SWAPCHAIN_USAGE.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }
}
