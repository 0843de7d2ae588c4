//! Images backed by vk-mem allocations, with a default view

use super::allocator::{GpuAllocator, MemoryLocation};
use super::resource::{GpuResource, Owned};
use crate::error::{RenderError, RenderResult, VkResultExt};
use ash::vk;
use std::fmt;
use std::sync::Arc;

/// Parameters of a 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Size in pixels
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Aspect of the default view
    pub aspect: vk::ImageAspectFlags,
    /// Mip level count
    pub mip_levels: u32,
    /// Samples per texel
    pub samples: vk::SampleCountFlags,
}

impl ImageDesc {
    /// Single-sample color image without mips
    #[must_use]
    pub const fn color(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
            mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Depth image without mips
    #[must_use]
    pub const fn depth(extent: vk::Extent2D, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            mip_levels: 1,
            samples,
        }
    }

    /// Set the sample count
    #[must_use]
    pub const fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Set the mip level count
    #[must_use]
    pub const fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }
}

/// Full mip chain length for `extent`: `floor(log2(max(w, h))) + 1`
#[must_use]
pub const fn mip_levels(extent: vk::Extent2D) -> u32 {
    let largest = if extent.width > extent.height {
        extent.width
    } else {
        extent.height
    };
    if largest == 0 {
        1
    } else {
        u32::BITS - largest.leading_zeros()
    }
}

/// An image, its memory and a view covering every mip level
pub struct AllocatedImage {
    allocator: Arc<GpuAllocator>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: vk_mem::Allocation,
    desc: ImageDesc,
}

impl AllocatedImage {
    /// Create a device-local image and its view
    pub fn new(allocator: &Arc<GpuAllocator>, desc: ImageDesc) -> RenderResult<Owned<Self>> {
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(RenderError::graphics(format!(
                "cannot create a {}x{} image",
                desc.extent.width, desc.extent.height
            )));
        }

        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let (image, mut allocation) = allocator.create_image(&info, MemoryLocation::GpuOnly)?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });
        let device = allocator.device().handle();
        let view = match unsafe { device.create_image_view(&view_info, None) }
            .check("vkCreateImageView")
        {
            Ok(view) => view,
            Err(e) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(e);
            }
        };

        log::trace!(
            "Created {}x{} {:?} image ({} mips, {:?})",
            desc.extent.width,
            desc.extent.height,
            desc.format,
            desc.mip_levels,
            desc.samples
        );
        Ok(Owned::new(Self {
            allocator: Arc::clone(allocator),
            image,
            view,
            allocation,
            desc,
        }))
    }

    /// Image handle
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// View over all mip levels
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Creation parameters
    pub const fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Size in pixels
    pub const fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Texel format
    pub const fn format(&self) -> vk::Format {
        self.desc.format
    }
}

impl GpuResource for AllocatedImage {
    fn release(mut self) {
        unsafe {
            self.allocator
                .device()
                .handle()
                .destroy_image_view(self.view, None);
            self.allocator.destroy_image(self.image, &mut self.allocation);
        }
    }
}

impl fmt::Debug for AllocatedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocatedImage")
            .field("image", &self.image)
            .field("desc", &self.desc)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_mip_levels() {
        assert_eq!(mip_levels(extent(1, 1)), 1);
        assert_eq!(mip_levels(extent(2, 2)), 2);
        assert_eq!(mip_levels(extent(256, 256)), 9);
        assert_eq!(mip_levels(extent(300, 17)), 9);
        assert_eq!(mip_levels(extent(1, 1024)), 11);
        assert_eq!(mip_levels(extent(0, 0)), 1);
    }

    #[test]
    fn test_depth_desc() {
        let desc = ImageDesc::depth(extent(8, 8), vk::Format::D32_SFLOAT, vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(desc.mip_levels, 1);
        assert_eq!(desc.samples, vk::SampleCountFlags::TYPE_4);
    }
}
