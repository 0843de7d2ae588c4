//! Offscreen images the scene is rendered into
//!
//! Geometry is drawn into an HDR draw image sized to the swapchain, then
//! blitted into the presentable image. With multisampling the geometry goes
//! to a multisampled color target that resolves into the draw image.

use crate::error::RenderResult;
use crate::render::backends::vulkan::resources::{AllocatedImage, GpuAllocator, ImageDesc, Owned};
use ash::vk;
use std::sync::Arc;

/// Format of the single-sample draw image
pub const DRAW_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Depth format; cleared to 0 for reversed-Z
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Usage of the draw image: cleared, rendered or resolved into, then blitted out
const DRAW_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw(),
);

/// Draw image, optional multisampled color target and depth buffer
pub struct DrawTargets {
    /// Where the finished frame lives before the blit
    pub draw_image: Owned<AllocatedImage>,
    /// Multisampled color target; empty at one sample
    pub msaa_color: Owned<AllocatedImage>,
    /// Depth buffer at the geometry sample count
    pub depth: Owned<AllocatedImage>,
    samples: vk::SampleCountFlags,
    extent: vk::Extent2D,
}

impl DrawTargets {
    /// Allocate targets for `extent` rendered at `samples`
    pub fn new(
        allocator: &Arc<GpuAllocator>,
        extent: vk::Extent2D,
        samples: vk::SampleCountFlags,
    ) -> RenderResult<Self> {
        let draw_image = AllocatedImage::new(allocator, ImageDesc::color(extent, DRAW_FORMAT, DRAW_USAGE))?;
        let msaa_color = if samples == vk::SampleCountFlags::TYPE_1 {
            Owned::empty()
        } else {
            let usage = vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT;
            AllocatedImage::new(
                allocator,
                ImageDesc::color(extent, DRAW_FORMAT, usage).with_samples(samples),
            )?
        };
        let depth = AllocatedImage::new(allocator, ImageDesc::depth(extent, DEPTH_FORMAT, samples))?;

        log::debug!(
            "Draw targets {}x{} at {:?}",
            extent.width,
            extent.height,
            samples
        );
        Ok(Self {
            draw_image,
            msaa_color,
            depth,
            samples,
            extent,
        })
    }

    /// Geometry sample count
    pub const fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Whether geometry renders into a multisampled target
    pub const fn uses_msaa(&self) -> bool {
        !self.msaa_color.is_empty()
    }
}

/// Sample count to render at: the device maximum when MSAA is enabled
#[must_use]
pub fn effective_samples(msaa: bool, device_max: vk::SampleCountFlags) -> vk::SampleCountFlags {
    if msaa {
        device_max
    } else {
        vk::SampleCountFlags::TYPE_1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msaa_toggle_picks_sample_count() {
        assert_eq!(
            effective_samples(true, vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_8
        );
        assert_eq!(
            effective_samples(false, vk::SampleCountFlags::TYPE_8),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_draw_image_can_be_blitted() {
        assert!(DRAW_USAGE.contains(vk::ImageUsageFlags::TRANSFER_SRC));
        assert!(DRAW_USAGE.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }
}
