//! Image layout transitions and blits
//!
//! Source and destination scopes of a transition are derived from the layouts
//! on either side, so every barrier pairs each access mask with the stage
//! that performs it.

use ash::vk;

/// Pipeline stage and access mask that use an image in `layout`
///
/// `UNDEFINED` maps to all commands with `MEMORY_WRITE`: images re-entered
/// from `UNDEFINED` every frame were written by the previous frame, and
/// those writes must be made available before the new ones start.
#[must_use]
pub fn layout_masks(layout: vk::ImageLayout) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    match layout {
        vk::ImageLayout::UNDEFINED => {
            (vk::PipelineStageFlags::ALL_COMMANDS, vk::AccessFlags::MEMORY_WRITE)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_WRITE)
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => {
            (vk::PipelineStageFlags::TRANSFER, vk::AccessFlags::TRANSFER_READ)
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => (
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::PipelineStageFlags::FRAGMENT_SHADER, vk::AccessFlags::SHADER_READ)
        }
        vk::ImageLayout::PRESENT_SRC_KHR => {
            (vk::PipelineStageFlags::BOTTOM_OF_PIPE, vk::AccessFlags::empty())
        }
        _ => (
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
        ),
    }
}

/// Subresource range over `levels` mips starting at `base`
#[must_use]
pub const fn subresource_range(
    aspect: vk::ImageAspectFlags,
    base_mip_level: u32,
    level_count: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Record a layout transition of `range` from `old` to `new`
pub fn transition_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let (src_stage, src_access) = layout_masks(old);
    let (dst_stage, dst_access) = layout_masks(new);

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}

/// Full-image color transition of a single-mip image
pub fn transition_color(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let range = subresource_range(vk::ImageAspectFlags::COLOR, 0, 1);
    transition_image(device, cmd, image, range, old, new);
}

/// Far corner offset of a blit region
#[must_use]
pub fn extent_offset(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: i32::try_from(extent.width).unwrap_or(i32::MAX),
        y: i32::try_from(extent.height).unwrap_or(i32::MAX),
        z: 1,
    }
}

/// Blit mip 0 of `src` (TRANSFER_SRC) onto `dst` (TRANSFER_DST), scaling linearly
pub fn blit_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    src_extent: vk::Extent2D,
    dst_extent: vk::Extent2D,
) {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let region = vk::ImageBlit::builder()
        .src_subresource(layers)
        .src_offsets([vk::Offset3D::default(), extent_offset(src_extent)])
        .dst_subresource(layers)
        .dst_offsets([vk::Offset3D::default(), extent_offset(dst_extent)]);

    unsafe {
        device.cmd_blit_image(
            cmd,
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region.build()],
            vk::Filter::LINEAR,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Access bits each stage is allowed to perform
    fn allowed_access(stage: vk::PipelineStageFlags) -> vk::AccessFlags {
        let mut allowed = vk::AccessFlags::empty();
        if stage.contains(vk::PipelineStageFlags::ALL_COMMANDS) {
            return vk::AccessFlags::from_raw(u32::MAX);
        }
        if stage.contains(vk::PipelineStageFlags::TRANSFER) {
            allowed |= vk::AccessFlags::TRANSFER_READ | vk::AccessFlags::TRANSFER_WRITE;
        }
        if stage.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT) {
            allowed |= vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE;
        }
        if stage.intersects(
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ) {
            allowed |= vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE;
        }
        if stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER) {
            allowed |= vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE;
        }
        allowed
    }

    #[test]
    fn test_every_layout_pairs_access_with_its_stage() {
        let layouts = [
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::GENERAL,
        ];
        for layout in layouts {
            let (stage, access) = layout_masks(layout);
            assert!(!stage.is_empty(), "{layout:?} has no stage");
            assert!(
                allowed_access(stage).contains(access),
                "{layout:?}: {access:?} not performed by {stage:?}"
            );
        }
    }

    #[test]
    fn test_undefined_source_orders_previous_writes() {
        // Draw, MSAA and depth images re-enter UNDEFINED each frame.
        let (stage, access) = layout_masks(vk::ImageLayout::UNDEFINED);
        assert_eq!(stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert!(access.contains(vk::AccessFlags::MEMORY_WRITE));
    }

    #[test]
    fn test_present_has_no_access() {
        let (stage, access) = layout_masks(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert!(access.is_empty());
    }

    #[test]
    fn test_extent_offset() {
        let offset = extent_offset(vk::Extent2D { width: 1280, height: 720 });
        assert_eq!((offset.x, offset.y, offset.z), (1280, 720, 1));
    }
}
