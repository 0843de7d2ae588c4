//! Sampled textures
//!
//! Upload protocol: pixels go into a host-visible staging buffer, then a
//! single graphics-queue submission transitions the device-local image,
//! copies mip 0, blits the rest of the mip chain and leaves every level in
//! `SHADER_READ_ONLY_OPTIMAL`. The staging buffer is released afterwards.

use super::buffer::BasicBuffer;
use super::image::{mip_levels, AllocatedImage, ImageDesc};
use super::resource::{DeviceObject, GpuResource, Owned, Sampler};
use super::UploadContext;
use crate::assets::ImageData;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::render::backends::vulkan::initialization::QueueKind;
use crate::render::backends::vulkan::rendering::barrier::{subresource_range, transition_image};
use ash::vk;

/// Format of every uploaded color texture
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// How a texture is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureOptions {
    /// Magnification and minification filter
    pub filter: vk::Filter,
    /// Generate and sample a full mip chain
    pub mipmapped: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            mipmapped: true,
        }
    }
}

impl TextureOptions {
    /// Nearest filtering without mips, for pixel-exact lookups
    #[must_use]
    pub const fn nearest() -> Self {
        Self {
            filter: vk::Filter::NEAREST,
            mipmapped: false,
        }
    }
}

/// An image, its view and the sampler used to read it
pub struct Texture {
    image: Owned<AllocatedImage>,
    sampler: Owned<Sampler>,
}

impl Texture {
    /// Upload `data` and build a sampler for it
    pub fn from_image_data(
        ctx: &UploadContext<'_>,
        data: &ImageData,
        options: TextureOptions,
    ) -> RenderResult<Owned<Self>> {
        data.validate()?;
        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };
        let levels = if options.mipmapped { mip_levels(extent) } else { 1 };
        let device = ctx.allocator.device();

        if levels > 1 && !device.supports_linear_blit(TEXTURE_FORMAT) {
            return Err(RenderError::graphics(format!(
                "{TEXTURE_FORMAT:?} does not support linear blits; cannot generate mipmaps"
            )));
        }

        let staging = BasicBuffer::staging(ctx.allocator, &data.data)?;
        let desc = ImageDesc::color(
            extent,
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
        )
        .with_mip_levels(levels);
        let image = AllocatedImage::new(ctx.allocator, desc)?;

        let staging_buffer = staging.try_get()?.handle();
        let image_handle = image.try_get()?.handle();
        ctx.commands.immediate_submit(QueueKind::Graphics, |raw, cmd| {
            transition_image(
                raw,
                cmd,
                image_handle,
                subresource_range(vk::ImageAspectFlags::COLOR, 0, levels),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy::builder()
                .image_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .image_extent(vk::Extent3D {
                    width: extent.width,
                    height: extent.height,
                    depth: 1,
                });
            unsafe {
                raw.cmd_copy_buffer_to_image(
                    cmd,
                    staging_buffer,
                    image_handle,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region.build()],
                );
            }

            record_mip_chain(raw, cmd, image_handle, extent, levels);
            Ok(())
        })?;
        drop(staging);

        let sampler = create_sampler(ctx, options, levels)?;
        log::debug!(
            "Uploaded {}x{} texture with {} mip level(s)",
            extent.width,
            extent.height,
            levels
        );
        Ok(Owned::new(Self { image, sampler }))
    }

    /// Image view over all levels
    pub fn view(&self) -> vk::ImageView {
        self.image.get().map_or_else(vk::ImageView::null, AllocatedImage::view)
    }

    /// Sampler
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.raw()
    }

    /// Size of mip 0
    pub fn extent(&self) -> vk::Extent2D {
        self.image
            .get()
            .map_or_else(vk::Extent2D::default, AllocatedImage::extent)
    }
}

impl GpuResource for Texture {
    fn release(mut self) {
        self.sampler.destroy();
        self.image.destroy();
    }
}

/// Halve a mip dimension, never below one texel
#[must_use]
pub const fn next_mip_size(size: i32) -> i32 {
    if size > 1 {
        size / 2
    } else {
        1
    }
}

/// Blit each level from the previous one, leaving all levels shader-readable
///
/// Expects every level in `TRANSFER_DST_OPTIMAL` with mip 0 filled.
fn record_mip_chain(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    extent: vk::Extent2D,
    levels: u32,
) {
    let color = vk::ImageAspectFlags::COLOR;
    let mut width = i32::try_from(extent.width).unwrap_or(i32::MAX);
    let mut height = i32::try_from(extent.height).unwrap_or(i32::MAX);

    for level in 1..levels {
        transition_image(
            device,
            cmd,
            image,
            subresource_range(color, level - 1, 1),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );

        let (next_width, next_height) = (next_mip_size(width), next_mip_size(height));
        let blit = vk::ImageBlit::builder()
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: color,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_offsets([
                vk::Offset3D::default(),
                vk::Offset3D { x: width, y: height, z: 1 },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: color,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D::default(),
                vk::Offset3D { x: next_width, y: next_height, z: 1 },
            ]);
        unsafe {
            device.cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit.build()],
                vk::Filter::LINEAR,
            );
        }

        transition_image(
            device,
            cmd,
            image,
            subresource_range(color, level - 1, 1),
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        width = next_width;
        height = next_height;
    }

    transition_image(
        device,
        cmd,
        image,
        subresource_range(color, levels - 1, 1),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );
}

fn create_sampler(
    ctx: &UploadContext<'_>,
    options: TextureOptions,
    levels: u32,
) -> RenderResult<Owned<Sampler>> {
    let device = ctx.allocator.device();
    let mipmap_mode = if options.filter == vk::Filter::NEAREST {
        vk::SamplerMipmapMode::NEAREST
    } else {
        vk::SamplerMipmapMode::LINEAR
    };
    let info = vk::SamplerCreateInfo::builder()
        .mag_filter(options.filter)
        .min_filter(options.filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(device.properties().limits.max_sampler_anisotropy)
        .min_lod(0.0)
        .max_lod(levels as f32)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

    let sampler = unsafe { device.handle().create_sampler(&info, None) }.check("vkCreateSampler")?;
    Ok(DeviceObject::owned(device.handle(), sampler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_mip_size_floors_at_one() {
        assert_eq!(next_mip_size(512), 256);
        assert_eq!(next_mip_size(3), 1);
        assert_eq!(next_mip_size(1), 1);
    }

    #[test]
    fn test_mip_chain_reaches_one_texel() {
        let mut size = 300;
        let levels = mip_levels(vk::Extent2D { width: 300, height: 300 });
        for _ in 1..levels {
            size = next_mip_size(size);
        }
        assert_eq!(size, 1);
    }
}
