//! Descriptor set layouts, pool allocation and batched writes

use super::resource::{DescriptorSetLayout, DeviceObject, GpuResource, Owned};
use crate::error::{RenderError, RenderResult, VkResultExt};
use ash::vk;

/// Accumulates `(binding, type)` pairs, each with a descriptor count of one
#[derive(Debug, Default, Clone)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<(u32, vk::DescriptorType)>,
}

impl DescriptorLayoutBuilder {
    /// Empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding
    #[must_use]
    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push((binding, ty));
        self
    }

    /// Remove all bindings
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Binding descriptions visible to `stages`
    #[must_use]
    pub fn layout_bindings(&self, stages: vk::ShaderStageFlags) -> Vec<vk::DescriptorSetLayoutBinding> {
        self.bindings
            .iter()
            .map(|&(binding, ty)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(ty)
                    .descriptor_count(1)
                    .stage_flags(stages)
                    .build()
            })
            .collect()
    }

    /// Create the layout with every binding visible to `stages`
    pub fn build(
        &self,
        device: &ash::Device,
        stages: vk::ShaderStageFlags,
    ) -> RenderResult<Owned<DescriptorSetLayout>> {
        let bindings = self.layout_bindings(stages);
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&info, None) }
            .check("vkCreateDescriptorSetLayout")?;
        Ok(DeviceObject::owned(device, layout))
    }
}

/// Share of a pool given to one descriptor type, per set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    /// Descriptor type
    pub ty: vk::DescriptorType,
    /// Descriptors of `ty` per set
    pub ratio: f32,
}

/// Pool sizes for `max_sets` sets; every type gets at least one descriptor
#[must_use]
pub fn pool_sizes(max_sets: u32, ratios: &[PoolSizeRatio]) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| vk::DescriptorPoolSize {
            ty: r.ty,
            descriptor_count: ((r.ratio * max_sets as f32).ceil() as u32).max(1),
        })
        .collect()
}

/// Fixed-size descriptor pool that is only ever reset in bulk
pub struct DescriptorAllocator {
    device: ash::Device,
    pool: vk::DescriptorPool,
}

impl DescriptorAllocator {
    /// Create a pool holding up to `max_sets` sets
    pub fn new(device: &ash::Device, max_sets: u32, ratios: &[PoolSizeRatio]) -> RenderResult<Owned<Self>> {
        let sizes = pool_sizes(max_sets, ratios);
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&sizes);
        let pool = unsafe { device.create_descriptor_pool(&info, None) }
            .check("vkCreateDescriptorPool")?;
        Ok(Owned::new(Self {
            device: device.clone(),
            pool,
        }))
    }

    /// Allocate one set with `layout`
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> RenderResult<vk::DescriptorSet> {
        let layouts = [layout];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&info) }
            .check("vkAllocateDescriptorSets")?;
        sets.into_iter()
            .next()
            .ok_or_else(|| RenderError::graphics("descriptor pool returned no set"))
    }

    /// Return every set to the pool
    pub fn reset(&self) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }
        .check("vkResetDescriptorPool")
    }
}

impl GpuResource for DescriptorAllocator {
    fn release(self) {
        unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingInfo {
    Buffer(usize),
    Image(usize),
}

#[derive(Debug, Clone, Copy)]
struct PendingWrite {
    binding: u32,
    ty: vk::DescriptorType,
    info: PendingInfo,
}

/// Batches buffer and image writes and applies them to one set
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    buffer_infos: Vec<vk::DescriptorBufferInfo>,
    image_infos: Vec<vk::DescriptorImageInfo>,
    writes: Vec<PendingWrite>,
}

impl DescriptorWriter {
    /// Empty writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a buffer write
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.buffer_infos.push(vk::DescriptorBufferInfo {
            buffer,
            offset,
            range: size,
        });
        self.writes.push(PendingWrite {
            binding,
            ty,
            info: PendingInfo::Buffer(self.buffer_infos.len() - 1),
        });
        self
    }

    /// Queue an image write
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.image_infos.push(vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: layout,
        });
        self.writes.push(PendingWrite {
            binding,
            ty,
            info: PendingInfo::Image(self.image_infos.len() - 1),
        });
        self
    }

    /// Number of queued writes
    #[must_use]
    pub fn pending(&self) -> usize {
        self.writes.len()
    }

    /// Drop every queued write
    pub fn clear(&mut self) {
        self.buffer_infos.clear();
        self.image_infos.clear();
        self.writes.clear();
    }

    /// Apply the queued writes to `set`
    pub fn update_set(&self, device: &ash::Device, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|pending| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(pending.binding)
                    .dst_array_element(0)
                    .descriptor_type(pending.ty);
                match pending.info {
                    PendingInfo::Buffer(i) => builder
                        .buffer_info(std::slice::from_ref(&self.buffer_infos[i]))
                        .build(),
                    PendingInfo::Image(i) => builder
                        .image_info(std::slice::from_ref(&self.image_infos[i]))
                        .build(),
                }
            })
            .collect();

        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_scale_with_ratio() {
        let ratios = [
            PoolSizeRatio {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                ratio: 1.0,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                ratio: 2.5,
            },
            PoolSizeRatio {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                ratio: 0.0,
            },
        ];
        let sizes = pool_sizes(10, &ratios);
        let counts: Vec<u32> = sizes.iter().map(|s| s.descriptor_count).collect();
        assert_eq!(counts, vec![10, 25, 1]);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }

    #[test]
    fn test_layout_bindings_have_count_one() {
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        let bindings = builder.layout_bindings(vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(bindings.len(), 2);
        assert!(bindings.iter().all(|b| b.descriptor_count == 1));
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_writer_batches_and_clears() {
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(0, vk::Buffer::null(), 64, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                1,
                vk::ImageView::null(),
                vk::Sampler::null(),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        assert_eq!(writer.pending(), 2);
        writer.clear();
        assert_eq!(writer.pending(), 0);
    }
}
