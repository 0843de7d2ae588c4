//! Materials: pipelines plus the descriptor set that feeds them
//!
//! A [`MaterialInstance`] is a bundle of plain handles. The pipelines and
//! layouts it points at are owned by the material type that produced it
//! ([`MetallicRoughness`]) and the set lives in a descriptor pool owned by the
//! renderer, so instances can be copied freely into draw lists.

use crate::config::ShaderConfig;
use crate::error::RenderResult;
use crate::render::backends::vulkan::rendering::pipeline::{
    create_pipeline_layout, BlendMode, GraphicsPipelineBuilder,
};
use crate::render::backends::vulkan::rendering::shader::load_shader_module;
use crate::render::backends::vulkan::resources::resource::{
    DescriptorSetLayout, Pipeline, PipelineLayout,
};
use crate::render::backends::vulkan::resources::{
    BasicBuffer, DescriptorAllocator, DescriptorLayoutBuilder, DescriptorWriter, Owned, Texture,
};
use crate::render::backends::vulkan::state::draw_targets::{DEPTH_FORMAT, DRAW_FORMAT};
use crate::render::scene::draw_context::DrawPushConstants;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Which list a material draws in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MaterialPass {
    /// Depth-written, unblended
    #[default]
    Opaque,
    /// Alpha blended after opaque geometry
    Transparent,
    /// Anything else; drawn with the opaque list
    Other,
}

/// Pipeline and the layout it was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

/// What a draw binds for its material
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialInstance {
    /// Pipeline to bind
    pub pipeline: MaterialPipeline,
    /// Material descriptor set, bound at set 1
    pub set: vk::DescriptorSet,
    /// Draw list
    pub pass: MaterialPass,
}

/// Uniform block of a metallic-roughness material
///
/// Padded to 256 bytes so consecutive materials can share one buffer at
/// offsets that satisfy any `minUniformBufferOffsetAlignment`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    /// Base color multiplier
    pub color_factors: [f32; 4],
    /// Metallic in `x`, roughness in `y`
    pub metal_rough_factors: [f32; 4],
    padding: [[f32; 4]; 14],
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self::new([1.0, 1.0, 1.0, 1.0], 1.0, 0.5)
    }
}

impl MaterialConstants {
    #[must_use]
    pub fn new(color: [f32; 4], metallic: f32, roughness: f32) -> Self {
        Self {
            color_factors: color,
            metal_rough_factors: [metallic, roughness, 0.0, 0.0],
            padding: [[0.0; 4]; 14],
        }
    }
}

/// Textures and uniform range a material instance reads
#[derive(Debug, Clone, Copy)]
pub struct MaterialResources {
    pub color_view: vk::ImageView,
    pub color_sampler: vk::Sampler,
    pub metal_rough_view: vk::ImageView,
    pub metal_rough_sampler: vk::Sampler,
    /// Buffer holding a [`MaterialConstants`] block
    pub data_buffer: vk::Buffer,
    /// Byte offset of the block
    pub data_offset: vk::DeviceSize,
}

impl MaterialResources {
    /// Gather handles from owned resources
    #[must_use]
    pub fn new(
        color: &Texture,
        metal_rough: &Texture,
        data_buffer: &BasicBuffer,
        data_offset: vk::DeviceSize,
    ) -> Self {
        Self {
            color_view: color.view(),
            color_sampler: color.sampler(),
            metal_rough_view: metal_rough.view(),
            metal_rough_sampler: metal_rough.sampler(),
            data_buffer: data_buffer.handle(),
            data_offset,
        }
    }
}

/// Bindings of the material set: constants, color texture, metal-rough texture
#[must_use]
pub fn material_set_bindings() -> DescriptorLayoutBuilder {
    DescriptorLayoutBuilder::new()
        .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
        .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .add_binding(2, vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
}

/// Bindings of the scene set: the per-frame [`super::SceneData`] uniform
#[must_use]
pub fn scene_set_bindings() -> DescriptorLayoutBuilder {
    DescriptorLayoutBuilder::new().add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
}

/// Metallic-roughness material type
///
/// Owns an opaque and a transparent pipeline that share one layout:
/// set 0 is the scene, set 1 the material, and the vertex stage receives the
/// world matrix as a push constant.
pub struct MetallicRoughness {
    opaque: Owned<Pipeline>,
    transparent: Owned<Pipeline>,
    layout: Owned<PipelineLayout>,
    material_layout: Owned<DescriptorSetLayout>,
    writer: DescriptorWriter,
}

impl MetallicRoughness {
    /// Build both pipelines rendering into the draw targets at `samples`
    pub fn build(
        device: &ash::Device,
        shaders: &ShaderConfig,
        scene_layout: vk::DescriptorSetLayout,
        samples: vk::SampleCountFlags,
    ) -> RenderResult<Self> {
        let vertex = load_shader_module(device, &shaders.vertex_shader_path)?;
        let fragment = load_shader_module(device, &shaders.fragment_shader_path)?;

        let material_layout = material_set_bindings().build(
            device,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;
        let push_constants = [vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: size_of::<DrawPushConstants>() as u32,
        }];
        let layout = create_pipeline_layout(
            device,
            &[scene_layout, material_layout.raw()],
            &push_constants,
        )?;

        let builder = GraphicsPipelineBuilder::new()
            .shaders(vertex.raw(), fragment.raw())
            .layout(layout.raw())
            .cull_mode(vk::CullModeFlags::NONE, vk::FrontFace::COUNTER_CLOCKWISE)
            .samples(samples)
            .color_format(DRAW_FORMAT)
            .depth_format(DEPTH_FORMAT);

        let opaque = builder
            .clone()
            .blend(BlendMode::None)
            .depth_test(true, vk::CompareOp::GREATER_OR_EQUAL)
            .build(device)?;
        let transparent = builder
            .blend(BlendMode::AlphaBlend)
            .depth_test(false, vk::CompareOp::GREATER_OR_EQUAL)
            .build(device)?;

        log::info!("Metallic-roughness pipelines built ({:?})", samples);
        Ok(Self {
            opaque,
            transparent,
            layout,
            material_layout,
            writer: DescriptorWriter::new(),
        })
    }

    /// Pipeline used for `pass`
    pub fn pipeline_for(&self, pass: MaterialPass) -> MaterialPipeline {
        let pipeline = match pass {
            MaterialPass::Transparent => self.transparent.raw(),
            MaterialPass::Opaque | MaterialPass::Other => self.opaque.raw(),
        };
        MaterialPipeline {
            pipeline,
            layout: self.layout.raw(),
        }
    }

    /// Layout of the material set
    pub fn material_layout(&self) -> vk::DescriptorSetLayout {
        self.material_layout.raw()
    }

    /// Allocate and fill a material set from `descriptors`
    pub fn write_material(
        &mut self,
        device: &ash::Device,
        pass: MaterialPass,
        resources: &MaterialResources,
        descriptors: &DescriptorAllocator,
    ) -> RenderResult<MaterialInstance> {
        let set = descriptors.allocate(self.material_layout.raw())?;

        self.writer.clear();
        self.writer
            .write_buffer(
                0,
                resources.data_buffer,
                size_of::<MaterialConstants>() as vk::DeviceSize,
                resources.data_offset,
                vk::DescriptorType::UNIFORM_BUFFER,
            )
            .write_image(
                1,
                resources.color_view,
                resources.color_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            )
            .write_image(
                2,
                resources.metal_rough_view,
                resources.metal_rough_sampler,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        self.writer.update_set(device, set);

        Ok(MaterialInstance {
            pipeline: self.pipeline_for(pass),
            set,
            pass,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_fill_one_aligned_slot() {
        assert_eq!(size_of::<MaterialConstants>(), 256);
        let constants = MaterialConstants::new([0.5, 0.5, 0.5, 1.0], 0.0, 0.8);
        assert_eq!(constants.metal_rough_factors, [0.0, 0.8, 0.0, 0.0]);
    }

    #[test]
    fn test_material_set_layout() {
        let bindings = material_set_bindings().layout_bindings(vk::ShaderStageFlags::FRAGMENT);
        let types: Vec<vk::DescriptorType> = bindings.iter().map(|b| b.descriptor_type).collect();
        assert_eq!(
            types,
            vec![
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ]
        );
        assert!(bindings.iter().enumerate().all(|(i, b)| b.binding == i as u32));
    }

    #[test]
    fn test_default_pass_is_opaque() {
        assert_eq!(MaterialPass::default(), MaterialPass::Opaque);
    }
}
