//! Graphics and compute pipeline construction
//!
//! Pipelines target dynamic rendering: attachment formats are declared on the
//! pipeline instead of a render pass, and viewport/scissor are dynamic state
//! set per frame from the swapchain extent.

use crate::assets::Vertex;
use crate::error::{RenderError, RenderResult, VkResultExt};
use crate::render::backends::vulkan::rendering::shader::ENTRY_POINT;
use crate::render::backends::vulkan::resources::resource::{
    DeviceObject, Owned, Pipeline, PipelineLayout,
};
use ash::vk;
use std::mem::{offset_of, size_of};

/// Color blending presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Overwrite the destination
    #[default]
    None,
    /// `src * alpha + dst`
    Additive,
    /// `src * alpha + dst * (1 - alpha)`
    AlphaBlend,
}

impl BlendMode {
    /// Attachment state for this preset, writing all channels
    #[must_use]
    pub fn attachment_state(self) -> vk::PipelineColorBlendAttachmentState {
        let base = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            Self::None => base.blend_enable(false).build(),
            Self::Additive => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
            Self::AlphaBlend => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
        }
    }
}

/// Binding 0 carries interleaved [`Vertex`] records
#[must_use]
pub fn vertex_binding() -> vk::VertexInputBindingDescription {
    vk::VertexInputBindingDescription {
        binding: 0,
        stride: size_of::<Vertex>() as u32,
        input_rate: vk::VertexInputRate::VERTEX,
    }
}

/// Attribute locations 0..=4: position, normal, uv, tangent, bitangent
#[must_use]
pub fn vertex_attributes() -> [vk::VertexInputAttributeDescription; 5] {
    let attribute = |location: u32, format: vk::Format, offset: usize| {
        vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        }
    };
    [
        attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, position)),
        attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, normal)),
        attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, uv)),
        attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, tangent)),
        attribute(4, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, bitangent)),
    ]
}

/// Create a pipeline layout from descriptor set layouts and push constant ranges
pub fn create_pipeline_layout(
    device: &ash::Device,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constants: &[vk::PushConstantRange],
) -> RenderResult<Owned<PipelineLayout>> {
    let info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(set_layouts)
        .push_constant_ranges(push_constants);
    let layout = unsafe { device.create_pipeline_layout(&info, None) }.check("vkCreatePipelineLayout")?;
    Ok(DeviceObject::owned(device, layout))
}

/// Fluent configuration for a graphics pipeline
#[derive(Debug, Clone)]
pub struct GraphicsPipelineBuilder {
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    layout: vk::PipelineLayout,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    blend: BlendMode,
    depth_test: bool,
    depth_write: bool,
    depth_compare: vk::CompareOp,
    samples: vk::SampleCountFlags,
    color_format: vk::Format,
    depth_format: vk::Format,
    vertex_input: bool,
}

impl Default for GraphicsPipelineBuilder {
    fn default() -> Self {
        Self {
            vertex_shader: vk::ShaderModule::null(),
            fragment_shader: vk::ShaderModule::null(),
            layout: vk::PipelineLayout::null(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend: BlendMode::None,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
            samples: vk::SampleCountFlags::TYPE_1,
            color_format: vk::Format::UNDEFINED,
            depth_format: vk::Format::UNDEFINED,
            vertex_input: true,
        }
    }
}

impl GraphicsPipelineBuilder {
    /// Triangle list, filled, no culling, no depth, no blending, one sample
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Vertex and fragment stages
    #[must_use]
    pub const fn shaders(mut self, vertex: vk::ShaderModule, fragment: vk::ShaderModule) -> Self {
        self.vertex_shader = vertex;
        self.fragment_shader = fragment;
        self
    }

    /// Pipeline layout; not owned by the pipeline
    #[must_use]
    pub const fn layout(mut self, layout: vk::PipelineLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub const fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub const fn polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    /// Face culling and winding
    #[must_use]
    pub const fn cull_mode(mut self, cull: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = cull;
        self.front_face = front_face;
        self
    }

    #[must_use]
    pub const fn blend(mut self, mode: BlendMode) -> Self {
        self.blend = mode;
        self
    }

    /// Depth test with `compare`, optionally writing depth
    #[must_use]
    pub const fn depth_test(mut self, write: bool, compare: vk::CompareOp) -> Self {
        self.depth_test = true;
        self.depth_write = write;
        self.depth_compare = compare;
        self
    }

    #[must_use]
    pub const fn disable_depth_test(mut self) -> Self {
        self.depth_test = false;
        self.depth_write = false;
        self.depth_compare = vk::CompareOp::ALWAYS;
        self
    }

    /// Rasterization sample count; must match the color and depth attachments
    #[must_use]
    pub const fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    #[must_use]
    pub const fn color_format(mut self, format: vk::Format) -> Self {
        self.color_format = format;
        self
    }

    #[must_use]
    pub const fn depth_format(mut self, format: vk::Format) -> Self {
        self.depth_format = format;
        self
    }

    /// Drop the [`Vertex`] input state, for pipelines that generate vertices
    #[must_use]
    pub const fn without_vertex_input(mut self) -> Self {
        self.vertex_input = false;
        self
    }

    /// Check that everything a pipeline needs was supplied
    #[track_caller]
    pub fn validate(&self) -> RenderResult<()> {
        if self.vertex_shader == vk::ShaderModule::null() || self.fragment_shader == vk::ShaderModule::null() {
            return Err(RenderError::generic("graphics pipeline is missing a shader stage"));
        }
        if self.layout == vk::PipelineLayout::null() {
            return Err(RenderError::generic("graphics pipeline has no layout"));
        }
        if self.color_format == vk::Format::UNDEFINED {
            return Err(RenderError::generic("graphics pipeline has no color attachment format"));
        }
        if self.depth_test && self.depth_format == vk::Format::UNDEFINED {
            return Err(RenderError::generic("depth test enabled without a depth attachment format"));
        }
        Ok(())
    }

    /// Create the pipeline
    pub fn build(&self, device: &ash::Device) -> RenderResult<Owned<Pipeline>> {
        self.validate()?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex_shader)
                .name(ENTRY_POINT)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment_shader)
                .name(ENTRY_POINT)
                .build(),
        ];

        let bindings = [vertex_binding()];
        let attributes = vertex_attributes();
        let vertex_input = if self.vertex_input {
            vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attributes)
        } else {
            vk::PipelineVertexInputStateCreateInfo::builder()
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(self.samples)
            .sample_shading_enable(false)
            .min_sample_shading(1.0);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0);

        let blend_attachments = [self.blend.attachment_state()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats = [self.color_format];
        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(self.depth_format);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut rendering_info)
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout);

        let pipelines = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[info.build()], None)
        }
        .map_err(|(_, result)| RenderError::vulkan("vkCreateGraphicsPipelines", result))?;

        log::debug!(
            "Created graphics pipeline (blend {:?}, depth test {}, samples {:?})",
            self.blend,
            self.depth_test,
            self.samples
        );
        Ok(DeviceObject::owned(device, pipelines[0]))
    }
}

/// Single-stage compute pipeline
#[derive(Debug, Clone, Copy)]
pub struct ComputePipelineBuilder {
    shader: vk::ShaderModule,
    layout: vk::PipelineLayout,
}

impl ComputePipelineBuilder {
    #[must_use]
    pub const fn new(shader: vk::ShaderModule, layout: vk::PipelineLayout) -> Self {
        Self { shader, layout }
    }

    /// Create the pipeline
    pub fn build(&self, device: &ash::Device) -> RenderResult<Owned<Pipeline>> {
        if self.shader == vk::ShaderModule::null() || self.layout == vk::PipelineLayout::null() {
            return Err(RenderError::generic("compute pipeline needs a shader and a layout"));
        }
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(self.shader)
            .name(ENTRY_POINT);
        let info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(self.layout);

        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[info.build()], None)
        }
        .map_err(|(_, result)| RenderError::vulkan("vkCreateComputePipelines", result))?;
        Ok(DeviceObject::owned(device, pipelines[0]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn complete_builder() -> GraphicsPipelineBuilder {
        GraphicsPipelineBuilder::new()
            .shaders(vk::ShaderModule::from_raw(1), vk::ShaderModule::from_raw(2))
            .layout(vk::PipelineLayout::from_raw(3))
            .color_format(vk::Format::R16G16B16A16_SFLOAT)
    }

    #[test]
    fn test_opaque_preset_disables_blending() {
        let state = BlendMode::None.attachment_state();
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_alpha_and_additive_presets() {
        let alpha = BlendMode::AlphaBlend.attachment_state();
        assert_eq!(alpha.blend_enable, vk::TRUE);
        assert_eq!(alpha.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);

        let additive = BlendMode::Additive.attachment_state();
        assert_eq!(additive.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(additive.dst_color_blend_factor, vk::BlendFactor::ONE);
    }

    #[test]
    fn test_vertex_attributes_cover_the_vertex() {
        let attributes = vertex_attributes();
        let offsets: Vec<u32> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24, 32, 44]);
        assert_eq!(vertex_binding().stride, 56);
        for (location, attribute) in attributes.iter().enumerate() {
            assert_eq!(attribute.location, location as u32);
        }
    }

    #[test]
    fn test_builder_requires_shaders_and_layout() {
        assert!(GraphicsPipelineBuilder::new().validate().is_err());
        assert!(complete_builder().validate().is_ok());
        assert!(complete_builder().layout(vk::PipelineLayout::null()).validate().is_err());
    }

    #[test]
    fn test_depth_test_requires_depth_format() {
        let builder = complete_builder().depth_test(true, vk::CompareOp::GREATER_OR_EQUAL);
        assert!(builder.validate().is_err());
        assert!(builder.depth_format(vk::Format::D32_SFLOAT).validate().is_ok());
    }
}
