//! Flattened draw lists handed to the renderer each frame

use super::material::{MaterialInstance, MaterialPass};
use ash::vk::{self, Handle};
use bytemuck::{Pod, Zeroable};
use nalgebra::{Matrix4, Vector3, Vector4};

/// Per-frame scene uniform bound at set 0, binding 0
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneData {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// View to clip, reversed-Z
    pub proj: [[f32; 4]; 4],
    /// `proj * view`
    pub viewproj: [[f32; 4]; 4],
    /// Ambient light color
    pub ambient_color: [f32; 4],
    /// Direction towards the sun in `xyz`, intensity in `w`
    pub sunlight_direction: [f32; 4],
    /// Sun color
    pub sunlight_color: [f32; 4],
}

impl Default for SceneData {
    fn default() -> Self {
        Self::new(&Matrix4::identity(), &Matrix4::identity())
    }
}

impl SceneData {
    /// Camera matrices with the default lighting
    #[must_use]
    pub fn new(view: &Matrix4<f32>, proj: &Matrix4<f32>) -> Self {
        Self {
            view: (*view).into(),
            proj: (*proj).into(),
            viewproj: (proj * view).into(),
            ambient_color: [0.1, 0.1, 0.1, 1.0],
            sunlight_direction: [0.0, 1.0, 0.5, 1.0],
            sunlight_color: [1.0, 1.0, 1.0, 1.0],
        }
    }

    /// Replace the lighting terms
    #[must_use]
    pub fn with_lighting(
        mut self,
        ambient: Vector4<f32>,
        sun_direction: Vector3<f32>,
        sun_intensity: f32,
        sun_color: Vector4<f32>,
    ) -> Self {
        let direction = sun_direction.try_normalize(f32::EPSILON).unwrap_or_else(|| Vector3::y());
        self.ambient_color = ambient.into();
        self.sunlight_direction = [direction.x, direction.y, direction.z, sun_intensity];
        self.sunlight_color = sun_color.into();
        self
    }
}

/// Push constants of the mesh pipelines
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DrawPushConstants {
    /// Object to world
    pub world_matrix: [[f32; 4]; 4],
}

/// One indexed draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderObject {
    /// Indices to draw
    pub index_count: u32,
    /// First index within the index buffer
    pub first_index: u32,
    /// `u32` index buffer
    pub index_buffer: vk::Buffer,
    /// Interleaved vertex buffer
    pub vertex_buffer: vk::Buffer,
    /// Pipeline and material descriptor set
    pub material: MaterialInstance,
    /// Object to world
    pub transform: Matrix4<f32>,
}

impl RenderObject {
    /// Push constant block for this draw
    #[must_use]
    pub fn push_constants(&self) -> DrawPushConstants {
        DrawPushConstants {
            world_matrix: self.transform.into(),
        }
    }

    fn sort_key(&self) -> (u64, u64, u64) {
        (
            self.material.pipeline.pipeline.as_raw(),
            self.material.set.as_raw(),
            self.index_buffer.as_raw(),
        )
    }
}

/// Everything to draw in one frame
#[derive(Debug, Clone, Default)]
pub struct DrawContext {
    /// Drawn first, depth-written
    pub opaque: Vec<RenderObject>,
    /// Drawn after the opaque list, blended
    pub transparent: Vec<RenderObject>,
    /// Camera and lighting
    pub scene: SceneData,
}

impl DrawContext {
    /// Empty lists with the given scene uniform
    #[must_use]
    pub fn new(scene: SceneData) -> Self {
        Self {
            scene,
            ..Self::default()
        }
    }

    /// Route `object` by its material's pass
    ///
    /// [`MaterialPass::Other`] draws with the opaque list.
    pub fn push(&mut self, object: RenderObject) {
        match object.material.pass {
            MaterialPass::Transparent => self.transparent.push(object),
            MaterialPass::Opaque | MaterialPass::Other => self.opaque.push(object),
        }
    }

    /// Drop all draws, keeping the scene uniform
    pub fn clear(&mut self) {
        self.opaque.clear();
        self.transparent.clear();
    }

    pub fn draw_count(&self) -> usize {
        self.opaque.len() + self.transparent.len()
    }

    /// Triangles across both lists
    pub fn triangle_count(&self) -> u64 {
        self.opaque
            .iter()
            .chain(&self.transparent)
            .map(|object| u64::from(object.index_count / 3))
            .sum()
    }

    /// Indices into [`DrawContext::opaque`] grouped by pipeline, material set, then index buffer
    pub fn opaque_draw_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.opaque.len()).collect();
        order.sort_by_key(|&i| self.opaque[i].sort_key());
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::scene::material::MaterialPipeline;
    use approx::assert_relative_eq;
    use std::mem::size_of;

    fn object(pipeline: u64, set: u64, index_buffer: u64, pass: MaterialPass) -> RenderObject {
        RenderObject {
            index_count: 6,
            first_index: 0,
            index_buffer: vk::Buffer::from_raw(index_buffer),
            vertex_buffer: vk::Buffer::from_raw(100),
            material: MaterialInstance {
                pipeline: MaterialPipeline {
                    pipeline: vk::Pipeline::from_raw(pipeline),
                    layout: vk::PipelineLayout::from_raw(1),
                },
                set: vk::DescriptorSet::from_raw(set),
                pass,
            },
            transform: Matrix4::identity(),
        }
    }

    #[test]
    fn test_scene_data_matches_uniform_layout() {
        assert_eq!(size_of::<SceneData>(), 240);
        assert_eq!(size_of::<DrawPushConstants>(), 64);
    }

    #[test]
    fn test_viewproj_is_proj_times_view() {
        let view = Matrix4::new_translation(&Vector3::new(0.0, 0.0, -5.0));
        let proj = Matrix4::new_nonuniform_scaling(&Vector3::new(2.0, 3.0, 1.0));
        let scene = SceneData::new(&view, &proj);
        let expected: [[f32; 4]; 4] = (proj * view).into();
        for (column, expected_column) in scene.viewproj.iter().zip(expected.iter()) {
            for (value, expected_value) in column.iter().zip(expected_column) {
                assert_relative_eq!(value, expected_value);
            }
        }
        // Column-major: translation lives in the last column.
        assert_relative_eq!(scene.view[3][2], -5.0);
    }

    #[test]
    fn test_sun_direction_is_normalized() {
        let scene = SceneData::default().with_lighting(
            Vector4::new(0.2, 0.2, 0.2, 1.0),
            Vector3::new(0.0, 3.0, 4.0),
            2.0,
            Vector4::new(1.0, 0.9, 0.8, 1.0),
        );
        assert_relative_eq!(scene.sunlight_direction[1], 0.6);
        assert_relative_eq!(scene.sunlight_direction[2], 0.8);
        assert_relative_eq!(scene.sunlight_direction[3], 2.0);
    }

    #[test]
    fn test_push_routes_by_pass() {
        let mut ctx = DrawContext::default();
        ctx.push(object(1, 1, 1, MaterialPass::Opaque));
        ctx.push(object(2, 1, 1, MaterialPass::Transparent));
        ctx.push(object(3, 1, 1, MaterialPass::Other));
        assert_eq!(ctx.opaque.len(), 2);
        assert_eq!(ctx.transparent.len(), 1);
        assert_eq!(ctx.draw_count(), 3);
        assert_eq!(ctx.triangle_count(), 6);

        ctx.clear();
        assert_eq!(ctx.draw_count(), 0);
    }

    #[test]
    fn test_opaque_order_groups_material_then_index_buffer() {
        let mut ctx = DrawContext::default();
        ctx.push(object(2, 5, 9, MaterialPass::Opaque));
        ctx.push(object(1, 5, 8, MaterialPass::Opaque));
        ctx.push(object(2, 5, 3, MaterialPass::Opaque));
        ctx.push(object(1, 5, 2, MaterialPass::Opaque));

        assert_eq!(ctx.opaque_draw_order(), vec![3, 1, 2, 0]);
    }
}
