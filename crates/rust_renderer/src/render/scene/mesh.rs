//! Meshes uploaded to GPU buffers

use super::draw_context::{DrawContext, RenderObject};
use super::material::MaterialInstance;
use crate::assets::MeshData;
use crate::error::{RenderError, RenderResult};
use crate::render::backends::vulkan::initialization::QueueKind;
use crate::render::backends::vulkan::resources::{
    BasicBuffer, MemoryLocation, Owned, UploadContext,
};
use ash::vk::{self, Handle};
use nalgebra::Matrix4;

/// Device-local vertex and index buffers of one mesh
#[derive(Debug, Default)]
pub struct GpuMeshBuffers {
    vertex_buffer: Owned<BasicBuffer>,
    index_buffer: Owned<BasicBuffer>,
}

impl GpuMeshBuffers {
    /// Stage `mesh` through a host-visible buffer and copy it on the transfer queue
    ///
    /// When the transfer and graphics families differ the destination buffers
    /// are shared concurrently, so no ownership transfer is recorded.
    pub fn upload(ctx: &UploadContext<'_>, mesh: &MeshData) -> RenderResult<Self> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(RenderError::asset("cannot upload an empty mesh", None));
        }

        let families = ctx.allocator.device().families();
        let sharing = [families.graphics, families.transfer];
        let vertex_bytes = mesh.vertex_bytes();
        let index_bytes = mesh.index_bytes();

        let vertex_buffer = BasicBuffer::new(
            ctx.allocator,
            vertex_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            &sharing,
        )?;
        let index_buffer = BasicBuffer::new(
            ctx.allocator,
            index_bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            &sharing,
        )?;

        let mut staged = Vec::with_capacity(vertex_bytes.len() + index_bytes.len());
        staged.extend_from_slice(vertex_bytes);
        staged.extend_from_slice(index_bytes);
        let staging = BasicBuffer::staging(ctx.allocator, &staged)?;

        let src = staging.try_get()?.handle();
        let vertex_dst = vertex_buffer.try_get()?.handle();
        let index_dst = index_buffer.try_get()?.handle();
        let vertex_size = vertex_bytes.len() as vk::DeviceSize;
        let index_size = index_bytes.len() as vk::DeviceSize;

        ctx.commands.immediate_submit(QueueKind::Transfer, |device, cmd| {
            unsafe {
                device.cmd_copy_buffer(
                    cmd,
                    src,
                    vertex_dst,
                    &[vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: vertex_size,
                    }],
                );
                device.cmd_copy_buffer(
                    cmd,
                    src,
                    index_dst,
                    &[vk::BufferCopy {
                        src_offset: vertex_size,
                        dst_offset: 0,
                        size: index_size,
                    }],
                );
            }
            Ok(())
        })?;

        log::debug!(
            "Uploaded mesh: {} vertices, {} indices",
            mesh.vertices.len(),
            mesh.indices.len()
        );
        Ok(Self {
            vertex_buffer,
            index_buffer,
        })
    }

    /// Vertex buffer handle, null when nothing was uploaded
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer
            .get()
            .map_or_else(|| vk::Buffer::from_raw(0), BasicBuffer::handle)
    }

    /// Index buffer handle, null when nothing was uploaded
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer
            .get()
            .map_or_else(|| vk::Buffer::from_raw(0), BasicBuffer::handle)
    }

    /// Give up both buffers, e.g. to retire them into a deletion queue
    pub fn into_parts(mut self) -> (Owned<BasicBuffer>, Owned<BasicBuffer>) {
        (self.vertex_buffer.take(), self.index_buffer.take())
    }
}

/// Index range drawn with one material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoSurface {
    /// First index in the mesh's index buffer
    pub start_index: u32,
    /// Number of indices drawn
    pub count: u32,
    /// Falls back to the renderer's default material when `None`
    pub material: Option<MaterialInstance>,
}

/// A named mesh and its surfaces
#[derive(Debug)]
pub struct MeshAsset {
    /// Human-readable mesh name
    pub name: String,
    /// Index ranges sharing `buffers`
    pub surfaces: Vec<GeoSurface>,
    /// Device-local vertex and index data
    pub buffers: GpuMeshBuffers,
}

impl MeshAsset {
    pub fn new(name: impl Into<String>, buffers: GpuMeshBuffers, surfaces: Vec<GeoSurface>) -> Self {
        Self {
            name: name.into(),
            surfaces,
            buffers,
        }
    }

    /// One surface covering `index_count` indices
    pub fn single_surface(
        name: impl Into<String>,
        buffers: GpuMeshBuffers,
        index_count: u32,
        material: Option<MaterialInstance>,
    ) -> Self {
        Self::new(
            name,
            buffers,
            vec![GeoSurface {
                start_index: 0,
                count: index_count,
                material,
            }],
        )
    }

    /// Append one draw per surface at `transform`
    pub fn draw(&self, transform: &Matrix4<f32>, default_material: MaterialInstance, ctx: &mut DrawContext) {
        for surface in &self.surfaces {
            ctx.push(RenderObject {
                index_count: surface.count,
                first_index: surface.start_index,
                index_buffer: self.buffers.index_buffer(),
                vertex_buffer: self.buffers.vertex_buffer(),
                material: surface.material.unwrap_or(default_material),
                transform: *transform,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::scene::material::{MaterialPass, MaterialPipeline};

    pub(crate) fn material(pass: MaterialPass, raw: u64) -> MaterialInstance {
        MaterialInstance {
            pipeline: MaterialPipeline {
                pipeline: vk::Pipeline::from_raw(raw),
                layout: vk::PipelineLayout::from_raw(raw),
            },
            set: vk::DescriptorSet::from_raw(raw),
            pass,
        }
    }

    #[test]
    fn test_empty_buffers_report_null_handles() {
        let buffers = GpuMeshBuffers::default();
        assert_eq!(buffers.vertex_buffer(), vk::Buffer::null());
        assert_eq!(buffers.index_buffer(), vk::Buffer::null());
    }

    #[test]
    fn test_draw_emits_one_object_per_surface() {
        let transparent = material(MaterialPass::Transparent, 9);
        let mesh = MeshAsset::new(
            "two-part",
            GpuMeshBuffers::default(),
            vec![
                GeoSurface { start_index: 0, count: 6, material: None },
                GeoSurface { start_index: 6, count: 3, material: Some(transparent) },
            ],
        );
        let mut ctx = DrawContext::default();
        let transform = Matrix4::new_scaling(2.0);
        mesh.draw(&transform, material(MaterialPass::Opaque, 1), &mut ctx);

        assert_eq!(ctx.opaque.len(), 1);
        assert_eq!(ctx.transparent.len(), 1);
        assert_eq!(ctx.opaque[0].index_count, 6);
        assert_eq!(ctx.transparent[0].first_index, 6);
        assert_eq!(ctx.transparent[0].material, transparent);
        assert_eq!(ctx.opaque[0].transform, transform);
    }
}
