//! Scene description consumed by the renderer: draw lists, meshes, materials
//! and the node hierarchy

pub mod draw_context;
pub mod material;
pub mod mesh;
pub mod node;

pub use draw_context::{DrawContext, DrawPushConstants, RenderObject, SceneData};
pub use material::{
    MaterialConstants, MaterialInstance, MaterialPass, MaterialPipeline, MaterialResources,
    MetallicRoughness,
};
pub use mesh::{GeoSurface, GpuMeshBuffers, MeshAsset};
pub use node::{NodeKey, SceneGraph};
