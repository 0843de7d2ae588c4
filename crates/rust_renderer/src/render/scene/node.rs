//! Scene hierarchy stored in an arena
//!
//! Nodes live in a [`SlotMap`] and refer to each other by [`NodeKey`]. A
//! parent owns its children: removing a node removes its whole subtree. The
//! parent link is a plain key and never keeps anything alive.

use super::draw_context::DrawContext;
use super::material::MaterialInstance;
use super::mesh::MeshAsset;
use crate::error::{RenderError, RenderResult};
use nalgebra::Matrix4;
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

new_key_type! {
    /// Handle to a node in a [`SceneGraph`]
    pub struct NodeKey;
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
    local: Matrix4<f32>,
    world: Matrix4<f32>,
    mesh: Option<Arc<MeshAsset>>,
}

/// Transform hierarchy feeding the draw lists
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: SlotMap<NodeKey, Node>,
    roots: Vec<NodeKey>,
}

impl SceneGraph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node under `parent`, or as a root
    ///
    /// The world transform is valid immediately.
    pub fn add_node(
        &mut self,
        parent: Option<NodeKey>,
        local: Matrix4<f32>,
        mesh: Option<Arc<MeshAsset>>,
    ) -> RenderResult<NodeKey> {
        let parent_world = match parent {
            Some(key) => {
                self.nodes
                    .get(key)
                    .ok_or_else(|| RenderError::generic("parent node does not exist"))?
                    .world
            }
            None => Matrix4::identity(),
        };
        let key = self.nodes.insert(Node {
            parent,
            children: Vec::new(),
            local,
            world: parent_world * local,
            mesh,
        });
        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(parent_node) => parent_node.children.push(key),
            None => self.roots.push(key),
        }
        Ok(key)
    }

    /// Remove `key` and every descendant; returns how many nodes went away
    pub fn remove_subtree(&mut self, key: NodeKey) -> usize {
        let Some(parent) = self.nodes.get(key).map(|node| node.parent) else {
            return 0;
        };
        match parent.and_then(|p| self.nodes.get_mut(p)) {
            Some(parent_node) => parent_node.children.retain(|&child| child != key),
            None => self.roots.retain(|&root| root != key),
        }

        let mut removed = 0;
        let mut pending = vec![key];
        while let Some(current) = pending.pop() {
            if let Some(node) = self.nodes.remove(current) {
                pending.extend(node.children);
                removed += 1;
            }
        }
        removed
    }

    /// Replace a node's local transform; returns `false` for unknown keys
    ///
    /// World transforms are refreshed by [`SceneGraph::update_transforms`].
    pub fn set_local_transform(&mut self, key: NodeKey, local: Matrix4<f32>) -> bool {
        self.nodes.get_mut(key).map(|node| node.local = local).is_some()
    }

    /// Transform relative to the parent
    pub fn local_transform(&self, key: NodeKey) -> Option<Matrix4<f32>> {
        self.nodes.get(key).map(|node| node.local)
    }

    /// World transform as of the last update
    pub fn world_transform(&self, key: NodeKey) -> Option<Matrix4<f32>> {
        self.nodes.get(key).map(|node| node.world)
    }

    /// Parent of `key`; `None` for roots and removed nodes
    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes.get(key).and_then(|node| node.parent)
    }

    /// Direct children in insertion order
    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        match self.nodes.get(key) {
            Some(node) => &node.children,
            None => &[],
        }
    }

    /// Whether `key` is still alive
    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    /// Live node count
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Recompute every world transform top-down
    pub fn update_transforms(&mut self) {
        let mut pending: Vec<(NodeKey, Matrix4<f32>)> = self
            .roots
            .iter()
            .map(|&root| (root, Matrix4::identity()))
            .collect();
        while let Some((key, parent_world)) = pending.pop() {
            if let Some(node) = self.nodes.get_mut(key) {
                node.world = parent_world * node.local;
                let world = node.world;
                pending.extend(node.children.iter().map(|&child| (child, world)));
            }
        }
    }

    /// Append draws for every node carrying a mesh
    pub fn draw(&self, default_material: MaterialInstance, ctx: &mut DrawContext) {
        for node in self.nodes.values() {
            if let Some(mesh) = &node.mesh {
                mesh.draw(&node.world, default_material, ctx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::scene::material::{MaterialPass, MaterialPipeline};
    use crate::render::scene::mesh::{GeoSurface, GpuMeshBuffers};
    use approx::assert_relative_eq;
    use ash::vk::{self, Handle};
    use nalgebra::{Point3, Vector3};

    fn translation(x: f32, y: f32, z: f32) -> Matrix4<f32> {
        Matrix4::new_translation(&Vector3::new(x, y, z))
    }

    fn origin_of(m: &Matrix4<f32>) -> Point3<f32> {
        m.transform_point(&Point3::origin())
    }

    #[test]
    fn test_child_inherits_parent_transform() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node(None, translation(1.0, 0.0, 0.0), None).unwrap();
        let child = graph.add_node(Some(root), translation(0.0, 2.0, 0.0), None).unwrap();

        let p = origin_of(&graph.world_transform(child).unwrap());
        assert_relative_eq!(p, Point3::new(1.0, 2.0, 0.0));

        graph.set_local_transform(root, translation(5.0, 0.0, 0.0));
        graph.update_transforms();
        let p = origin_of(&graph.world_transform(child).unwrap());
        assert_relative_eq!(p, Point3::new(5.0, 2.0, 0.0));
    }

    #[test]
    fn test_removing_parent_removes_children_only_downwards() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node(None, Matrix4::identity(), None).unwrap();
        let mid = graph.add_node(Some(root), Matrix4::identity(), None).unwrap();
        let leaf = graph.add_node(Some(mid), Matrix4::identity(), None).unwrap();
        let sibling = graph.add_node(Some(root), Matrix4::identity(), None).unwrap();

        assert_eq!(graph.remove_subtree(mid), 2);
        assert!(!graph.contains(mid));
        assert!(!graph.contains(leaf));
        assert!(graph.contains(root));
        assert_eq!(graph.children(root), &[sibling]);
        assert_eq!(graph.parent(sibling), Some(root));

        // Removing a leaf never touches its parent.
        assert_eq!(graph.remove_subtree(sibling), 1);
        assert!(graph.contains(root));
        assert_eq!(graph.remove_subtree(sibling), 0);
    }

    #[test]
    fn test_unknown_parent_is_rejected() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node(None, Matrix4::identity(), None).unwrap();
        graph.remove_subtree(root);
        assert!(graph.add_node(Some(root), Matrix4::identity(), None).is_err());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_draw_uses_world_transforms() {
        let material = MaterialInstance {
            pipeline: MaterialPipeline {
                pipeline: vk::Pipeline::from_raw(1),
                layout: vk::PipelineLayout::from_raw(1),
            },
            set: vk::DescriptorSet::from_raw(1),
            pass: MaterialPass::Opaque,
        };
        let mesh = Arc::new(MeshAsset::new(
            "quad",
            GpuMeshBuffers::default(),
            vec![GeoSurface { start_index: 0, count: 6, material: None }],
        ));

        let mut graph = SceneGraph::new();
        let root = graph.add_node(None, translation(0.0, 0.0, -3.0), None).unwrap();
        graph.add_node(Some(root), translation(1.0, 0.0, 0.0), Some(Arc::clone(&mesh))).unwrap();
        graph.add_node(None, Matrix4::identity(), Some(mesh)).unwrap();

        let mut ctx = DrawContext::default();
        graph.draw(material, &mut ctx);
        assert_eq!(ctx.opaque.len(), 2);
        let mut origins: Vec<f32> = ctx.opaque.iter().map(|o| origin_of(&o.transform).z).collect();
        origins.sort_by(f32::total_cmp);
        assert_relative_eq!(origins[0], -3.0);
        assert_relative_eq!(origins[1], 0.0);
    }
}
