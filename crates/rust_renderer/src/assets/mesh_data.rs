//! Interleaved vertex data built from flat attribute spans

use crate::error::{RenderError, RenderResult};
use bytemuck::{Pod, Zeroable};

/// Vertex layout consumed by the mesh pipeline
///
/// Matches the `layout(location = N)` inputs of `mesh.vert`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
    /// Tangent, for normal mapping
    pub tangent: [f32; 3],
    /// Bitangent, for normal mapping
    pub bitangent: [f32; 3],
}

impl Vertex {
    /// Vertex with only a position; other attributes zeroed
    #[must_use]
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }
}

/// Vertex and index arrays for one mesh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    /// Interleaved vertices
    pub vertices: Vec<Vertex>,
    /// Triangle list indices
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Interleave flat attribute spans into [`Vertex`] records
    ///
    /// `positions` decides the vertex count. Every other span is either empty,
    /// in which case the attribute is zero, or holds exactly one entry per
    /// vertex. Indices must form whole triangles referencing existing vertices.
    pub fn from_spans(
        positions: &[f32],
        normals: &[f32],
        uvs: &[f32],
        tangents: &[f32],
        bitangents: &[f32],
        indices: &[u32],
    ) -> RenderResult<Self> {
        if positions.len() % 3 != 0 {
            return Err(RenderError::asset(
                format!("position span length {} is not a multiple of 3", positions.len()),
                None,
            ));
        }
        let count = positions.len() / 3;

        check_span("normal", normals, count, 3)?;
        check_span("uv", uvs, count, 2)?;
        check_span("tangent", tangents, count, 3)?;
        check_span("bitangent", bitangents, count, 3)?;

        if indices.len() % 3 != 0 {
            return Err(RenderError::asset(
                format!("index count {} does not form whole triangles", indices.len()),
                None,
            ));
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= count) {
            return Err(RenderError::asset(
                format!("index {bad} out of range for {count} vertices"),
                None,
            ));
        }

        let vertices = (0..count)
            .map(|i| Vertex {
                position: vec3(positions, i),
                normal: if normals.is_empty() { [0.0; 3] } else { vec3(normals, i) },
                uv: if uvs.is_empty() { [0.0; 2] } else { [uvs[i * 2], uvs[i * 2 + 1]] },
                tangent: if tangents.is_empty() { [0.0; 3] } else { vec3(tangents, i) },
                bitangent: if bitangents.is_empty() { [0.0; 3] } else { vec3(bitangents, i) },
            })
            .collect();

        Ok(Self {
            vertices,
            indices: indices.to_vec(),
        })
    }

    /// Number of triangles
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Vertex data as bytes for upload
    #[must_use]
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as bytes for upload
    #[must_use]
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

fn check_span(name: &str, span: &[f32], count: usize, width: usize) -> RenderResult<()> {
    if span.is_empty() || span.len() == count * width {
        Ok(())
    } else {
        Err(RenderError::asset(
            format!(
                "{name} span has {} floats, expected {} for {count} vertices",
                span.len(),
                count * width
            ),
            None,
        ))
    }
}

fn vec3(span: &[f32], i: usize) -> [f32; 3] {
    [span[i * 3], span[i * 3 + 1], span[i * 3 + 2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    #[test]
    fn test_vertex_is_tightly_packed() {
        assert_eq!(std::mem::size_of::<Vertex>(), 14 * 4);
    }

    #[test]
    fn test_interleaves_attributes() {
        let normals: Vec<f32> = [0.0, 0.0, 1.0].repeat(3);
        let uvs: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let mesh = MeshData::from_spans(&TRIANGLE, &normals, &uvs, &[], &[], &[0, 1, 2]).unwrap();

        assert_eq!(mesh.vertices.len(), 3);
        assert_eq!(mesh.vertices[1].position, [1.0, 0.0, 0.0]);
        assert_eq!(mesh.vertices[2].uv, [0.0, 1.0]);
        assert_eq!(mesh.vertices[0].normal, [0.0, 0.0, 1.0]);
        assert_eq!(mesh.vertices[0].tangent, [0.0; 3]);
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.vertex_bytes().len(), 3 * std::mem::size_of::<Vertex>());
    }

    #[test]
    fn test_rejects_mismatched_span() {
        let err = MeshData::from_spans(&TRIANGLE, &[0.0; 6], &[], &[], &[], &[0, 1, 2]);
        assert!(err.is_err());
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        assert!(MeshData::from_spans(&TRIANGLE, &[], &[], &[], &[], &[0, 1, 3]).is_err());
        assert!(MeshData::from_spans(&TRIANGLE, &[], &[], &[], &[], &[0, 1]).is_err());
    }
}
