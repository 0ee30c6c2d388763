//! Minimal triangle mesh writer (§6.2).
//!
//! This module never inspects the node graph; it only turns a raw
//! triangle soup into a welded, indexed [`MeshDoc`] and resolves mesh
//! resource references by id. Everything that talks to the graph lives
//! in [`crate::import`] and [`crate::export`].

use std::collections::BTreeMap;
use std::fmt;

use crate::document::MeshDoc;

/// Vertices closer than this (per axis, after the build item's
/// transform) are welded into one. Matches the tolerance the reference
/// writer has always used for its own vertex cache.
pub const WELD_TOLERANCE: f32 = 1e-6;

/// The one fallible boundary this crate's mesh handling has: a build
/// item or level set naming a mesh resource id nothing supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshError {
    UnknownMesh(u32),
}

impl fmt::Display for MeshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshError::UnknownMesh(id) => write!(f, "no mesh resource with id {id}"),
        }
    }
}

impl std::error::Error for MeshError {}

/// Looks up `model_resource_id` in a resource table built from a
/// document's mesh list. The one place this crate queries mesh data by
/// key instead of walking it structurally.
pub fn resolve_mesh(
    meshes: &BTreeMap<u32, MeshDoc>,
    model_resource_id: u32,
) -> Result<&MeshDoc, MeshError> {
    meshes.get(&model_resource_id).ok_or(MeshError::UnknownMesh(model_resource_id))
}

fn quantize(component: f32, tolerance: f32) -> i64 {
    (component / tolerance).round() as i64
}

fn quantized_key(vertex: [f32; 3], tolerance: f32) -> (i64, i64, i64) {
    (
        quantize(vertex[0], tolerance),
        quantize(vertex[1], tolerance),
        quantize(vertex[2], tolerance),
    )
}

/// Welds a flat, unindexed triangle soup (3 vertices per triangle, not
/// yet deduplicated) into an indexed mesh. Vertices within
/// [`WELD_TOLERANCE`] of one another on every axis collapse to a single
/// entry; triangle winding is passed through unchanged since the caller
/// is the authority on outward-facing orientation.
pub fn weld_triangle_soup(positions: &[[f32; 3]]) -> MeshDoc {
    let mut vertices: Vec<[f32; 3]> = Vec::new();
    let mut index_of: BTreeMap<(i64, i64, i64), u32> = BTreeMap::new();
    let mut indices: Vec<u32> = Vec::with_capacity(positions.len());

    for &position in positions {
        let key = quantized_key(position, WELD_TOLERANCE);
        let index = *index_of.entry(key).or_insert_with(|| {
            vertices.push(position);
            (vertices.len() - 1) as u32
        });
        indices.push(index);
    }

    let triangles = indices
        .chunks_exact(3)
        .filter(|triangle| !is_degenerate(triangle, &vertices))
        .map(|triangle| [triangle[0], triangle[1], triangle[2]])
        .collect();

    MeshDoc { model_resource_id: 0, vertices, triangles }
}

fn is_degenerate(triangle: &[u32], vertices: &[[f32; 3]]) -> bool {
    triangle[0] == triangle[1] || triangle[1] == triangle[2] || triangle[0] == triangle[2]
        || {
            let a = vertices[triangle[0] as usize];
            let b = vertices[triangle[1] as usize];
            let c = vertices[triangle[2] as usize];
            let ab = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
            let ac = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
            let cross = [
                ab[1] * ac[2] - ab[2] * ac[1],
                ab[2] * ac[0] - ab[0] * ac[2],
                ab[0] * ac[1] - ab[1] * ac[0],
            ];
            let area2 = cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2];
            area2 < WELD_TOLERANCE * WELD_TOLERANCE
        }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle_soup() -> Vec<[f32; 3]> {
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            // Shares two vertices with the first triangle within tolerance.
            [1.0, 0.0, 0.0 + 1e-8],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0 - 1e-8],
        ]
    }

    #[test]
    fn nearly_coincident_vertices_weld_into_one_entry() {
        let mesh = weld_triangle_soup(&unit_triangle_soup());
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.triangles.len(), 2);
    }

    #[test]
    fn degenerate_triangles_are_dropped() {
        let soup = vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let mesh = weld_triangle_soup(&soup);
        assert!(mesh.triangles.is_empty());
    }

    #[test]
    fn resolve_mesh_reports_unknown_ids() {
        let meshes: BTreeMap<u32, MeshDoc> = BTreeMap::new();
        assert_eq!(resolve_mesh(&meshes, 7), Err(MeshError::UnknownMesh(7)));
    }
}
