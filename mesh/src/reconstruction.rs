//! Surface reconstruction from an oriented point set.
//!
//! The stereo path's fused point cloud lands here. Each point splats a
//! truncated signed distance along its normal into a sparse lattice
//! (weighted by distance from the sample), and the shared polygonizer
//! extracts the zero crossing. Structurally this mirrors the fusion
//! volume's field, but it is built from points rather than depth rays.

use std::collections::HashMap;

use nalgebra::Point3;
use tracing::debug;

use roomscan_core::PointCloud;

use crate::polygonize::{polygonize_cells, VoxelCoord};
use crate::TriangleMesh;

/// Reconstruct a triangle mesh from an oriented (optionally colored) point
/// cloud. `voxel_size` sets the lattice resolution and `truncation` the
/// splat radius along each normal. Points without normals cannot sign the
/// field and make the cloud unusable.
pub fn reconstruct_oriented_points(
    cloud: &PointCloud,
    voxel_size: f32,
    truncation: f32,
) -> roomscan_core::Result<TriangleMesh> {
    let normals = cloud.normals.as_ref().ok_or_else(|| {
        roomscan_core::Error::DataIntegrity("point cloud carries no normals".into())
    })?;

    if cloud.is_empty() {
        return Ok(TriangleMesh::new());
    }

    // weighted signed distance + weight + color accumulator per lattice point
    let mut field: HashMap<VoxelCoord, (f32, f32)> = HashMap::new();
    let mut colors: HashMap<VoxelCoord, ([f32; 3], f32)> = HashMap::new();
    let reach = (truncation / voxel_size).ceil() as i32;

    for (i, (point, normal)) in cloud.points.iter().zip(normals).enumerate() {
        let base = (
            (point.x / voxel_size).floor() as i32,
            (point.y / voxel_size).floor() as i32,
            (point.z / voxel_size).floor() as i32,
        );
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let coord = (base.0 + dx, base.1 + dy, base.2 + dz);
                    let lattice = Point3::new(
                        coord.0 as f32 * voxel_size,
                        coord.1 as f32 * voxel_size,
                        coord.2 as f32 * voxel_size,
                    );
                    let offset = lattice - point;
                    if offset.norm() > truncation {
                        continue;
                    }
                    // Signed distance along the surface normal; weight falls
                    // off with lateral distance from the sample.
                    let sdf = offset.dot(normal).clamp(-truncation, truncation);
                    let weight = 1.0 - (offset.norm() / truncation).min(1.0) * 0.5;

                    let entry = field.entry(coord).or_insert((0.0, 0.0));
                    entry.0 = (entry.0 * entry.1 + sdf * weight) / (entry.1 + weight);
                    entry.1 += weight;

                    if let Some(point_colors) = &cloud.colors {
                        let c = point_colors[i];
                        let slot = colors.entry(coord).or_insert(([0.0; 3], 0.0));
                        for ch in 0..3 {
                            slot.0[ch] =
                                (slot.0[ch] * slot.1 + c[ch] as f32 * weight) / (slot.1 + weight);
                        }
                        slot.1 += weight;
                    }
                }
            }
        }
    }

    // Candidate cells: every populated lattice point anchors one cell.
    let cells: Vec<VoxelCoord> = field.keys().copied().collect();
    debug!(points = cloud.len(), lattice = field.len(), "field splatted");

    let mut mesh = polygonize_cells(|c| field.get(&c).map(|&(sdf, _)| sdf), cells, voxel_size);

    if cloud.colors.is_some() && !mesh.vertices.is_empty() {
        let vertex_colors = mesh
            .vertices
            .iter()
            .map(|v| {
                let coord = (
                    (v.x / voxel_size).round() as i32,
                    (v.y / voxel_size).round() as i32,
                    (v.z / voxel_size).round() as i32,
                );
                colors
                    .get(&coord)
                    .map(|&(c, _)| [c[0] as u8, c[1] as u8, c[2] as u8])
                    .unwrap_or([128, 128, 128])
            })
            .collect();
        mesh.colors = Some(vertex_colors);
    }

    mesh.compute_vertex_normals();
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn plane_cloud(n: usize, z: f32) -> PointCloud {
        let mut points = Vec::new();
        let mut normals = Vec::new();
        for y in 0..n {
            for x in 0..n {
                points.push(Point3::new(x as f32 * 0.02, y as f32 * 0.02, z));
                normals.push(Vector3::z());
            }
        }
        PointCloud::new(points).with_normals(normals).unwrap()
    }

    #[test]
    fn plane_cloud_reconstructs_near_plane() {
        let cloud = plane_cloud(20, 0.5);
        let mesh = reconstruct_oriented_points(&cloud, 0.02, 0.06).unwrap();

        assert!(!mesh.is_empty());
        assert!(mesh.indices_valid());
        for v in &mesh.vertices {
            assert!((v.z - 0.5).abs() < 0.04, "vertex far from plane: {v:?}");
        }
    }

    #[test]
    fn cloud_without_normals_is_rejected() {
        let cloud = PointCloud::new(vec![Point3::origin()]);
        assert!(reconstruct_oriented_points(&cloud, 0.02, 0.06).is_err());
    }

    #[test]
    fn empty_cloud_gives_empty_mesh() {
        let cloud = PointCloud::default().with_normals(vec![]).unwrap();
        let mesh = reconstruct_oriented_points(&cloud, 0.02, 0.06).unwrap();
        assert!(mesh.is_empty());
    }

    #[test]
    fn colors_carry_to_vertices() {
        let mut cloud = plane_cloud(10, 0.2);
        let n = cloud.len();
        cloud = cloud.with_colors(vec![[200, 10, 10]; n]).unwrap();
        let mesh = reconstruct_oriented_points(&cloud, 0.02, 0.06).unwrap();
        let colors = mesh.colors.as_ref().expect("vertex colors");
        assert_eq!(colors.len(), mesh.num_vertices());
        assert!(colors.iter().any(|c| c[0] > 150));
    }
}
