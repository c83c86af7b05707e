//! Triangle mesh data structure and surface operations.
//!
//! Both reconstruction strategies terminate here: the fusion path
//! polygonizes its voxel field directly, the stereo path goes through
//! oriented-point reconstruction. Either way the mesh then passes through
//! the same postprocessing stages.

use nalgebra::{Point3, Vector3};

pub mod polygonize;
pub mod processing;
pub mod reconstruction;

pub use polygonize::polygonize_cells;
pub use reconstruction::reconstruct_oriented_points;

/// Indexed triangle surface with optional per-vertex normals and colors.
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3<f32>>,
    pub faces: Vec<[usize; 3]>,
    pub normals: Option<Vec<Vector3<f32>>>,
    pub colors: Option<Vec<[u8; 3]>>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertices_and_faces(vertices: Vec<Point3<f32>>, faces: Vec<[usize; 3]>) -> Self {
        Self {
            vertices,
            faces,
            normals: None,
            colors: None,
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Every face index in range, and optional attributes index-aligned.
    pub fn indices_valid(&self) -> bool {
        let n = self.vertices.len();
        self.faces.iter().all(|f| f.iter().all(|&i| i < n))
            && self.normals.as_ref().map_or(true, |v| v.len() == n)
            && self.colors.as_ref().map_or(true, |v| v.len() == n)
    }

    pub fn compute_face_normals(&self) -> Vec<Vector3<f32>> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let v1 = self.vertices[face[1]];
                let v2 = self.vertices[face[2]];
                (v1 - v0).cross(&(v2 - v0)).normalize()
            })
            .collect()
    }

    /// Per-vertex normals by averaging adjacent face normals.
    pub fn compute_vertex_normals(&mut self) {
        let mut vertex_normals = vec![Vector3::zeros(); self.vertices.len()];
        let face_normals = self.compute_face_normals();

        for (face, normal) in self.faces.iter().zip(face_normals) {
            for &vi in face {
                vertex_normals[vi] += normal;
            }
        }
        for normal in vertex_normals.iter_mut() {
            let len = normal.norm();
            if len > 1e-12 {
                *normal /= len;
            }
        }

        self.normals = Some(vertex_normals);
    }

    pub fn bounds(&self) -> (Point3<f32>, Point3<f32>) {
        if self.vertices.is_empty() {
            return (Point3::origin(), Point3::origin());
        }
        let mut min = self.vertices[0];
        let mut max = self.vertices[0];
        for v in &self.vertices {
            min.x = min.x.min(v.x);
            min.y = min.y.min(v.y);
            min.z = min.z.min(v.z);
            max.x = max.x.max(v.x);
            max.y = max.y.max(v.y);
            max.z = max.z.max(v.z);
        }
        (min, max)
    }

    pub fn surface_area(&self) -> f32 {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let v1 = self.vertices[face[1]];
                let v2 = self.vertices[face[2]];
                (v1 - v0).cross(&(v2 - v0)).norm() * 0.5
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> TriangleMesh {
        TriangleMesh::with_vertices_and_faces(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn area_and_normals() {
        let mut mesh = unit_triangle();
        assert!((mesh.surface_area() - 0.5).abs() < 1e-6);

        let face_normals = mesh.compute_face_normals();
        assert!((face_normals[0].z - 1.0).abs() < 1e-6);

        mesh.compute_vertex_normals();
        assert!((mesh.normals.as_ref().unwrap()[0].z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn index_validation_catches_out_of_range() {
        let mut mesh = unit_triangle();
        assert!(mesh.indices_valid());
        mesh.faces.push([0, 1, 9]);
        assert!(!mesh.indices_valid());
    }

    #[test]
    fn empty_mesh_is_valid() {
        let mesh = TriangleMesh::new();
        assert!(mesh.is_empty());
        assert!(mesh.indices_valid());
    }
}
