//! Mesh postprocessing.
//!
//! Fixed stage order for the pipeline: statistical outlier removal,
//! Laplacian smoothing, optional Loop subdivision, then vertex-clustering
//! simplification down to a triangle budget. Every stage leaves the mesh
//! internally consistent (no out-of-range indices, attributes aligned).

use std::collections::{HashMap, HashSet};

use nalgebra::Point3;
use tracing::debug;

use crate::TriangleMesh;

/// Remove vertices whose mean distance to their `k` nearest neighbors
/// exceeds `mean + std_ratio * stddev` over the whole mesh. Faces touching a
/// removed vertex go with it. Returns the number of removed vertices.
pub fn remove_statistical_outliers(mesh: &mut TriangleMesh, k: usize, std_ratio: f32) -> usize {
    let n = mesh.vertices.len();
    if n < 4 || k == 0 || std_ratio <= 0.0 {
        return 0;
    }

    let (min, max) = mesh.bounds();
    let extent = (max - min).norm().max(1e-6);
    let cell = extent / (n as f32).cbrt().max(1.0);
    let grid = SpatialHash::new(&mesh.vertices, cell);

    let mean_dists: Vec<f32> = (0..n)
        .map(|i| grid.mean_knn_distance(&mesh.vertices, i, k))
        .collect();

    let mean = mean_dists.iter().sum::<f32>() / n as f32;
    let var = mean_dists.iter().map(|d| (d - mean).powi(2)).sum::<f32>() / n as f32;
    let threshold = mean + std_ratio * var.sqrt();

    let keep: Vec<bool> = mean_dists.iter().map(|&d| d <= threshold).collect();
    let removed = keep.iter().filter(|&&k| !k).count();
    if removed > 0 {
        retain_vertices(mesh, &keep);
        debug!(removed, "outlier vertices removed");
    }
    removed
}

/// Laplacian smoothing: each iteration moves every vertex toward the average
/// of its edge neighbors by `lambda`. Excessive iteration erases real detail
/// rather than noise, so the pipeline keeps the count small.
pub fn laplacian_smooth(mesh: &mut TriangleMesh, iterations: usize, lambda: f32) {
    if mesh.vertices.is_empty() || iterations == 0 {
        return;
    }

    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertices.len()];
    for face in &mesh.faces {
        for i in 0..3 {
            let v0 = face[i];
            let v1 = face[(i + 1) % 3];
            neighbors[v0].push(v1);
            neighbors[v1].push(v0);
        }
    }

    for _ in 0..iterations {
        let mut new_positions = mesh.vertices.clone();
        for (i, vertex) in new_positions.iter_mut().enumerate() {
            if neighbors[i].is_empty() {
                continue;
            }
            let mut centroid = Point3::origin();
            for &ni in &neighbors[i] {
                centroid += mesh.vertices[ni].coords;
            }
            centroid /= neighbors[i].len() as f32;
            *vertex = mesh.vertices[i] + (centroid - mesh.vertices[i]) * lambda;
        }
        mesh.vertices = new_positions;
    }

    mesh.compute_vertex_normals();
}

/// One round of Loop subdivision: every triangle becomes four, new edge
/// vertices placed by the Loop stencil. Only worthwhile on already-smooth
/// input; subdividing noise amplifies it, so the caller gates this on the
/// measured noise level.
pub fn loop_subdivision(mesh: &mut TriangleMesh) {
    if mesh.is_empty() {
        return;
    }
    let num_vertices = mesh.vertices.len();

    // Edge -> adjacent face opposite-vertices, one pass.
    let mut edge_opposites: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for face in &mesh.faces {
        for i in 0..3 {
            let v0 = face[i];
            let v1 = face[(i + 1) % 3];
            let v2 = face[(i + 2) % 3];
            edge_opposites
                .entry((v0.min(v1), v0.max(v1)))
                .or_default()
                .push(v2);
        }
    }

    let mut new_vertices = mesh.vertices.clone();
    let mut new_colors = mesh.colors.clone();
    let mut edge_vertices: HashMap<(usize, usize), usize> = HashMap::new();

    for (&(v0, v1), opposites) in &edge_opposites {
        let p0 = mesh.vertices[v0];
        let p1 = mesh.vertices[v1];
        let pos = if opposites.len() == 2 {
            let o0 = mesh.vertices[opposites[0]];
            let o1 = mesh.vertices[opposites[1]];
            Point3::from((p0.coords + p1.coords) * 0.375 + (o0.coords + o1.coords) * 0.125)
        } else {
            // Boundary edge: plain midpoint.
            Point3::from((p0.coords + p1.coords) * 0.5)
        };

        let idx = new_vertices.len();
        new_vertices.push(pos);
        if let Some(colors) = new_colors.as_mut() {
            let c0 = colors[v0];
            let c1 = colors[v1];
            colors.push([
                ((c0[0] as u16 + c1[0] as u16) / 2) as u8,
                ((c0[1] as u16 + c1[1] as u16) / 2) as u8,
                ((c0[2] as u16 + c1[2] as u16) / 2) as u8,
            ]);
        }
        edge_vertices.insert((v0, v1), idx);
    }

    // Reposition original vertices with the Loop vertex stencil.
    let mut vertex_neighbors: Vec<HashSet<usize>> = vec![HashSet::new(); num_vertices];
    for &(v0, v1) in edge_opposites.keys() {
        vertex_neighbors[v0].insert(v1);
        vertex_neighbors[v1].insert(v0);
    }
    for i in 0..num_vertices {
        let ring = &vertex_neighbors[i];
        if ring.is_empty() {
            continue;
        }
        let n = ring.len() as f32;
        let beta = if ring.len() > 3 {
            3.0 / (8.0 * n)
        } else {
            3.0 / 16.0
        };
        let mut pos = mesh.vertices[i].coords * (1.0 - n * beta);
        for &ni in ring {
            pos += mesh.vertices[ni].coords * beta;
        }
        new_vertices[i] = Point3::from(pos);
    }

    let mut new_faces = Vec::with_capacity(mesh.faces.len() * 4);
    for face in &mesh.faces {
        let [v0, v1, v2] = *face;
        let e01 = edge_vertices[&(v0.min(v1), v0.max(v1))];
        let e12 = edge_vertices[&(v1.min(v2), v1.max(v2))];
        let e20 = edge_vertices[&(v2.min(v0), v2.max(v0))];
        new_faces.push([v0, e01, e20]);
        new_faces.push([v1, e12, e01]);
        new_faces.push([v2, e20, e12]);
        new_faces.push([e01, e12, e20]);
    }

    mesh.vertices = new_vertices;
    mesh.faces = new_faces;
    mesh.colors = new_colors;
    mesh.compute_vertex_normals();
}

/// Simplify by uniform vertex clustering, growing the cluster cell until the
/// triangle count fits `target_triangles`. Clustering keeps boundary and
/// large-scale shape over raw density, which is the trade the pipeline
/// wants for its budget.
pub fn simplify_to_budget(mesh: &mut TriangleMesh, target_triangles: usize) {
    if mesh.faces.len() <= target_triangles || target_triangles == 0 {
        if target_triangles == 0 {
            mesh.faces.clear();
            retain_vertices(mesh, &vec![false; mesh.vertices.len()]);
        }
        return;
    }

    let (min, max) = mesh.bounds();
    let extent = (max - min).norm().max(1e-6);
    // Start near the scale that would yield the budget if the surface were a
    // uniformly sampled sheet, then grow until it actually fits.
    let mut cell = extent / (target_triangles as f32).sqrt().max(1.0);
    let original = mesh.clone();

    for _ in 0..32 {
        let mut candidate = original.clone();
        cluster_vertices(&mut candidate, min, cell);
        drop_unreferenced_vertices(&mut candidate);
        if candidate.faces.len() <= target_triangles
            && candidate.vertices.len() <= target_triangles
        {
            debug!(
                faces = candidate.faces.len(),
                cell, "simplification converged"
            );
            *mesh = candidate;
            mesh.compute_vertex_normals();
            return;
        }
        cell *= 1.5;
    }

    // Cell growth is geometric, so this is unreachable for any finite mesh;
    // collapse to nothing rather than exceed the budget.
    mesh.faces.clear();
    retain_vertices(mesh, &vec![false; mesh.vertices.len()]);
}

fn cluster_vertices(mesh: &mut TriangleMesh, origin: Point3<f32>, cell: f32) {
    let mut cluster_of: HashMap<(i32, i32, i32), usize> = HashMap::new();
    let mut remap = vec![0usize; mesh.vertices.len()];
    let mut sums: Vec<(Point3<f32>, usize)> = Vec::new();
    let mut rep_colors: Vec<[u8; 3]> = Vec::new();

    for (i, v) in mesh.vertices.iter().enumerate() {
        let key = (
            ((v.x - origin.x) / cell).floor() as i32,
            ((v.y - origin.y) / cell).floor() as i32,
            ((v.z - origin.z) / cell).floor() as i32,
        );
        let idx = *cluster_of.entry(key).or_insert_with(|| {
            sums.push((Point3::origin(), 0));
            if let Some(colors) = &mesh.colors {
                rep_colors.push(colors[i]);
            }
            sums.len() - 1
        });
        sums[idx].0 += v.coords;
        sums[idx].1 += 1;
        remap[i] = idx;
    }

    let new_vertices: Vec<Point3<f32>> = sums
        .into_iter()
        .map(|(sum, count)| Point3::from(sum.coords / count as f32))
        .collect();

    let mut new_faces = Vec::new();
    let mut seen = HashSet::new();
    for face in &mesh.faces {
        let f = [remap[face[0]], remap[face[1]], remap[face[2]]];
        if f[0] == f[1] || f[1] == f[2] || f[2] == f[0] {
            continue;
        }
        let mut key = f;
        key.sort_unstable();
        if seen.insert(key) {
            new_faces.push(f);
        }
    }

    mesh.vertices = new_vertices;
    mesh.faces = new_faces;
    mesh.colors = mesh.colors.as_ref().map(|_| rep_colors);
    mesh.normals = None;
}

/// Drop vertices no face references.
pub fn drop_unreferenced_vertices(mesh: &mut TriangleMesh) {
    let mut keep = vec![false; mesh.vertices.len()];
    for face in &mesh.faces {
        for &i in face {
            keep[i] = true;
        }
    }
    retain_vertices(mesh, &keep);
}

/// Drop vertices flagged false, remapping faces and attributes. Faces that
/// reference a dropped vertex are removed.
pub fn retain_vertices(mesh: &mut TriangleMesh, keep: &[bool]) {
    debug_assert_eq!(keep.len(), mesh.vertices.len());

    let mut remap = vec![usize::MAX; mesh.vertices.len()];
    let mut new_vertices = Vec::new();
    for (i, &flag) in keep.iter().enumerate() {
        if flag {
            remap[i] = new_vertices.len();
            new_vertices.push(mesh.vertices[i]);
        }
    }

    mesh.faces.retain(|f| f.iter().all(|&i| keep[i]));
    for face in mesh.faces.iter_mut() {
        for idx in face.iter_mut() {
            *idx = remap[*idx];
        }
    }

    filter_attribute(&mut mesh.normals, keep);
    filter_attribute(&mut mesh.colors, keep);
    mesh.vertices = new_vertices;
}

fn filter_attribute<T: Copy>(attr: &mut Option<Vec<T>>, keep: &[bool]) {
    if let Some(values) = attr.take() {
        *attr = Some(
            values
                .into_iter()
                .zip(keep)
                .filter(|(_, &k)| k)
                .map(|(v, _)| v)
                .collect(),
        );
    }
}

struct SpatialHash {
    grid: HashMap<(i32, i32, i32), Vec<usize>>,
    cell: f32,
}

impl SpatialHash {
    fn new(points: &[Point3<f32>], cell: f32) -> Self {
        let mut grid: HashMap<(i32, i32, i32), Vec<usize>> = HashMap::new();
        for (i, p) in points.iter().enumerate() {
            grid.entry(Self::key(p, cell)).or_default().push(i);
        }
        Self { grid, cell }
    }

    fn key(p: &Point3<f32>, cell: f32) -> (i32, i32, i32) {
        (
            (p.x / cell).floor() as i32,
            (p.y / cell).floor() as i32,
            (p.z / cell).floor() as i32,
        )
    }

    /// Mean distance from point `i` to its `k` nearest neighbors, searching
    /// outward ring by ring until enough candidates are seen.
    fn mean_knn_distance(&self, points: &[Point3<f32>], i: usize, k: usize) -> f32 {
        let p = points[i];
        let center = Self::key(&p, self.cell);
        let mut dists: Vec<f32> = Vec::new();

        for ring in 1..=4 {
            dists.clear();
            for dx in -ring..=ring {
                for dy in -ring..=ring {
                    for dz in -ring..=ring {
                        if let Some(indices) =
                            self.grid
                                .get(&(center.0 + dx, center.1 + dy, center.2 + dz))
                        {
                            for &j in indices {
                                if j != i {
                                    dists.push((points[j] - p).norm());
                                }
                            }
                        }
                    }
                }
            }
            if dists.len() >= k {
                break;
            }
        }

        if dists.is_empty() {
            // Isolated beyond the search radius: score it just past the
            // search extent. Finite, so the mean/stddev stay well-formed.
            return self.cell * 8.0;
        }
        dists.sort_by(|a, b| a.total_cmp(b));
        let take = dists.len().min(k);
        dists[..take].iter().sum::<f32>() / take as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn grid_sheet(n: usize, spacing: f32) -> TriangleMesh {
        let mut vertices = Vec::new();
        for y in 0..n {
            for x in 0..n {
                vertices.push(Point3::new(x as f32 * spacing, y as f32 * spacing, 0.0));
            }
        }
        let mut faces = Vec::new();
        for y in 0..n - 1 {
            for x in 0..n - 1 {
                let i = y * n + x;
                faces.push([i, i + 1, i + n]);
                faces.push([i + 1, i + n + 1, i + n]);
            }
        }
        TriangleMesh::with_vertices_and_faces(vertices, faces)
    }

    #[test]
    fn outlier_vertex_is_removed() {
        let mut mesh = grid_sheet(8, 0.1);
        let outlier = mesh.vertices.len();
        mesh.vertices.push(Point3::new(50.0, 50.0, 50.0));
        mesh.faces.push([0, 1, outlier]);

        let removed = remove_statistical_outliers(&mut mesh, 4, 2.0);
        assert_eq!(removed, 1);
        assert!(mesh.indices_valid());
        assert!(mesh.vertices.iter().all(|v| v.x < 10.0));
    }

    #[test]
    fn smoothing_pulls_spike_down() {
        let mut mesh = grid_sheet(5, 0.1);
        mesh.vertices[12].z = 0.5; // center spike
        laplacian_smooth(&mut mesh, 5, 0.5);
        assert!(mesh.vertices[12].z < 0.25);
        assert!(mesh.indices_valid());
    }

    #[test]
    fn subdivision_quadruples_faces() {
        let mut mesh = grid_sheet(3, 0.1);
        let faces_before = mesh.num_faces();
        loop_subdivision(&mut mesh);
        assert_eq!(mesh.num_faces(), faces_before * 4);
        assert!(mesh.indices_valid());
    }

    #[test]
    fn simplification_respects_budget() {
        let mut mesh = grid_sheet(20, 0.05);
        assert!(mesh.num_faces() > 100);
        simplify_to_budget(&mut mesh, 100);
        assert!(mesh.num_faces() <= 100);
        assert!(mesh.num_vertices() <= 100);
        assert!(mesh.indices_valid());
    }

    #[test]
    fn simplification_noop_below_budget() {
        let mut mesh = grid_sheet(4, 0.1);
        let faces = mesh.num_faces();
        simplify_to_budget(&mut mesh, 10_000);
        assert_eq!(mesh.num_faces(), faces);
    }

    #[test]
    fn retain_vertices_keeps_attributes_aligned() {
        let mut mesh = grid_sheet(3, 0.1);
        mesh.colors = Some(vec![[255, 0, 0]; mesh.vertices.len()]);
        mesh.normals = Some(vec![Vector3::z(); mesh.vertices.len()]);

        let mut keep = vec![true; mesh.vertices.len()];
        keep[0] = false;
        retain_vertices(&mut mesh, &keep);

        assert!(mesh.indices_valid());
        assert_eq!(mesh.colors.as_ref().unwrap().len(), mesh.vertices.len());
        assert_eq!(mesh.normals.as_ref().unwrap().len(), mesh.vertices.len());
    }
}
