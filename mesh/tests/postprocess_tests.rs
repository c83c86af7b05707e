//! Postprocessing chain behavior on reconstructed surfaces.

use nalgebra::{Point3, Vector3};
use roomscan_core::PointCloud;
use roomscan_mesh::processing::{
    drop_unreferenced_vertices, laplacian_smooth, loop_subdivision, remove_statistical_outliers,
    simplify_to_budget,
};
use roomscan_mesh::reconstruct_oriented_points;

fn noisy_plane_cloud(n: usize) -> PointCloud {
    let mut points = Vec::new();
    let mut normals = Vec::new();
    for y in 0..n {
        for x in 0..n {
            // Deterministic ripple standing in for sensor noise.
            let jitter = ((x * 7 + y * 13) % 5) as f32 * 0.001;
            points.push(Point3::new(x as f32 * 0.02, y as f32 * 0.02, 1.0 + jitter));
            normals.push(Vector3::z());
        }
    }
    PointCloud::new(points).with_normals(normals).unwrap()
}

#[test]
fn full_postprocess_chain_keeps_mesh_consistent() {
    let cloud = noisy_plane_cloud(24);
    let mut mesh = reconstruct_oriented_points(&cloud, 0.02, 0.06).unwrap();
    assert!(!mesh.is_empty());

    remove_statistical_outliers(&mut mesh, 8, 3.0);
    assert!(mesh.indices_valid());

    laplacian_smooth(&mut mesh, 3, 0.5);
    assert!(mesh.indices_valid());

    loop_subdivision(&mut mesh);
    assert!(mesh.indices_valid());

    simplify_to_budget(&mut mesh, 400);
    assert!(mesh.indices_valid());
    assert!(mesh.num_faces() <= 400);
    assert!(mesh.num_vertices() <= 400);

    // The surface should still sit near z = 1.0 after the whole chain.
    for v in &mesh.vertices {
        assert!((v.z - 1.0).abs() < 0.05, "vertex drifted: {v:?}");
    }
}

#[test]
fn smoothing_reduces_surface_roughness() {
    let cloud = noisy_plane_cloud(20);
    let mut mesh = reconstruct_oriented_points(&cloud, 0.02, 0.06).unwrap();

    let spread_before = z_spread(&mesh.vertices);
    laplacian_smooth(&mut mesh, 5, 0.5);
    let spread_after = z_spread(&mesh.vertices);

    assert!(spread_after <= spread_before + 1e-6);
}

#[test]
fn displaced_vertices_are_removed_as_outliers() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let cloud = noisy_plane_cloud(20);
    let mut mesh = reconstruct_oriented_points(&cloud, 0.02, 0.06).unwrap();
    let n = mesh.num_vertices();

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..5 {
        let idx = rng.gen_range(0..n);
        mesh.vertices[idx].z += 0.2;
    }

    let removed = remove_statistical_outliers(&mut mesh, 8, 3.0);
    assert!(removed >= 1, "no displaced vertex was detected");
    assert!(mesh.indices_valid());
    for v in &mesh.vertices {
        assert!((v.z - 1.0).abs() < 0.15, "outlier survived: {v:?}");
    }
}

#[test]
fn zero_triangle_mesh_survives_every_stage() {
    let mut mesh = roomscan_mesh::TriangleMesh::new();
    remove_statistical_outliers(&mut mesh, 8, 3.0);
    laplacian_smooth(&mut mesh, 3, 0.5);
    loop_subdivision(&mut mesh);
    simplify_to_budget(&mut mesh, 100);
    drop_unreferenced_vertices(&mut mesh);
    assert!(mesh.is_empty());
    assert!(mesh.indices_valid());
}

fn z_spread(vertices: &[Point3<f32>]) -> f32 {
    let (mut lo, mut hi) = (f32::MAX, f32::MIN);
    for v in vertices {
        lo = lo.min(v.z);
        hi = hi.max(v.z);
    }
    if vertices.is_empty() {
        0.0
    } else {
        hi - lo
    }
}
