//! Iso-surface polygonization of a sampled signed-distance field.
//!
//! Each cubic cell is split into six tetrahedra around the main diagonal and
//! the zero crossing is triangulated per tetrahedron. Compared to full
//! marching cubes this needs no case tables and cannot produce the ambiguous
//! saddle configurations, at the cost of a few more (smaller) triangles.

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};

use crate::TriangleMesh;

/// Integer voxel coordinate in the field's lattice.
pub type VoxelCoord = (i32, i32, i32);

const CUBE_CORNERS: [VoxelCoord; 8] = [
    (0, 0, 0),
    (1, 0, 0),
    (0, 1, 0),
    (1, 1, 0),
    (0, 0, 1),
    (1, 0, 1),
    (0, 1, 1),
    (1, 1, 1),
];

/// Six tetrahedra sharing the 0-7 diagonal, as corner indices into
/// `CUBE_CORNERS`. Neighboring cells decompose consistently because the
/// split is translation-invariant.
const CUBE_TETS: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 3, 2, 7],
    [0, 2, 6, 7],
    [0, 6, 4, 7],
    [0, 4, 5, 7],
    [0, 5, 1, 7],
];

/// Polygonize the zero crossing of a sparse signed-distance field.
///
/// `sample` returns the field value at a lattice point, or `None` where the
/// field was never observed; cells touching an unobserved corner are
/// skipped. `cells` enumerates candidate cell origins (the caller knows
/// which region of the lattice is populated). Shared edge vertices are
/// deduplicated, so the output is indexed and watertight where the field is
/// fully observed.
pub fn polygonize_cells<F, I>(sample: F, cells: I, voxel_size: f32) -> TriangleMesh
where
    F: Fn(VoxelCoord) -> Option<f32>,
    I: IntoIterator<Item = VoxelCoord>,
{
    let mut mesh = TriangleMesh::new();
    // Keyed by the lattice edge a vertex sits on.
    let mut edge_vertices: HashMap<(VoxelCoord, VoxelCoord), usize> = HashMap::new();

    for (cx, cy, cz) in cells {
        let mut coords = [(0, 0, 0); 8];
        let mut values = [0.0f32; 8];
        let mut complete = true;

        for (i, (dx, dy, dz)) in CUBE_CORNERS.iter().enumerate() {
            let c = (cx + dx, cy + dy, cz + dz);
            match sample(c) {
                Some(v) => {
                    coords[i] = c;
                    values[i] = v;
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if !complete {
            continue;
        }

        for tet in &CUBE_TETS {
            emit_tetrahedron(
                &mut mesh,
                &mut edge_vertices,
                [coords[tet[0]], coords[tet[1]], coords[tet[2]], coords[tet[3]]],
                [values[tet[0]], values[tet[1]], values[tet[2]], values[tet[3]]],
                voxel_size,
            );
        }
    }

    mesh
}

fn lattice_point(c: VoxelCoord, voxel_size: f32) -> Point3<f32> {
    Point3::new(
        c.0 as f32 * voxel_size,
        c.1 as f32 * voxel_size,
        c.2 as f32 * voxel_size,
    )
}

/// Interpolated zero-crossing vertex on the edge between two lattice points,
/// deduplicated across cells and tetrahedra.
fn edge_vertex(
    mesh: &mut TriangleMesh,
    edge_vertices: &mut HashMap<(VoxelCoord, VoxelCoord), usize>,
    a: VoxelCoord,
    b: VoxelCoord,
    va: f32,
    vb: f32,
    voxel_size: f32,
) -> usize {
    let key = if a <= b { (a, b) } else { (b, a) };
    if let Some(&idx) = edge_vertices.get(&key) {
        return idx;
    }

    let denom = va - vb;
    let t = if denom.abs() < 1e-12 {
        0.5
    } else {
        (va / denom).clamp(0.0, 1.0)
    };
    let pa = lattice_point(a, voxel_size);
    let pb = lattice_point(b, voxel_size);
    let p = pa + (pb - pa) * t;

    let idx = mesh.vertices.len();
    mesh.vertices.push(p);
    edge_vertices.insert(key, idx);
    idx
}

fn emit_tetrahedron(
    mesh: &mut TriangleMesh,
    edge_vertices: &mut HashMap<(VoxelCoord, VoxelCoord), usize>,
    coords: [VoxelCoord; 4],
    values: [f32; 4],
    voxel_size: f32,
) {
    let inside: Vec<usize> = (0..4).filter(|&i| values[i] < 0.0).collect();
    let outside: Vec<usize> = (0..4).filter(|&i| values[i] >= 0.0).collect();

    let mut ev = |i: usize, o: usize| {
        edge_vertex(
            mesh,
            edge_vertices,
            coords[i],
            coords[o],
            values[i],
            values[o],
            voxel_size,
        )
    };

    let mut triangles: Vec<[usize; 3]> = Vec::new();
    match inside.len() {
        1 => {
            let i = inside[0];
            triangles.push([
                ev(i, outside[0]),
                ev(i, outside[1]),
                ev(i, outside[2]),
            ]);
        }
        3 => {
            let o = outside[0];
            triangles.push([
                ev(inside[0], o),
                ev(inside[1], o),
                ev(inside[2], o),
            ]);
        }
        2 => {
            let (i0, i1) = (inside[0], inside[1]);
            let (o0, o1) = (outside[0], outside[1]);
            let v00 = ev(i0, o0);
            let v01 = ev(i0, o1);
            let v10 = ev(i1, o0);
            let v11 = ev(i1, o1);
            triangles.push([v00, v10, v11]);
            triangles.push([v00, v11, v01]);
        }
        _ => return, // fully inside or fully outside
    }

    // Orient each triangle so its normal points from the inside region
    // toward the outside region (outward for an SDF that is positive in
    // free space).
    let inward: Vector3<f32> = {
        let inside_centroid: Vector3<f32> = inside
            .iter()
            .map(|&i| lattice_point(coords[i], voxel_size).coords)
            .sum::<Vector3<f32>>()
            / inside.len() as f32;
        let outside_centroid: Vector3<f32> = outside
            .iter()
            .map(|&o| lattice_point(coords[o], voxel_size).coords)
            .sum::<Vector3<f32>>()
            / outside.len() as f32;
        outside_centroid - inside_centroid
    };

    for mut tri in triangles {
        let p0 = mesh.vertices[tri[0]];
        let p1 = mesh.vertices[tri[1]];
        let p2 = mesh.vertices[tri[2]];
        let normal = (p1 - p0).cross(&(p2 - p0));
        if normal.dot(&inward) < 0.0 {
            tri.swap(1, 2);
        }
        mesh.faces.push(tri);
    }
}
