//! Surface extraction from a completed volume.
//!
//! Ownership of the grid transfers here from integration; the volume is
//! read-only during extraction and discarded wholesale afterwards.

use tracing::debug;

use roomscan_mesh::{polygonize_cells, TriangleMesh};

use crate::volume::TsdfVolume;

impl TsdfVolume {
    /// Extract the zero crossing of the field as an indexed triangle mesh
    /// with per-vertex colors. A volume with no crossing (or no
    /// observations) yields an empty mesh, which is a valid result.
    pub fn extract_mesh(&self) -> TriangleMesh {
        let cells = self.observed_coords();
        debug!(cells = cells.len(), blocks = self.num_blocks(), "extracting surface");

        let mut mesh = polygonize_cells(|c| self.tsdf_at(c), cells, self.voxel_size());

        if !mesh.vertices.is_empty() {
            let colors = mesh
                .vertices
                .iter()
                .map(|v| {
                    self.voxel(self.world_to_voxel(v))
                        .map(|s| {
                            [
                                s.color[0].clamp(0.0, 255.0) as u8,
                                s.color[1].clamp(0.0, 255.0) as u8,
                                s.color[2].clamp(0.0, 255.0) as u8,
                            ]
                        })
                        .unwrap_or([128, 128, 128])
                })
                .collect();
            mesh.colors = Some(colors);
            mesh.compute_vertex_normals();
        }

        mesh
    }
}
