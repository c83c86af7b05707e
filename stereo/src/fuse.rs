//! Fusion of per-frame dense depth maps into one oriented point cloud.
//!
//! Each valid depth sample back-projects to a world point with a normal
//! from the local depth gradient. A point survives only when another
//! frame's estimate supports it, then a voxel grid de-duplicates the
//! surviving points across frames.

use std::collections::HashMap;

use nalgebra::Vector3;
use tracing::debug;

use roomscan_core::frame::DepthMap;
use roomscan_core::{ConditionedFrame, PointCloud, Result};

use crate::estimate::{supported_by_any_source, PlaneSweepParams};

#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    /// Supporting frames (beyond the observing one) a point needs. Zero
    /// keeps everything, which only makes sense for single-frame runs.
    pub min_support: usize,
    /// De-duplication cell size in meters.
    pub merge_cell: f32,
    /// Depth agreement tolerance, shared with the estimator.
    pub sweep: PlaneSweepParams,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            min_support: 1,
            merge_cell: 0.01,
            sweep: PlaneSweepParams::default(),
        }
    }
}

/// Surface normal in camera space from forward depth differences, oriented
/// toward the camera. `None` on discontinuities and map borders.
fn camera_normal(map: &DepthMap, intr: &roomscan_core::CameraIntrinsics, x: u32, y: u32) -> Option<Vector3<f32>> {
    if x + 1 >= map.width || y + 1 >= map.height {
        return None;
    }
    let d = map.sample(x, y)?;
    let dr = map.sample(x + 1, y)?;
    let db = map.sample(x, y + 1)?;
    // A forward difference across a real depth edge fabricates a normal.
    let jump = 0.05 * d;
    if (dr - d).abs() > jump || (db - d).abs() > jump {
        return None;
    }

    let p = intr.unproject(x as f32, y as f32, d);
    let right = intr.unproject((x + 1) as f32, y as f32, dr);
    let below = intr.unproject(x as f32, (y + 1) as f32, db);
    let n = (right - p).cross(&(below - p));
    let norm = n.norm();
    if norm < 1e-9 {
        return None;
    }
    let mut n = n / norm;
    if n.z > 0.0 {
        n = -n; // toward the camera at the origin
    }
    Some(n)
}

/// Merge the per-frame estimates into one oriented, colored cloud.
/// `depth_maps` is index-aligned with `frames`; `None` slots are frames the
/// graph excluded.
pub fn fuse_depth_maps(
    frames: &[ConditionedFrame],
    depth_maps: &[Option<DepthMap>],
    params: &FusionParams,
) -> Result<PointCloud> {
    let all_indices: Vec<usize> = (0..frames.len())
        .filter(|&i| depth_maps[i].is_some())
        .collect();

    let mut points = Vec::new();
    let mut normals = Vec::new();
    let mut colors = Vec::new();
    let mut occupied: HashMap<(i32, i32, i32), ()> = HashMap::new();
    let inv_cell = 1.0 / params.merge_cell;

    for (i, frame) in frames.iter().enumerate() {
        let Some(map) = depth_maps[i].as_ref() else {
            continue;
        };
        let others: Vec<usize> = all_indices.iter().copied().filter(|&j| j != i).collect();

        for y in 0..map.height {
            for x in 0..map.width {
                let Some(depth) = map.sample(x, y) else {
                    continue;
                };
                let Some(n_cam) = camera_normal(map, &frame.intrinsics, x, y) else {
                    continue;
                };
                let world = frame
                    .pose
                    .transform_point(&frame.intrinsics.unproject(x as f32, y as f32, depth));

                if params.min_support > 0
                    && !others.is_empty()
                    && !supported_by_any_source(&world, frames, depth_maps, &others, &params.sweep)
                {
                    continue;
                }

                let key = (
                    (world.x * inv_cell).floor() as i32,
                    (world.y * inv_cell).floor() as i32,
                    (world.z * inv_cell).floor() as i32,
                );
                if occupied.insert(key, ()).is_some() {
                    continue;
                }

                points.push(world);
                normals.push(frame.pose.rotation * n_cam);
                colors.push(frame.color_at_depth_pixel(x, y));
            }
        }
    }

    debug!(points = points.len(), frames = all_indices.len(), "depth-map fusion done");
    PointCloud::new(points)
        .with_normals(normals)?
        .with_colors(colors)
}
