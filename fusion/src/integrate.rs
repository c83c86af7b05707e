//! Per-frame TSDF integration.
//!
//! Frames integrate strictly in capture order; within one frame the update
//! parallelizes across touched blocks (blocks are disjoint, so block-level
//! parallelism is race-free). Never parallelize across frames: the running
//! average's accumulation state is ordered by definition.

use std::collections::HashSet;

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use roomscan_core::ConditionedFrame;

use crate::volume::{BlockCoord, TsdfVolume, VoxelBlock};

/// Accumulated weight past which conflicting saturated evidence is dropped
/// instead of averaged (thin-wall front/back policy).
const CONFLICT_MIN_WEIGHT: f32 = 8.0;
const CONFLICT_BAND: f32 = 0.75;

impl TsdfVolume {
    /// Integrate one conditioned frame into the volume.
    ///
    /// For every voxel projecting into the frame within the truncation band
    /// of the observed depth, the signed distance, weight, and color update
    /// by incremental weighted mean. Voxels behind the observed surface by
    /// more than the truncation distance are left untouched.
    pub fn integrate(&mut self, frame: &ConditionedFrame) {
        let touched = self.allocate_for_frame(frame);
        if touched.is_empty() {
            debug!(timestamp = frame.timestamp, "frame touched no blocks");
            return;
        }

        let voxel_size = self.voxel_size();
        let truncation = self.truncation();
        let max_weight = self.max_weight();
        let size = VoxelBlock::SIZE as i32;

        let mut blocks = self.take_blocks(&touched);
        blocks.par_iter_mut().for_each(|(coord, block)| {
            let (bx, by, bz) = *coord;
            for lz in 0..VoxelBlock::SIZE {
                for ly in 0..VoxelBlock::SIZE {
                    for lx in 0..VoxelBlock::SIZE {
                        let world = Point3::new(
                            (bx * size + lx as i32) as f32 * voxel_size,
                            (by * size + ly as i32) as f32 * voxel_size,
                            (bz * size + lz as i32) as f32 * voxel_size,
                        );
                        let cam = frame.pose.inverse_transform_point(&world);
                        if cam.z <= 0.0 {
                            continue;
                        }
                        let Some(uv) = frame.intrinsics.project(&cam) else {
                            continue;
                        };
                        if !frame.intrinsics.contains(uv.x, uv.y) {
                            continue;
                        }
                        let (u, v) = (uv.x as u32, uv.y as u32);
                        let Some(depth) = frame.depth.sample(u, v) else {
                            continue;
                        };

                        // Projective signed distance along the optical axis.
                        let sdf = depth - cam.z;
                        if sdf < -truncation {
                            // Behind the surface beyond the band: no update,
                            // not a zero-weight update.
                            continue;
                        }
                        let tsdf = (sdf / truncation).clamp(-1.0, 1.0);

                        let idx = VoxelBlock::index((lx, ly, lz));
                        let old_tsdf = block.tsdf[idx];
                        let old_weight = block.weights[idx];

                        // Thin-wall policy: once a voxel is confidently on
                        // one side, saturated evidence from the opposite
                        // side is discarded rather than averaged in.
                        if old_weight >= CONFLICT_MIN_WEIGHT
                            && old_tsdf * tsdf < 0.0
                            && old_tsdf.abs() > CONFLICT_BAND
                            && tsdf.abs() > CONFLICT_BAND
                        {
                            continue;
                        }

                        let new_weight = (old_weight + 1.0).min(max_weight);
                        block.tsdf[idx] = (old_tsdf * old_weight + tsdf) / (old_weight + 1.0);
                        block.weights[idx] = new_weight;

                        let rgb = frame.color_at_depth_pixel(u, v);
                        let old_color = block.colors[idx];
                        for ch in 0..3 {
                            block.colors[idx][ch] = (old_color[ch] * old_weight + rgb[ch] as f32)
                                / (old_weight + 1.0);
                        }
                    }
                }
            }
        });
        self.put_blocks(blocks);
        self.bump_frames();
        debug!(
            timestamp = frame.timestamp,
            blocks = touched.len(),
            "frame integrated"
        );
    }

    /// Walk every valid depth ray through its truncation band and allocate
    /// the blocks it touches. Allocation is the only part that sees the
    /// whole frame at once; it stays cheap because it steps at block
    /// granularity around the observed surface.
    fn allocate_for_frame(&mut self, frame: &ConditionedFrame) -> Vec<BlockCoord> {
        let truncation = self.truncation();
        let voxel_size = self.voxel_size();
        let origin = frame.pose.camera_center();

        let mut touched: HashSet<BlockCoord> = HashSet::new();
        for v in 0..frame.depth.height {
            for u in 0..frame.depth.width {
                let Some(depth) = frame.depth.sample(u, v) else {
                    continue;
                };
                let surface_cam = frame.intrinsics.unproject(u as f32 + 0.5, v as f32 + 0.5, depth);
                let surface = frame.pose.transform_point(&surface_cam);
                let dir = (surface - origin).normalize();

                let near = (depth - truncation).max(voxel_size);
                let far = depth + truncation;
                let steps = ((far - near) / voxel_size).ceil() as usize;
                for i in 0..=steps {
                    let t = near + (far - near) * i as f32 / steps.max(1) as f32;
                    let p = origin + dir * t;
                    let (block, _) = Self::split_coord(self.world_to_voxel(&p));
                    touched.insert(block);
                }
            }
        }

        for &block in &touched {
            self.ensure_block(block);
        }
        let mut coords: Vec<BlockCoord> = touched.into_iter().collect();
        coords.sort_unstable();
        coords
    }
}
