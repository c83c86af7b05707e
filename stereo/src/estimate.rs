//! Plane-sweep dense depth estimation.
//!
//! For each reference frame the estimator sweeps a set of depth hypotheses
//! (uniform in inverse depth), scoring each by zero-mean NCC between the
//! reference patch and its reprojection into every source frame. A second
//! pass keeps only estimates that at least one source frame's own estimate
//! geometrically agrees with. Frames the view graph excluded get no map.

use nalgebra::Point3;
use rayon::prelude::*;
use tracing::debug;

use roomscan_core::frame::DepthMap;
use roomscan_core::ConditionedFrame;

use crate::graph::ViewGraph;

#[derive(Debug, Clone, Copy)]
pub struct PlaneSweepParams {
    pub depth_min: f32,
    pub depth_max: f32,
    /// Hypotheses, uniform in inverse depth.
    pub hypotheses: usize,
    /// Patch half-width in pixels.
    pub patch_radius: i32,
    /// Minimum mean NCC for a hypothesis to be accepted.
    pub min_score: f32,
    /// Relative depth agreement required by the consistency filter.
    pub consistency_rel_tol: f32,
}

impl Default for PlaneSweepParams {
    fn default() -> Self {
        Self {
            depth_min: 0.3,
            depth_max: 5.0,
            hypotheses: 64,
            patch_radius: 2,
            min_score: 0.4,
            consistency_rel_tol: 0.05,
        }
    }
}

/// Per-frame grayscale at depth-stream resolution.
struct GrayBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl GrayBuffer {
    fn from_frame(frame: &ConditionedFrame) -> Self {
        let (width, height) = (frame.intrinsics.width, frame.intrinsics.height);
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                let [r, g, b] = frame.color_at_depth_pixel(x, y);
                data.push(0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    fn get(&self, x: i32, y: i32) -> Option<f32> {
        (x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32)
            .then(|| self.data[(y as u32 * self.width + x as u32) as usize])
    }
}

fn ncc(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;
    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for (&x, &y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-6 {
        // Textureless patches match everything; score them as uninformative
        // agreement only when both are flat at the same level.
        return if var_a < 1e-6 && var_b < 1e-6 && (mean_a - mean_b).abs() < 2.0 {
            1.0
        } else {
            0.0
        };
    }
    cov / denom
}

/// Score one depth hypothesis for one reference pixel against one source.
/// The patch is transferred fronto-parallel through the hypothesis plane.
fn hypothesis_score(
    reference: &ConditionedFrame,
    ref_gray: &GrayBuffer,
    source: &ConditionedFrame,
    src_gray: &GrayBuffer,
    x: u32,
    y: u32,
    depth: f32,
    radius: i32,
) -> Option<f32> {
    let world = reference
        .pose
        .transform_point(&reference.intrinsics.unproject(x as f32, y as f32, depth));
    let in_src = source.pose.inverse_transform_point(&world);
    let uv = source.intrinsics.project(&in_src)?;
    if !source.intrinsics.contains(uv.x, uv.y) {
        return None;
    }

    let (su, sv) = (uv.x.round() as i32, uv.y.round() as i32);
    let mut ref_patch = Vec::with_capacity(((2 * radius + 1) * (2 * radius + 1)) as usize);
    let mut src_patch = Vec::with_capacity(ref_patch.capacity());
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let rv = ref_gray.get(x as i32 + dx, y as i32 + dy)?;
            let sv_ = src_gray.get(su + dx, sv + dy)?;
            ref_patch.push(rv);
            src_patch.push(sv_);
        }
    }
    Some(ncc(&ref_patch, &src_patch))
}

fn sweep_frame(
    index: usize,
    frames: &[ConditionedFrame],
    grays: &[GrayBuffer],
    sources: &[usize],
    params: &PlaneSweepParams,
) -> DepthMap {
    let reference = &frames[index];
    let (width, height) = (reference.intrinsics.width, reference.intrinsics.height);
    let inv_near = 1.0 / params.depth_min;
    let inv_far = 1.0 / params.depth_max;
    let steps = params.hypotheses.max(2);

    let mut data = vec![0.0f32; (width * height) as usize];
    for y in 0..height {
        for x in 0..width {
            let mut best_score = params.min_score;
            let mut best_depth = 0.0f32;
            for k in 0..steps {
                let t = k as f32 / (steps - 1) as f32;
                let depth = 1.0 / (inv_far + (inv_near - inv_far) * t);

                let mut sum = 0.0f32;
                let mut count = 0usize;
                for &j in sources {
                    if let Some(score) = hypothesis_score(
                        reference,
                        &grays[index],
                        &frames[j],
                        &grays[j],
                        x,
                        y,
                        depth,
                        params.patch_radius,
                    ) {
                        sum += score;
                        count += 1;
                    }
                }
                if count == 0 {
                    continue;
                }
                let score = sum / count as f32;
                if score > best_score {
                    best_score = score;
                    best_depth = depth;
                }
            }
            data[(y * width + x) as usize] = best_depth;
        }
    }
    DepthMap::new(width, height, data)
}

/// Drop estimates no source frame's own estimate agrees with. A pixel
/// survives when at least one source sees the same surface within the
/// relative tolerance.
fn consistency_filter(
    index: usize,
    estimate: &DepthMap,
    frames: &[ConditionedFrame],
    all_estimates: &[Option<DepthMap>],
    sources: &[usize],
    params: &PlaneSweepParams,
) -> DepthMap {
    let reference = &frames[index];
    let mut out = estimate.clone();
    for y in 0..estimate.height {
        for x in 0..estimate.width {
            let Some(depth) = estimate.sample(x, y) else {
                continue;
            };
            let world = reference
                .pose
                .transform_point(&reference.intrinsics.unproject(x as f32, y as f32, depth));
            if !supported_by_any_source(&world, frames, all_estimates, sources, params) {
                out.data[(y * estimate.width + x) as usize] = 0.0;
            }
        }
    }
    out
}

pub(crate) fn supported_by_any_source(
    world: &Point3<f32>,
    frames: &[ConditionedFrame],
    estimates: &[Option<DepthMap>],
    sources: &[usize],
    params: &PlaneSweepParams,
) -> bool {
    for &j in sources {
        let Some(src_map) = estimates[j].as_ref() else {
            continue;
        };
        let source = &frames[j];
        let in_src = source.pose.inverse_transform_point(world);
        let Some(uv) = source.intrinsics.project(&in_src) else {
            continue;
        };
        if !source.intrinsics.contains(uv.x, uv.y) {
            continue;
        }
        let (su, sv) = (uv.x.round() as u32, uv.y.round() as u32);
        if let Some(src_depth) = src_map.sample(su.min(src_map.width - 1), sv.min(src_map.height - 1)) {
            if (src_depth - in_src.z).abs() <= params.consistency_rel_tol * in_src.z {
                return true;
            }
        }
    }
    false
}

/// Estimate a dense depth map for every usable frame. Excluded frames (and
/// frames where no hypothesis reaches the score threshold anywhere) still
/// occupy their slot so indices line up with `frames`.
pub fn estimate_depth_maps(
    frames: &[ConditionedFrame],
    graph: &ViewGraph,
    params: &PlaneSweepParams,
) -> Vec<Option<DepthMap>> {
    let grays: Vec<GrayBuffer> = frames.iter().map(GrayBuffer::from_frame).collect();

    let photometric: Vec<Option<DepthMap>> = (0..frames.len())
        .into_par_iter()
        .map(|i| {
            if graph.sources[i].is_empty() {
                None
            } else {
                Some(sweep_frame(i, frames, &grays, &graph.sources[i], params))
            }
        })
        .collect();

    let filtered: Vec<Option<DepthMap>> = (0..frames.len())
        .into_par_iter()
        .map(|i| {
            photometric[i].as_ref().map(|estimate| {
                consistency_filter(i, estimate, frames, &photometric, &graph.sources[i], params)
            })
        })
        .collect();

    let estimated = filtered.iter().filter(|m| m.is_some()).count();
    debug!(estimated, total = frames.len(), "dense depth estimation done");
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ncc_is_one_for_identical_patches() {
        let patch = vec![10.0, 20.0, 30.0, 40.0];
        assert!((ncc(&patch, &patch) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn ncc_is_negative_for_inverted_patches() {
        let a = vec![0.0, 50.0, 100.0, 150.0];
        let b = vec![150.0, 100.0, 50.0, 0.0];
        assert!(ncc(&a, &b) < -0.9);
    }

    #[test]
    fn flat_patches_at_same_level_match() {
        let a = vec![128.0; 9];
        let b = vec![128.5; 9];
        assert!((ncc(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn flat_patches_at_different_levels_do_not_match() {
        let a = vec![128.0; 9];
        let b = vec![30.0; 9];
        assert_eq!(ncc(&a, &b), 0.0);
    }
}
