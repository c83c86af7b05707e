//! Pose-driven correspondence graph.
//!
//! An edge i -> j means frame j is a usable stereo source when estimating
//! depth for reference frame i. Edges come from pose geometry alone: the
//! baseline between camera centers must be long enough to triangulate and
//! short enough to overlap, and the optical axes must roughly agree.

use tracing::warn;

use roomscan_core::{ConditionedFrame, Error, Result};

/// All frames compared against each other must share one calibration group.
/// A mix corrupts the geometric-consistency check silently, so it aborts the
/// run before any estimation happens.
pub fn check_rig_consistency(frames: &[ConditionedFrame]) -> Result<()> {
    let Some(first) = frames.first() else {
        return Ok(());
    };
    for (i, frame) in frames.iter().enumerate() {
        if frame.rig_id != first.rig_id {
            return Err(Error::DataIntegrity(format!(
                "frame {} belongs to rig {} but the run started with rig {}",
                i, frame.rig_id, first.rig_id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct ViewGraphParams {
    /// Baselines shorter than this give no triangulation signal.
    pub min_baseline: f32,
    /// Baselines longer than this rarely overlap indoors.
    pub max_baseline: f32,
    /// Maximum angle between optical axes, degrees.
    pub max_axis_angle_deg: f32,
    /// Keep at most this many sources per reference frame, nearest first.
    pub max_sources: usize,
}

impl Default for ViewGraphParams {
    fn default() -> Self {
        Self {
            min_baseline: 0.01,
            max_baseline: 1.0,
            max_axis_angle_deg: 40.0,
            max_sources: 8,
        }
    }
}

/// Directed source lists per reference frame, plus the frames left with no
/// usable source at all. Excluded frames never enter depth estimation; they
/// are reported, not zero-filled.
#[derive(Debug, Clone)]
pub struct ViewGraph {
    pub sources: Vec<Vec<usize>>,
    pub excluded: Vec<usize>,
}

impl ViewGraph {
    pub fn build(frames: &[ConditionedFrame], params: &ViewGraphParams) -> Result<Self> {
        check_rig_consistency(frames)?;
        if frames.is_empty() {
            return Err(Error::DegenerateGraph("no frames to build a view graph from".into()));
        }

        let cos_limit = params.max_axis_angle_deg.to_radians().cos();
        let centers: Vec<_> = frames.iter().map(|f| f.pose.camera_center()).collect();
        let axes: Vec<_> = frames.iter().map(|f| f.pose.view_direction()).collect();

        let mut sources = vec![Vec::new(); frames.len()];
        for i in 0..frames.len() {
            let mut candidates: Vec<(f32, usize)> = Vec::new();
            for j in 0..frames.len() {
                if i == j {
                    continue;
                }
                let baseline = (centers[i] - centers[j]).norm();
                if baseline < params.min_baseline || baseline > params.max_baseline {
                    continue;
                }
                if axes[i].dot(&axes[j]) < cos_limit {
                    continue;
                }
                candidates.push((baseline, j));
            }
            candidates.sort_by(|a, b| a.0.total_cmp(&b.0));
            sources[i] = candidates
                .into_iter()
                .take(params.max_sources)
                .map(|(_, j)| j)
                .collect();
        }

        let excluded: Vec<usize> = sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_empty())
            .map(|(i, _)| i)
            .collect();

        if excluded.len() == frames.len() {
            return Err(Error::DegenerateGraph(format!(
                "{} frames excluded, 0 usable",
                excluded.len()
            )));
        }
        if !excluded.is_empty() {
            warn!(
                excluded = excluded.len(),
                total = frames.len(),
                "frames without usable stereo sources"
            );
        }

        Ok(Self { sources, excluded })
    }

    pub fn is_excluded(&self, frame: usize) -> bool {
        self.sources[frame].is_empty()
    }

    pub fn usable_count(&self) -> usize {
        self.sources.len() - self.excluded.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use nalgebra::{Matrix3, Vector3};
    use roomscan_core::frame::DepthMap;
    use roomscan_core::{CameraIntrinsics, Pose};

    fn frame_at(x: f32, rig_id: u32) -> ConditionedFrame {
        ConditionedFrame {
            timestamp: (x * 1000.0) as i64,
            depth: DepthMap::new(4, 4, vec![1.0; 16]),
            color: RgbImage::new(4, 4),
            pose: Pose::new(Matrix3::identity(), Vector3::new(x, 0.0, 0.0)),
            intrinsics: CameraIntrinsics::new_ideal(4, 4),
            color_intrinsics: CameraIntrinsics::new_ideal(4, 4),
            rig_id,
            valid_samples: 16,
            noise_estimate: 0.0,
        }
    }

    #[test]
    fn neighboring_frames_become_sources() {
        let frames: Vec<_> = (0..5).map(|i| frame_at(i as f32 * 0.1, 0)).collect();
        let graph = ViewGraph::build(&frames, &ViewGraphParams::default()).unwrap();
        assert!(graph.excluded.is_empty());
        assert!(graph.sources.iter().all(|s| !s.is_empty()));
        // Nearest neighbor sorts first.
        assert_eq!(graph.sources[0][0], 1);
    }

    #[test]
    fn isolated_frame_is_excluded_not_zero_filled() {
        let mut frames: Vec<_> = (0..3).map(|i| frame_at(i as f32 * 0.1, 0)).collect();
        frames.push(frame_at(50.0, 0)); // far outside any baseline window
        let graph = ViewGraph::build(&frames, &ViewGraphParams::default()).unwrap();
        assert_eq!(graph.excluded, vec![3]);
        assert!(graph.is_excluded(3));
        assert_eq!(graph.usable_count(), 3);
    }

    #[test]
    fn all_isolated_is_degenerate() {
        let frames = vec![frame_at(0.0, 0), frame_at(100.0, 0)];
        let err = ViewGraph::build(&frames, &ViewGraphParams::default()).unwrap_err();
        assert!(matches!(err, Error::DegenerateGraph(_)));
    }

    #[test]
    fn mixed_rigs_fail_before_graph_construction() {
        let frames = vec![frame_at(0.0, 0), frame_at(0.1, 1)];
        let err = ViewGraph::build(&frames, &ViewGraphParams::default()).unwrap_err();
        assert!(matches!(err, Error::DataIntegrity(_)));
    }

    #[test]
    fn diverging_view_directions_are_not_sources() {
        let mut a = frame_at(0.0, 0);
        let mut b = frame_at(0.1, 0);
        a.pose.rotation = Matrix3::identity();
        // Rotate b's optical axis 90 degrees away.
        b.pose.rotation = *nalgebra::Rotation3::from_euler_angles(0.0, std::f32::consts::FRAC_PI_2, 0.0).matrix();
        let err = ViewGraph::build(&[a, b], &ViewGraphParams::default()).unwrap_err();
        assert!(matches!(err, Error::DegenerateGraph(_)));
    }
}
