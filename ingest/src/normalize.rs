//! Pose normalization from capture to fusion conventions.
//!
//! Capture poses arrive with the camera looking down -Z with +Y up; the
//! fusion volume expects +Z forward and +Y down. The two bases differ by a
//! flip of the Y and Z camera axes, applied on the right of the rotation so
//! the world frame is untouched.

use nalgebra::Matrix3;
use tracing::trace;

use roomscan_core::{ConditionedFrame, Pose};

/// Diagonal basis change between the capture and fusion camera frames.
fn axis_flip() -> Matrix3<f32> {
    Matrix3::from_diagonal(&nalgebra::Vector3::new(1.0, -1.0, -1.0))
}

#[derive(Debug, Clone, Copy)]
pub struct FrameNormalizer {
    /// Rotations with orthonormality error above this are re-orthonormalized
    /// before the basis change.
    pub drift_tolerance: f32,
}

impl Default for FrameNormalizer {
    fn default() -> Self {
        Self {
            drift_tolerance: 1e-4,
        }
    }
}

impl FrameNormalizer {
    /// Rewrite the pose in fusion conventions. Camera centers are preserved
    /// exactly; only the camera basis changes.
    pub fn normalize_pose(&self, pose: &Pose) -> Pose {
        let mut pose = *pose;
        let drift = pose.orthonormality_error();
        if drift > self.drift_tolerance {
            trace!(drift, "re-orthonormalizing drifted rotation");
            pose = pose.orthonormalized();
        }
        Pose::new(pose.rotation * axis_flip(), pose.translation)
    }

    pub fn normalize(&self, mut frame: ConditionedFrame) -> ConditionedFrame {
        frame.pose = self.normalize_pose(&frame.pose);
        frame
    }
}
