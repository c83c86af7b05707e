//! Per-frame depth conditioning.
//!
//! Order is fixed: validity/range masking, edge-preserving smoothing, then
//! the optional statistical-outlier pass. Conditioning is pure per frame;
//! the only cross-frame check is timestamp monotonicity, which the caller
//! drives by passing the previous accepted timestamp.

use tracing::debug;

use roomscan_core::frame::DepthMap;
use roomscan_core::{ConditionedFrame, Error, Frame, Result};

use crate::bilateral::{bilateral_filter_depth, BilateralParams};
use crate::outliers::{estimate_depth_noise, remove_depth_outliers};

/// A smoothing pass that moves no sample by more than this has converged.
const SMOOTH_CONVERGENCE: f32 = 1e-3;
const MAX_SMOOTH_PASSES: usize = 4;
const MAX_CLEAN_ROUNDS: usize = 4;

/// Reject frames whose streams disagree with their declared intrinsics or
/// whose timestamp runs backwards. Both indicate corrupt upstream capture
/// and abort the run.
pub fn validate_frame(frame: &Frame, prev_timestamp: Option<i64>) -> Result<()> {
    let d = &frame.depth;
    if d.data.len() != (d.width * d.height) as usize {
        return Err(Error::DataIntegrity(format!(
            "depth buffer length {} does not match {}x{}",
            d.data.len(),
            d.width,
            d.height
        )));
    }
    if (d.width, d.height) != (frame.depth_intrinsics.width, frame.depth_intrinsics.height) {
        return Err(Error::DataIntegrity(format!(
            "depth resolution {}x{} inconsistent with intrinsics {}x{}",
            d.width, d.height, frame.depth_intrinsics.width, frame.depth_intrinsics.height
        )));
    }
    if (frame.color.width(), frame.color.height())
        != (frame.color_intrinsics.width, frame.color_intrinsics.height)
    {
        return Err(Error::DataIntegrity(format!(
            "color resolution {}x{} inconsistent with intrinsics {}x{}",
            frame.color.width(),
            frame.color.height(),
            frame.color_intrinsics.width,
            frame.color_intrinsics.height
        )));
    }
    if let Some(prev) = prev_timestamp {
        if frame.timestamp <= prev {
            return Err(Error::DataIntegrity(format!(
                "non-monotonic timestamp {} after {}",
                frame.timestamp, prev
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Conditioner {
    pub truncation: f32,
    pub filter: BilateralParams,
    /// Non-positive disables the outlier pass.
    pub outlier_std_ratio: f32,
}

impl Conditioner {
    pub fn new(truncation: f32, filter: BilateralParams, outlier_std_ratio: f32) -> Self {
        Self {
            truncation,
            filter,
            outlier_std_ratio,
        }
    }

    /// Condition one frame's depth. Returns `None` when nothing valid
    /// survives; the frame is skipped and counted by the caller, not a
    /// failure. The pose is passed through untouched; normalization is the
    /// next stage's job.
    ///
    /// The output is a fixpoint: conditioning an already-conditioned frame
    /// returns an identical valid-mask and identical values.
    pub fn condition(&self, frame: Frame) -> Option<ConditionedFrame> {
        let masked = self.mask(&frame.depth);
        if masked.valid_count() == 0 {
            debug!(timestamp = frame.timestamp, "frame has no valid depth after masking");
            return None;
        }

        let (cleaned, removed, noise) = self.smooth_and_clean(masked);

        let valid_samples = cleaned.valid_count();
        if valid_samples == 0 {
            debug!(timestamp = frame.timestamp, "frame fully rejected by conditioning");
            return None;
        }
        if removed > 0 {
            debug!(timestamp = frame.timestamp, removed, "outlier samples removed");
        }

        Some(ConditionedFrame {
            timestamp: frame.timestamp,
            depth: cleaned,
            color: frame.color,
            pose: frame.pose,
            intrinsics: frame.depth_intrinsics,
            color_intrinsics: frame.color_intrinsics,
            rig_id: frame.rig_id,
            valid_samples,
            noise_estimate: noise,
        })
    }

    /// Smoothing and outlier removal, run to a joint fixpoint. Smoothing
    /// passes repeat until a further pass stays under the convergence floor,
    /// and the outlier pass re-enters the loop whenever it invalidates
    /// samples, since removal changes the filter's neighborhoods. Returns
    /// the settled map, the total removed count, and its noise estimate.
    fn smooth_and_clean(&self, mut depth: DepthMap) -> (DepthMap, usize, f32) {
        let mut removed_total = 0usize;
        for _ in 0..MAX_CLEAN_ROUNDS {
            depth = self.smooth_to_fixpoint(depth);
            if self.outlier_std_ratio <= 0.0 {
                let noise = estimate_depth_noise(&depth);
                return (depth, removed_total, noise);
            }
            let (cleaned, removed, noise) = remove_depth_outliers(&depth, self.outlier_std_ratio);
            depth = cleaned;
            removed_total += removed;
            if removed == 0 {
                return (depth, removed_total, noise);
            }
        }
        let noise = estimate_depth_noise(&depth);
        (depth, removed_total, noise)
    }

    /// Bilateral passes until one moves no sample by more than
    /// `SMOOTH_CONVERGENCE`; that pass is then discarded, so re-running the
    /// whole stage on the result reproduces it bit for bit. Real depth
    /// settles in one or two passes.
    fn smooth_to_fixpoint(&self, mut depth: DepthMap) -> DepthMap {
        for _ in 0..MAX_SMOOTH_PASSES {
            // Guard the range contract after each pass: every valid sample
            // stays in (0, truncation].
            let next = self.mask(&bilateral_filter_depth(&depth, self.filter));
            if max_change(&depth, &next) <= SMOOTH_CONVERGENCE {
                return depth;
            }
            depth = next;
        }
        depth
    }

    /// Zero out sentinel and out-of-range samples. Monotonic: never turns
    /// an invalid sample valid.
    fn mask(&self, depth: &DepthMap) -> DepthMap {
        let data = depth
            .data
            .iter()
            .map(|&d| {
                if DepthMap::is_valid(d) && d <= self.truncation {
                    d
                } else {
                    0.0
                }
            })
            .collect();
        DepthMap::new(depth.width, depth.height, data)
    }
}

fn max_change(a: &DepthMap, b: &DepthMap) -> f32 {
    a.data
        .iter()
        .zip(&b.data)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use nalgebra::Matrix3;
    use roomscan_core::{CameraIntrinsics, Pose};

    fn frame_with_depth(data: Vec<f32>, w: u32, h: u32, timestamp: i64) -> Frame {
        Frame {
            timestamp,
            depth: DepthMap::new(w, h, data),
            color: RgbImage::new(w, h),
            pose: Pose::new(Matrix3::identity(), nalgebra::Vector3::zeros()),
            depth_intrinsics: CameraIntrinsics::new_ideal(w, h),
            color_intrinsics: CameraIntrinsics::new_ideal(w, h),
            rig_id: 0,
        }
    }

    fn conditioner() -> Conditioner {
        Conditioner::new(3.0, BilateralParams::default(), 0.0)
    }

    #[test]
    fn samples_beyond_truncation_are_masked() {
        let frame = frame_with_depth(vec![1.0, 3.5, 2.9, f32::NAN], 2, 2, 0);
        let out = conditioner().condition(frame).unwrap();
        assert_eq!(out.valid_samples, 2);
        for &d in &out.depth.data {
            assert!(!DepthMap::is_valid(d) || d <= 3.0);
        }
    }

    #[test]
    fn all_invalid_frame_is_skipped() {
        let frame = frame_with_depth(vec![0.0, f32::NAN, -1.0, 9.0], 2, 2, 0);
        assert!(conditioner().condition(frame).is_none());
    }

    #[test]
    fn conditioning_is_a_value_fixpoint() {
        let mut data = vec![0.0f32; 16 * 16];
        for (i, d) in data.iter_mut().enumerate() {
            *d = if i % 7 == 0 {
                0.0
            } else {
                1.0 + (i % 5) as f32 * 0.001
            };
        }
        let once = conditioner()
            .condition(frame_with_depth(data, 16, 16, 0))
            .unwrap();

        let again = conditioner()
            .condition(frame_with_depth(once.depth.data.clone(), 16, 16, 1))
            .unwrap();

        // Bit-identical: same mask, same values, no drift per pass.
        assert_eq!(once.valid_samples, again.valid_samples);
        assert_eq!(once.depth.data, again.depth.data);
        assert_eq!(once.noise_estimate, again.noise_estimate);
    }

    #[test]
    fn conditioning_with_outlier_pass_is_a_value_fixpoint() {
        let mut data = vec![0.0f32; 16 * 16];
        for (i, d) in data.iter_mut().enumerate() {
            *d = 1.0 + if i % 2 == 0 { 0.002 } else { -0.002 };
        }
        data[5 * 16 + 5] = 2.5; // isolated spike
        let conditioner = Conditioner::new(3.0, BilateralParams::default(), 3.0);

        let once = conditioner
            .condition(frame_with_depth(data, 16, 16, 0))
            .unwrap();
        assert!(!DepthMap::is_valid(once.depth.get(5, 5)), "spike survived");

        let again = conditioner
            .condition(frame_with_depth(once.depth.data.clone(), 16, 16, 1))
            .unwrap();
        assert_eq!(once.valid_samples, again.valid_samples);
        assert_eq!(once.depth.data, again.depth.data);
    }

    #[test]
    fn validation_rejects_resolution_mismatch() {
        let mut frame = frame_with_depth(vec![1.0; 16], 4, 4, 0);
        frame.depth_intrinsics.width = 8;
        assert!(matches!(
            validate_frame(&frame, None),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn validation_rejects_backwards_timestamps() {
        let frame = frame_with_depth(vec![1.0; 16], 4, 4, 5);
        assert!(validate_frame(&frame, Some(4)).is_ok());
        assert!(matches!(
            validate_frame(&frame, Some(5)),
            Err(Error::DataIntegrity(_))
        ));
    }
}
