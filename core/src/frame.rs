//! Captured and conditioned observation types.
//!
//! A `Frame` is one raw observation from the capture session; it is
//! immutable once ingested and discarded after integration. A
//! `ConditionedFrame` has passed depth conditioning and pose normalization
//! and is what both reconstruction strategies consume.

use image::RgbImage;

use crate::geometry::{CameraIntrinsics, Pose};

/// Dense per-pixel depth along the viewing ray, in meters.
///
/// The invalid sentinel is any non-finite, zero, or negative value; valid
/// samples are strictly positive. Conditioning only ever moves samples from
/// valid to invalid, never the other way.
#[derive(Debug, Clone)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthMap {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            width,
            height,
            data,
        }
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    /// Depth at integer pixel, `None` for invalid samples.
    pub fn sample(&self, x: u32, y: u32) -> Option<f32> {
        let d = self.get(x, y);
        Self::is_valid(d).then_some(d)
    }

    pub fn is_valid(d: f32) -> bool {
        d.is_finite() && d > 0.0
    }

    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|d| Self::is_valid(**d)).count()
    }

    /// Fraction of pixels carrying a valid sample.
    pub fn valid_ratio(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.valid_count() as f32 / self.data.len() as f32
    }
}

/// One raw observation from the capture session, in capture conventions.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic capture timestamp (microseconds).
    pub timestamp: i64,
    pub depth: DepthMap,
    pub color: RgbImage,
    /// Camera-to-world pose in the capture session's reference frame.
    pub pose: Pose,
    pub depth_intrinsics: CameraIntrinsics,
    pub color_intrinsics: CameraIntrinsics,
    /// Calibration group. Frames compared against each other in the stereo
    /// path must share this.
    pub rig_id: u32,
}

/// A frame after depth conditioning and pose normalization.
///
/// Every valid depth sample lies in `(0, truncation]`; the pose is expressed
/// in the fusion volume's conventions with an orthonormal rotation. Depth
/// intrinsics stay authoritative for geometry; color is sampled through the
/// resolution scale between the two streams.
#[derive(Debug, Clone)]
pub struct ConditionedFrame {
    pub timestamp: i64,
    pub depth: DepthMap,
    pub color: RgbImage,
    pub pose: Pose,
    pub intrinsics: CameraIntrinsics,
    pub color_intrinsics: CameraIntrinsics,
    pub rig_id: u32,
    /// Valid samples surviving conditioning.
    pub valid_samples: usize,
    /// Local depth-noise estimate from conditioning, in meters.
    pub noise_estimate: f32,
}

impl ConditionedFrame {
    /// Color at a depth-stream pixel, mapped through the stream scale.
    pub fn color_at_depth_pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let (sx, sy) = self.intrinsics.scale_to(&self.color_intrinsics);
        let cx = ((x as f32 * sx) as u32).min(self.color.width().saturating_sub(1));
        let cy = ((y as f32 * sy) as u32).min(self.color.height().saturating_sub(1));
        self.color.get_pixel(cx, cy).0
    }

    pub fn valid_ratio(&self) -> f32 {
        self.depth.valid_ratio()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_map_valid_ratio() {
        let depth = DepthMap::new(2, 2, vec![1.0, 0.0, f32::NAN, 2.5]);
        assert_eq!(depth.valid_count(), 2);
        assert!((depth.valid_ratio() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn sentinel_values_are_invalid() {
        assert!(!DepthMap::is_valid(0.0));
        assert!(!DepthMap::is_valid(-1.0));
        assert!(!DepthMap::is_valid(f32::NAN));
        assert!(!DepthMap::is_valid(f32::INFINITY));
        assert!(DepthMap::is_valid(0.001));
    }
}
