//! End-to-end conditioning behavior over whole frames.

use image::RgbImage;
use nalgebra::{Matrix3, Point3, Vector3};

use roomscan_core::frame::DepthMap;
use roomscan_core::{CameraIntrinsics, Frame, Pose};
use roomscan_ingest::{validate_frame, BilateralParams, Conditioner, FrameNormalizer};

const W: u32 = 32;
const H: u32 = 24;

fn synthetic_frame(depth: Vec<f32>, timestamp: i64) -> Frame {
    Frame {
        timestamp,
        depth: DepthMap::new(W, H, depth),
        color: RgbImage::from_pixel(W, H, image::Rgb([120, 120, 120])),
        pose: Pose::new(Matrix3::identity(), Vector3::zeros()),
        depth_intrinsics: CameraIntrinsics::new_ideal(W, H),
        color_intrinsics: CameraIntrinsics::new_ideal(W, H),
        rig_id: 0,
    }
}

fn noisy_wall(base: f32) -> Vec<f32> {
    (0..(W * H) as usize)
        .map(|i| base + ((i * 13 % 11) as f32 - 5.0) * 0.0005)
        .collect()
}

#[test]
fn conditioned_depth_stays_within_truncation_band() {
    let mut depth = noisy_wall(2.0);
    depth[10] = 7.5; // beyond truncation
    depth[11] = -0.3;
    let conditioner = Conditioner::new(4.0, BilateralParams::default(), 3.0);

    let out = conditioner.condition(synthetic_frame(depth, 0)).unwrap();
    for &d in &out.depth.data {
        if DepthMap::is_valid(d) {
            assert!(d > 0.0 && d <= 4.0, "out of band: {d}");
        }
    }
    assert!(out.valid_samples > 0);
    assert!(out.noise_estimate >= 0.0);
}

#[test]
fn fully_invalid_frame_is_skipped_not_fatal() {
    let depth = vec![0.0f32; (W * H) as usize];
    let conditioner = Conditioner::new(4.0, BilateralParams::default(), 3.0);
    assert!(conditioner.condition(synthetic_frame(depth, 0)).is_none());
}

#[test]
fn validation_then_conditioning_preserves_timestamp_order() {
    let conditioner = Conditioner::new(4.0, BilateralParams::default(), 0.0);
    let frames: Vec<Frame> = (0..4)
        .map(|i| synthetic_frame(noisy_wall(1.5), i * 1000))
        .collect();

    let mut prev = None;
    let mut conditioned = Vec::new();
    for frame in frames {
        validate_frame(&frame, prev).unwrap();
        prev = Some(frame.timestamp);
        if let Some(cf) = conditioner.condition(frame) {
            conditioned.push(cf);
        }
    }

    assert_eq!(conditioned.len(), 4);
    assert!(conditioned.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn normalized_frame_projects_forward_geometry() {
    // Capture camera at the origin looking along capture -Z at a wall at
    // z = -2. After normalization the wall sits at camera depth +2.
    let conditioner = Conditioner::new(4.0, BilateralParams::default(), 0.0);
    let conditioned = conditioner
        .condition(synthetic_frame(noisy_wall(2.0), 0))
        .unwrap();
    let normalized = FrameNormalizer::default().normalize(conditioned);

    let wall = Point3::new(0.0, 0.0, -2.0);
    let cam = normalized.pose.inverse_transform_point(&wall);
    assert!((cam.z - 2.0).abs() < 1e-5);
    assert!(normalized.pose.orthonormality_error() < 1e-5);
}
