//! Camera and pose geometry shared by every pipeline stage.

use nalgebra::{Matrix3, Matrix4, Point2, Point3, Rotation3, Vector3};

/// Pinhole camera intrinsics for one image stream.
///
/// Depth and color streams commonly carry different resolutions, so each
/// stream gets its own record; the run-wide reconciliation policy is to keep
/// the depth record authoritative and sample color through [`scale_to`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
    pub width: u32,
    pub height: u32,
}

impl CameraIntrinsics {
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32, width: u32, height: u32) -> Self {
        Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        }
    }

    /// Ideal intrinsics with focal length = width and centered principal
    /// point. Used by synthetic tests.
    pub fn new_ideal(width: u32, height: u32) -> Self {
        Self {
            fx: width as f32,
            fy: width as f32,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
            width,
            height,
        }
    }

    /// Project a camera-space point to pixel coordinates. `None` when the
    /// point sits at or behind the pinhole.
    pub fn project(&self, point: &Point3<f32>) -> Option<Point2<f32>> {
        if point.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            point.x / point.z * self.fx + self.cx,
            point.y / point.z * self.fy + self.cy,
        ))
    }

    /// Back-project a pixel at the given depth into camera space.
    pub fn unproject(&self, u: f32, v: f32, depth: f32) -> Point3<f32> {
        Point3::new(
            (u - self.cx) / self.fx * depth,
            (v - self.cy) / self.fy * depth,
            depth,
        )
    }

    pub fn contains(&self, u: f32, v: f32) -> bool {
        u >= 0.0 && v >= 0.0 && u < self.width as f32 && v < self.height as f32
    }

    /// Scale factors mapping this stream's pixel coordinates into another
    /// stream's (e.g. depth pixel -> color pixel).
    pub fn scale_to(&self, other: &CameraIntrinsics) -> (f32, f32) {
        (
            other.width as f32 / self.width as f32,
            other.height as f32 / self.height as f32,
        )
    }
}

/// Rigid camera-to-world transform.
#[derive(Debug, Clone, Copy)]
pub struct Pose {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

impl Pose {
    pub fn new(rotation: Matrix3<f32>, translation: Vector3<f32>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Camera-space point to world space.
    pub fn transform_point(&self, p: &Point3<f32>) -> Point3<f32> {
        Point3::from(self.rotation * p.coords + self.translation)
    }

    /// World-space point to camera space.
    pub fn inverse_transform_point(&self, p: &Point3<f32>) -> Point3<f32> {
        Point3::from(self.rotation.transpose() * (p.coords - self.translation))
    }

    /// The camera's optical axis in world space (+Z of the camera frame).
    pub fn view_direction(&self) -> Vector3<f32> {
        self.rotation * Vector3::z()
    }

    pub fn camera_center(&self) -> Point3<f32> {
        Point3::from(self.translation)
    }

    /// Deviation of the rotation from orthonormality, measured as the
    /// max-abs entry of `R^T R - I`.
    pub fn orthonormality_error(&self) -> f32 {
        let residual = self.rotation.transpose() * self.rotation - Matrix3::identity();
        residual.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }

    /// Nearest valid rotation, for poses carrying small VIO numerical drift.
    pub fn orthonormalized(&self) -> Self {
        Self {
            rotation: *Rotation3::from_matrix(&self.rotation).matrix(),
            translation: self.translation,
        }
    }

    pub fn to_matrix4(&self) -> Matrix4<f32> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.rotation);
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }
}
