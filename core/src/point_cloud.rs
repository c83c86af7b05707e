use nalgebra::{Point3, Vector3};

/// Oriented, optionally colored point set.
///
/// The stereo path's fusion step produces one of these; surface
/// reconstruction consumes it. Normals and colors, when present, are
/// index-aligned with `points`.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<Point3<f32>>,
    pub normals: Option<Vec<Vector3<f32>>>,
    pub colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f32>>) -> Self {
        Self {
            points,
            normals: None,
            colors: None,
        }
    }

    pub fn with_normals(mut self, normals: Vec<Vector3<f32>>) -> crate::Result<Self> {
        if normals.len() != self.points.len() {
            return Err(crate::Error::DataIntegrity(format!(
                "normal count {} does not match point count {}",
                normals.len(),
                self.points.len()
            )));
        }
        self.normals = Some(normals);
        Ok(self)
    }

    pub fn with_colors(mut self, colors: Vec<[u8; 3]>) -> crate::Result<Self> {
        if colors.len() != self.points.len() {
            return Err(crate::Error::DataIntegrity(format!(
                "color count {} does not match point count {}",
                colors.len(),
                self.points.len()
            )));
        }
        self.colors = Some(colors);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
