//! The stereo path's estimator seam.
//!
//! [`DenseStereoBackend`] hides whether dense depth comes from the
//! in-process plane-sweep estimator or from an external batch tool invoked
//! over an on-disk model. Tests substitute a canned backend; the
//! orchestrator only ever sees a fused point cloud.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use nalgebra::{Point3, Rotation3, UnitQuaternion, Vector3};
use tracing::{debug, info};

use roomscan_core::{ConditionedFrame, Error, PointCloud, Result};

use crate::estimate::{estimate_depth_maps, PlaneSweepParams};
use crate::fuse::{fuse_depth_maps, FusionParams};
use crate::graph::ViewGraph;

pub trait DenseStereoBackend {
    fn name(&self) -> &'static str;

    /// Estimate and fuse dense geometry for every usable frame in the
    /// graph. Excluded frames must not be estimated.
    fn reconstruct_cloud(&self, frames: &[ConditionedFrame], graph: &ViewGraph)
        -> Result<PointCloud>;
}

/// In-process plane-sweep estimation and fusion.
#[derive(Debug, Default)]
pub struct NativeBackend {
    pub sweep: PlaneSweepParams,
    pub fusion: FusionParams,
}

impl DenseStereoBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }

    fn reconstruct_cloud(
        &self,
        frames: &[ConditionedFrame],
        graph: &ViewGraph,
    ) -> Result<PointCloud> {
        let maps = estimate_depth_maps(frames, graph, &self.sweep);
        fuse_depth_maps(frames, &maps, &self.fusion)
    }
}

/// Shells out to an external dense-stereo batch tool.
///
/// The tool consumes a sparse-model directory of camera, image, and point
/// records, runs its documented undistort / stereo / fusion sequence, and
/// leaves a fused ASCII PLY behind. The pipeline's side of the contract is
/// writing a correct model and reading that file back; everything in
/// between is an opaque subprocess.
#[derive(Debug)]
pub struct ExternalToolBackend {
    pub tool: PathBuf,
    pub workspace: PathBuf,
}

impl ExternalToolBackend {
    pub fn new(tool: impl Into<PathBuf>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            workspace: workspace.into(),
        }
    }

    /// Write the sparse-model directory: per-camera intrinsics, per-image
    /// poses (world-to-camera, quaternion + translation), and an empty
    /// point-track file.
    pub fn write_model(&self, frames: &[ConditionedFrame]) -> Result<()> {
        let sparse = self.workspace.join("sparse");
        fs::create_dir_all(&sparse)?;

        let mut cameras = fs::File::create(sparse.join("cameras.txt"))?;
        writeln!(cameras, "# CAMERA_ID MODEL WIDTH HEIGHT FX FY CX CY")?;
        for (i, frame) in frames.iter().enumerate() {
            let k = &frame.intrinsics;
            writeln!(
                cameras,
                "{} PINHOLE {} {} {} {} {} {}",
                i + 1,
                k.width,
                k.height,
                k.fx,
                k.fy,
                k.cx,
                k.cy
            )?;
        }

        let mut images = fs::File::create(sparse.join("images.txt"))?;
        writeln!(images, "# IMAGE_ID QW QX QY QZ TX TY TZ CAMERA_ID NAME")?;
        for (i, frame) in frames.iter().enumerate() {
            let r_wc = frame.pose.rotation.transpose();
            let t_wc = -r_wc * frame.pose.translation;
            let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_wc));
            writeln!(
                images,
                "{} {} {} {} {} {} {} {} {} frame_{:06}.png",
                i + 1,
                q.w,
                q.i,
                q.j,
                q.k,
                t_wc.x,
                t_wc.y,
                t_wc.z,
                i + 1,
                i
            )?;
            // Second line per image holds 2D point observations; none yet.
            writeln!(images)?;
        }

        let mut points = fs::File::create(sparse.join("points3D.txt"))?;
        writeln!(points, "# POINT3D_ID X Y Z R G B ERROR TRACK")?;

        debug!(frames = frames.len(), path = %sparse.display(), "stereo model written");
        Ok(())
    }

    fn run_step(&self, step: &str) -> Result<()> {
        info!(tool = %self.tool.display(), step, "invoking dense-stereo tool");
        let output = Command::new(&self.tool)
            .arg(step)
            .arg("--workspace")
            .arg(&self.workspace)
            .output()?;
        if !output.status.success() {
            return Err(Error::ResourceExhaustion(format!(
                "dense-stereo tool step '{}' exited with {}: {}",
                step,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    pub fn fused_cloud_path(&self) -> PathBuf {
        self.workspace.join("fused.ply")
    }
}

impl DenseStereoBackend for ExternalToolBackend {
    fn name(&self) -> &'static str {
        "external-tool"
    }

    fn reconstruct_cloud(
        &self,
        frames: &[ConditionedFrame],
        graph: &ViewGraph,
    ) -> Result<PointCloud> {
        // The external tool estimates every image in the model, so only the
        // usable frames go into it.
        let usable: Vec<ConditionedFrame> = frames
            .iter()
            .enumerate()
            .filter(|(i, _)| !graph.is_excluded(*i))
            .map(|(_, f)| f.clone())
            .collect();

        self.write_model(&usable)?;
        self.run_step("undistort")?;
        self.run_step("stereo")?;
        self.run_step("fusion")?;
        read_ascii_ply(&self.fused_cloud_path())
    }
}

/// Read a fused point cloud from an ASCII PLY file carrying at least
/// x/y/z, optionally nx/ny/nz and red/green/blue per vertex.
pub fn read_ascii_ply(path: &Path) -> Result<PointCloud> {
    let text = fs::read_to_string(path)?;
    let mut lines = text.lines();

    if lines.next().map(str::trim) != Some("ply") {
        return Err(Error::DataIntegrity(format!(
            "{} is not a PLY file",
            path.display()
        )));
    }

    let mut vertex_count: usize = 0;
    let mut properties: Vec<String> = Vec::new();
    let mut in_vertex_element = false;
    for line in lines.by_ref() {
        let line = line.trim();
        if line == "end_header" {
            break;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields.as_slice() {
            ["format", "ascii", _] => {}
            ["format", other, _] => {
                return Err(Error::DataIntegrity(format!(
                    "unsupported PLY format '{other}', expected ascii"
                )));
            }
            ["element", "vertex", n] => {
                vertex_count = n.parse().map_err(|_| {
                    Error::DataIntegrity(format!("bad vertex count '{n}' in PLY header"))
                })?;
                in_vertex_element = true;
            }
            ["element", ..] => in_vertex_element = false,
            ["property", _, name] if in_vertex_element => {
                properties.push((*name).to_string());
            }
            _ => {}
        }
    }

    let index_of = |name: &str| properties.iter().position(|p| p == name);
    let (ix, iy, iz) = match (index_of("x"), index_of("y"), index_of("z")) {
        (Some(x), Some(y), Some(z)) => (x, y, z),
        _ => {
            return Err(Error::DataIntegrity(
                "PLY vertex element lacks x/y/z properties".into(),
            ))
        }
    };
    let normal_idx = match (index_of("nx"), index_of("ny"), index_of("nz")) {
        (Some(x), Some(y), Some(z)) => Some((x, y, z)),
        _ => None,
    };
    let color_idx = match (index_of("red"), index_of("green"), index_of("blue")) {
        (Some(r), Some(g), Some(b)) => Some((r, g, b)),
        _ => None,
    };

    let mut points = Vec::with_capacity(vertex_count);
    let mut normals = Vec::with_capacity(if normal_idx.is_some() { vertex_count } else { 0 });
    let mut colors = Vec::with_capacity(if color_idx.is_some() { vertex_count } else { 0 });

    for line in lines.take(vertex_count) {
        let values: Vec<f32> = line
            .split_whitespace()
            .map(|v| v.parse::<f32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::DataIntegrity(format!("bad PLY vertex line '{line}': {e}")))?;
        if values.len() < properties.len() {
            return Err(Error::DataIntegrity(format!(
                "PLY vertex line has {} values, header declares {}",
                values.len(),
                properties.len()
            )));
        }
        points.push(Point3::new(values[ix], values[iy], values[iz]));
        if let Some((nx, ny, nz)) = normal_idx {
            normals.push(Vector3::new(values[nx], values[ny], values[nz]));
        }
        if let Some((r, g, b)) = color_idx {
            colors.push([values[r] as u8, values[g] as u8, values[b] as u8]);
        }
    }
    if points.len() != vertex_count {
        return Err(Error::DataIntegrity(format!(
            "PLY declares {} vertices but carries {}",
            vertex_count,
            points.len()
        )));
    }

    let mut cloud = PointCloud::new(points);
    if normal_idx.is_some() {
        cloud = cloud.with_normals(normals)?;
    }
    if color_idx.is_some() {
        cloud = cloud.with_colors(colors)?;
    }
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ply(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fused.ply");
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn reads_full_vertex_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ply(
            dir.path(),
            "ply\n\
             format ascii 1.0\n\
             element vertex 2\n\
             property float x\n\
             property float y\n\
             property float z\n\
             property float nx\n\
             property float ny\n\
             property float nz\n\
             property uchar red\n\
             property uchar green\n\
             property uchar blue\n\
             end_header\n\
             0.0 0.5 2.0 0.0 0.0 -1.0 255 0 0\n\
             1.0 0.5 2.0 0.0 0.0 -1.0 0 255 0\n",
        );

        let cloud = read_ascii_ply(&path).unwrap();
        assert_eq!(cloud.len(), 2);
        assert!((cloud.points[1].x - 1.0).abs() < 1e-6);
        assert_eq!(cloud.colors.as_ref().unwrap()[0], [255, 0, 0]);
        assert!(cloud.normals.as_ref().unwrap()[0].z < 0.0);
    }

    #[test]
    fn reads_position_only_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ply(
            dir.path(),
            "ply\nformat ascii 1.0\nelement vertex 1\n\
             property float x\nproperty float y\nproperty float z\n\
             end_header\n1.0 2.0 3.0\n",
        );
        let cloud = read_ascii_ply(&path).unwrap();
        assert_eq!(cloud.len(), 1);
        assert!(cloud.normals.is_none());
        assert!(cloud.colors.is_none());
    }

    #[test]
    fn rejects_binary_ply() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ply(
            dir.path(),
            "ply\nformat binary_little_endian 1.0\nelement vertex 0\nend_header\n",
        );
        assert!(matches!(
            read_ascii_ply(&path),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn rejects_truncated_vertex_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ply(
            dir.path(),
            "ply\nformat ascii 1.0\nelement vertex 3\n\
             property float x\nproperty float y\nproperty float z\n\
             end_header\n1.0 2.0 3.0\n",
        );
        assert!(matches!(
            read_ascii_ply(&path),
            Err(Error::DataIntegrity(_))
        ));
    }

    #[test]
    fn missing_tool_surfaces_as_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ExternalToolBackend::new("/nonexistent/stereo-tool", dir.path());
        let err = backend.run_step("stereo").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn failing_tool_surfaces_as_resource_exhaustion() {
        let dir = tempfile::tempdir().unwrap();
        // `false` exits non-zero without touching the workspace.
        let backend = ExternalToolBackend::new("/bin/false", dir.path());
        let err = backend.run_step("stereo").unwrap_err();
        assert!(matches!(err, Error::ResourceExhaustion(_)));
    }
}
