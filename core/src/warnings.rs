use std::fmt;

/// Non-fatal quality diagnostics, accumulated during a run and returned
/// alongside the terminal mesh. A partial or ugly mesh is still a usable
/// result; these tell the caller why it looks the way it does.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityWarning {
    /// Frames rejected by conditioning (zero valid samples).
    SkippedFrames { count: usize },
    /// Aggregate valid-pixel ratio over the run fell below threshold.
    LowValidDepth { ratio: f32 },
    /// Estimated depth noise exceeded the expected sensor band.
    HighDepthNoise { sigma: f32 },
    /// Stereo frames excluded for having zero usable source images.
    ExcludedStereoFrames { count: usize, total: usize },
    /// The terminal mesh carries no (or almost no) triangles.
    EmptyMesh { triangles: usize },
    /// Depth quality forced coarser voxel/filter parameters.
    CoarsenedParameters { voxel_length: f32 },
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SkippedFrames { count } => {
                write!(f, "{count} frames skipped by depth conditioning")
            }
            Self::LowValidDepth { ratio } => {
                write!(f, "valid-depth ratio {ratio:.3} below expected range")
            }
            Self::HighDepthNoise { sigma } => {
                write!(f, "depth noise estimate {sigma:.4} m above expected range")
            }
            Self::ExcludedStereoFrames { count, total } => {
                write!(f, "{count} of {total} frames excluded from stereo estimation")
            }
            Self::EmptyMesh { triangles } => {
                write!(f, "output mesh is empty or near-empty ({triangles} triangles)")
            }
            Self::CoarsenedParameters { voxel_length } => {
                write!(f, "parameters coarsened to voxel length {voxel_length} m")
            }
        }
    }
}
