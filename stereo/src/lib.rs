//! Dense multi-view stereo reconstruction path.
//!
//! The alternative to volumetric fusion: a pose-driven view graph declares
//! which frames may serve as stereo sources for each reference frame, a
//! plane-sweep estimator produces per-frame dense depth, and a fusion step
//! merges the depth maps into one oriented point cloud for surface
//! reconstruction. The whole path sits behind [`DenseStereoBackend`] so an
//! external batch tool can stand in for the in-process estimator.

pub mod backend;
pub mod estimate;
pub mod fuse;
pub mod graph;

pub use backend::{DenseStereoBackend, ExternalToolBackend, NativeBackend};
pub use estimate::{estimate_depth_maps, PlaneSweepParams};
pub use fuse::{fuse_depth_maps, FusionParams};
pub use graph::{check_rig_consistency, ViewGraph, ViewGraphParams};
