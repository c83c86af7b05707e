//! Volumetric depth fusion.
//!
//! Builds a truncated signed-distance field over a sparse block lattice,
//! one conditioned frame at a time, then extracts the zero crossing as a
//! triangle mesh. Integration is a weighted running average per voxel:
//! insensitive to frame order only in the limit of many frames with
//! independent noise, which is the intended behavior, not a defect.

pub mod extract;
pub mod integrate;
pub mod volume;

pub use volume::{TsdfVolume, VoxelBlock, VoxelSample};
