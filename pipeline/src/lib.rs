//! Run orchestration.
//!
//! The pipeline owns the whole reconstruction run: frame validation,
//! parallel depth conditioning, pose normalization, the depth-quality gate,
//! execution-target resolution, strategy dispatch, and the shared mesh
//! postprocessing chain. All run state lives in a caller-visible
//! [`RunContext`]; there are no process-wide singletons.

pub mod orchestrator;
pub mod strategy;

pub use orchestrator::{Pipeline, ReconstructionResult, RunContext};
pub use strategy::{FusionStrategy, ReconstructionStrategy, StereoStrategy};
