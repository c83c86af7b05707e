//! Frame ingest: validation, depth conditioning, pose normalization.
//!
//! Conditioning is pure per frame (no state across frames), which is what
//! lets the orchestrator fan frames out over the worker pool while keeping
//! capture order in the output.

pub mod bilateral;
pub mod condition;
pub mod normalize;
pub mod outliers;

pub use bilateral::{bilateral_filter_depth, BilateralParams};
pub use condition::{validate_frame, Conditioner};
pub use normalize::FrameNormalizer;
pub use outliers::{estimate_depth_noise, remove_depth_outliers};
