//! The pipeline run itself.
//!
//! One `Pipeline::run` call owns everything from raw frames to the terminal
//! mesh. Stage order: execution-target resolution, frame validation,
//! parallel conditioning, pose normalization, the depth-quality gate,
//! strategy dispatch, shared postprocessing. Errors carry the stage they
//! surfaced in; quality warnings accumulate and come back beside the mesh.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use roomscan_core::{
    ConditionedFrame, Error, Frame, QualityWarning, ReconConfig, ReconMode, Result,
};
use roomscan_ingest::{validate_frame, BilateralParams, Conditioner, FrameNormalizer};
use roomscan_mesh::processing::{
    laplacian_smooth, loop_subdivision, remove_statistical_outliers, simplify_to_budget,
};
use roomscan_mesh::TriangleMesh;
use roomscan_runtime::{resolve_execution_target, ComputeContext};
use roomscan_stereo::NativeBackend;

use crate::strategy::{FusionStrategy, ReconstructionStrategy, StereoStrategy};

/// Aggregate valid-pixel ratio below this coarsens the run's parameters.
const LOW_VALID_RATIO: f32 = 0.3;
/// Mean depth-noise estimate above this (meters) does the same.
const HIGH_NOISE_SIGMA: f32 = 0.02;

/// Everything a run owns: resolved configuration, the execution context,
/// and the warnings gathered so far. Passed through every stage; nothing
/// lives in module-level state.
pub struct RunContext {
    pub config: ReconConfig,
    pub compute: ComputeContext,
    pub warnings: Vec<QualityWarning>,
}

impl RunContext {
    pub fn warn(&mut self, warning: QualityWarning) {
        warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Terminal artifact of a run.
#[derive(Debug)]
pub struct ReconstructionResult {
    pub mesh: TriangleMesh,
    pub warnings: Vec<QualityWarning>,
}

pub struct Pipeline {
    config: ReconConfig,
}

impl Pipeline {
    pub fn new(config: ReconConfig) -> Self {
        Self { config }
    }

    /// Run with the strategy the configuration selects.
    pub fn run(&self, frames: Vec<Frame>) -> Result<ReconstructionResult> {
        match self.config.mode {
            ReconMode::Fusion => self.run_with(frames, &FusionStrategy),
            ReconMode::Stereo => {
                self.run_with(frames, &StereoStrategy::new(NativeBackend::default()))
            }
        }
    }

    /// Run with an explicit strategy (custom stereo backends, test doubles).
    pub fn run_with<S: ReconstructionStrategy>(
        &self,
        frames: Vec<Frame>,
        strategy: &S,
    ) -> Result<ReconstructionResult> {
        // Resolved once, before any work: a denied-fallback policy on a
        // host without the device fails here, not halfway through.
        let compute = resolve_execution_target(&self.config.execution)
            .map_err(Error::from)
            .map_err(|e| e.in_stage("execution-policy", None))?;
        info!(target = ?compute.target(), strategy = strategy.name(), "run starting");

        let mut ctx = RunContext {
            config: self.config.clone(),
            compute,
            warnings: Vec::new(),
        };

        let frames = self.validate(frames)?;
        let conditioned = self.condition(frames, &mut ctx);
        let normalized = self.normalize(conditioned);
        self.quality_gate(&normalized, &mut ctx);

        let mut mesh = strategy
            .reconstruct(&normalized, &mut ctx)
            .map_err(|e| e.in_stage(strategy.name(), None))?;
        drop(normalized);

        postprocess(&mut mesh, &mut ctx);
        debug_assert!(mesh.indices_valid());
        info!(
            vertices = mesh.num_vertices(),
            triangles = mesh.num_faces(),
            warnings = ctx.warnings.len(),
            "run complete"
        );

        Ok(ReconstructionResult {
            mesh,
            warnings: ctx.warnings,
        })
    }

    fn validate(&self, frames: Vec<Frame>) -> Result<Vec<Frame>> {
        let mut prev = None;
        for (i, frame) in frames.iter().enumerate() {
            validate_frame(frame, prev).map_err(|e| e.in_stage("ingest", Some(i)))?;
            prev = Some(frame.timestamp);
        }
        Ok(frames)
    }

    /// Conditioning is pure per frame, so it fans out over the pool; the
    /// collect keeps capture order.
    fn condition(&self, frames: Vec<Frame>, ctx: &mut RunContext) -> Vec<ConditionedFrame> {
        let conditioner = Conditioner::new(
            ctx.config.truncation,
            BilateralParams {
                kernel_size: ctx.config.filter_kernel_size,
                sigma_spatial: ctx.config.filter_sigma_spatial,
                sigma_range: ctx.config.filter_sigma_range,
            },
            ctx.config.outlier_std_ratio,
        );

        let total = frames.len();
        let conditioned: Vec<ConditionedFrame> = frames
            .into_par_iter()
            .map(|frame| conditioner.condition(frame))
            .collect::<Vec<Option<ConditionedFrame>>>()
            .into_iter()
            .flatten()
            .collect();

        let skipped = total - conditioned.len();
        if skipped > 0 {
            ctx.warn(QualityWarning::SkippedFrames { count: skipped });
        }
        debug!(kept = conditioned.len(), skipped, "conditioning done");
        conditioned
    }

    fn normalize(&self, frames: Vec<ConditionedFrame>) -> Vec<ConditionedFrame> {
        let normalizer = FrameNormalizer::default();
        frames
            .into_iter()
            .map(|frame| normalizer.normalize(frame))
            .collect()
    }

    /// Decide once, from aggregate conditioning diagnostics, whether the
    /// configured parameters are adequate or must be coarsened for this
    /// capture's depth quality.
    fn quality_gate(&self, frames: &[ConditionedFrame], ctx: &mut RunContext) {
        if frames.is_empty() {
            return;
        }
        let n = frames.len() as f32;
        let mean_ratio = frames.iter().map(|f| f.valid_ratio()).sum::<f32>() / n;
        let mean_noise = frames.iter().map(|f| f.noise_estimate).sum::<f32>() / n;
        debug!(mean_ratio, mean_noise, "depth-quality diagnostics");

        let mut coarsen = false;
        if mean_ratio < LOW_VALID_RATIO {
            ctx.warn(QualityWarning::LowValidDepth { ratio: mean_ratio });
            coarsen = true;
        }
        if mean_noise > HIGH_NOISE_SIGMA {
            ctx.warn(QualityWarning::HighDepthNoise { sigma: mean_noise });
            coarsen = true;
        }
        if coarsen {
            ctx.config.voxel_length *= 2.0;
            ctx.config.truncation *= 2.0;
            // Subdividing a noisy surface amplifies the noise.
            ctx.config.subdivide = false;
            ctx.warn(QualityWarning::CoarsenedParameters {
                voxel_length: ctx.config.voxel_length,
            });
        }
    }
}

/// The shared postprocessing chain both strategies' meshes pass through.
/// Every stage tolerates an empty mesh; emptiness is a warning, not an
/// error.
fn postprocess(mesh: &mut TriangleMesh, ctx: &mut RunContext) {
    if ctx.config.outlier_std_ratio > 0.0 {
        let removed = remove_statistical_outliers(
            mesh,
            ctx.config.outlier_neighbors,
            ctx.config.outlier_std_ratio,
        );
        debug!(removed, "outlier vertices removed");
    }
    laplacian_smooth(mesh, ctx.config.smooth_iterations, ctx.config.smooth_lambda);
    if ctx.config.subdivide {
        loop_subdivision(mesh);
    }
    simplify_to_budget(mesh, ctx.config.target_triangles);
    mesh.compute_vertex_normals();

    if mesh.num_faces() == 0 {
        ctx.warn(QualityWarning::EmptyMesh { triangles: 0 });
    }
}
