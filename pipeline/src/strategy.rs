//! Reconstruction strategies.
//!
//! Both paths end at a `TriangleMesh`, which is the whole point: the
//! orchestrator dispatches on one trait method and everything downstream is
//! strategy-agnostic.

use tracing::{debug, info};

use roomscan_core::{ConditionedFrame, QualityWarning, Result};
use roomscan_fusion::TsdfVolume;
use roomscan_mesh::{reconstruct_oriented_points, TriangleMesh};
use roomscan_stereo::{DenseStereoBackend, ViewGraph, ViewGraphParams};

use crate::orchestrator::RunContext;

pub trait ReconstructionStrategy {
    fn name(&self) -> &'static str;

    /// Build a mesh from the conditioned, normalized frame sequence.
    /// Warnings go into the context; errors abort the run.
    fn reconstruct(&self, frames: &[ConditionedFrame], ctx: &mut RunContext)
        -> Result<TriangleMesh>;
}

/// Volumetric TSDF fusion: integrate frames one at a time, in order, then
/// polygonize the zero crossing.
#[derive(Debug, Default)]
pub struct FusionStrategy;

impl ReconstructionStrategy for FusionStrategy {
    fn name(&self) -> &'static str {
        "fusion"
    }

    fn reconstruct(
        &self,
        frames: &[ConditionedFrame],
        ctx: &mut RunContext,
    ) -> Result<TriangleMesh> {
        let voxel_length = ctx.config.voxel_length;
        let truncation = ctx.config.truncation;

        // The resolved execution target hosts the inner loop on its pool.
        // Accumulation state is ordered: frames integrate sequentially,
        // parallelism lives inside each frame's voxel update.
        let volume = ctx.compute.install(|| {
            let mut volume = TsdfVolume::new(voxel_length, truncation);
            for (i, frame) in frames.iter().enumerate() {
                volume.integrate(frame);
                debug!(
                    frame = i,
                    blocks = volume.num_blocks(),
                    "frame integrated"
                );
            }
            volume
        });

        info!(
            frames = frames.len(),
            voxels = volume.observed_voxels(),
            "fusion complete"
        );
        Ok(volume.extract_mesh())
    }
}

/// Dense multi-view stereo behind a [`DenseStereoBackend`].
pub struct StereoStrategy<B> {
    pub backend: B,
    pub graph_params: ViewGraphParams,
}

impl<B> StereoStrategy<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            graph_params: ViewGraphParams::default(),
        }
    }
}

impl<B: DenseStereoBackend> ReconstructionStrategy for StereoStrategy<B> {
    fn name(&self) -> &'static str {
        "stereo"
    }

    fn reconstruct(
        &self,
        frames: &[ConditionedFrame],
        ctx: &mut RunContext,
    ) -> Result<TriangleMesh> {
        let graph = ViewGraph::build(frames, &self.graph_params)?;
        if !graph.excluded.is_empty() {
            ctx.warn(QualityWarning::ExcludedStereoFrames {
                count: graph.excluded.len(),
                total: frames.len(),
            });
        }

        let cloud = self.backend.reconstruct_cloud(frames, &graph)?;
        info!(
            backend = self.backend.name(),
            points = cloud.len(),
            "stereo cloud fused"
        );

        // The splat band only needs to cover local surface uncertainty, a
        // few lattice cells, not the full depth-conditioning range.
        let band = ctx.config.truncation.min(3.0 * ctx.config.voxel_length);
        reconstruct_oriented_points(&cloud, ctx.config.voxel_length, band)
    }
}
