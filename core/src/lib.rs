pub mod config;
pub mod frame;
pub mod geometry;
pub mod point_cloud;
pub mod warnings;

pub use config::{ExecutionPolicy, ExecutionTarget, ReconConfig, ReconMode};
pub use frame::{ConditionedFrame, DepthMap, Frame};
pub use geometry::{CameraIntrinsics, Pose};
pub use point_cloud::PointCloud;
pub use warnings::QualityWarning;

pub type Result<T> = std::result::Result<T, Error>;

/// Run-level error taxonomy.
///
/// `DataIntegrity` always indicates corrupt upstream capture and is never
/// retried. `ResourceExhaustion` is fatal for the current execution target;
/// the orchestrator may retry once on another target per its fallback policy.
/// `DegenerateGraph` is fatal only when it affects every frame.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("data integrity: {0}")]
    DataIntegrity(String),

    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("degenerate view graph: {0}")]
    DegenerateGraph(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stage '{stage}' failed{}: {source}", frame.map(|f| format!(" at frame {f}")).unwrap_or_default())]
    Stage {
        stage: &'static str,
        frame: Option<usize>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Tag an error with the pipeline stage (and optionally the frame index)
    /// it surfaced in. Already-tagged errors are left as-is so the innermost
    /// stage wins.
    pub fn in_stage(self, stage: &'static str, frame: Option<usize>) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                frame,
                source: Box::new(other),
            },
        }
    }

    /// The root error, unwrapping stage tags.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tagging_keeps_innermost_stage() {
        let err = Error::DataIntegrity("bad timestamp".into())
            .in_stage("ingest", Some(3))
            .in_stage("pipeline", None);

        match &err {
            Error::Stage { stage, frame, .. } => {
                assert_eq!(*stage, "ingest");
                assert_eq!(*frame, Some(3));
            }
            other => panic!("expected stage error, got {other:?}"),
        }
        assert!(matches!(err.root(), Error::DataIntegrity(_)));
    }

    #[test]
    fn stage_error_display_includes_frame() {
        let err = Error::DataIntegrity("x".into()).in_stage("fusion", Some(7));
        let msg = err.to_string();
        assert!(msg.contains("fusion"));
        assert!(msg.contains("frame 7"));
    }
}
