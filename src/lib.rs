//! Offline textured-mesh reconstruction from posed RGB-D capture sessions.
//!
//! The umbrella crate re-exports the workspace members and carries the
//! process-level conveniences (thread pool, logging). Typical use:
//!
//! ```no_run
//! use roomscan::pipeline::Pipeline;
//! use roomscan::core::ReconConfig;
//!
//! roomscan::init_logging();
//! roomscan::init_thread_pool(None).expect("thread pool");
//!
//! let pipeline = Pipeline::new(ReconConfig::default());
//! let frames = Vec::new(); // supplied by the session reader
//! let result = pipeline.run(frames).expect("reconstruction");
//! println!("{} triangles", result.mesh.num_faces());
//! ```

pub use roomscan_core as core;
pub use roomscan_fusion as fusion;
pub use roomscan_ingest as ingest;
pub use roomscan_mesh as mesh;
pub use roomscan_pipeline as pipeline;
pub use roomscan_runtime as runtime;
pub use roomscan_stereo as stereo;

/// Initialize a single global Rayon thread pool for all CPU-parallel stages.
///
/// Call once at startup before running a reconstruction. Repeated calls are
/// idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `ROOMSCAN_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    roomscan_runtime::init_global_thread_pool(num_threads)
}

/// Install a `tracing` subscriber reading `RUST_LOG` for filtering. A no-op
/// when the host application already installed one.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}
