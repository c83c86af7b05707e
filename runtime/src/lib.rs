pub mod device;
pub mod scheduler;

pub use device::{resolve_execution_target, ComputeContext, GpuContext};
pub use scheduler::{init_global_thread_pool, WorkerPool};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("device error: {0}")]
    Device(String),
}

impl From<Error> for roomscan_core::Error {
    fn from(err: Error) -> Self {
        roomscan_core::Error::ResourceExhaustion(err.to_string())
    }
}
