//! Execution-target resolution.
//!
//! The fusion inner loop can be hosted on an accelerated device or on the
//! CPU worker pool. The decision is made exactly once per run, up front:
//! requesting accelerated execution on a host without a usable adapter
//! either falls back (when the policy allows) or fails the run immediately.

use std::sync::Arc;

use futures::executor::block_on;
use tracing::{debug, info, warn};
use wgpu::{Backends, Instance, PowerPreference, RequestAdapterOptions};

use roomscan_core::{ExecutionPolicy, ExecutionTarget};

use crate::scheduler::WorkerPool;

/// Acquired GPU device and queue.
#[derive(Debug)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Acquire the best available adapter, preferring discrete hardware.
    /// `None` when the host has no usable adapter.
    pub fn new() -> Option<Self> {
        let instance = Instance::new(wgpu::InstanceDescriptor {
            backends: Backends::all(),
            ..Default::default()
        });

        let adapter = block_on(instance.request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))?;
        debug!("adapter: {}", adapter.get_info().name);

        let (device, queue) = block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("roomscan fusion device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .ok()?;

        Some(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

/// The execution context a run holds after target resolution.
///
/// The accelerated context owns the device plus a dedicated worker pool for
/// the fusion inner loop; the general context runs on the global pool.
pub enum ComputeContext {
    Accelerated { gpu: GpuContext, pool: WorkerPool },
    General,
}

impl ComputeContext {
    pub fn target(&self) -> ExecutionTarget {
        match self {
            ComputeContext::Accelerated { .. } => ExecutionTarget::Accelerated,
            ComputeContext::General => ExecutionTarget::General,
        }
    }

    /// Host a stage's inner loop on the pool the resolved target owns.
    /// Rayon parallel iterators inside the closure land on that pool.
    pub fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match self {
            ComputeContext::Accelerated { pool, .. } => pool.run(f),
            ComputeContext::General => f(),
        }
    }
}

/// Resolve the configured execution policy against the host, once per run.
///
/// Returns the context to hold for the rest of the run, or a device error
/// when accelerated execution was required and is unavailable.
pub fn resolve_execution_target(policy: &ExecutionPolicy) -> crate::Result<ComputeContext> {
    match policy.target {
        ExecutionTarget::General => Ok(ComputeContext::General),
        ExecutionTarget::Accelerated => match GpuContext::new() {
            Some(gpu) => {
                info!("accelerated execution target acquired");
                // Dedicated pool so the host loop driving the device is not
                // competing with the rest of the run for the global pool.
                let pool = WorkerPool::new("fusion", 0, None)?;
                Ok(ComputeContext::Accelerated { gpu, pool })
            }
            None if policy.allow_fallback => {
                warn!("no accelerated device available, falling back to general-purpose execution");
                Ok(ComputeContext::General)
            }
            None => Err(crate::Error::Device(
                "accelerated execution requested, no device available and fallback denied".into(),
            )),
        },
    }
}
