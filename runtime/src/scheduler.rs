//! CPU worker pools.
//!
//! Conditioning fans out across frames; fusion fans out across voxel blocks
//! within one frame. Both run on a named rayon pool, optionally pinned to
//! specific cores so a co-located capture service keeps its own cores.

use std::sync::{Arc, OnceLock};

use core_affinity::CoreId;
use rayon::ThreadPool;

use crate::Result;

/// A named rayon pool with optional core pinning.
pub struct WorkerPool {
    pub name: String,
    pool: Arc<ThreadPool>,
}

impl WorkerPool {
    pub fn new(name: &str, num_threads: usize, core_ids: Option<Vec<usize>>) -> Result<Self> {
        let thread_name_prefix = format!("roomscan-{}-", name);
        let pinned = core_ids.clone();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}{}", thread_name_prefix, i))
            .start_handler(move |i| {
                if let Some(ref cores) = pinned {
                    if let Some(&core) = cores.get(i % cores.len()) {
                        core_affinity::set_for_current(CoreId { id: core });
                    }
                }
            })
            .build()
            .map_err(|e| crate::Error::Runtime(e.to_string()))?;

        Ok(Self {
            name: name.to_string(),
            pool: Arc::new(pool),
        })
    }

    /// Run a closure inside this pool; rayon parallel iterators used within
    /// the closure execute on the pool's threads.
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

static GLOBAL_POOL_INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialize the process-wide rayon pool used by all CPU-parallel stages.
///
/// Repeated calls are idempotent and return the first initialization result.
/// Priority order: explicit `num_threads`, the `ROOMSCAN_CPU_THREADS` env
/// var, then the rayon default.
pub fn init_global_thread_pool(num_threads: Option<usize>) -> std::result::Result<(), String> {
    GLOBAL_POOL_INIT
        .get_or_init(|| {
            let threads = num_threads.or_else(|| {
                std::env::var("ROOMSCAN_CPU_THREADS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            });

            let mut builder = rayon::ThreadPoolBuilder::new();
            if let Some(n) = threads {
                builder = builder.num_threads(n);
            }
            builder
                .thread_name(|i| format!("roomscan-worker-{}", i))
                .build_global()
                .map_err(|e| e.to_string())
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn pool_runs_parallel_work() {
        let pool = WorkerPool::new("test", 2, None).unwrap();
        let sum: i64 = pool.run(|| (0..1000i64).into_par_iter().sum());
        assert_eq!(sum, 499_500);
        assert_eq!(pool.num_threads(), 2);
    }

    #[test]
    fn global_init_is_idempotent() {
        let first = init_global_thread_pool(Some(2));
        let second = init_global_thread_pool(Some(4));
        assert_eq!(first, second);
    }
}
