//! Production implementation of DeviceContext using rayon.

use crate::context::{validate_launch, DeviceContext};
use crate::error::LaunchError;
use crate::types::{LaunchConfig, ThreadIdx};
use rayon::prelude::*;

/// Parallel device backed by a rayon thread pool.
///
/// Logical threads are scheduled across all workers with no ordering
/// guarantee, which is what exposes write races in user models.
pub struct RayonDevice {
    /// Dedicated pool; the global pool is used when absent
    pool: Option<rayon::ThreadPool>,

    /// Seed for per-thread random state
    seed: u64,

    /// Threads per block
    block_dim: u32,
}

impl RayonDevice {
    /// Creates a device running on the global rayon pool.
    pub fn new(seed: u64) -> Self {
        Self {
            pool: None,
            seed,
            block_dim: LaunchConfig::DEFAULT_BLOCK_DIM,
        }
    }

    /// Creates a device with its own pool of `workers` threads.
    pub fn with_workers(seed: u64, workers: usize) -> Result<Self, LaunchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("swarmkern-worker-{i}"))
            .build()
            .map_err(LaunchError::thread_pool)?;
        Ok(Self {
            pool: Some(pool),
            seed,
            block_dim: LaunchConfig::DEFAULT_BLOCK_DIM,
        })
    }

    /// Sets the threads per block.
    pub fn with_block_dim(mut self, block_dim: u32) -> Self {
        self.block_dim = block_dim.max(1);
        self
    }
}

impl Default for RayonDevice {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeviceContext for RayonDevice {
    fn launch<F>(&self, config: LaunchConfig, thread_count: u32, kernel: F) -> Result<(), LaunchError>
    where
        F: Fn(ThreadIdx) + Send + Sync,
    {
        validate_launch(&config, thread_count)?;
        let block_dim = config.block_dim;
        let run = || {
            (0..thread_count)
                .into_par_iter()
                .for_each(|index| kernel(ThreadIdx::from_global(index, block_dim)));
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "rayon"
    }

    fn seed(&self) -> u64 {
        self.seed
    }

    fn block_dim(&self) -> u32 {
        self.block_dim
    }
}
