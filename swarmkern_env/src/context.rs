//! Core device context trait for swarmkern kernels.

use crate::error::LaunchError;
use crate::types::{LaunchConfig, ThreadIdx};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// The central interface for running data-parallel work.
///
/// A launch runs one logical thread per index in `0..thread_count`. Threads
/// never wait on each other: the only coordination available to kernel code
/// is atomics on shared buffers.
///
/// # Implementations
///
/// - **Production**: `RayonDevice` - every thread on the rayon pool
/// - **Simulation**: `SequentialDevice` - threads in index order, one at a time
///
/// # Determinism
///
/// Per-thread random state is derived from the context seed, a stream id and
/// the thread index, so it does not depend on scheduling.
pub trait DeviceContext: Send + Sync + 'static {
    /// Runs `kernel` once for every thread index below `thread_count`.
    ///
    /// Returns once every thread has completed. Grid slots beyond
    /// `thread_count` are not run.
    fn launch<F>(&self, config: LaunchConfig, thread_count: u32, kernel: F) -> Result<(), LaunchError>
    where
        F: Fn(ThreadIdx) + Send + Sync;

    /// Short implementation name (for logging).
    fn name(&self) -> &'static str;

    /// Returns the context's seed.
    fn seed(&self) -> u64;

    /// Default threads per block for launches built with [`DeviceContext::launch_threads`].
    fn block_dim(&self) -> u32 {
        LaunchConfig::DEFAULT_BLOCK_DIM
    }

    /// Launches `thread_count` threads on the smallest grid that fits them.
    fn launch_threads<F>(&self, thread_count: u32, kernel: F) -> Result<(), LaunchError>
    where
        F: Fn(ThreadIdx) + Send + Sync,
    {
        let config = LaunchConfig::for_threads(thread_count, self.block_dim());
        self.launch(config, thread_count, kernel)
    }

    /// Derives the random state of one thread.
    ///
    /// # Arguments
    /// * `stream` - Value separating independent uses (e.g. the step number)
    /// * `thread_index` - Flattened index of the thread
    fn thread_rng(&self, stream: u64, thread_index: u32) -> ChaCha8Rng {
        let combined = self
            .seed()
            .wrapping_mul(0x9e3779b97f4a7c15)
            .wrapping_add(stream.wrapping_mul(0x517cc1b727220a95))
            ^ thread_index as u64;
        ChaCha8Rng::seed_from_u64(combined)
    }
}

/// Checks that `config` can hold `thread_count` threads.
pub(crate) fn validate_launch(config: &LaunchConfig, thread_count: u32) -> Result<(), LaunchError> {
    if config.block_dim == 0 {
        return Err(LaunchError::ZeroBlockDim);
    }
    if config.capacity() < thread_count as u64 {
        return Err(LaunchError::GridTooSmall {
            threads: thread_count,
            grid_dim: config.grid_dim,
            block_dim: config.block_dim,
        });
    }
    Ok(())
}
