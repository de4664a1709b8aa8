//! Error types for the swarmkern environment abstraction.

use thiserror::Error;

/// Errors that can occur when launching work on a device.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The grid cannot hold every requested thread
    #[error("Launch of {threads} threads does not fit a grid of {grid_dim}x{block_dim}")]
    GridTooSmall {
        threads: u32,
        grid_dim: u32,
        block_dim: u32,
    },

    /// A block size of zero was requested
    #[error("Block dimension must be non-zero")]
    ZeroBlockDim,

    /// The worker pool could not be created
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl LaunchError {
    /// Creates a thread pool error.
    pub fn thread_pool(msg: impl std::fmt::Display) -> Self {
        Self::ThreadPool(msg.to_string())
    }
}
