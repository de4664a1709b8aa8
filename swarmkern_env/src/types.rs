//! Common types for the swarmkern execution environment.

use serde::{Deserialize, Serialize};

/// Three-component launch coordinate, laid out like a CUDA `uint3`.
///
/// Launches are one dimensional, so `y` and `z` are always 0. The extra
/// components exist so that error reports carry the full coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    /// Creates a 1-D coordinate.
    pub const fn x(x: u32) -> Self {
        Self { x, y: 0, z: 0 }
    }

    /// Returns the components as an array.
    pub fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }
}

impl std::fmt::Display for Dim3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

/// Identity of one logical thread within a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadIdx {
    /// Block coordinate within the grid
    pub block_idx: Dim3,

    /// Thread coordinate within the block
    pub thread_idx: Dim3,

    /// Threads per block
    pub block_dim: u32,
}

impl ThreadIdx {
    /// Builds the coordinates of the thread with the given flattened index.
    pub fn from_global(index: u32, block_dim: u32) -> Self {
        let block_dim = block_dim.max(1);
        Self {
            block_idx: Dim3::x(index / block_dim),
            thread_idx: Dim3::x(index % block_dim),
            block_dim,
        }
    }

    /// Returns `blockIdx.x * blockDim.x + threadIdx.x`.
    #[inline]
    pub fn global_index(&self) -> u32 {
        self.block_idx.x * self.block_dim + self.thread_idx.x
    }
}

/// Grid/block shape of a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Number of blocks
    pub grid_dim: u32,

    /// Threads per block
    pub block_dim: u32,
}

impl LaunchConfig {
    /// Default threads per block.
    pub const DEFAULT_BLOCK_DIM: u32 = 256;

    /// Smallest grid covering `thread_count` threads with the given block size.
    pub fn for_threads(thread_count: u32, block_dim: u32) -> Self {
        let block_dim = block_dim.max(1);
        Self {
            grid_dim: thread_count.div_ceil(block_dim),
            block_dim,
        }
    }

    /// Total number of thread slots in the grid.
    pub fn capacity(&self) -> u64 {
        self.grid_dim as u64 * self.block_dim as u64
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            grid_dim: 1,
            block_dim: Self::DEFAULT_BLOCK_DIM,
        }
    }
}
