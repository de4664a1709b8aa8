//! swarmkern Execution Environment Abstraction
//!
//! This crate provides the launch abstraction allowing swarmkern kernels to
//! run both **in parallel** (rayon) and **deterministically** (one thread at
//! a time, in index order).
//!
//! # Core Concept: The Kernel Launch
//!
//! A kernel is a closure run once per logical thread. Each thread learns its
//! identity from a [`ThreadIdx`] (block and thread coordinates); all
//! cross-thread coordination happens through atomics owned by the caller.
//!
//! # Example
//!
//! ```ignore
//! use swarmkern_env::{DeviceContext, RayonDevice};
//!
//! let device = RayonDevice::new(42);
//! device.launch_threads(1024, |t| {
//!     let i = t.global_index();
//!     // per-agent work
//! })?;
//! ```

mod context;
mod error;
mod rayon_impl;
mod sequential_impl;
mod types;

pub use context::DeviceContext;
pub use error::LaunchError;
pub use rayon_impl::RayonDevice;
pub use sequential_impl::SequentialDevice;
pub use types::{Dim3, LaunchConfig, ThreadIdx};
