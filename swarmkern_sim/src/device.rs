//! Launcher selection for simulation runs.

use swarmkern_env::{DeviceContext, LaunchConfig, LaunchError, RayonDevice, SequentialDevice, ThreadIdx};

/// Either launcher, chosen at runtime.
///
/// `DeviceContext::launch` is generic, so the harness dispatches through an
/// enum instead of a trait object.
pub enum SimDevice {
    Parallel(RayonDevice),
    Sequential(SequentialDevice),
}

impl SimDevice {
    pub fn new(seed: u64, block_dim: u32, parallel: bool) -> Self {
        if parallel {
            Self::Parallel(RayonDevice::new(seed).with_block_dim(block_dim))
        } else {
            Self::Sequential(SequentialDevice::new(seed).with_block_dim(block_dim))
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel(_))
    }
}

impl DeviceContext for SimDevice {
    fn launch<F>(&self, config: LaunchConfig, thread_count: u32, kernel: F) -> Result<(), LaunchError>
    where
        F: Fn(ThreadIdx) + Send + Sync,
    {
        match self {
            Self::Parallel(device) => device.launch(config, thread_count, kernel),
            Self::Sequential(device) => device.launch(config, thread_count, kernel),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Parallel(device) => device.name(),
            Self::Sequential(device) => device.name(),
        }
    }

    fn seed(&self) -> u64 {
        match self {
            Self::Parallel(device) => device.seed(),
            Self::Sequential(device) => device.seed(),
        }
    }

    fn block_dim(&self) -> u32 {
        match self {
            Self::Parallel(device) => device.block_dim(),
            Self::Sequential(device) => device.block_dim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_sim_device_dispatch() {
        for parallel in [true, false] {
            let device = SimDevice::new(9, 64, parallel);
            assert_eq!(device.is_parallel(), parallel);
            assert_eq!(device.block_dim(), 64);
            assert_eq!(device.seed(), 9);

            let hits = AtomicU32::new(0);
            device
                .launch_threads(200, |_| {
                    hits.fetch_add(1, Ordering::Relaxed);
                })
                .unwrap();
            assert_eq!(hits.load(Ordering::Relaxed), 200);
        }
    }
}
