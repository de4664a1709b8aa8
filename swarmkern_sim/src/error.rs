//! Error type of the scenario harness.

use swarmkern_core::{CoreError, DeviceError};
use swarmkern_env::LaunchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Runtime rejected the setup or a launch failed
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Invalid world configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Export file could not be written
    #[error("Export failed: {0}")]
    Io(#[from] std::io::Error),

    /// Export could not be serialized
    #[error("Serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// The device error behind this error, if a launch reported one.
    pub fn device(&self) -> Option<&DeviceError> {
        match self {
            Self::Core(err) => err.as_device(),
            _ => None,
        }
    }
}

impl From<LaunchError> for SimError {
    fn from(err: LaunchError) -> Self {
        Self::Core(CoreError::Launch(err))
    }
}

pub type SimResult<T> = Result<T, SimError>;
