//! Host-side error types for the swarmkern runtime.
//!
//! These cover configuration mistakes caught before a launch and the
//! decoded result of a failed launch. Conditions detected *inside* a kernel
//! never surface here directly: they go through the device exception buffer
//! and arrive as [`CoreError::Device`] once the host drains it.

use crate::exception::DeviceError;
use swarmkern_env::LaunchError;
use thiserror::Error;

/// Errors returned by host-side runtime operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two variables hash to the same binding key
    #[error("Variable '{name}' collides with '{existing}' in namespace {namespace:#010x}")]
    HashCollision {
        name: String,
        existing: String,
        namespace: u32,
    },

    /// Variable was never registered
    #[error("Variable '{0}' is not registered")]
    UnknownVariable(String),

    /// Variable accessed with a type other than the registered one
    #[error("Variable '{name}' holds {expected}, accessed as {actual}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    /// Host access outside a variable's slots or elements
    #[error("Index {index} is out of bounds for variable '{name}' of length {length}")]
    OutOfBounds {
        name: String,
        index: u32,
        length: u32,
    },

    /// Same variable name declared twice in one store
    #[error("Variable '{0}' is declared more than once")]
    DuplicateVariable(String),

    /// User variable declared with the reserved prefix
    #[error("Variable name '{0}' uses the reserved '_' prefix")]
    ReservedName(String),

    /// Array message list declared with no bins
    #[error("Array message list '{0}' must have a non-zero length")]
    ZeroLengthMessageList(String),

    /// Any other invalid setup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A guarded launch reported device-side errors
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The launcher rejected the launch
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

impl CoreError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns the device error if this is one.
    pub fn as_device(&self) -> Option<&DeviceError> {
        match self {
            Self::Device(err) => Some(err),
            _ => None,
        }
    }
}

/// Result alias for host-side runtime operations.
pub type CoreResult<T> = Result<T, CoreError>;
