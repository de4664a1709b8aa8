//! swarmkern core - device-side services for data-parallel agent simulation
//!
//! Agent functions run as one logical thread per agent. This crate provides
//! what those threads need while they run and what the host needs between
//! launches:
//! 1. **Variable binding**: name-hashed lookup of agent, message and
//!    environment buffers (`curve`), with typed get/set from each thread
//! 2. **Array messaging**: per-thread candidate output, a scatter build into
//!    a dense list of fixed length, and direct or windowed input
//! 3. **Device error reporting**: the first failing thread records a
//!    printf-style message, every failure is counted, the host decodes it
//!    after the launch
//!
//! Device-side checks are compiled in with the `seatbelts` feature (on by
//! default). Without it, failed checks read zero and drop writes silently.

pub mod buffer;
pub mod curve;
pub mod device_api;
pub mod environment;
pub mod error;
pub mod exception;
pub mod format;
pub mod kernel;
pub mod messaging;
pub mod random;
pub mod scan;
pub mod store;

/// True when device-side checks are compiled in.
pub const SEATBELTS: bool = cfg!(feature = "seatbelts");

// Re-export key types for convenience
pub use buffer::{DeviceBuffer, DeviceType};
pub use curve::{
    namespace_hash, variable_hash, CurveTable, NamespaceHash, VariableBinding, VariableDescriptor,
    ID_VARIABLE_NAME, INDEX_VARIABLE_NAME, STEP_COUNTER_NAME,
};
pub use device_api::{AgentOut, DeviceApi, Id, ReadOnlyDeviceApi, ID_NOT_SET};
pub use environment::{DeviceEnvironment, EnvironmentProperties};
pub use error::{CoreError, CoreResult};
pub use exception::{DeviceError, DeviceExceptionBuffer, DeviceThread, ExceptionDetail};
pub use kernel::{
    launch_agent_function, launch_agent_function_condition, AgentFunctionLaunch, AgentStatus,
    ConditionLaunch, FunctionHashes, FunctionReport,
};
pub use messaging::{
    ArrayMessageHandler, ArrayMetaData, BuildReport, MessageSpecialisationHandler, Messaging,
    MsgArray, MsgNone,
};
pub use random::AgentRandom;
pub use scan::{IdCounter, ScanCompaction, ScanFlags};
pub use store::VariableStore;
