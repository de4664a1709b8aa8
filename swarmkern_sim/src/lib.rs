//! Scenario harness for the swarmkern runtime.
//!
//! Drives a small agent model through the runtime on either launcher and
//! checks the properties the message list and device error reporting must
//! uphold. Every run is reproducible from a single 64-bit seed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ SimWorld                                              │   │
//! │  │   VariableStore (agents) ──► CurveTable per function  │   │
//! │  │        │                          │                   │   │
//! │  │   publish ──► ArrayMessageHandler::build_index        │   │
//! │  │        │                          │                   │   │
//! │  │   diffuse ◄── filtered reads ◄────┘                   │   │
//! │  │        │                                              │   │
//! │  │   divide ──► births store + IdCounter                 │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │       │                                                     │
//! │  SimDevice (rayon pool | index-order loop)                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use swarmkern_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, 64).with_steps(10);
//! let result = runner.run(ScenarioId::RingDiffusion);
//! assert!(result.passed);
//! ```

mod device;
mod error;
mod exporter;
mod runner;
mod world;
pub mod scenarios;

pub use device::SimDevice;
pub use error::{SimError, SimResult};
pub use exporter::{AgentSnapshot, SimEvent, SimExport, SimFrame};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{full_window_radius, Newborn, SimConfig, SimWorld, StepReport};
