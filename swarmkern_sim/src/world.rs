//! SimWorld - a ring of agents exchanging array messages.
//!
//! Every step runs three agent functions:
//!
//! ```text
//!  publish (MsgArray out)     each agent writes `value` into bin `bin`
//!        │
//!  build_index                candidates scattered into the "heat" list
//!        │
//!  diffuse (MsgArray in)      each agent moves toward the mean of the
//!        │                    `radius` bins either side of its own
//!  divide (agent output)      optional: agents spawn newborns
//! ```
//!
//! With one agent per bin the neighbourhood is symmetric, so diffusion
//! conserves the total value.

use crate::device::SimDevice;
use crate::error::{SimError, SimResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use swarmkern_core::{
    launch_agent_function, AgentFunctionLaunch, AgentStatus, ArrayMessageHandler, BuildReport,
    CurveTable, EnvironmentProperties, FunctionHashes, IdCounter, MessageSpecialisationHandler,
    MsgArray, MsgNone, ScanCompaction, VariableDescriptor, VariableStore, ID_VARIABLE_NAME,
};
use tracing::debug;

const INSTANCE: &str = "swarmkern_sim";
const AGENT: &str = "cell";
const MESSAGE: &str = "heat";

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of agents
    pub agent_count: u32,

    /// Bins in the message list (0 = one per agent)
    pub message_length: u32,

    /// Neighbourhood radius read by `diffuse`
    pub radius: u32,

    /// Steps run by `SimWorld::run`
    pub steps: u32,

    /// Threads per block
    pub block_size: u32,

    /// Run launches on the rayon pool instead of in index order
    pub parallel: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            agent_count: 64,
            message_length: 0,
            radius: 1,
            steps: 10,
            block_size: 64,
            parallel: true,
        }
    }
}

impl SimConfig {
    /// Bins in the message list once the default is resolved.
    pub fn resolved_message_length(&self) -> u32 {
        if self.message_length == 0 {
            self.agent_count
        } else {
            self.message_length
        }
    }
}

/// `requested` if its filter visits all `2 * radius` neighbours of a list of
/// `length` bins, otherwise the largest radius that does (or `length - 1` on
/// lists too short for any other).
///
/// A window is complete when `2 * radius + 1 < length`, or when
/// `radius == length - 1` (every other bin twice).
pub fn full_window_radius(requested: u32, length: u32) -> u32 {
    let requested = requested.max(1);
    if 2 * requested as u64 + 1 < length as u64 || requested as u64 + 1 == length as u64 {
        return requested;
    }
    match length.saturating_sub(2) / 2 {
        0 => length.saturating_sub(1).max(1),
        radius => radius,
    }
}

/// Summary of one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepReport {
    /// Step number, starting at 0
    pub step: u32,

    /// Messages published
    pub messages: u32,

    /// Outcome of the index build
    pub build: BuildReport,

    /// Newborns created by `divide`
    pub births: u32,

    /// Sum of all agent values after the step
    pub total_value: f64,

    /// Max minus min agent value after the step
    pub spread: f32,
}

/// An agent created by `divide`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Newborn {
    pub id: u32,
    pub parent: u32,
    pub bin: u32,
    pub value: f32,
}

/// The simulation container.
pub struct SimWorld {
    config: SimConfig,
    device: SimDevice,
    agents: VariableStore,
    births: VariableStore,
    heat: ArrayMessageHandler,
    environment: EnvironmentProperties,
    scan: ScanCompaction,
    ids: IdCounter,
    newborns: Vec<Newborn>,
    birth_probability: f32,
    step: u32,
}

impl SimWorld {
    /// Creates a ring with agent `i` in bin `i` and a random value in `[0, 100)`.
    pub fn new(config: SimConfig) -> SimResult<Self> {
        if config.agent_count == 0 {
            return Err(SimError::config("agent_count must be at least 1"));
        }
        if config.radius == 0 {
            return Err(SimError::config("radius must be at least 1"));
        }
        let count = config.agent_count;
        let length = config.resolved_message_length();
        if full_window_radius(config.radius, length) != config.radius {
            return Err(SimError::config(format!(
                "radius {} cuts the neighbourhood short on a list of {} bins",
                config.radius, length
            )));
        }

        let agents = VariableStore::new(count, Self::agent_variables())?;
        let births = VariableStore::new(count, Self::agent_variables())?;
        let mut heat =
            ArrayMessageHandler::new(MESSAGE, length, vec![VariableDescriptor::scalar::<f32>("value")])?;
        heat.resize_candidates(count);
        heat.allocate_metadata();

        let environment =
            EnvironmentProperties::new(vec![VariableDescriptor::scalar::<f32>("rate")])?;
        environment.set::<f32>("rate", 0.5)?;

        // Derive separate seeds for initial state and device streams
        let state_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let mut rng = ChaCha8Rng::seed_from_u64(state_seed);
        for i in 0..count {
            agents.set::<u32>(ID_VARIABLE_NAME, i, i + 1)?;
            agents.set::<u32>("bin", i, i % length)?;
            agents.set::<f32>("value", i, rng.gen_range(0.0..100.0))?;
        }

        Ok(Self {
            device: SimDevice::new(config.seed, config.block_size, config.parallel),
            agents,
            births,
            heat,
            environment,
            scan: ScanCompaction::new(count),
            ids: IdCounter::starting_at(count + 1),
            newborns: Vec::new(),
            birth_probability: 0.0,
            step: 0,
            config,
        })
    }

    fn agent_variables() -> Vec<VariableDescriptor> {
        vec![
            VariableDescriptor::scalar::<u32>(ID_VARIABLE_NAME),
            VariableDescriptor::scalar::<u32>("bin"),
            VariableDescriptor::scalar::<f32>("value"),
            VariableDescriptor::scalar::<f32>("probe"),
            VariableDescriptor::scalar::<u32>("parent"),
        ]
    }

    /// Enables the `divide` function with the given per-agent probability.
    pub fn with_birth_probability(mut self, probability: f32) -> Self {
        self.birth_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn device(&self) -> &SimDevice {
        &self.device
    }

    pub fn agent_count(&self) -> u32 {
        self.config.agent_count
    }

    pub fn message_length(&self) -> u32 {
        self.heat.length()
    }

    /// Steps completed so far.
    pub fn step_count(&self) -> u32 {
        self.step
    }

    /// Agents created by `divide`, in creation order.
    pub fn newborns(&self) -> &[Newborn] {
        &self.newborns
    }

    /// Next id the counter will hand out.
    pub fn next_id(&self) -> u32 {
        self.ids.peek()
    }

    pub fn ids(&self) -> SimResult<Vec<u32>> {
        Ok(self.agents.column_values(ID_VARIABLE_NAME)?)
    }

    pub fn bins(&self) -> SimResult<Vec<u32>> {
        Ok(self.agents.column_values("bin")?)
    }

    pub fn values(&self) -> SimResult<Vec<f32>> {
        Ok(self.agents.column_values("value")?)
    }

    /// Neighbourhood sums computed by the last `diffuse`.
    pub fn probes(&self) -> SimResult<Vec<f32>> {
        Ok(self.agents.column_values("probe")?)
    }

    /// Values of the last built message list.
    pub fn message_values(&self) -> SimResult<Vec<f32>> {
        Ok(self.heat.messages().column_values("value")?)
    }

    pub fn set_bin(&mut self, agent: u32, bin: u32) -> SimResult<()> {
        Ok(self.agents.set::<u32>("bin", agent, bin)?)
    }

    pub fn set_value(&mut self, agent: u32, value: f32) -> SimResult<()> {
        Ok(self.agents.set::<f32>("value", agent, value)?)
    }

    /// Fraction of the gap to the neighbourhood mean closed per step.
    pub fn set_diffusion_rate(&mut self, rate: f32) -> SimResult<()> {
        Ok(self.environment.set::<f32>("rate", rate)?)
    }

    /// Runs `config.steps` steps.
    pub fn run(&mut self) -> SimResult<Vec<StepReport>> {
        (0..self.config.steps).map(|_| self.step()).collect()
    }

    /// Runs one step.
    pub fn step(&mut self) -> SimResult<StepReport> {
        let count = self.config.agent_count;
        let stream = self.step as u64;
        self.environment.set_step_counter(self.step)?;
        self.heat.init()?;

        // publish
        let publish = FunctionHashes::new(INSTANCE, AGENT, "publish").with_message_output(MESSAGE);
        let mut curve = self.agent_curve(&publish)?;
        self.heat
            .bind_output(&mut curve, publish.message_output_namespace())?;
        let metadata = *self
            .heat
            .metadata()
            .ok_or_else(|| SimError::config("message list metadata not allocated"))?;
        let published = launch_agent_function(
            &self.device,
            &AgentFunctionLaunch::<MsgNone, MsgArray> {
                curve: &curve,
                hashes: publish,
                agent_count: count,
                stream,
                message_in: &(),
                message_out: &metadata,
                scan: &self.scan,
                ids: &self.ids,
            },
            |api| {
                let value = api.get_variable::<f32>("value");
                api.message_out.set_variable::<f32>("value", value);
                api.message_out.set_index(api.get_variable::<u32>("bin"));
                AgentStatus::Alive
            },
        )?;

        let build = self
            .heat
            .build_index(&self.device, count, &self.scan.message_output)?;

        // diffuse
        let diffuse = FunctionHashes::new(INSTANCE, AGENT, "diffuse").with_message_input(MESSAGE);
        let mut curve = self.agent_curve(&diffuse)?;
        self.heat
            .bind_input(&mut curve, diffuse.message_input_namespace())?;
        let radius = self.config.radius;
        launch_agent_function(
            &self.device,
            &AgentFunctionLaunch::<MsgArray, MsgNone> {
                curve: &curve,
                hashes: diffuse,
                agent_count: count,
                stream,
                message_in: &metadata,
                message_out: &(),
                scan: &self.scan,
                ids: &self.ids,
            },
            |api| {
                let bin = api.get_variable::<u32>("bin");
                let value = api.get_variable::<f32>("value");
                let rate = api.environment.get_property::<f32>("rate");
                let mut sum = 0.0f32;
                let mut seen = 0u32;
                for message in api.message_in.filter(bin, radius) {
                    sum += message.get_variable::<f32>("value");
                    seen += 1;
                }
                api.set_variable::<f32>("probe", sum);
                if seen > 0 {
                    let mean = sum / seen as f32;
                    api.set_variable::<f32>("value", value + rate * (mean - value));
                }
                AgentStatus::Alive
            },
        )?;

        let births = if self.birth_probability > 0.0 {
            self.divide(stream)?
        } else {
            0
        };

        let values = self.values()?;
        let total_value = values.iter().map(|v| *v as f64).sum();
        let (min, max) = values
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
        let report = StepReport {
            step: self.step,
            messages: published.messages,
            build,
            births,
            total_value,
            spread: max - min,
        };
        debug!(
            "step {} | messages={} | births={} | total={:.3} | spread={:.4}",
            report.step, report.messages, report.births, report.total_value, report.spread
        );
        self.step += 1;
        Ok(report)
    }

    /// Runs `divide` and moves the newborns out of the birth buffer.
    fn divide(&mut self, stream: u64) -> SimResult<u32> {
        let hashes = FunctionHashes::new(INSTANCE, AGENT, "divide").with_agent_output();
        let mut curve = self.agent_curve(&hashes)?;
        if let Some(output) = hashes.agent_output {
            self.births.bind(&mut curve, output)?;
        }
        let probability = self.birth_probability;
        let report = launch_agent_function(
            &self.device,
            &AgentFunctionLaunch::<MsgNone, MsgNone> {
                curve: &curve,
                hashes,
                agent_count: self.config.agent_count,
                stream: stream.wrapping_add(1 << 32),
                message_in: &(),
                message_out: &(),
                scan: &self.scan,
                ids: &self.ids,
            },
            |api| {
                if api.random.uniform::<f32>() < probability {
                    let parent = api.get_id();
                    let value = api.get_variable::<f32>("value");
                    let bin = api.get_variable::<u32>("bin");
                    api.agent_out.set_variable::<u32>("parent", parent);
                    api.agent_out.set_variable::<u32>("bin", bin);
                    api.agent_out.set_variable::<f32>("value", value * 0.5);
                }
                AgentStatus::Alive
            },
        )?;

        for slot in self.scan.agent_output.set_indices() {
            self.newborns.push(Newborn {
                id: self.births.get(ID_VARIABLE_NAME, slot)?,
                parent: self.births.get("parent", slot)?,
                bin: self.births.get("bin", slot)?,
                value: self.births.get("value", slot)?,
            });
        }
        self.births.zero();
        Ok(report.births)
    }

    /// Binding table with the agents and environment bound for `hashes`.
    fn agent_curve(&self, hashes: &FunctionHashes) -> SimResult<CurveTable> {
        let mut curve = CurveTable::new();
        self.agents.bind(&mut curve, hashes.agent_function)?;
        self.environment.bind(&mut curve, hashes.environment)?;
        Ok(curve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(agents: u32, parallel: bool) -> SimConfig {
        SimConfig {
            seed: 7,
            agent_count: agents,
            parallel,
            ..Default::default()
        }
    }

    #[test]
    fn test_world_initial_state() {
        let world = SimWorld::new(config(16, true)).unwrap();
        assert_eq!(world.ids().unwrap(), (1..=16).collect::<Vec<u32>>());
        assert_eq!(world.bins().unwrap(), (0..16).collect::<Vec<u32>>());
        assert!(world.values().unwrap().iter().all(|v| (0.0..100.0).contains(v)));
        assert_eq!(world.next_id(), 17);
        assert_eq!(world.message_length(), 16);
    }

    #[test]
    fn test_world_rejects_empty_config() {
        assert!(matches!(
            SimWorld::new(config(0, true)),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn test_full_window_radius() {
        assert_eq!(full_window_radius(1, 16), 1);
        assert_eq!(full_window_radius(4, 5), 4);
        assert_eq!(full_window_radius(3, 5), 1);
        assert_eq!(full_window_radius(2, 5), 1);
        assert_eq!(full_window_radius(1, 2), 1);
        assert_eq!(full_window_radius(1, 3), 2);
        assert_eq!(full_window_radius(9, 12), 5);
    }

    #[test]
    fn test_world_rejects_truncated_window() {
        let result = SimWorld::new(SimConfig {
            agent_count: 5,
            radius: 2,
            ..Default::default()
        });
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_step_publishes_and_conserves() {
        let mut world = SimWorld::new(config(32, true)).unwrap();
        let before: f64 = world.values().unwrap().iter().map(|v| *v as f64).sum();
        let report = world.step().unwrap();

        assert_eq!(report.messages, 32);
        assert_eq!(
            report.build,
            BuildReport {
                live: 32,
                collisions: 0,
                gaps: 0
            }
        );
        assert!((report.total_value - before).abs() < 1e-2);
        assert_eq!(world.step_count(), 1);
    }

    #[test]
    fn test_step_is_deterministic_across_launchers() {
        let run = |parallel| {
            let mut world = SimWorld::new(config(48, parallel)).unwrap();
            world.run().unwrap();
            world.values().unwrap()
        };
        assert_eq!(run(true), run(false));
    }

    #[test]
    fn test_message_list_mirrors_agents() {
        let mut world = SimWorld::new(config(8, false)).unwrap();
        let values = world.values().unwrap();
        world.step().unwrap();
        assert_eq!(world.message_values().unwrap(), values);
    }
}
