//! Launch wrappers for agent functions and agent function conditions.
//!
//! A wrapper builds the per-thread API, runs the user function once per
//! agent, records the function's outcome in the scan flags, and drains the
//! device exception buffer when the launch returns.

use crate::curve::{namespace_hash, variable_hash, CurveTable, NamespaceHash};
use crate::device_api::{AgentOut, DeviceApi, ReadOnlyDeviceApi};
use crate::environment::DeviceEnvironment;
use crate::error::{CoreError, CoreResult};
use crate::exception::{DeviceExceptionBuffer, DeviceThread};
use crate::messaging::{ChannelContext, Messaging};
use crate::random::AgentRandom;
use crate::scan::{IdCounter, ScanCompaction, ScanFlags};
use serde::{Deserialize, Serialize};
use swarmkern_env::DeviceContext;
use tracing::{debug, warn};

/// Suffix separating the new-agent namespace from the function's own.
const AGENT_OUTPUT_SCOPE: &str = "_agent_birth";

/// Scope suffix of environment properties.
const ENVIRONMENT_SCOPE: &str = "_environment";

/// The namespaces one agent function reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionHashes {
    /// Environment properties of the model instance
    pub environment: NamespaceHash,
    /// The calling agent's variables
    pub agent_function: NamespaceHash,
    /// Hash of the input message list name (0 if none)
    pub message_in: NamespaceHash,
    /// Hash of the output message list name (0 if none)
    pub message_out: NamespaceHash,
    /// New agents, when the function may create them
    pub agent_output: Option<NamespaceHash>,
}

impl FunctionHashes {
    /// Hashes for function `function` of agent `agent` in model instance `instance`.
    pub fn new(instance: &str, agent: &str, function: &str) -> Self {
        Self {
            environment: Self::environment_of(instance),
            agent_function: namespace_hash(&[instance, agent, function]),
            message_in: 0,
            message_out: 0,
            agent_output: None,
        }
    }

    /// Namespace of the environment properties of `instance`.
    pub fn environment_of(instance: &str) -> NamespaceHash {
        namespace_hash(&[instance, ENVIRONMENT_SCOPE])
    }

    pub fn with_message_input(mut self, message: &str) -> Self {
        self.message_in = variable_hash(message);
        self
    }

    pub fn with_message_output(mut self, message: &str) -> Self {
        self.message_out = variable_hash(message);
        self
    }

    /// Enables agent output for this function.
    pub fn with_agent_output(mut self) -> Self {
        self.agent_output = Some(
            self.agent_function
                .wrapping_add(variable_hash(AGENT_OUTPUT_SCOPE)),
        );
        self
    }

    /// Namespace the input list must be bound under.
    pub fn message_input_namespace(&self) -> NamespaceHash {
        self.agent_function.wrapping_add(self.message_in)
    }

    /// Namespace the output candidates must be bound under.
    pub fn message_output_namespace(&self) -> NamespaceHash {
        self.agent_function.wrapping_add(self.message_out)
    }
}

/// What an agent function decided about its agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgentStatus {
    #[default]
    Alive,
    Dead,
}

/// Everything an agent function launch needs besides the function itself.
pub struct AgentFunctionLaunch<'a, I: Messaging, O: Messaging> {
    pub curve: &'a CurveTable,
    pub hashes: FunctionHashes,
    pub agent_count: u32,
    /// Random stream of this launch (usually the step number)
    pub stream: u64,
    pub message_in: &'a I::MetaData,
    pub message_out: &'a O::MetaData,
    pub scan: &'a ScanCompaction,
    pub ids: &'a IdCounter,
}

/// Flag counts of a finished agent function launch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionReport {
    pub messages: u32,
    pub births: u32,
    pub deaths: u32,
}

/// Runs `function` once per agent.
///
/// Clears the message, birth and death flags first. Returns a configuration
/// error if the scan flags hold fewer slots than `agent_count`, and the device
/// error if any thread reported one.
pub fn launch_agent_function<D, I, O, F>(
    device: &D,
    launch: &AgentFunctionLaunch<'_, I, O>,
    function: F,
) -> CoreResult<FunctionReport>
where
    D: DeviceContext,
    I: Messaging,
    O: Messaging,
    F: Fn(&mut DeviceApi<'_, I, O>) -> AgentStatus + Send + Sync,
{
    let scan = launch.scan;
    check_capacity(
        launch.agent_count,
        &[
            ("message output", &scan.message_output),
            ("agent output", &scan.agent_output),
            ("agent death", &scan.agent_death),
        ],
    )?;
    scan.message_output.zero();
    scan.agent_output.zero();
    scan.agent_death.zero();

    let hashes = launch.hashes;
    let mut exceptions = DeviceExceptionBuffer::new();
    device.launch_threads(launch.agent_count, |idx| {
        let thread = DeviceThread::new(idx, &exceptions);
        let index = thread.index();
        let channel = |message_hash: NamespaceHash| ChannelContext {
            curve: launch.curve,
            thread,
            agent_func_hash: hashes.agent_function,
            message_hash,
        };
        let base = read_only_api(device, launch.curve, thread, &hashes, launch.stream);
        let mut api = DeviceApi::<I, O>::new(
            base,
            I::input(channel(hashes.message_in), launch.message_in),
            O::output(channel(hashes.message_out), launch.message_out, &scan.message_output),
            AgentOut::new(launch.curve, thread, hashes.agent_output, launch.ids, &scan.agent_output),
        );
        if function(&mut api) == AgentStatus::Dead {
            scan.agent_death.set(index);
        }
    })?;

    drain(&mut exceptions, "agent function")?;
    let report = FunctionReport {
        messages: scan.message_output.count(),
        births: scan.agent_output.count(),
        deaths: scan.agent_death.count(),
    };
    debug!(
        "Agent function over {} agents: {} messages, {} births, {} deaths",
        launch.agent_count, report.messages, report.births, report.deaths
    );
    Ok(report)
}

/// Everything a condition launch needs besides the condition itself.
pub struct ConditionLaunch<'a> {
    pub curve: &'a CurveTable,
    pub hashes: FunctionHashes,
    pub agent_count: u32,
    pub stream: u64,
    pub scan: &'a ScanCompaction,
}

/// Evaluates `condition` once per agent into the condition flags.
///
/// Returns the number of agents that passed.
pub fn launch_agent_function_condition<D, F>(
    device: &D,
    launch: &ConditionLaunch<'_>,
    condition: F,
) -> CoreResult<u32>
where
    D: DeviceContext,
    F: Fn(&mut ReadOnlyDeviceApi<'_>) -> bool + Send + Sync,
{
    let flags = &launch.scan.condition;
    check_capacity(launch.agent_count, &[("condition", flags)])?;
    flags.zero();

    let mut exceptions = DeviceExceptionBuffer::new();
    device.launch_threads(launch.agent_count, |idx| {
        let thread = DeviceThread::new(idx, &exceptions);
        let mut api = read_only_api(device, launch.curve, thread, &launch.hashes, launch.stream);
        if condition(&mut api) {
            flags.set(thread.index());
        }
    })?;

    drain(&mut exceptions, "agent function condition")?;
    Ok(flags.count())
}

/// Threads past the end of a flag buffer would lose their flags.
fn check_capacity(agent_count: u32, flags: &[(&str, &ScanFlags)]) -> CoreResult<()> {
    for (name, flags) in flags {
        if flags.len() < agent_count {
            return Err(CoreError::configuration(format!(
                "{} agents launched but the {} scan flags hold {}",
                agent_count,
                name,
                flags.len()
            )));
        }
    }
    Ok(())
}

fn read_only_api<'a, D: DeviceContext>(
    device: &D,
    curve: &'a CurveTable,
    thread: DeviceThread<'a>,
    hashes: &FunctionHashes,
    stream: u64,
) -> ReadOnlyDeviceApi<'a> {
    ReadOnlyDeviceApi::new(
        curve,
        thread,
        hashes.agent_function,
        AgentRandom::new(device.thread_rng(stream, thread.index())),
        DeviceEnvironment::new(curve, thread, hashes.environment),
    )
}

fn drain(exceptions: &mut DeviceExceptionBuffer, what: &str) -> CoreResult<()> {
    exceptions.drain().map_err(|err| {
        warn!("{} reported {} device error(s)", what, err.error_count);
        CoreError::Device(err)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{VariableDescriptor, ID_VARIABLE_NAME};
    use crate::environment::EnvironmentProperties;
    use crate::messaging::MsgNone;
    use crate::store::VariableStore;
    use std::collections::HashSet;
    use swarmkern_env::{RayonDevice, SequentialDevice};

    struct Fixture {
        curve: CurveTable,
        agents: VariableStore,
        births: VariableStore,
        hashes: FunctionHashes,
        scan: ScanCompaction,
        ids: IdCounter,
        _env: EnvironmentProperties,
    }

    fn fixture(count: u32) -> Fixture {
        let hashes = FunctionHashes::new("test", "cell", "grow").with_agent_output();
        let agents = VariableStore::new(
            count,
            vec![
                VariableDescriptor::scalar::<u32>(ID_VARIABLE_NAME),
                VariableDescriptor::scalar::<f32>("size"),
            ],
        )
        .unwrap();
        let births = VariableStore::new(
            count,
            vec![
                VariableDescriptor::scalar::<u32>(ID_VARIABLE_NAME),
                VariableDescriptor::scalar::<f32>("size"),
            ],
        )
        .unwrap();
        for i in 0..count {
            agents.set::<u32>(ID_VARIABLE_NAME, i, i + 1).unwrap();
            agents.set::<f32>("size", i, i as f32).unwrap();
        }
        let env = EnvironmentProperties::new(vec![VariableDescriptor::scalar::<f32>("rate")]).unwrap();
        env.set::<f32>("rate", 2.0).unwrap();

        let mut curve = CurveTable::new();
        agents.bind(&mut curve, hashes.agent_function).unwrap();
        births.bind(&mut curve, hashes.agent_output.unwrap()).unwrap();
        env.bind(&mut curve, hashes.environment).unwrap();

        Fixture {
            curve,
            agents,
            births,
            hashes,
            scan: ScanCompaction::new(count),
            ids: IdCounter::starting_at(count + 1),
            _env: env,
        }
    }

    impl Fixture {
        fn launch(&self, count: u32) -> AgentFunctionLaunch<'_, MsgNone, MsgNone> {
            AgentFunctionLaunch {
                curve: &self.curve,
                hashes: self.hashes,
                agent_count: count,
                stream: 0,
                message_in: &(),
                message_out: &(),
                scan: &self.scan,
                ids: &self.ids,
            }
        }
    }

    #[test]
    fn test_function_updates_agents() {
        let fx = fixture(100);
        let report = launch_agent_function(&RayonDevice::new(1), &fx.launch(100), |api| {
            let rate = api.environment.get_property::<f32>("rate");
            let size = api.get_variable::<f32>("size");
            api.set_variable::<f32>("size", size * rate);
            AgentStatus::Alive
        })
        .unwrap();

        assert_eq!(report, FunctionReport::default());
        let sizes = fx.agents.column_values::<f32>("size").unwrap();
        assert!(sizes.iter().enumerate().all(|(i, s)| *s == i as f32 * 2.0));
    }

    #[test]
    fn test_function_records_deaths() {
        let fx = fixture(10);
        let report = launch_agent_function(&SequentialDevice::new(1), &fx.launch(10), |api| {
            if api.get_id() % 2 == 0 {
                AgentStatus::Dead
            } else {
                AgentStatus::Alive
            }
        })
        .unwrap();
        assert_eq!(report.deaths, 5);
        assert_eq!(fx.scan.agent_death.set_indices(), vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_concurrent_births_get_unique_ids() {
        let count = 2000;
        let fx = fixture(count);
        let report = launch_agent_function(&RayonDevice::new(5), &fx.launch(count), |api| {
            let size = api.get_variable::<f32>("size");
            api.agent_out.set_variable::<f32>("size", size + 0.5);
            api.agent_out.get_id();
            AgentStatus::Alive
        })
        .unwrap();
        assert_eq!(report.births, count);

        let ids = fx.births.column_values::<u32>(ID_VARIABLE_NAME).unwrap();
        let unique: HashSet<u32> = ids.iter().copied().collect();
        assert_eq!(unique.len(), count as usize);
        assert!(ids.iter().all(|&id| id > count && id <= 2 * count));
        assert_eq!(fx.ids.peek(), 2 * count + 1);
    }

    #[test]
    fn test_function_random_is_reproducible() {
        let draw = || {
            let fx = fixture(64);
            launch_agent_function(&RayonDevice::new(77), &fx.launch(64), |api| {
                let value = api.random.uniform::<f32>();
                api.set_variable::<f32>("size", value);
                AgentStatus::Alive
            })
            .unwrap();
            fx.agents.column_values::<f32>("size").unwrap()
        };
        assert_eq!(draw(), draw());
    }

    #[cfg(feature = "seatbelts")]
    #[test]
    fn test_function_errors_are_drained() {
        let fx = fixture(32);
        let err = launch_agent_function(&RayonDevice::new(1), &fx.launch(32), |api| {
            if api.thread_index() % 4 == 0 {
                api.get_variable::<f32>("missing");
            }
            AgentStatus::Alive
        })
        .unwrap_err();
        let device_err = err.as_device().unwrap();
        assert_eq!(device_err.error_count, 8);
        assert_eq!(
            device_err.message().unwrap(),
            "Curve variable with name 'missing' was not found."
        );
    }

    #[test]
    fn test_condition_sets_flags() {
        let fx = fixture(12);
        let launch = ConditionLaunch {
            curve: &fx.curve,
            hashes: fx.hashes,
            agent_count: 12,
            stream: 3,
            scan: &fx.scan,
        };
        let passed = launch_agent_function_condition(&RayonDevice::new(2), &launch, |api| {
            api.get_variable::<f32>("size") >= 9.0 && api.get_step_counter() == 0
        })
        .unwrap();
        assert_eq!(passed, 3);
        assert_eq!(fx.scan.condition.set_indices(), vec![9, 10, 11]);
    }

    #[test]
    fn test_launch_larger_than_scan_is_rejected() {
        let fx = fixture(8);
        let ran = std::sync::atomic::AtomicU32::new(0);
        let err = launch_agent_function(&SequentialDevice::new(0), &fx.launch(9), |_| {
            ran.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            AgentStatus::Alive
        })
        .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
        assert_eq!(ran.into_inner(), 0);

        let launch = ConditionLaunch {
            curve: &fx.curve,
            hashes: fx.hashes,
            agent_count: 9,
            stream: 0,
            scan: &fx.scan,
        };
        let err = launch_agent_function_condition(&SequentialDevice::new(0), &launch, |_| true)
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_function_hash_namespaces() {
        let hashes = FunctionHashes::new("i", "a", "f")
            .with_message_input("in")
            .with_message_output("out");
        assert_ne!(
            hashes.message_input_namespace(),
            hashes.message_output_namespace()
        );
        assert_eq!(
            hashes.message_input_namespace(),
            hashes.agent_function.wrapping_add(variable_hash("in"))
        );
        assert!(hashes.agent_output.is_none());
        assert_eq!(hashes.environment, FunctionHashes::environment_of("i"));
    }
}
