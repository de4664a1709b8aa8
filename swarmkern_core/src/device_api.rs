//! The per-thread API handed to agent functions.
//!
//! [`ReadOnlyDeviceApi`] is what an agent function condition sees. An agent
//! function gets a [`DeviceApi`], which adds writes, message channels and
//! agent output, and derefs to the read-only part.
//!
//! Every accessor addresses the calling thread's own slot, so no two
//! threads ever write the same agent variable.

use crate::buffer::DeviceType;
use crate::curve::{is_reserved, CurveTable, NamespaceHash, ID_VARIABLE_NAME, STEP_COUNTER_NAME};
use crate::dthrow;
use crate::environment::DeviceEnvironment;
use crate::exception::DeviceThread;
use crate::messaging::Messaging;
use crate::random::AgentRandom;
use crate::scan::{IdCounter, ScanFlags};
use std::ops::{Deref, DerefMut};

/// Agent identifier.
pub type Id = u32;

/// Id of an agent that has not been given one.
pub const ID_NOT_SET: Id = 0;

/// Read access to the calling agent and the shared model state.
pub struct ReadOnlyDeviceApi<'a> {
    curve: &'a CurveTable,
    thread: DeviceThread<'a>,
    agent_func_hash: NamespaceHash,

    /// Random numbers for this agent
    pub random: AgentRandom,

    /// Environment properties
    pub environment: DeviceEnvironment<'a>,
}

impl<'a> ReadOnlyDeviceApi<'a> {
    pub fn new(
        curve: &'a CurveTable,
        thread: DeviceThread<'a>,
        agent_func_hash: NamespaceHash,
        random: AgentRandom,
        environment: DeviceEnvironment<'a>,
    ) -> Self {
        Self {
            curve,
            thread,
            agent_func_hash,
            random,
            environment,
        }
    }

    /// Reads one of the calling agent's variables.
    pub fn get_variable<T: DeviceType>(&self, name: &str) -> T {
        self.curve
            .get_variable(&self.thread, self.agent_func_hash, name, self.thread.index())
    }

    /// Reads one element of an array variable of the calling agent.
    pub fn get_array_variable<T: DeviceType>(&self, name: &str, element: u32) -> T {
        self.curve.get_array_variable(
            &self.thread,
            self.agent_func_hash,
            name,
            self.thread.index(),
            element,
        )
    }

    /// The calling agent's id.
    pub fn get_id(&self) -> Id {
        self.get_variable(ID_VARIABLE_NAME)
    }

    /// Current step, starting at 0.
    pub fn get_step_counter(&self) -> u32 {
        self.environment.get_property(STEP_COUNTER_NAME)
    }

    /// Flattened thread index; also the agent's slot for this launch.
    pub fn thread_index(&self) -> u32 {
        self.thread.index()
    }

    pub fn thread(&self) -> DeviceThread<'a> {
        self.thread
    }
}

/// Full access for an agent function reading `I` messages and writing `O` messages.
pub struct DeviceApi<'a, I: Messaging, O: Messaging> {
    base: ReadOnlyDeviceApi<'a>,

    /// Messages from the previous output launch
    pub message_in: I::In<'a>,

    /// This agent's outgoing message
    pub message_out: O::Out<'a>,

    /// New agent created by this agent
    pub agent_out: AgentOut<'a>,
}

impl<'a, I: Messaging, O: Messaging> DeviceApi<'a, I, O> {
    pub fn new(
        base: ReadOnlyDeviceApi<'a>,
        message_in: I::In<'a>,
        message_out: O::Out<'a>,
        agent_out: AgentOut<'a>,
    ) -> Self {
        Self {
            base,
            message_in,
            message_out,
            agent_out,
        }
    }

    /// Writes one of the calling agent's variables. Reserved names are ignored.
    pub fn set_variable<T: DeviceType>(&self, name: &str, value: T) {
        if is_reserved(name) {
            return;
        }
        let base = &self.base;
        base.curve
            .set_variable(&base.thread, base.agent_func_hash, name, base.thread.index(), value);
    }

    /// Writes one element of an array variable. Reserved names are ignored.
    pub fn set_array_variable<T: DeviceType>(&self, name: &str, element: u32, value: T) {
        if is_reserved(name) {
            return;
        }
        let base = &self.base;
        base.curve.set_array_variable(
            &base.thread,
            base.agent_func_hash,
            name,
            base.thread.index(),
            element,
            value,
        );
    }
}

impl<'a, I: Messaging, O: Messaging> Deref for DeviceApi<'a, I, O> {
    type Target = ReadOnlyDeviceApi<'a>;

    fn deref(&self) -> &Self::Target {
        &self.base
    }
}

impl<'a, I: Messaging, O: Messaging> DerefMut for DeviceApi<'a, I, O> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.base
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputState {
    Unset,
    Assigned(Id),
}

/// Creates at most one new agent per thread.
///
/// The new agent gets its id on the first call to a setter or
/// [`AgentOut::get_id`]; later calls reuse it.
pub struct AgentOut<'a> {
    curve: &'a CurveTable,
    thread: DeviceThread<'a>,
    output_hash: Option<NamespaceHash>,
    ids: &'a IdCounter,
    flags: &'a ScanFlags,
    state: OutputState,
}

impl<'a> AgentOut<'a> {
    /// `output_hash` is `None` when the function did not declare agent output.
    pub fn new(
        curve: &'a CurveTable,
        thread: DeviceThread<'a>,
        output_hash: Option<NamespaceHash>,
        ids: &'a IdCounter,
        flags: &'a ScanFlags,
    ) -> Self {
        Self {
            curve,
            thread,
            output_hash,
            ids,
            flags,
            state: OutputState::Unset,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.output_hash.is_some()
    }

    /// Sets a variable of the new agent.
    pub fn set_variable<T: DeviceType>(&mut self, name: &str, value: T) {
        let Some(hash) = self.enabled_hash() else {
            return;
        };
        if is_reserved(name) {
            return;
        }
        self.curve
            .set_variable(&self.thread, hash, name, self.thread.index(), value);
        self.assign_id(hash);
    }

    /// Sets one element of an array variable of the new agent.
    pub fn set_array_variable<T: DeviceType>(&mut self, name: &str, element: u32, value: T) {
        let Some(hash) = self.enabled_hash() else {
            return;
        };
        if is_reserved(name) {
            return;
        }
        self.curve
            .set_array_variable(&self.thread, hash, name, self.thread.index(), element, value);
        self.assign_id(hash);
    }

    /// Id of the new agent, creating it if needed. [`ID_NOT_SET`] when disabled.
    pub fn get_id(&mut self) -> Id {
        match self.enabled_hash() {
            Some(hash) => self.assign_id(hash),
            None => ID_NOT_SET,
        }
    }

    fn enabled_hash(&self) -> Option<NamespaceHash> {
        if self.output_hash.is_none() {
            dthrow!(
                self.thread,
                "Agent output must be enabled per agent function when defining the model."
            );
        }
        self.output_hash
    }

    fn assign_id(&mut self, hash: NamespaceHash) -> Id {
        if let OutputState::Assigned(id) = self.state {
            return id;
        }
        let id = self.ids.next();
        let index = self.thread.index();
        self.curve
            .set_variable(&self.thread, hash, ID_VARIABLE_NAME, index, id);
        self.flags.set(index);
        self.state = OutputState::Assigned(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::DeviceBuffer;
    use crate::curve::VariableDescriptor;
    use crate::exception::DeviceExceptionBuffer;
    use crate::messaging::MsgNone;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::sync::Arc;
    use swarmkern_env::ThreadIdx;

    const AGENT_FN: NamespaceHash = 40;
    const OUTPUT: NamespaceHash = 80;
    const ENV: NamespaceHash = 120;

    fn curve(slots: usize) -> CurveTable {
        let mut curve = CurveTable::new();
        let ids: Vec<u32> = (1..=slots as u32).collect();
        curve
            .register(
                AGENT_FN,
                VariableDescriptor::scalar::<u32>(ID_VARIABLE_NAME),
                Arc::new(DeviceBuffer::from_slice(&ids)),
            )
            .unwrap();
        curve
            .register(
                AGENT_FN,
                VariableDescriptor::scalar::<f32>("energy"),
                Arc::new(DeviceBuffer::zeroed(slots * 4)),
            )
            .unwrap();
        curve
            .register(
                AGENT_FN,
                VariableDescriptor::array::<i32>("home", 2),
                Arc::new(DeviceBuffer::zeroed(slots * 8)),
            )
            .unwrap();
        curve
            .register(
                OUTPUT,
                VariableDescriptor::scalar::<u32>(ID_VARIABLE_NAME),
                Arc::new(DeviceBuffer::zeroed(slots * 4)),
            )
            .unwrap();
        curve
            .register(
                OUTPUT,
                VariableDescriptor::scalar::<f32>("energy"),
                Arc::new(DeviceBuffer::zeroed(slots * 4)),
            )
            .unwrap();
        curve
            .register(
                ENV,
                VariableDescriptor::scalar::<u32>(STEP_COUNTER_NAME),
                Arc::new(DeviceBuffer::from_slice(&[12u32])),
            )
            .unwrap();
        curve
    }

    fn api<'a>(
        curve: &'a CurveTable,
        index: u32,
        exceptions: &'a DeviceExceptionBuffer,
        output: Option<NamespaceHash>,
        ids: &'a IdCounter,
        flags: &'a ScanFlags,
    ) -> DeviceApi<'a, MsgNone, MsgNone> {
        let thread = DeviceThread::new(ThreadIdx::from_global(index, 32), exceptions);
        let base = ReadOnlyDeviceApi::new(
            curve,
            thread,
            AGENT_FN,
            AgentRandom::new(ChaCha8Rng::seed_from_u64(index as u64)),
            DeviceEnvironment::new(curve, thread, ENV),
        );
        DeviceApi::new(
            base,
            Default::default(),
            Default::default(),
            AgentOut::new(curve, thread, output, ids, flags),
        )
    }

    #[test]
    fn test_set_then_get() {
        let curve = curve(4);
        let exceptions = DeviceExceptionBuffer::new();
        let ids = IdCounter::new();
        let flags = ScanFlags::new(4);
        let api = api(&curve, 2, &exceptions, None, &ids, &flags);

        api.set_variable::<f32>("energy", 3.5);
        api.set_array_variable::<i32>("home", 1, -7);
        assert_eq!(api.get_variable::<f32>("energy"), 3.5);
        assert_eq!(api.get_array_variable::<i32>("home", 1), -7);
        assert_eq!(api.get_array_variable::<i32>("home", 0), 0);
        assert_eq!(api.get_id(), 3);
        assert_eq!(api.get_step_counter(), 12);
        assert_eq!(api.thread_index(), 2);
        assert_eq!(exceptions.error_count(), 0);
    }

    #[test]
    fn test_reserved_writes_are_ignored() {
        let curve = curve(2);
        let exceptions = DeviceExceptionBuffer::new();
        let ids = IdCounter::new();
        let flags = ScanFlags::new(2);
        let mut api = api(&curve, 1, &exceptions, Some(OUTPUT), &ids, &flags);

        api.set_variable::<u32>(ID_VARIABLE_NAME, 99);
        assert_eq!(api.get_id(), 2);

        api.agent_out.set_variable::<u32>(ID_VARIABLE_NAME, 99);
        assert!(!flags.is_set(1));
        assert_eq!(exceptions.error_count(), 0);
    }

    #[test]
    fn test_agent_out_assigns_id_once() {
        let curve = curve(3);
        let exceptions = DeviceExceptionBuffer::new();
        let ids = IdCounter::new();
        let flags = ScanFlags::new(3);
        let mut api = api(&curve, 1, &exceptions, Some(OUTPUT), &ids, &flags);

        api.agent_out.set_variable::<f32>("energy", 0.5);
        let id = api.agent_out.get_id();
        api.agent_out.set_variable::<f32>("energy", 0.75);
        assert_eq!(api.agent_out.get_id(), id);
        assert_eq!(id, 1);
        assert_eq!(ids.peek(), 2);
        assert_eq!(flags.set_indices(), vec![1]);

        let binding = curve.binding(OUTPUT, "energy").unwrap();
        assert_eq!(binding.buffer().read::<f32>(4), Some(0.75));
        let new_ids = curve.binding(OUTPUT, ID_VARIABLE_NAME).unwrap();
        assert_eq!(new_ids.buffer().read::<u32>(4), Some(1));
    }

    #[test]
    fn test_agent_out_disabled() {
        let curve = curve(1);
        let mut exceptions = DeviceExceptionBuffer::new();
        let ids = IdCounter::new();
        let flags = ScanFlags::new(1);
        {
            let mut api = api(&curve, 0, &exceptions, None, &ids, &flags);
            assert!(!api.agent_out.is_enabled());
            assert_eq!(api.agent_out.get_id(), ID_NOT_SET);
            api.agent_out.set_variable::<f32>("energy", 1.0);
        }
        assert_eq!(ids.peek(), 1);
        assert_eq!(flags.count(), 0);
        if crate::SEATBELTS {
            let err = exceptions.drain().unwrap_err();
            assert_eq!(err.error_count, 2);
            assert_eq!(
                err.message().unwrap(),
                "Agent output must be enabled per agent function when defining the model."
            );
        }
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

        #[test]
        fn prop_concurrent_births_get_distinct_ids(n in 1usize..300, every in 1u32..4) {
            use swarmkern_env::{DeviceContext, RayonDevice};

            let curve = curve(n);
            let exceptions = DeviceExceptionBuffer::new();
            let ids = IdCounter::new();
            let flags = ScanFlags::new(n as u32);
            RayonDevice::new(3)
                .launch_threads(n as u32, |idx| {
                    let i = idx.global_index();
                    if i % every == 0 {
                        let mut api = api(&curve, i, &exceptions, Some(OUTPUT), &ids, &flags);
                        api.agent_out.set_variable::<f32>("energy", i as f32);
                    }
                })
                .unwrap();

            let slots = flags.set_indices();
            let buffer = curve.binding(OUTPUT, ID_VARIABLE_NAME).unwrap().buffer();
            let mut seen: Vec<u32> = slots
                .iter()
                .map(|&slot| buffer.read::<u32>(slot as usize * 4).unwrap())
                .collect();
            seen.sort_unstable();
            let expected: Vec<u32> = (1..=slots.len() as u32).collect();
            proptest::prop_assert_eq!(seen, expected);
            proptest::prop_assert_eq!(exceptions.error_count(), 0);
        }
    }
}
