//! Read-only model properties shared by every agent.

use crate::buffer::DeviceType;
use crate::curve::{is_reserved, CurveTable, NamespaceHash, VariableDescriptor, STEP_COUNTER_NAME};
use crate::error::{CoreError, CoreResult};
use crate::exception::DeviceThread;
use crate::store::VariableStore;

/// Host-side environment properties.
///
/// Backed by a single-slot [`VariableStore`]. The reserved `_stepCount`
/// property is always present.
#[derive(Debug)]
pub struct EnvironmentProperties {
    store: VariableStore,
}

impl EnvironmentProperties {
    /// Declares the model's properties. Names may not use the reserved prefix.
    pub fn new(properties: Vec<VariableDescriptor>) -> CoreResult<Self> {
        if let Some(reserved) = properties.iter().find(|p| is_reserved(p.name())) {
            return Err(CoreError::ReservedName(reserved.name().to_string()));
        }
        let mut descriptors = properties;
        descriptors.push(VariableDescriptor::scalar::<u32>(STEP_COUNTER_NAME));
        Ok(Self {
            store: VariableStore::new(1, descriptors)?,
        })
    }

    pub fn get<T: DeviceType>(&self, name: &str) -> CoreResult<T> {
        self.store.get(name, 0)
    }

    /// Sets a property. The step counter can only be set with [`Self::set_step_counter`].
    pub fn set<T: DeviceType>(&self, name: &str, value: T) -> CoreResult<()> {
        if is_reserved(name) {
            return Err(CoreError::ReservedName(name.to_string()));
        }
        self.store.set(name, 0, value)
    }

    pub fn get_element<T: DeviceType>(&self, name: &str, element: u32) -> CoreResult<T> {
        self.store.get_element(name, 0, element)
    }

    pub fn set_element<T: DeviceType>(&self, name: &str, element: u32, value: T) -> CoreResult<()> {
        if is_reserved(name) {
            return Err(CoreError::ReservedName(name.to_string()));
        }
        self.store.set_element(name, 0, element, value)
    }

    pub fn step_counter(&self) -> u32 {
        self.store.get(STEP_COUNTER_NAME, 0).unwrap_or(0)
    }

    pub fn set_step_counter(&self, step: u32) -> CoreResult<()> {
        self.store.set(STEP_COUNTER_NAME, 0, step)
    }

    /// Registers every property into `curve` under `namespace`.
    pub fn bind(&self, curve: &mut CurveTable, namespace: NamespaceHash) -> CoreResult<()> {
        self.store.bind(curve, namespace)
    }
}

/// Device-side view of the environment.
#[derive(Clone, Copy)]
pub struct DeviceEnvironment<'a> {
    curve: &'a CurveTable,
    thread: DeviceThread<'a>,
    namespace: NamespaceHash,
}

impl<'a> DeviceEnvironment<'a> {
    pub fn new(curve: &'a CurveTable, thread: DeviceThread<'a>, namespace: NamespaceHash) -> Self {
        Self {
            curve,
            thread,
            namespace,
        }
    }

    /// Reads a scalar property.
    pub fn get_property<T: DeviceType>(&self, name: &str) -> T {
        self.curve.get_variable(&self.thread, self.namespace, name, 0)
    }

    /// Reads one element of an array property.
    pub fn get_array_property<T: DeviceType>(&self, name: &str, element: u32) -> T {
        self.curve
            .get_array_variable(&self.thread, self.namespace, name, 0, element)
    }

    /// Returns true if a property called `name` is bound.
    pub fn contains(&self, name: &str) -> bool {
        self.curve.binding(self.namespace, name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::DeviceExceptionBuffer;
    use swarmkern_env::ThreadIdx;

    #[test]
    fn test_environment_properties() {
        let env = EnvironmentProperties::new(vec![
            VariableDescriptor::scalar::<f32>("decay"),
            VariableDescriptor::array::<i32>("bounds", 2),
        ])
        .unwrap();
        env.set::<f32>("decay", 0.25).unwrap();
        env.set_element::<i32>("bounds", 1, 40).unwrap();
        env.set_step_counter(9).unwrap();

        assert_eq!(env.get::<f32>("decay").unwrap(), 0.25);
        assert_eq!(env.step_counter(), 9);
        assert!(matches!(
            env.set::<u32>(STEP_COUNTER_NAME, 1),
            Err(CoreError::ReservedName(_))
        ));

        let mut curve = CurveTable::new();
        env.bind(&mut curve, 5).unwrap();
        let exceptions = DeviceExceptionBuffer::new();
        let device_env = DeviceEnvironment::new(
            &curve,
            DeviceThread::new(ThreadIdx::from_global(17, 8), &exceptions),
            5,
        );
        assert_eq!(device_env.get_property::<f32>("decay"), 0.25);
        assert_eq!(device_env.get_array_property::<i32>("bounds", 1), 40);
        assert_eq!(device_env.get_property::<u32>(STEP_COUNTER_NAME), 9);
        assert!(!device_env.contains("missing"));
        assert_eq!(exceptions.error_count(), 0);
    }

    #[test]
    fn test_environment_rejects_reserved_declaration() {
        let err = EnvironmentProperties::new(vec![VariableDescriptor::scalar::<u32>("_hidden")])
            .unwrap_err();
        assert!(matches!(err, CoreError::ReservedName(name) if name == "_hidden"));
    }
}
