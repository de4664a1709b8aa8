//! The variable binding table.
//!
//! Kernels address state by name, not by pointer. Before a launch the host
//! registers every buffer the kernel may touch under a key made from a
//! namespace hash (instance + agent + function + role) and the hash of the
//! variable name. During the launch the table is shared read-only by every
//! thread; a lookup is a hash and a map probe, never a string comparison.
//!
//! ```text
//!  key = namespace.wrapping_add(variable_hash(name))
//!
//!  ┌──────────┬──────────────────────────────┐
//!  │ key      │ VariableBinding              │
//!  ├──────────┼──────────────────────────────┤
//!  │ 0x9f3a…  │ "x": i32 × 1  → DeviceBuffer │
//!  │ 0x11c0…  │ "v": f32 × 3  → DeviceBuffer │
//!  └──────────┴──────────────────────────────┘
//! ```

use crate::buffer::{zero, DeviceBuffer, DeviceType};
use crate::dthrow;
use crate::error::{CoreError, CoreResult};
use crate::exception::DeviceThread;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Hash identifying a scope (instance, agent, function, role).
pub type NamespaceHash = u32;

/// Hash of a variable name.
pub type VariableHash = u32;

/// Names starting with this prefix are internal and cannot be written by models.
pub const RESERVED_PREFIX: char = '_';

/// Identity of an agent.
pub const ID_VARIABLE_NAME: &str = "_id";

/// Declared bin of an array message.
pub const INDEX_VARIABLE_NAME: &str = "___INDEX";

/// Environment property holding the current step.
pub const STEP_COUNTER_NAME: &str = "_stepCount";

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a hash of `name`.
pub const fn variable_hash(name: &str) -> VariableHash {
    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Combines the hashes of several scope names by addition.
///
/// Adding (rather than chaining) lets a kernel add a message hash to an
/// agent-function hash without knowing how either was built.
pub fn namespace_hash(parts: &[&str]) -> NamespaceHash {
    parts
        .iter()
        .fold(0, |acc: NamespaceHash, part| acc.wrapping_add(variable_hash(part)))
}

/// Returns true if `name` is protected from model writes.
#[inline]
pub fn is_reserved(name: &str) -> bool {
    name.starts_with(RESERVED_PREFIX)
}

/// Name, type and shape of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDescriptor {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    type_size: usize,
    elements: u32,
}

impl VariableDescriptor {
    /// A single value of type `T`.
    pub fn scalar<T: DeviceType>(name: impl Into<String>) -> Self {
        Self::array::<T>(name, 1)
    }

    /// A fixed-length array of `elements` values of type `T`.
    pub fn array<T: DeviceType>(name: impl Into<String>, elements: u32) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            type_size: std::mem::size_of::<T>(),
            elements: elements.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn type_size(&self) -> usize {
        self.type_size
    }

    pub fn elements(&self) -> u32 {
        self.elements
    }

    /// Bytes used by one slot (all elements).
    pub fn slot_bytes(&self) -> usize {
        self.type_size * self.elements as usize
    }

    /// True if this variable holds values of type `T`.
    pub fn holds<T: DeviceType>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

/// A registered variable: its descriptor and the buffer backing it.
#[derive(Debug, Clone)]
pub struct VariableBinding {
    descriptor: VariableDescriptor,
    buffer: Arc<DeviceBuffer>,
    length: u32,
}

impl VariableBinding {
    pub fn descriptor(&self) -> &VariableDescriptor {
        &self.descriptor
    }

    pub fn buffer(&self) -> &Arc<DeviceBuffer> {
        &self.buffer
    }

    /// Number of slots (agents or messages) in the buffer.
    pub fn length(&self) -> u32 {
        self.length
    }

    fn offset(&self, index: u32, element: u32) -> usize {
        index as usize * self.descriptor.slot_bytes() + element as usize * self.descriptor.type_size
    }
}

/// Table of variable bindings for one launch.
#[derive(Debug, Default)]
pub struct CurveTable {
    bindings: HashMap<u32, VariableBinding>,
}

impl CurveTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `buffer` as variable `descriptor` in `namespace`.
    ///
    /// Fails if another variable already occupies the same key, or if the
    /// buffer size is not a whole number of slots.
    pub fn register(
        &mut self,
        namespace: NamespaceHash,
        descriptor: VariableDescriptor,
        buffer: Arc<DeviceBuffer>,
    ) -> CoreResult<()> {
        let slot_bytes = descriptor.slot_bytes();
        if slot_bytes == 0 || buffer.len_bytes() % slot_bytes != 0 {
            return Err(CoreError::configuration(format!(
                "buffer for '{}' holds {} bytes, not a multiple of {}",
                descriptor.name(),
                buffer.len_bytes(),
                slot_bytes
            )));
        }
        let key = Self::key(namespace, descriptor.name());
        if let Some(existing) = self.bindings.get(&key) {
            return Err(CoreError::HashCollision {
                name: descriptor.name().to_string(),
                existing: existing.descriptor.name().to_string(),
                namespace,
            });
        }
        let length = (buffer.len_bytes() / slot_bytes) as u32;
        self.bindings.insert(
            key,
            VariableBinding {
                descriptor,
                buffer,
                length,
            },
        );
        Ok(())
    }

    /// Removes a binding; returns true if it existed.
    pub fn unregister(&mut self, namespace: NamespaceHash, name: &str) -> bool {
        self.bindings.remove(&Self::key(namespace, name)).is_some()
    }

    /// Removes every binding.
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Looks up a binding.
    pub fn binding(&self, namespace: NamespaceHash, name: &str) -> Option<&VariableBinding> {
        self.bindings.get(&Self::key(namespace, name))
    }

    /// Device side: reads slot `index` of a scalar variable.
    ///
    /// Reports and returns zero if the variable is missing, has another
    /// type, or `index` is past its length.
    pub fn get_variable<T: DeviceType>(
        &self,
        thread: &DeviceThread<'_>,
        namespace: NamespaceHash,
        name: &str,
        index: u32,
    ) -> T {
        self.get_array_variable(thread, namespace, name, index, 0)
    }

    /// Device side: writes slot `index` of a scalar variable.
    pub fn set_variable<T: DeviceType>(
        &self,
        thread: &DeviceThread<'_>,
        namespace: NamespaceHash,
        name: &str,
        index: u32,
        value: T,
    ) {
        self.set_array_variable(thread, namespace, name, index, 0, value)
    }

    /// Device side: reads element `element` of slot `index`.
    pub fn get_array_variable<T: DeviceType>(
        &self,
        thread: &DeviceThread<'_>,
        namespace: NamespaceHash,
        name: &str,
        index: u32,
        element: u32,
    ) -> T {
        match self.resolve::<T>(thread, namespace, name, index, element) {
            Some((binding, offset)) => binding.buffer.read(offset).unwrap_or_else(zero),
            None => zero(),
        }
    }

    /// Device side: writes element `element` of slot `index`.
    pub fn set_array_variable<T: DeviceType>(
        &self,
        thread: &DeviceThread<'_>,
        namespace: NamespaceHash,
        name: &str,
        index: u32,
        element: u32,
        value: T,
    ) {
        if let Some((binding, offset)) = self.resolve::<T>(thread, namespace, name, index, element) {
            binding.buffer.write(offset, value);
        }
    }

    /// Finds the binding and byte offset of one element, reporting any mismatch.
    fn resolve<T: DeviceType>(
        &self,
        thread: &DeviceThread<'_>,
        namespace: NamespaceHash,
        name: &str,
        index: u32,
        element: u32,
    ) -> Option<(&VariableBinding, usize)> {
        let Some(binding) = self.bindings.get(&Self::key(namespace, name)) else {
            dthrow!(thread, "Curve variable with name '%s' was not found.", name);
            return None;
        };
        let descriptor = &binding.descriptor;
        if !descriptor.holds::<T>() {
            dthrow!(
                thread,
                "Curve variable '%s' holds %s (%u bytes), accessed as %s (%u bytes).",
                name,
                descriptor.type_name(),
                descriptor.type_size() as u32,
                std::any::type_name::<T>(),
                std::mem::size_of::<T>() as u32
            );
            return None;
        }
        if element >= descriptor.elements() {
            dthrow!(
                thread,
                "Index %u is out of bounds for array variable '%s' of length %u.",
                element,
                name,
                descriptor.elements()
            );
            return None;
        }
        if index >= binding.length {
            dthrow!(
                thread,
                "Curve variable '%s' has %u slots, slot %u requested.",
                name,
                binding.length,
                index
            );
            return None;
        }
        Some((binding, binding.offset(index, element)))
    }

    #[inline]
    fn key(namespace: NamespaceHash, name: &str) -> u32 {
        namespace.wrapping_add(variable_hash(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::DeviceExceptionBuffer;
    use swarmkern_env::ThreadIdx;

    fn table_with(ns: NamespaceHash, values: &[i32]) -> CurveTable {
        let mut curve = CurveTable::new();
        curve
            .register(
                ns,
                VariableDescriptor::scalar::<i32>("x"),
                Arc::new(DeviceBuffer::from_slice(values)),
            )
            .unwrap();
        curve
    }

    #[test]
    fn test_variable_hash_is_fnv1a() {
        assert_eq!(variable_hash(""), 0x811c9dc5);
        assert_eq!(variable_hash("a"), 0xe40c292c);
        assert_ne!(variable_hash("x"), variable_hash("y"));
    }

    #[test]
    fn test_namespace_hash_adds_parts() {
        let combined = namespace_hash(&["boids", "move"]);
        assert_eq!(
            combined,
            variable_hash("boids").wrapping_add(variable_hash("move"))
        );
    }

    #[test]
    fn test_reserved_names() {
        assert!(is_reserved(ID_VARIABLE_NAME));
        assert!(is_reserved(INDEX_VARIABLE_NAME));
        assert!(is_reserved(STEP_COUNTER_NAME));
        assert!(!is_reserved("x"));
    }

    #[test]
    fn test_register_rejects_duplicate_key() {
        let mut curve = table_with(7, &[1, 2]);
        let err = curve
            .register(
                7,
                VariableDescriptor::scalar::<f32>("x"),
                Arc::new(DeviceBuffer::zeroed(8)),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::HashCollision { .. }));

        // Same name, other namespace is fine
        curve
            .register(
                8,
                VariableDescriptor::scalar::<f32>("x"),
                Arc::new(DeviceBuffer::zeroed(8)),
            )
            .unwrap();
        assert_eq!(curve.len(), 2);
    }

    #[test]
    fn test_register_rejects_ragged_buffer() {
        let mut curve = CurveTable::new();
        let err = curve
            .register(
                0,
                VariableDescriptor::array::<f32>("v", 3),
                Arc::new(DeviceBuffer::zeroed(16)),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_get_set_by_index() {
        let curve = table_with(3, &[10, 20, 30]);
        let exceptions = DeviceExceptionBuffer::new();
        let thread = DeviceThread::new(ThreadIdx::from_global(1, 32), &exceptions);

        assert_eq!(curve.get_variable::<i32>(&thread, 3, "x", 1), 20);
        curve.set_variable::<i32>(&thread, 3, "x", 1, -4);
        assert_eq!(curve.get_variable::<i32>(&thread, 3, "x", 1), -4);
        assert_eq!(exceptions.error_count(), 0);
    }

    #[cfg(feature = "seatbelts")]
    #[test]
    fn test_lookup_failures_report_and_return_zero() {
        let curve = table_with(3, &[10, 20]);
        let mut exceptions = DeviceExceptionBuffer::new();
        {
            let thread = DeviceThread::new(ThreadIdx::from_global(0, 32), &exceptions);
            assert_eq!(curve.get_variable::<i32>(&thread, 3, "missing", 0), 0);
            assert_eq!(curve.get_variable::<f32>(&thread, 3, "x", 0), 0.0);
            assert_eq!(curve.get_variable::<i32>(&thread, 3, "x", 2), 0);
            assert_eq!(curve.get_array_variable::<i32>(&thread, 3, "x", 0, 1), 0);
            curve.set_variable::<i32>(&thread, 3, "x", 5, 1);
        }
        let err = exceptions.drain().unwrap_err();
        assert_eq!(err.error_count, 5);
        assert_eq!(
            err.message().unwrap(),
            "Curve variable with name 'missing' was not found."
        );
    }

    #[test]
    fn test_array_elements() {
        let mut curve = CurveTable::new();
        curve
            .register(
                1,
                VariableDescriptor::array::<f32>("v", 3),
                Arc::new(DeviceBuffer::zeroed(2 * 3 * 4)),
            )
            .unwrap();
        let exceptions = DeviceExceptionBuffer::new();
        let thread = DeviceThread::new(ThreadIdx::from_global(1, 32), &exceptions);

        curve.set_array_variable::<f32>(&thread, 1, "v", 1, 2, 9.5);
        assert_eq!(curve.get_array_variable::<f32>(&thread, 1, "v", 1, 2), 9.5);
        assert_eq!(curve.get_array_variable::<f32>(&thread, 1, "v", 0, 2), 0.0);
        assert_eq!(curve.binding(1, "v").unwrap().length(), 2);
    }
}
