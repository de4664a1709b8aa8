//! Host-owned column storage for agent and message variables.
//!
//! A store keeps one [`DeviceBuffer`] per variable, each sized for the
//! store's capacity. Buffers are reference counted so they can be bound
//! into a [`CurveTable`] for a launch while the store still owns them.

use crate::buffer::{DeviceBuffer, DeviceType};
use crate::curve::{CurveTable, NamespaceHash, VariableDescriptor};
use crate::error::{CoreError, CoreResult};
use std::sync::Arc;

#[derive(Debug)]
struct Column {
    descriptor: VariableDescriptor,
    buffer: Arc<DeviceBuffer>,
}

impl Column {
    fn allocate(descriptor: VariableDescriptor, capacity: u32) -> Self {
        let buffer = Arc::new(DeviceBuffer::zeroed(descriptor.slot_bytes() * capacity as usize));
        Self { descriptor, buffer }
    }
}

/// Fixed-capacity set of named variable columns.
#[derive(Debug)]
pub struct VariableStore {
    capacity: u32,
    columns: Vec<Column>,
}

impl VariableStore {
    /// Creates a zeroed store with room for `capacity` slots of every variable.
    pub fn new(capacity: u32, descriptors: Vec<VariableDescriptor>) -> CoreResult<Self> {
        let mut columns: Vec<Column> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if columns.iter().any(|c| c.descriptor.name() == descriptor.name()) {
                return Err(CoreError::DuplicateVariable(descriptor.name().to_string()));
            }
            columns.push(Column::allocate(descriptor, capacity));
        }
        Ok(Self { capacity, columns })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Descriptors of every variable, in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &VariableDescriptor> {
        self.columns.iter().map(|c| &c.descriptor)
    }

    /// Returns true if a variable called `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.column(name).is_ok()
    }

    /// Shared handle to the buffer backing `name`.
    pub fn buffer(&self, name: &str) -> CoreResult<&Arc<DeviceBuffer>> {
        self.column(name).map(|c| &c.buffer)
    }

    /// Registers every variable of this store into `curve` under `namespace`.
    pub fn bind(&self, curve: &mut CurveTable, namespace: NamespaceHash) -> CoreResult<()> {
        for column in &self.columns {
            curve.register(namespace, column.descriptor.clone(), Arc::clone(&column.buffer))?;
        }
        Ok(())
    }

    /// Removes every variable of this store from `curve`.
    pub fn unbind(&self, curve: &mut CurveTable, namespace: NamespaceHash) {
        for column in &self.columns {
            curve.unregister(namespace, column.descriptor.name());
        }
    }

    /// Reads slot `index` of a scalar variable.
    pub fn get<T: DeviceType>(&self, name: &str, index: u32) -> CoreResult<T> {
        self.get_element(name, index, 0)
    }

    /// Writes slot `index` of a scalar variable.
    pub fn set<T: DeviceType>(&self, name: &str, index: u32, value: T) -> CoreResult<()> {
        self.set_element(name, index, 0, value)
    }

    /// Reads one element of slot `index`.
    pub fn get_element<T: DeviceType>(&self, name: &str, index: u32, element: u32) -> CoreResult<T> {
        let (column, offset) = self.locate::<T>(name, index, element)?;
        column
            .buffer
            .read(offset)
            .ok_or_else(|| self.out_of_bounds(name, index))
    }

    /// Writes one element of slot `index`.
    pub fn set_element<T: DeviceType>(
        &self,
        name: &str,
        index: u32,
        element: u32,
        value: T,
    ) -> CoreResult<()> {
        let (column, offset) = self.locate::<T>(name, index, element)?;
        if column.buffer.write(offset, value) {
            Ok(())
        } else {
            Err(self.out_of_bounds(name, index))
        }
    }

    /// Copies a whole column out as `T` values (all elements of all slots).
    pub fn column_values<T: DeviceType>(&self, name: &str) -> CoreResult<Vec<T>> {
        let column = self.typed_column::<T>(name)?;
        Ok(column.buffer.to_vec())
    }

    /// Reallocates every column for `capacity` slots, keeping existing values
    /// that still fit.
    pub fn resize(&mut self, capacity: u32) {
        if capacity == self.capacity {
            return;
        }
        for column in &mut self.columns {
            let fresh = Column::allocate(column.descriptor.clone(), capacity);
            let keep = column.buffer.len_bytes().min(fresh.buffer.len_bytes());
            fresh.buffer.copy_from(0, &column.buffer, 0, keep);
            *column = fresh;
        }
        self.capacity = capacity;
    }

    /// Zeroes every column.
    pub fn zero(&self) {
        for column in &self.columns {
            column.buffer.fill_zero();
        }
    }

    fn column(&self, name: &str) -> CoreResult<&Column> {
        self.columns
            .iter()
            .find(|c| c.descriptor.name() == name)
            .ok_or_else(|| CoreError::UnknownVariable(name.to_string()))
    }

    fn typed_column<T: DeviceType>(&self, name: &str) -> CoreResult<&Column> {
        let column = self.column(name)?;
        if !column.descriptor.holds::<T>() {
            return Err(CoreError::TypeMismatch {
                name: name.to_string(),
                expected: column.descriptor.type_name(),
                actual: std::any::type_name::<T>(),
            });
        }
        Ok(column)
    }

    fn locate<T: DeviceType>(&self, name: &str, index: u32, element: u32) -> CoreResult<(&Column, usize)> {
        let column = self.typed_column::<T>(name)?;
        let descriptor = &column.descriptor;
        if element >= descriptor.elements() {
            return Err(CoreError::OutOfBounds {
                name: name.to_string(),
                index: element,
                length: descriptor.elements(),
            });
        }
        if index >= self.capacity {
            return Err(self.out_of_bounds(name, index));
        }
        let offset = index as usize * descriptor.slot_bytes() + element as usize * descriptor.type_size();
        Ok((column, offset))
    }

    fn out_of_bounds(&self, name: &str, index: u32) -> CoreError {
        CoreError::OutOfBounds {
            name: name.to_string(),
            index,
            length: self.capacity,
        }
    }
}
