//! Raw device buffers shared by every thread of a launch.
//!
//! Kernels write these buffers concurrently with no lock. Each byte is an
//! atomic cell, so two threads racing on the same slot (a model error) can
//! leave a torn value but never undefined behaviour. Typed access goes
//! through `bytemuck`, which removes any alignment requirement.

use bytemuck::{Pod, Zeroable};
use std::sync::atomic::{AtomicU8, Ordering};

/// A value that can live in a device buffer.
///
/// Any plain-old-data type qualifies, including user `#[repr(C)]` structs
/// deriving `Pod` and fixed-size arrays.
pub trait DeviceType: Pod + Send + Sync + 'static {}

impl<T: Pod + Send + Sync + 'static> DeviceType for T {}

/// Fixed-size byte buffer with lock-free shared access.
pub struct DeviceBuffer {
    cells: Box<[AtomicU8]>,
}

impl DeviceBuffer {
    /// Allocates a zero-filled buffer of `len_bytes` bytes.
    pub fn zeroed(len_bytes: usize) -> Self {
        Self {
            cells: (0..len_bytes).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    /// Allocates a buffer holding a copy of `values`.
    pub fn from_slice<T: DeviceType>(values: &[T]) -> Self {
        Self {
            cells: bytemuck::cast_slice::<T, u8>(values)
                .iter()
                .map(|b| AtomicU8::new(*b))
                .collect(),
        }
    }

    /// Size in bytes.
    pub fn len_bytes(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Copies `out.len()` bytes starting at `offset` into `out`.
    ///
    /// Returns false (leaving `out` untouched) if the range is out of bounds.
    pub fn read_bytes(&self, offset: usize, out: &mut [u8]) -> bool {
        let Some(cells) = self.range(offset, out.len()) else {
            return false;
        };
        for (dst, cell) in out.iter_mut().zip(cells) {
            *dst = cell.load(Ordering::Relaxed);
        }
        true
    }

    /// Writes `bytes` starting at `offset`.
    ///
    /// Returns false (writing nothing) if the range is out of bounds.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> bool {
        let Some(cells) = self.range(offset, bytes.len()) else {
            return false;
        };
        for (cell, src) in cells.iter().zip(bytes) {
            cell.store(*src, Ordering::Relaxed);
        }
        true
    }

    /// Reads a `T` at byte `offset`.
    pub fn read<T: DeviceType>(&self, offset: usize) -> Option<T> {
        let mut value = T::zeroed();
        self.read_bytes(offset, bytemuck::bytes_of_mut(&mut value))
            .then_some(value)
    }

    /// Writes a `T` at byte `offset`.
    pub fn write<T: DeviceType>(&self, offset: usize, value: T) -> bool {
        self.write_bytes(offset, bytemuck::bytes_of(&value))
    }

    /// Copies `len` bytes from `src` at `src_offset` to this buffer at `dst_offset`.
    pub fn copy_from(&self, dst_offset: usize, src: &DeviceBuffer, src_offset: usize, len: usize) -> bool {
        let (Some(dst), Some(src)) = (self.range(dst_offset, len), src.range(src_offset, len)) else {
            return false;
        };
        for (d, s) in dst.iter().zip(src) {
            d.store(s.load(Ordering::Relaxed), Ordering::Relaxed);
        }
        true
    }

    /// Resets every byte to zero.
    pub fn fill_zero(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }

    /// Host-side copy of the whole buffer as `T` values.
    ///
    /// Trailing bytes that do not fill a whole `T` are ignored.
    pub fn to_vec<T: DeviceType>(&self) -> Vec<T> {
        let size = std::mem::size_of::<T>().max(1);
        (0..self.len_bytes() / size)
            .filter_map(|i| self.read::<T>(i * size))
            .collect()
    }

    fn range(&self, offset: usize, len: usize) -> Option<&[AtomicU8]> {
        let end = offset.checked_add(len)?;
        self.cells.get(offset..end)
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len_bytes", &self.len_bytes())
            .finish()
    }
}

/// Zero value of a device type, returned by failed lookups.
pub(crate) fn zero<T: DeviceType>() -> T {
    <T as Zeroable>::zeroed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_typed_round_trip() {
        let buffer = DeviceBuffer::zeroed(16);
        assert!(buffer.write::<f32>(4, 1.5));
        assert!(buffer.write::<u64>(8, u64::MAX - 3));

        assert_eq!(buffer.read::<f32>(4), Some(1.5));
        assert_eq!(buffer.read::<u64>(8), Some(u64::MAX - 3));
        assert_eq!(buffer.read::<u32>(0), Some(0));
    }

    #[test]
    fn test_buffer_unaligned_access() {
        let buffer = DeviceBuffer::zeroed(9);
        assert!(buffer.write::<u64>(1, 0x0102_0304_0506_0708));
        assert_eq!(buffer.read::<u64>(1), Some(0x0102_0304_0506_0708));
    }

    #[test]
    fn test_buffer_out_of_range_is_harmless() {
        let buffer = DeviceBuffer::from_slice(&[7u32, 8]);
        assert!(!buffer.write::<u32>(6, 99));
        assert_eq!(buffer.read::<u32>(8), None);
        assert_eq!(buffer.read::<u32>(usize::MAX), None);
        assert_eq!(buffer.to_vec::<u32>(), vec![7, 8]);
    }

    #[test]
    fn test_buffer_copy_and_zero() {
        let src = DeviceBuffer::from_slice(&[1i32, 2, 3]);
        let dst = DeviceBuffer::zeroed(12);

        assert!(dst.copy_from(8, &src, 4, 4));
        assert_eq!(dst.to_vec::<i32>(), vec![0, 0, 2]);

        dst.fill_zero();
        assert_eq!(dst.to_vec::<i32>(), vec![0, 0, 0]);
    }
}
