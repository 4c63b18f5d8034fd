// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Memory mapped by both the CPU and the GPU.
//!
//! The GPU writes into it asynchronously, the CPU only reads. Reads must
//! therefore be treated as snapshots: the value can change under the reader
//! unless a fence guarantees the GPU is done with that range.

use crate::error::MemoryError;
use bytemuck::Pod;
use std::fmt;

/// A buffer addressable by the GPU and readable by the CPU.
pub trait SharedMemory: Send + Sync + fmt::Debug {
    /// The GPU virtual address of the first byte.
    fn gpu_address(&self) -> u64;

    /// The size of the buffer in bytes.
    fn size(&self) -> u64;

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<(), MemoryError>;
}

/// Allocates [`SharedMemory`] buffers.
pub trait SharedMemoryAllocator {
    /// Allocates `size` bytes whose GPU address is a multiple of `alignment`.
    ///
    /// The contents are zero-initialized.
    fn allocate_shared(
        &self,
        size: u64,
        alignment: u64,
        label: &str,
    ) -> Result<Box<dyn SharedMemory>, MemoryError>;
}

/// Reads a plain-old-data value at `offset`.
pub fn read_pod<T: Pod>(memory: &dyn SharedMemory, offset: u64) -> Result<T, MemoryError> {
    let mut value = T::zeroed();
    memory.read(offset, bytemuck::bytes_of_mut(&mut value))?;
    Ok(value)
}

/// Checks that `[offset, offset + len)` lies inside a buffer of `size` bytes.
pub fn check_bounds(offset: u64, len: u64, size: u64) -> Result<(), MemoryError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(MemoryError::OutOfBounds { offset, len, size }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_check_accepts_exact_fit() {
        assert!(check_bounds(0, 16, 16).is_ok());
        assert!(check_bounds(8, 8, 16).is_ok());
    }

    #[test]
    fn bounds_check_rejects_overflow() {
        assert_eq!(
            check_bounds(12, 8, 16),
            Err(MemoryError::OutOfBounds {
                offset: 12,
                len: 8,
                size: 16
            })
        );
        assert!(check_bounds(u64::MAX, 2, 16).is_err());
    }
}
