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

//! Error types for the autotuning interface contracts.
//!
//! None of these ever reach a render pass: the engine maps every one of them to
//! a fallback decision. They exist so that the collaborators (allocators,
//! settings loaders) can report what went wrong.

use thiserror::Error;

/// Errors raised by GPU-visible shared memory allocation and access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// The allocator could not provide a buffer of the requested size.
    #[error("Failed to allocate {size} bytes of shared memory for '{label}'")]
    AllocationFailed {
        /// The requested size in bytes.
        size: u64,
        /// The debug label of the allocation.
        label: String,
    },
    /// The requested alignment is not a power of two.
    #[error("Invalid alignment {0}: must be a non-zero power of two")]
    InvalidAlignment(u64),
    /// The allocator returned a buffer whose GPU address breaks the requested
    /// alignment.
    #[error("GPU address {address:#x} is not aligned to {alignment} bytes")]
    MisalignedAddress {
        /// The GPU address of the buffer.
        address: u64,
        /// The alignment that was requested.
        alignment: u64,
    },
    /// An access fell outside of the buffer.
    #[error("Access of {len} bytes at offset {offset} is out of bounds (size {size})")]
    OutOfBounds {
        /// Byte offset of the access.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Total size of the buffer.
        size: u64,
    },
    /// No allocation backs the given GPU address.
    #[error("No shared allocation contains GPU address {0:#x}")]
    UnmappedAddress(u64),
}

/// Errors raised while building or validating [`crate::AutotuneSettings`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// An `AUTOTUNE_DEBUG` flag was not recognized.
    #[error("Unknown autotune debug flag '{0}'")]
    UnknownDebugFlag(String),
    /// Two flags forcing different rendering paths were combined.
    #[error("Conflicting forced paths: '{0}' and '{1}'")]
    ConflictingForcedPath(String, String),
    /// The result ring cannot hold zero slots.
    #[error("The result ring capacity must be at least 1")]
    ZeroRingCapacity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_error_display() {
        let err = MemoryError::OutOfBounds {
            offset: 64,
            len: 32,
            size: 80,
        };
        assert_eq!(
            format!("{err}"),
            "Access of 32 bytes at offset 64 is out of bounds (size 80)"
        );
        assert_eq!(
            format!("{}", MemoryError::UnmappedAddress(0x1000)),
            "No shared allocation contains GPU address 0x1000"
        );
        assert_eq!(
            format!(
                "{}",
                MemoryError::MisalignedAddress {
                    address: 0x1008,
                    alignment: 16
                }
            ),
            "GPU address 0x1008 is not aligned to 16 bytes"
        );
    }

    #[test]
    fn settings_error_display() {
        let err = SettingsError::UnknownDebugFlag("nope".to_string());
        assert_eq!(format!("{err}"), "Unknown autotune debug flag 'nope'");
    }
}
