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

//! The GPU-visible result ring.
//!
//! Layout of the shared buffer:
//!
//! ```text
//! offset 0               RingHeader   { fence: u32, reserved }            16 bytes
//! offset 16 + 32 * i     SampleCounterPair { start: u64, _, end: u64, _ } 32 bytes
//! ```
//!
//! Both counters of a pair sit on 16-byte boundaries, as required by the
//! sample-count copy. Slots are handed out from a monotonically increasing
//! sequence number; slot `i` is reused every `capacity` allocations.

use autotune_core::memory::read_pod;
use autotune_core::{MemoryError, SharedMemory, SharedMemoryAllocator};
use bytemuck::{Pod, Zeroable};
use std::sync::atomic::{AtomicU64, Ordering};

/// Alignment of the ring buffer and of every sample counter.
pub const COUNTER_ALIGNMENT: u64 = 16;

/// Size of the [`RingHeader`] in bytes.
pub const HEADER_SIZE: u64 = std::mem::size_of::<RingHeader>() as u64;

/// Distance in bytes between two consecutive slots.
pub const SLOT_STRIDE: u64 = std::mem::size_of::<SampleCounterPair>() as u64;

/// The first bytes of the ring. The GPU writes `fence` when a submission retires.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RingHeader {
    /// Fence value of the most recently retired submission. 0 means none yet.
    pub fence: u32,
    _reserved: [u32; 3],
}

/// The two sample counter snapshots bracketing one render pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SampleCounterPair {
    /// Counter value before the render pass.
    pub samples_start: u64,
    _pad0: u64,
    /// Counter value after the render pass.
    pub samples_end: u64,
    _pad1: u64,
}

const _: () = assert!(std::mem::size_of::<RingHeader>() == 16);
const _: () = assert!(std::mem::size_of::<SampleCounterPair>() == 32);
const _: () = assert!(std::mem::offset_of!(SampleCounterPair, samples_end) == 16);

impl SampleCounterPair {
    /// Creates a pair from its two counters.
    pub fn new(samples_start: u64, samples_end: u64) -> Self {
        Self {
            samples_start,
            samples_end,
            ..Default::default()
        }
    }

    /// Samples passed between the two snapshots, or `None` if the end counter
    /// is behind the start counter.
    pub fn delta(&self) -> Option<u64> {
        self.samples_end.checked_sub(self.samples_start)
    }
}

/// Index of a slot inside the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(pub u32);

/// The outcome of [`ResultSlotRing::allocate_slot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAllocation {
    /// Global, monotonically increasing sequence number.
    pub sequence: u64,
    /// `sequence % capacity`.
    pub slot: SlotIndex,
}

/// Fixed-capacity array of sample counter pairs in GPU-visible memory.
#[derive(Debug)]
pub struct ResultSlotRing {
    memory: Box<dyn SharedMemory>,
    capacity: u32,
    next_sequence: AtomicU64,
}

impl ResultSlotRing {
    /// Allocates a zeroed ring of `capacity` slots.
    pub fn new(allocator: &dyn SharedMemoryAllocator, capacity: u32) -> Result<Self, MemoryError> {
        let size = Self::byte_size(capacity);
        let memory = allocator.allocate_shared(size, COUNTER_ALIGNMENT, "autotune_results")?;
        if memory.gpu_address() % COUNTER_ALIGNMENT != 0 {
            return Err(MemoryError::MisalignedAddress {
                address: memory.gpu_address(),
                alignment: COUNTER_ALIGNMENT,
            });
        }
        Ok(Self {
            memory,
            capacity,
            next_sequence: AtomicU64::new(0),
        })
    }

    /// Size in bytes of a ring with `capacity` slots.
    pub const fn byte_size(capacity: u32) -> u64 {
        HEADER_SIZE + SLOT_STRIDE * capacity as u64
    }

    /// Number of slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Hands out the next slot. Safe to call from any number of threads; each
    /// call yields a distinct sequence number.
    pub fn allocate_slot(&self) -> SlotAllocation {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        SlotAllocation {
            sequence,
            slot: self.slot_for(sequence),
        }
    }

    /// Number of slots handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next_sequence.load(Ordering::Relaxed)
    }

    /// Maps a sequence number onto its slot.
    pub fn slot_for(&self, sequence: u64) -> SlotIndex {
        SlotIndex((sequence % u64::from(self.capacity.max(1))) as u32)
    }

    /// GPU address of the fence word.
    pub fn fence_address(&self) -> u64 {
        self.memory.gpu_address()
    }

    /// GPU address of the start counter of `slot`.
    pub fn start_address(&self, slot: SlotIndex) -> u64 {
        self.memory.gpu_address() + Self::slot_offset(slot)
    }

    /// GPU address of the end counter of `slot`.
    pub fn end_address(&self, slot: SlotIndex) -> u64 {
        self.start_address(slot) + std::mem::offset_of!(SampleCounterPair, samples_end) as u64
    }

    /// Reads the fence value last written by the GPU.
    pub fn read_fence(&self) -> Result<u32, MemoryError> {
        read_pod::<RingHeader>(self.memory.as_ref(), 0).map(|header| header.fence)
    }

    /// Reads the counters of `slot`.
    ///
    /// Only meaningful once the submission that wrote the slot has retired.
    pub fn read_pair(&self, slot: SlotIndex) -> Result<SampleCounterPair, MemoryError> {
        read_pod(self.memory.as_ref(), Self::slot_offset(slot))
    }

    fn slot_offset(slot: SlotIndex) -> u64 {
        HEADER_SIZE + SLOT_STRIDE * u64::from(slot.0)
    }
}
