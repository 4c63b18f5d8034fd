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

//! A software stand-in for the GPU side of the feedback loop.
//!
//! [`HostMemoryAllocator`] hands out [`HostMemory`] buffers with synthetic GPU
//! addresses. [`SoftwareGpu`] executes submitted [`SoftwareCommandBuffer`]s in
//! order, keeping a running sample counter and resolving addresses through the
//! allocator. Retirement can lag behind submission by a fixed number of
//! batches, which is what makes the fence handshake observable.

use crate::command::{CommandSegment, CommandStream, GpuCommand};
use crate::error::MemoryError;
use crate::memory::{check_bounds, SharedMemory, SharedMemoryAllocator};
use bytemuck::Pod;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// First GPU address handed out by [`HostMemoryAllocator`].
const BASE_GPU_ADDRESS: u64 = 0x1_0000;

#[derive(Debug)]
struct HostMemoryInner {
    gpu_address: u64,
    bytes: Mutex<Vec<u8>>,
}

/// A [`SharedMemory`] buffer living in ordinary host memory.
///
/// Clones share the same storage, so a clone kept by the software GPU sees
/// every write made through another clone.
#[derive(Debug, Clone)]
pub struct HostMemory {
    inner: Arc<HostMemoryInner>,
}

impl HostMemory {
    /// Creates a zeroed buffer of `size` bytes at `gpu_address`.
    pub fn new(gpu_address: u64, size: u64) -> Self {
        Self {
            inner: Arc::new(HostMemoryInner {
                gpu_address,
                bytes: Mutex::new(vec![0; size as usize]),
            }),
        }
    }

    /// Returns `true` if `address` falls inside the buffer.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.inner.gpu_address && address - self.inner.gpu_address < self.size()
    }

    /// Copies `src` into the buffer at `offset`.
    pub fn write(&self, offset: u64, src: &[u8]) -> Result<(), MemoryError> {
        let mut bytes = self.bytes();
        check_bounds(offset, src.len() as u64, bytes.len() as u64)?;
        let start = offset as usize;
        bytes[start..start + src.len()].copy_from_slice(src);
        Ok(())
    }

    /// Writes a plain-old-data value at `offset`.
    pub fn write_pod<T: Pod>(&self, offset: u64, value: &T) -> Result<(), MemoryError> {
        self.write(offset, bytemuck::bytes_of(value))
    }

    fn bytes(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner
            .bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl SharedMemory for HostMemory {
    fn gpu_address(&self) -> u64 {
        self.inner.gpu_address
    }

    fn size(&self) -> u64 {
        self.bytes().len() as u64
    }

    fn read(&self, offset: u64, dst: &mut [u8]) -> Result<(), MemoryError> {
        let bytes = self.bytes();
        check_bounds(offset, dst.len() as u64, bytes.len() as u64)?;
        let start = offset as usize;
        dst.copy_from_slice(&bytes[start..start + dst.len()]);
        Ok(())
    }
}

#[derive(Debug)]
struct AllocatorState {
    next_address: u64,
    allocations: Vec<HostMemory>,
}

/// Allocates [`HostMemory`] buffers and resolves GPU addresses back to them.
#[derive(Debug)]
pub struct HostMemoryAllocator {
    state: Mutex<AllocatorState>,
    fail_allocations: AtomicBool,
}

impl HostMemoryAllocator {
    /// Creates an allocator with no live allocations.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AllocatorState {
                next_address: BASE_GPU_ADDRESS,
                allocations: Vec::new(),
            }),
            fail_allocations: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent allocation fail (or succeed again).
    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail_allocations.store(fail, Ordering::Relaxed);
    }

    /// Finds the allocation containing `address`.
    ///
    /// Returns the buffer and the offset of `address` inside it.
    pub fn resolve(&self, address: u64) -> Result<(HostMemory, u64), MemoryError> {
        let state = self.state();
        state
            .allocations
            .iter()
            .find(|memory| memory.contains(address))
            .map(|memory| (memory.clone(), address - memory.gpu_address()))
            .ok_or(MemoryError::UnmappedAddress(address))
    }

    /// Returns the number of buffers handed out so far.
    pub fn allocation_count(&self) -> usize {
        self.state().allocations.len()
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HostMemoryAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedMemoryAllocator for HostMemoryAllocator {
    fn allocate_shared(
        &self,
        size: u64,
        alignment: u64,
        label: &str,
    ) -> Result<Box<dyn SharedMemory>, MemoryError> {
        if !alignment.is_power_of_two() {
            return Err(MemoryError::InvalidAlignment(alignment));
        }
        if self.fail_allocations.load(Ordering::Relaxed) {
            return Err(MemoryError::AllocationFailed {
                size,
                label: label.to_string(),
            });
        }

        let mut state = self.state();
        let address = state.next_address.next_multiple_of(alignment);
        let memory = HostMemory::new(address, size);
        // Keep a gap between allocations so stray writes never alias.
        state.next_address = (address + size).next_multiple_of(0x1000) + 0x1000;
        state.allocations.push(memory.clone());
        log::trace!("Host allocation '{label}': {size} bytes at {address:#x}");
        Ok(Box::new(memory))
    }
}

/// One operation recorded into a [`SoftwareCommandBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareOp {
    /// Rasterize work that advances the sample counter by `samples`.
    Rasterize {
        /// Number of samples touched.
        samples: u64,
    },
    /// A command requested by the autotuner.
    Autotune(GpuCommand),
}

/// A command buffer understood by [`SoftwareGpu`].
#[derive(Debug, Clone, Default)]
pub struct SoftwareCommandBuffer {
    ops: Vec<SoftwareOp>,
}

impl SoftwareCommandBuffer {
    /// Creates an empty command buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records rasterization touching `samples` samples.
    pub fn rasterize(&mut self, samples: u64) {
        self.ops.push(SoftwareOp::Rasterize { samples });
    }

    /// Appends every command of `segment`.
    pub fn append_segment(&mut self, segment: &CommandSegment) {
        segment.replay_into(self);
    }

    /// Returns the recorded operations.
    pub fn ops(&self) -> &[SoftwareOp] {
        &self.ops
    }
}

impl CommandStream for SoftwareCommandBuffer {
    fn write_sample_count(&mut self, address: u64) {
        self.ops
            .push(SoftwareOp::Autotune(GpuCommand::WriteSampleCount { address }));
    }

    fn write_fence(&mut self, address: u64, value: u32) {
        self.ops
            .push(SoftwareOp::Autotune(GpuCommand::WriteFence { address, value }));
    }
}

/// Executes software command buffers against host memory.
#[derive(Debug)]
pub struct SoftwareGpu {
    memory: Arc<HostMemoryAllocator>,
    sample_counter: u64,
    in_flight: VecDeque<Vec<SoftwareCommandBuffer>>,
    retire_lag: usize,
}

impl SoftwareGpu {
    /// Creates a GPU whose work retires `retire_lag` submissions after it was
    /// submitted. A lag of 0 executes every batch immediately.
    pub fn new(memory: Arc<HostMemoryAllocator>, retire_lag: usize) -> Self {
        Self {
            memory,
            sample_counter: 0,
            in_flight: VecDeque::new(),
            retire_lag,
        }
    }

    /// Queues a batch and retires every batch older than the configured lag.
    pub fn submit(&mut self, batch: Vec<SoftwareCommandBuffer>) -> Result<(), MemoryError> {
        self.in_flight.push_back(batch);
        while self.in_flight.len() > self.retire_lag {
            self.retire_one()?;
        }
        Ok(())
    }

    /// Retires every queued batch.
    pub fn retire_all(&mut self) -> Result<(), MemoryError> {
        while !self.in_flight.is_empty() {
            self.retire_one()?;
        }
        Ok(())
    }

    /// Returns the number of submitted batches not yet executed.
    pub fn pending_batches(&self) -> usize {
        self.in_flight.len()
    }

    fn retire_one(&mut self) -> Result<(), MemoryError> {
        let Some(batch) = self.in_flight.pop_front() else {
            return Ok(());
        };
        for buffer in &batch {
            for op in buffer.ops() {
                self.execute(*op)?;
            }
        }
        Ok(())
    }

    fn execute(&mut self, op: SoftwareOp) -> Result<(), MemoryError> {
        match op {
            SoftwareOp::Rasterize { samples } => {
                self.sample_counter = self.sample_counter.wrapping_add(samples);
            }
            SoftwareOp::Autotune(GpuCommand::WriteSampleCount { address }) => {
                let (memory, offset) = self.memory.resolve(address)?;
                memory.write_pod(offset, &self.sample_counter)?;
            }
            SoftwareOp::Autotune(GpuCommand::WriteFence { address, value }) => {
                let (memory, offset) = self.memory.resolve(address)?;
                memory.write_pod(offset, &value)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::read_pod;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let allocator = HostMemoryAllocator::new();
        let a = allocator.allocate_shared(100, 16, "a").unwrap();
        let b = allocator.allocate_shared(64, 256, "b").unwrap();

        assert_eq!(a.gpu_address() % 16, 0);
        assert_eq!(b.gpu_address() % 256, 0);
        assert!(b.gpu_address() >= a.gpu_address() + a.size());
        assert_eq!(allocator.allocation_count(), 2);
    }

    #[test]
    fn invalid_alignment_and_injected_failure() {
        let allocator = HostMemoryAllocator::new();
        assert_eq!(
            allocator.allocate_shared(16, 3, "bad").unwrap_err(),
            MemoryError::InvalidAlignment(3)
        );

        allocator.set_fail_allocations(true);
        assert!(matches!(
            allocator.allocate_shared(16, 16, "ring"),
            Err(MemoryError::AllocationFailed { size: 16, .. })
        ));
    }

    #[test]
    fn resolve_maps_address_to_offset() {
        let allocator = HostMemoryAllocator::new();
        let memory = allocator.allocate_shared(64, 16, "ring").unwrap();
        let (resolved, offset) = allocator.resolve(memory.gpu_address() + 24).unwrap();
        assert_eq!(resolved.gpu_address(), memory.gpu_address());
        assert_eq!(offset, 24);
        assert!(allocator.resolve(memory.gpu_address() + 64).is_err());
    }

    #[test]
    fn gpu_executes_in_order_with_lag() {
        let allocator = Arc::new(HostMemoryAllocator::new());
        let memory = allocator.allocate_shared(64, 16, "results").unwrap();
        let base = memory.gpu_address();
        let mut gpu = SoftwareGpu::new(allocator.clone(), 1);

        let mut cb = SoftwareCommandBuffer::new();
        cb.write_sample_count(base + 16);
        cb.rasterize(40);
        cb.write_sample_count(base + 32);
        cb.write_fence(base, 1);

        gpu.submit(vec![cb]).unwrap();
        // Lag of one: nothing executed yet.
        assert_eq!(gpu.pending_batches(), 1);
        assert_eq!(read_pod::<u32>(memory.as_ref(), 0).unwrap(), 0);

        gpu.submit(Vec::new()).unwrap();
        assert_eq!(gpu.pending_batches(), 1);
        assert_eq!(read_pod::<u32>(memory.as_ref(), 0).unwrap(), 1);
        assert_eq!(read_pod::<u64>(memory.as_ref(), 16).unwrap(), 0);
        assert_eq!(read_pod::<u64>(memory.as_ref(), 32).unwrap(), 40);

        gpu.retire_all().unwrap();
        assert_eq!(gpu.pending_batches(), 0);
    }

    #[test]
    fn writes_to_unmapped_memory_fail() {
        let allocator = Arc::new(HostMemoryAllocator::new());
        let mut gpu = SoftwareGpu::new(allocator, 0);
        let mut cb = SoftwareCommandBuffer::new();
        cb.write_fence(0x10, 1);
        assert_eq!(
            gpu.submit(vec![cb]).unwrap_err(),
            MemoryError::UnmappedAddress(0x10)
        );
    }
}
