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

//! Historical statistics per render pass shape.
//!
//! Each [`HistoryEntry`] keeps the last [`HISTORY_WINDOW`] measurements of one
//! fingerprint and their average. The whole map sits behind a single
//! reader/writer lock: writes happen at most once per retired render pass and
//! every write critical section is O(1), so recording threads looking up a
//! decision are never held for long.

use crate::fingerprint::Fingerprint;
use ahash::AHashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of recent measurements kept per render pass shape.
pub const HISTORY_WINDOW: usize = 5;

/// A fixed-capacity circular buffer that overwrites its oldest value when full.
#[derive(Debug, Clone)]
pub struct RingBuffer<T, const N: usize> {
    data: [T; N],
    // Index of the oldest value.
    head: usize,
    len: usize,
}

impl<T: Default + Copy, const N: usize> RingBuffer<T, N> {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self {
            data: [T::default(); N],
            head: 0,
            len: 0,
        }
    }

    /// Appends `value`, dropping the oldest value if the buffer is full.
    pub fn push(&mut self, value: T) {
        if N == 0 {
            return;
        }
        if self.len < N {
            self.data[(self.head + self.len) % N] = value;
            self.len += 1;
        } else {
            self.data[self.head] = value;
            self.head = (self.head + 1) % N;
        }
    }

    /// Returns the number of stored values.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates from the oldest to the newest value.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        (0..self.len).map(move |i| &self.data[(self.head + i) % N])
    }
}

impl<T: Default + Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// One GPU-measured occurrence of a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Measurement {
    /// Global sequence number of the result slot the GPU wrote.
    pub sequence: u64,
    /// Samples passed between the start and the end of the render pass.
    pub samples: u64,
}

/// Rolling statistics of one render pass shape.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    key: Fingerprint,
    window: RingBuffer<Measurement, HISTORY_WINDOW>,
    average_samples: u64,
    last_touched: u32,
}

impl HistoryEntry {
    fn new(key: Fingerprint, fence: u32) -> Self {
        Self {
            key,
            window: RingBuffer::new(),
            average_samples: 0,
            last_touched: fence,
        }
    }

    fn push(&mut self, measurement: Measurement, fence: u32) {
        self.window.push(measurement);
        let sum: u128 = self.window.iter().map(|m| u128::from(m.samples)).sum();
        self.average_samples = (sum / self.window.len() as u128) as u64;
        self.last_touched = fence;
    }

    /// The fingerprint this entry describes.
    pub fn key(&self) -> Fingerprint {
        self.key
    }

    /// Average sample count over the retained window.
    pub fn average_samples(&self) -> u64 {
        self.average_samples
    }

    /// The submission fence of the last recorded measurement.
    pub fn last_touched(&self) -> u32 {
        self.last_touched
    }

    /// Number of retained measurements.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Returns `true` if no measurement was retained.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Retained measurements, oldest first.
    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> + '_ {
        self.window.iter()
    }
}

/// Concurrent map from fingerprint to [`HistoryEntry`].
#[derive(Debug)]
pub struct HistoryCache {
    entries: RwLock<AHashMap<Fingerprint, HistoryEntry>>,
    max_entries: usize,
}

impl Default for HistoryCache {
    fn default() -> Self {
        Self::with_max_entries(usize::MAX)
    }
}

impl HistoryCache {
    /// Creates an empty, unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache tracking at most `max_entries` shapes.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: RwLock::default(),
            max_entries,
        }
    }

    /// Returns the current average sample count of `key`, if any measurement
    /// was ever recorded for it.
    pub fn lookup(&self, key: Fingerprint) -> Option<u64> {
        let entries = self.read();
        entries
            .get(&key)
            .filter(|entry| !entry.is_empty())
            .map(HistoryEntry::average_samples)
    }

    /// Records a harvested measurement for `key`, creating the entry on first
    /// sight and stamping it with the submission `fence` it retired with.
    ///
    /// Returns `false` if a new entry was needed but the cache is full or the
    /// map could not grow; the measurement is dropped.
    pub fn record(&self, key: Fingerprint, measurement: Measurement, fence: u32) -> bool {
        let mut entries = self.write();
        if !entries.contains_key(&key)
            && (entries.len() >= self.max_entries || entries.try_reserve(1).is_err())
        {
            return false;
        }
        entries
            .entry(key)
            .or_insert_with(|| HistoryEntry::new(key, fence))
            .push(measurement, fence);
        true
    }

    /// Removes every entry last touched more than `max_age` submissions before
    /// `newest_fence`. Returns the number of removed entries.
    pub fn evict_stale(&self, newest_fence: u32, max_age: u32) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| newest_fence.saturating_sub(entry.last_touched) <= max_age);
        before - entries.len()
    }

    /// Returns a copy of the entry for `key`.
    pub fn snapshot(&self, key: Fingerprint) -> Option<HistoryEntry> {
        self.read().get(&key).cloned()
    }

    /// Number of render pass shapes currently tracked.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if no shape is tracked.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.write().clear();
    }

    // A panic while holding the lock cannot leave an entry half-updated in a
    // way that breaks later reads, so poisoning is ignored.
    fn read(&self) -> RwLockReadGuard<'_, AHashMap<Fingerprint, HistoryEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AHashMap<Fingerprint, HistoryEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
