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

//! Measurements waiting for the GPU to retire their submission.

use crate::fingerprint::Fingerprint;
use crate::history::{HistoryCache, Measurement};
use crate::ring::{ResultSlotRing, SlotIndex};
use std::collections::{TryReserveError, VecDeque};
use std::fmt;

/// A measurement whose counters become readable once `fence` retires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResult {
    /// History entry the measurement belongs to.
    pub key: Fingerprint,
    /// Global sequence number of the slot.
    pub sequence: u64,
    /// Ring slot the GPU writes the counters into.
    pub slot: SlotIndex,
    /// Submission fence after which the counters are valid.
    pub fence: u32,
}

/// An inclusive range of slot sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRange {
    /// Lowest sequence number.
    pub min: u64,
    /// Highest sequence number.
    pub max: u64,
}

impl SequenceRange {
    /// Number of sequence numbers spanned, minus one.
    pub fn span(&self) -> u64 {
        self.max - self.min
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// What a call to [`PendingResultQueue::harvest`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestReport {
    /// Measurements recorded into the history.
    pub harvested: u64,
    /// Retired measurements dropped without being recorded.
    pub discarded: u64,
    /// Valid measurements the history had no room for.
    pub rejected: u64,
    /// Set when retired slots were overwritten before they could be read.
    pub corruption: Option<SequenceRange>,
}

/// FIFO of [`PendingResult`]s in non-decreasing fence order.
#[derive(Debug, Default)]
pub struct PendingResultQueue {
    queue: VecDeque<PendingResult>,
}

impl PendingResultQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `result`. Its fence must not be lower than the back's.
    pub fn push(&mut self, result: PendingResult) {
        debug_assert!(self
            .queue
            .back()
            .map_or(true, |back| back.fence <= result.fence));
        self.queue.push_back(result);
    }

    /// Makes room for `additional` more results without aborting on
    /// allocation failure. The queue is unchanged on error.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), TryReserveError> {
        self.queue.try_reserve(additional)
    }

    /// Number of queued results.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Iterates the queue from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &PendingResult> + '_ {
        self.queue.iter()
    }

    /// Retires every result whose fence is at most `current_fence` and feeds
    /// it into `history`.
    ///
    /// If the retired results span at least the ring capacity in sequence
    /// numbers, some of their slots were reused before being read. Nothing is
    /// recorded in that case and the range is returned in
    /// [`HarvestReport::corruption`].
    pub fn harvest(
        &mut self,
        current_fence: u32,
        ring: &ResultSlotRing,
        history: &HistoryCache,
    ) -> HarvestReport {
        let mut report = HarvestReport::default();
        let retired = self
            .queue
            .iter()
            .take_while(|pending| pending.fence != 0 && pending.fence <= current_fence)
            .count();
        if retired == 0 {
            return report;
        }

        let range = self
            .queue
            .iter()
            .take(retired)
            .fold(None, |range: Option<SequenceRange>, pending| {
                Some(match range {
                    None => SequenceRange {
                        min: pending.sequence,
                        max: pending.sequence,
                    },
                    Some(r) => SequenceRange {
                        min: r.min.min(pending.sequence),
                        max: r.max.max(pending.sequence),
                    },
                })
            });
        if let Some(range) = range {
            if range.span() >= u64::from(ring.capacity()) {
                self.queue.drain(..retired);
                report.discarded = retired as u64;
                report.corruption = Some(range);
                return report;
            }
        }

        for pending in self.queue.drain(..retired) {
            let delta = match ring.read_pair(pending.slot) {
                Ok(pair) => pair.delta(),
                Err(e) => {
                    log::warn!("Failed to read result slot {}: {e}", pending.slot.0);
                    None
                }
            };
            let Some(samples) = delta else {
                report.discarded += 1;
                continue;
            };
            let measurement = Measurement {
                sequence: pending.sequence,
                samples,
            };
            if history.record(pending.key, measurement, pending.fence) {
                report.harvested += 1;
            } else {
                report.rejected += 1;
            }
        }
        report
    }

    /// Drops every queued result without reading it. Returns how many were
    /// dropped.
    pub fn drain_all(&mut self) -> usize {
        let count = self.queue.len();
        self.queue.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::SampleCounterPair;
    use autotune_core::software::HostMemoryAllocator;

    struct Fixture {
        allocator: HostMemoryAllocator,
        ring: ResultSlotRing,
        history: HistoryCache,
        queue: PendingResultQueue,
    }

    impl Fixture {
        fn new(capacity: u32) -> Self {
            let allocator = HostMemoryAllocator::new();
            let ring = ResultSlotRing::new(&allocator, capacity).unwrap();
            Self {
                allocator,
                ring,
                history: HistoryCache::new(),
                queue: PendingResultQueue::new(),
            }
        }

        // Allocates a slot, writes its counters as the GPU would and queues it.
        fn measure(&mut self, key: Fingerprint, fence: u32, start: u64, end: u64) {
            let allocation = self.ring.allocate_slot();
            let (memory, offset) = self
                .allocator
                .resolve(self.ring.start_address(allocation.slot))
                .unwrap();
            memory
                .write_pod(offset, &SampleCounterPair::new(start, end))
                .unwrap();
            self.queue.push(PendingResult {
                key,
                sequence: allocation.sequence,
                slot: allocation.slot,
                fence,
            });
        }

        fn harvest(&mut self, fence: u32) -> HarvestReport {
            self.queue.harvest(fence, &self.ring, &self.history)
        }
    }

    #[test]
    fn harvest_stops_at_first_unretired_fence() {
        let mut fx = Fixture::new(8);
        fx.measure(Fingerprint(1), 1, 0, 100);
        fx.measure(Fingerprint(1), 2, 100, 300);
        fx.measure(Fingerprint(2), 3, 300, 310);

        let report = fx.harvest(2);
        assert_eq!(report.harvested, 2);
        assert_eq!(report.corruption, None);
        assert_eq!(fx.queue.len(), 1);
        assert_eq!(fx.queue.iter().next().unwrap().fence, 3);
        assert_eq!(fx.history.lookup(Fingerprint(1)), Some(150));
        assert_eq!(fx.history.lookup(Fingerprint(2)), None);
    }

    #[test]
    fn harvest_never_records_beyond_passed_fence() {
        let mut fx = Fixture::new(64);
        for fence in 1..=20u32 {
            fx.measure(Fingerprint(u64::from(fence)), fence, 0, 1);
        }
        for current in [0u32, 3, 3, 9, 15, 20] {
            fx.harvest(current);
            for fence in 1..=20u32 {
                if let Some(entry) = fx.history.snapshot(Fingerprint(u64::from(fence))) {
                    assert!(entry.last_touched() <= current);
                }
            }
            assert!(fx.queue.iter().all(|pending| pending.fence > current));
        }
    }

    #[test]
    fn zero_fence_never_retires() {
        let mut fx = Fixture::new(4);
        fx.queue.push(PendingResult {
            key: Fingerprint(1),
            sequence: 0,
            slot: SlotIndex(0),
            fence: 0,
        });
        assert_eq!(fx.harvest(0), HarvestReport::default());
        assert_eq!(fx.queue.len(), 1);
    }

    #[test]
    fn backwards_counters_are_discarded() {
        let mut fx = Fixture::new(4);
        fx.measure(Fingerprint(5), 1, 500, 100);
        fx.measure(Fingerprint(5), 1, 100, 140);

        let report = fx.harvest(1);
        assert_eq!(report.harvested, 1);
        assert_eq!(report.discarded, 1);
        assert_eq!(fx.history.lookup(Fingerprint(5)), Some(40));
    }

    #[test]
    fn wrapped_slots_are_reported_and_dropped() {
        let mut fx = Fixture::new(4);
        for _ in 0..5 {
            fx.measure(Fingerprint(1), 1, 0, 10);
        }

        let report = fx.harvest(1);
        assert_eq!(report.corruption, Some(SequenceRange { min: 0, max: 4 }));
        assert_eq!(report.harvested, 0);
        assert_eq!(report.discarded, 5);
        assert!(fx.queue.is_empty());
        assert!(fx.history.is_empty());
    }

    #[test]
    fn exactly_capacity_outstanding_is_fine() {
        let mut fx = Fixture::new(4);
        for _ in 0..4 {
            fx.measure(Fingerprint(1), 1, 0, 10);
        }
        let report = fx.harvest(1);
        assert_eq!(report.corruption, None);
        assert_eq!(report.harvested, 4);
    }

    #[test]
    fn full_history_rejects_retired_results() {
        let mut fx = Fixture::new(4);
        fx.history = HistoryCache::with_max_entries(1);
        fx.measure(Fingerprint(1), 1, 0, 10);
        fx.measure(Fingerprint(2), 1, 10, 30);

        let report = fx.harvest(1);
        assert_eq!(report.harvested, 1);
        assert_eq!(report.rejected, 1);
        assert_eq!(report.discarded, 0);
        assert!(fx.queue.is_empty());
        assert_eq!(fx.history.lookup(Fingerprint(2)), None);
    }

    #[test]
    fn failed_reservation_leaves_queue_untouched() {
        let mut fx = Fixture::new(4);
        fx.measure(Fingerprint(1), 1, 0, 10);
        assert!(fx.queue.try_reserve(usize::MAX).is_err());
        assert_eq!(fx.queue.len(), 1);
        assert!(fx.queue.try_reserve(8).is_ok());
    }

    #[test]
    fn drain_all_empties_without_recording() {
        let mut fx = Fixture::new(4);
        fx.measure(Fingerprint(1), 1, 0, 10);
        fx.measure(Fingerprint(1), 2, 0, 10);
        assert_eq!(fx.queue.drain_all(), 2);
        assert!(fx.queue.is_empty());
        assert!(fx.history.is_empty());
    }
}
