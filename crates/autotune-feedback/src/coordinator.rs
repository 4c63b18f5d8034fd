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

//! The once-per-submission bookkeeping.
//!
//! Runs on the submission thread only, which is why it is driven through
//! `&mut self` and owns the pending queue outright.

use crate::pending::{PendingResult, PendingResultQueue};
use crate::state::{FeedbackShared, StreamFeedback};
use autotune_core::{CommandSegment, CommandStream};

/// Owns the pending queue and the submission fence counter.
#[derive(Debug, Default)]
pub struct SubmissionCoordinator {
    pending: PendingResultQueue,
    fence: u32,
}

impl SubmissionCoordinator {
    /// Creates a coordinator that has not seen any submission.
    pub fn new() -> Self {
        Self::default()
    }

    /// The fence value assigned to the last submission. 0 before the first one.
    pub fn fence(&self) -> u32 {
        self.fence
    }

    /// Measurements waiting for their submission to retire.
    pub fn pending(&self) -> &PendingResultQueue {
        &self.pending
    }

    /// Harvests retired results, advances the fence, moves the measurements of
    /// `streams` into the pending queue and ages out stale history.
    ///
    /// Returns the fence write the host must submit after `streams`. The
    /// segment is empty when autotuning is disabled.
    pub(crate) fn on_submit<'s>(
        &mut self,
        shared: &FeedbackShared,
        streams: impl IntoIterator<Item = &'s mut StreamFeedback>,
    ) -> CommandSegment {
        shared.stats.record_submission();

        let ring = match shared.ring.as_ref() {
            Some(ring) if shared.is_enabled() => ring,
            _ => {
                self.discard(shared, streams);
                return CommandSegment::new();
            }
        };

        let gpu_fence = ring.read_fence().unwrap_or_else(|e| {
            log::warn!("Failed to read the autotune fence: {e}");
            0
        });
        let report = self.pending.harvest(gpu_fence, ring, &shared.history);
        shared.stats.record_harvested(report.harvested);
        shared.stats.record_discarded(report.discarded);
        if report.rejected > 0 {
            shared.warn_allocation_failure("history cache");
            shared.stats.record_skipped(report.rejected);
        }

        if let Some(range) = report.corruption {
            log::error!(
                "Autotune result slots {range} span more than the {} slot ring; \
                 results were overwritten before being read. Disabling autotuning.",
                ring.capacity()
            );
            shared.stats.record_corruption();
            shared.disable();
            self.discard(shared, streams);
            return CommandSegment::new();
        }

        // Zero is reserved for "never written", so the counter cannot wrap.
        let Some(fence) = self.fence.checked_add(1) else {
            log::warn!("Autotune fence counter exhausted. Disabling autotuning.");
            shared.disable();
            self.discard(shared, streams);
            return CommandSegment::new();
        };
        self.fence = fence;

        let handles: Vec<_> = streams.into_iter().flat_map(StreamFeedback::take).collect();
        if self.pending.try_reserve(handles.len()).is_err() {
            shared.warn_allocation_failure("pending result queue");
            shared.stats.record_skipped(handles.len() as u64);
        } else {
            for handle in handles {
                self.pending.push(PendingResult {
                    key: handle.key,
                    sequence: handle.sequence,
                    slot: handle.slot,
                    fence,
                });
            }
        }

        let evicted = shared
            .history
            .evict_stale(fence, shared.settings.max_history_age);
        if evicted > 0 {
            log::debug!("Evicted {evicted} stale autotune history entries at fence {fence}");
            shared.stats.record_evicted(evicted as u64);
        }

        let mut segment = CommandSegment::new();
        segment.write_fence(ring.fence_address(), fence);
        segment
    }

    /// Drops every pending result without reading it.
    pub(crate) fn drain(&mut self) -> usize {
        self.pending.drain_all()
    }

    fn discard<'s>(
        &mut self,
        shared: &FeedbackShared,
        streams: impl IntoIterator<Item = &'s mut StreamFeedback>,
    ) {
        let mut dropped = self.pending.drain_all();
        for stream in streams {
            dropped += stream.take().len();
        }
        shared.stats.record_discarded(dropped as u64);
    }
}
