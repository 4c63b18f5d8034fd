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

//! Lifecycle and entry points of the feedback engine.
//!
//! A host rendering context owns one [`FeedbackState`], created with
//! [`FeedbackState::init`] and torn down with [`FeedbackState::destroy`].
//! Command-recording threads each get a [`FeedbackRecorder`] and keep one
//! [`StreamFeedback`] per command stream they record. At submission time the
//! streams are handed to [`FeedbackState::on_submit`] on the submission
//! thread.

use crate::coordinator::SubmissionCoordinator;
use crate::decision::{Decision, DecisionEngine, DecisionReason};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::history::HistoryCache;
use crate::ring::{ResultSlotRing, SlotIndex};
use autotune_core::{
    AutotuneSettings, CommandSegment, CommandStream, RenderPassShape, SharedMemoryAllocator,
};
use autotune_telemetry::{AutotuneStats, StatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared between the recording threads and the submission thread.
#[derive(Debug)]
pub(crate) struct FeedbackShared {
    pub(crate) settings: AutotuneSettings,
    pub(crate) engine: DecisionEngine,
    pub(crate) history: HistoryCache,
    pub(crate) ring: Option<ResultSlotRing>,
    pub(crate) stats: AutotuneStats,
    enabled: AtomicBool,
    warned_allocation: AtomicBool,
}

impl FeedbackShared {
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// One-way switch; nothing turns autotuning back on.
    pub(crate) fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Logs the first bookkeeping growth failure of this state. Returns
    /// whether a warning was emitted.
    pub(crate) fn warn_allocation_failure(&self, what: &str) -> bool {
        let first = !self.warned_allocation.swap(true, Ordering::Relaxed);
        if first {
            log::warn!("Autotune could not grow the {what}; skipping measurements.");
        }
        first
    }
}

/// A slot reserved for measuring one render pass.
///
/// The host brackets the render pass body with [`emit_start`](Self::emit_start)
/// and [`emit_end`](Self::emit_end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementHandle {
    /// Fingerprint of the measured render pass.
    pub key: Fingerprint,
    /// Global sequence number of the slot.
    pub sequence: u64,
    /// The reserved ring slot.
    pub slot: SlotIndex,
    start_address: u64,
    end_address: u64,
}

impl MeasurementHandle {
    /// Where the GPU must copy the sample counter before the render pass.
    pub fn start_address(&self) -> u64 {
        self.start_address
    }

    /// Where the GPU must copy the sample counter after the render pass.
    pub fn end_address(&self) -> u64 {
        self.end_address
    }

    /// Appends the start-of-pass counter copy.
    pub fn emit_start(&self, stream: &mut dyn CommandStream) {
        stream.write_sample_count(self.start_address);
    }

    /// Appends the end-of-pass counter copy.
    pub fn emit_end(&self, stream: &mut dyn CommandStream) {
        stream.write_sample_count(self.end_address);
    }
}

/// Measurements recorded into one command stream since its last submission.
///
/// Owned by the recording thread; no synchronization needed. Not `Clone`:
/// every handle must reach the pending queue at most once.
#[derive(Debug, Default)]
pub struct StreamFeedback {
    submit_once: bool,
    measurements: Vec<MeasurementHandle>,
}

impl StreamFeedback {
    /// Creates the list for a command stream. `submit_once` must be `false`
    /// when the stream may be submitted again without being re-recorded.
    pub fn new(submit_once: bool) -> Self {
        Self {
            submit_once,
            measurements: Vec::new(),
        }
    }

    /// Whether the stream is submitted exactly once.
    pub fn is_submit_once(&self) -> bool {
        self.submit_once
    }

    /// Returns `true` if at least one render pass of the stream is measured.
    pub fn has_measurements(&self) -> bool {
        !self.measurements.is_empty()
    }

    /// Number of measured render passes.
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    /// Returns `true` if no render pass is measured.
    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// The measured render passes, in recording order.
    pub fn measurements(&self) -> &[MeasurementHandle] {
        &self.measurements
    }

    /// Forgets the recorded measurements, for a stream reset or destroyed
    /// without being submitted. Returns how many were dropped.
    pub fn reset(&mut self) -> usize {
        let dropped = self.measurements.len();
        self.measurements.clear();
        dropped
    }

    pub(crate) fn take(&mut self) -> Vec<MeasurementHandle> {
        std::mem::take(&mut self.measurements)
    }
}

/// What the host knows about a render pass when it ends.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassInfo<'a> {
    /// Structural description of the pass.
    pub shape: RenderPassShape<'a>,
    /// Number of draws recorded in the pass.
    pub draw_count: u32,
    /// Cost per sample from this frame's draw-cost accounting.
    pub cost_per_sample: u64,
}

/// The outcome of [`FeedbackRecorder::on_renderpass_end`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPassDecision {
    /// `true` renders directly to memory, `false` through the tile buffer.
    pub use_bypass: bool,
    /// Why the path was chosen.
    pub reason: DecisionReason,
    /// Fingerprint of the pass, when it was computed.
    pub fingerprint: Option<Fingerprint>,
    /// The slot to fill, when the pass is measured.
    pub measurement: Option<MeasurementHandle>,
    /// History average that fed the decision.
    pub average_samples: Option<u64>,
}

/// Cheap, cloneable access to the engine for command-recording threads.
#[derive(Debug, Clone)]
pub struct FeedbackRecorder {
    shared: Arc<FeedbackShared>,
}

impl FeedbackRecorder {
    /// Decides the path of a render pass that just ended and, when eligible,
    /// reserves a slot to measure it.
    ///
    /// Never fails: every problem degrades to the static fallback.
    pub fn on_renderpass_end(
        &self,
        stream: &mut StreamFeedback,
        info: &RenderPassInfo<'_>,
    ) -> RenderPassDecision {
        let shared = &*self.shared;

        if let Some(forced) = shared.engine.forced() {
            return self.finish(info, forced, None, None, None);
        }

        let ring = match shared.ring.as_ref() {
            Some(ring) if shared.is_enabled() => ring,
            _ => {
                let decision = self.fallback(info, DecisionReason::Disabled);
                return self.finish(info, decision, None, None, None);
            }
        };

        if !stream.submit_once {
            let decision = self.fallback(info, DecisionReason::NotSubmitOnce);
            return self.finish(info, decision, None, None, None);
        }

        // A single stream holding more measurements than the ring has slots
        // would overwrite its own results.
        let key = fingerprint(&info.shape);
        let stream_full = stream.measurements.len() >= ring.capacity() as usize;
        if stream_full || stream.measurements.try_reserve(1).is_err() {
            shared.warn_allocation_failure("stream measurement list");
            shared.stats.record_skipped(1);
            let decision = self.fallback(info, DecisionReason::NoHistory);
            return self.finish(info, decision, Some(key), None, None);
        }

        let allocation = ring.allocate_slot();
        let handle = MeasurementHandle {
            key,
            sequence: allocation.sequence,
            slot: allocation.slot,
            start_address: ring.start_address(allocation.slot),
            end_address: ring.end_address(allocation.slot),
        };
        stream.measurements.push(handle);
        shared.stats.record_measurement_allocated();

        let average = shared.history.lookup(key);
        let decision =
            shared
                .engine
                .should_use_bypass(&info.shape, info.draw_count, info.cost_per_sample, average);
        self.finish(info, decision, Some(key), Some(handle), average)
    }

    /// Whether autotuning is still active.
    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    fn fallback(&self, info: &RenderPassInfo<'_>, reason: DecisionReason) -> Decision {
        self.shared
            .engine
            .fallback(&info.shape, info.draw_count, reason)
    }

    fn finish(
        &self,
        info: &RenderPassInfo<'_>,
        decision: Decision,
        fingerprint: Option<Fingerprint>,
        measurement: Option<MeasurementHandle>,
        average_samples: Option<u64>,
    ) -> RenderPassDecision {
        let shared = &*self.shared;
        shared.stats.record_decision(
            decision.use_bypass,
            decision.reason.is_fallback(),
            decision.reason == DecisionReason::Forced,
        );
        if shared.settings.log_decisions {
            log::info!(
                "autotune: fp={} draws={} avg={} -> {} ({})",
                fingerprint.map_or_else(|| "-".to_string(), |fp| fp.to_string()),
                info.draw_count,
                average_samples.map_or_else(|| "-".to_string(), |avg| avg.to_string()),
                if decision.use_bypass { "bypass" } else { "binned" },
                decision.reason,
            );
        }
        RenderPassDecision {
            use_bypass: decision.use_bypass,
            reason: decision.reason,
            fingerprint,
            measurement,
            average_samples,
        }
    }
}

/// The feedback engine of one rendering context.
#[derive(Debug)]
pub struct FeedbackState {
    shared: Arc<FeedbackShared>,
    coordinator: SubmissionCoordinator,
}

impl FeedbackState {
    /// Creates the engine and allocates its GPU-visible result ring.
    ///
    /// Never fails. Invalid settings or a failed allocation leave the engine
    /// disabled, so every decision is the static fallback.
    pub fn init(settings: AutotuneSettings, allocator: &dyn SharedMemoryAllocator) -> Self {
        let mut enabled = settings.enabled;
        if let Err(e) = settings.validate() {
            log::warn!("Invalid autotune settings, autotuning disabled: {e}");
            enabled = false;
        }

        let ring = if enabled {
            match ResultSlotRing::new(allocator, settings.ring_capacity) {
                Ok(ring) => {
                    log::info!(
                        "Autotune result ring: {} slots, {} bytes at {:#x}",
                        ring.capacity(),
                        ResultSlotRing::byte_size(ring.capacity()),
                        ring.fence_address()
                    );
                    Some(ring)
                }
                Err(e) => {
                    log::warn!("Failed to allocate the autotune result ring, autotuning disabled: {e}");
                    None
                }
            }
        } else {
            None
        };
        let enabled = enabled && ring.is_some();

        let shared = FeedbackShared {
            engine: DecisionEngine::from_settings(&settings),
            history: HistoryCache::with_max_entries(settings.max_history_entries),
            settings,
            ring,
            stats: AutotuneStats::new(),
            enabled: AtomicBool::new(enabled),
            warned_allocation: AtomicBool::new(false),
        };
        Self {
            shared: Arc::new(shared),
            coordinator: SubmissionCoordinator::new(),
        }
    }

    /// A handle for a command-recording thread.
    pub fn recorder(&self) -> FeedbackRecorder {
        FeedbackRecorder {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Same as [`FeedbackRecorder::on_renderpass_end`].
    pub fn on_renderpass_end(
        &self,
        stream: &mut StreamFeedback,
        info: &RenderPassInfo<'_>,
    ) -> RenderPassDecision {
        self.recorder().on_renderpass_end(stream, info)
    }

    /// Processes a batch of command streams about to be submitted.
    ///
    /// The measurements of `streams` move into the pending queue. The returned
    /// segment must be submitted after the batch's own streams.
    pub fn on_submit<'s>(
        &mut self,
        streams: impl IntoIterator<Item = &'s mut StreamFeedback>,
    ) -> CommandSegment {
        self.coordinator.on_submit(&self.shared, streams)
    }

    /// Returns `true` if any of `streams` measured a render pass, i.e. the
    /// fence write from [`on_submit`](Self::on_submit) is worth submitting.
    pub fn submission_requires_extra_fence<'s>(
        streams: impl IntoIterator<Item = &'s StreamFeedback>,
    ) -> bool {
        streams.into_iter().any(StreamFeedback::has_measurements)
    }

    /// Whether autotuning is still active.
    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The history cache.
    pub fn history(&self) -> &HistoryCache {
        &self.shared.history
    }

    /// The settings the engine was created with.
    pub fn settings(&self) -> &AutotuneSettings {
        &self.shared.settings
    }

    /// The submission-side bookkeeping.
    pub fn coordinator(&self) -> &SubmissionCoordinator {
        &self.coordinator
    }

    /// The result ring, if it was allocated.
    pub fn ring(&self) -> Option<&ResultSlotRing> {
        self.shared.ring.as_ref()
    }

    /// Tears the engine down: pending results are dropped without being read
    /// and the history is cleared. Returns the final counters.
    pub fn destroy(mut self) -> StatsSnapshot {
        self.shared.disable();
        let dropped = self.coordinator.drain();
        self.shared.stats.record_discarded(dropped as u64);
        let entries = self.shared.history.len();
        self.shared.history.clear();
        log::debug!(
            "Autotune teardown: dropped {dropped} pending results and {entries} history entries"
        );
        self.shared.stats.snapshot()
    }
}
