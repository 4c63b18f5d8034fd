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

//! Render-pass autotuning driven by GPU feedback.
//!
//! For every render pass the engine decides between rendering directly to
//! memory (bypass) and rendering through the tile buffer (binned). The choice
//! is learned from sample counters the GPU wrote during earlier,
//! structurally identical render passes.
//!
//! The pieces, leaves first:
//!
//! - [`ring`]: the GPU-visible array of (start, end) sample counters plus the
//!   fence word the GPU writes back when a submission retires.
//! - [`fingerprint`]: the 64-bit key identifying a render pass shape.
//! - [`history`]: the concurrent fingerprint to rolling-statistics cache.
//! - [`pending`]: in-flight measurements waiting for their fence.
//! - [`coordinator`]: the once-per-submission harvest, fence advance and aging.
//! - [`decision`]: the heuristic turning history into a path choice.
//! - [`state`]: the lifecycle and entry points used by the host context.
//!
//! Recording threads share a [`FeedbackRecorder`]; the single submission
//! thread owns the [`FeedbackState`].

#![warn(missing_docs)]

pub mod coordinator;
pub mod decision;
pub mod fingerprint;
pub mod history;
pub mod pending;
pub mod ring;
pub mod state;

pub use coordinator::SubmissionCoordinator;
pub use decision::{Decision, DecisionEngine, DecisionReason};
pub use fingerprint::{fingerprint, Fingerprint};
pub use history::{HistoryCache, HistoryEntry, Measurement, RingBuffer, HISTORY_WINDOW};
pub use pending::{HarvestReport, PendingResult, PendingResultQueue, SequenceRange};
pub use ring::{ResultSlotRing, SampleCounterPair, SlotAllocation, SlotIndex};
pub use state::{
    FeedbackRecorder, FeedbackState, MeasurementHandle, RenderPassDecision, RenderPassInfo,
    StreamFeedback,
};
