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

//! Counters describing what the autotuner did.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters updated by the autotuning engine.
///
/// Every counter is monotonic and updated with `Relaxed` ordering: they are
/// observations, never used to synchronize anything.
#[derive(Debug, Default)]
pub struct AutotuneStats {
    bypass_decisions: AtomicU64,
    binned_decisions: AtomicU64,
    fallback_decisions: AtomicU64,
    forced_decisions: AtomicU64,
    measurements_allocated: AtomicU64,
    measurements_skipped: AtomicU64,
    results_harvested: AtomicU64,
    results_discarded: AtomicU64,
    entries_evicted: AtomicU64,
    corruption_events: AtomicU64,
    submissions: AtomicU64,
}

/// A point-in-time copy of [`AutotuneStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Render passes sent down the bypass path.
    pub bypass_decisions: u64,
    /// Render passes sent down the binned path.
    pub binned_decisions: u64,
    /// Decisions taken by the static fallback (subset of the two above).
    pub fallback_decisions: u64,
    /// Decisions imposed by a debug override (subset of the first two).
    pub forced_decisions: u64,
    /// Result slots handed out.
    pub measurements_allocated: u64,
    /// Measurements dropped because bookkeeping could not grow.
    pub measurements_skipped: u64,
    /// GPU results folded into the history.
    pub results_harvested: u64,
    /// GPU results thrown away (disabled engine, corruption, garbage pairs).
    pub results_discarded: u64,
    /// History entries aged out.
    pub entries_evicted: u64,
    /// Times slot wraparound was detected.
    pub corruption_events: u64,
    /// Submission batches processed.
    pub submissions: u64,
}

impl StatsSnapshot {
    /// Total number of decisions taken.
    pub fn total_decisions(&self) -> u64 {
        self.bypass_decisions + self.binned_decisions
    }

    /// Serializes the snapshot as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl AutotuneStats {
    /// Creates a set of zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one decision. `fallback` and `forced` tag how it was taken.
    pub fn record_decision(&self, use_bypass: bool, fallback: bool, forced: bool) {
        if use_bypass {
            self.bypass_decisions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.binned_decisions.fetch_add(1, Ordering::Relaxed);
        }
        if fallback {
            self.fallback_decisions.fetch_add(1, Ordering::Relaxed);
        }
        if forced {
            self.forced_decisions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counts one allocated result slot.
    pub fn record_measurement_allocated(&self) {
        self.measurements_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts `count` measurements dropped because bookkeeping could not grow.
    pub fn record_skipped(&self, count: u64) {
        self.measurements_skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts `count` results folded into the history.
    pub fn record_harvested(&self, count: u64) {
        self.results_harvested.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts `count` results thrown away.
    pub fn record_discarded(&self, count: u64) {
        self.results_discarded.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts `count` evicted history entries.
    pub fn record_evicted(&self, count: u64) {
        self.entries_evicted.fetch_add(count, Ordering::Relaxed);
    }

    /// Counts one wraparound detection.
    pub fn record_corruption(&self) {
        self.corruption_events.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one processed submission batch.
    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bypass_decisions: self.bypass_decisions.load(Ordering::Relaxed),
            binned_decisions: self.binned_decisions.load(Ordering::Relaxed),
            fallback_decisions: self.fallback_decisions.load(Ordering::Relaxed),
            forced_decisions: self.forced_decisions.load(Ordering::Relaxed),
            measurements_allocated: self.measurements_allocated.load(Ordering::Relaxed),
            measurements_skipped: self.measurements_skipped.load(Ordering::Relaxed),
            results_harvested: self.results_harvested.load(Ordering::Relaxed),
            results_discarded: self.results_discarded.load(Ordering::Relaxed),
            entries_evicted: self.entries_evicted.load(Ordering::Relaxed),
            corruption_events: self.corruption_events.load(Ordering::Relaxed),
            submissions: self.submissions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn decisions_are_tagged() {
        let stats = AutotuneStats::new();
        stats.record_decision(true, true, false);
        stats.record_decision(false, false, false);
        stats.record_decision(true, false, true);

        let snap = stats.snapshot();
        assert_eq!(snap.bypass_decisions, 2);
        assert_eq!(snap.binned_decisions, 1);
        assert_eq!(snap.fallback_decisions, 1);
        assert_eq!(snap.forced_decisions, 1);
        assert_eq!(snap.total_decisions(), 3);
    }

    #[test]
    fn counters_are_shared_across_threads() {
        let stats = Arc::new(AutotuneStats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_measurement_allocated();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().measurements_allocated, 4000);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let stats = AutotuneStats::new();
        stats.record_harvested(6);
        stats.record_skipped(2);
        stats.record_submission();
        let json = stats.snapshot().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["results_harvested"], 6);
        assert_eq!(value["submissions"], 1);
        assert_eq!(value["measurements_skipped"], 2);
        assert_eq!(value["corruption_events"], 0);
    }
}
