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

//! The bypass versus binned heuristic.
//!
//! [`DecisionEngine`] is pure: it turns a render pass description and an
//! optional history average into a [`Decision`]. Eligibility checks, slot
//! allocation and cache lookups happen in [`crate::state`], which feeds the
//! outcome in here.

use autotune_core::{AutotuneSettings, ForcedPath, RenderPassShape};
use std::fmt;

/// Why a path was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionReason {
    /// A debug override picked the path.
    Forced,
    /// Autotuning is disabled; the static fallback decided.
    Disabled,
    /// The command stream may be replayed; the static fallback decided.
    NotSubmitOnce,
    /// The shape has no history yet; the static fallback decided.
    NoHistory,
    /// The history average is below the low-overdraw threshold.
    LowOverdraw,
    /// The estimated per-draw cost was compared against the crossover.
    PerDrawCost,
}

impl DecisionReason {
    /// Returns `true` for the reasons that resolve to the static fallback.
    pub fn is_fallback(self) -> bool {
        matches!(
            self,
            DecisionReason::Disabled | DecisionReason::NotSubmitOnce | DecisionReason::NoHistory
        )
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DecisionReason::Forced => "forced",
            DecisionReason::Disabled => "disabled",
            DecisionReason::NotSubmitOnce => "not-submit-once",
            DecisionReason::NoHistory => "no-history",
            DecisionReason::LowOverdraw => "low-overdraw",
            DecisionReason::PerDrawCost => "per-draw-cost",
        };
        f.write_str(name)
    }
}

/// A path choice and its reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// `true` renders directly to memory, `false` through the tile buffer.
    pub use_bypass: bool,
    /// Why.
    pub reason: DecisionReason,
}

/// Tuned thresholds of the heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionEngine {
    low_overdraw_threshold: u64,
    per_draw_cost_crossover: u64,
    fallback_max_draws: u32,
    forced_path: ForcedPath,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::from_settings(&AutotuneSettings::default())
    }
}

impl DecisionEngine {
    /// Takes the thresholds from `settings`.
    pub fn from_settings(settings: &AutotuneSettings) -> Self {
        Self {
            low_overdraw_threshold: settings.low_overdraw_threshold,
            per_draw_cost_crossover: settings.per_draw_cost_crossover,
            fallback_max_draws: settings.fallback_max_draws,
            forced_path: settings.forced_path,
        }
    }

    /// The debug override, if one is set.
    pub fn forced(&self) -> Option<Decision> {
        let use_bypass = match self.forced_path {
            ForcedPath::Auto => return None,
            ForcedPath::Bypass => true,
            ForcedPath::Binned => false,
        };
        Some(Decision {
            use_bypass,
            reason: DecisionReason::Forced,
        })
    }

    /// The zero-history choice: bypass only for few draws and no multisampling.
    pub fn static_fallback(&self, shape: &RenderPassShape<'_>, draw_count: u32) -> bool {
        draw_count <= self.fallback_max_draws && shape.is_single_sampled()
    }

    /// `average * cost_per_sample / draw_count`, saturating on overflow.
    ///
    /// A pass without draws is costed as a single draw.
    pub fn per_draw_cost(average_samples: u64, cost_per_sample: u64, draw_count: u32) -> u64 {
        average_samples.saturating_mul(cost_per_sample) / u64::from(draw_count.max(1))
    }

    /// Decides for a pass eligible for measurement.
    ///
    /// `history_average` is the cache lookup for the pass's fingerprint.
    /// Ties at either threshold go to the binned path.
    pub fn should_use_bypass(
        &self,
        shape: &RenderPassShape<'_>,
        draw_count: u32,
        cost_per_sample: u64,
        history_average: Option<u64>,
    ) -> Decision {
        let Some(average) = history_average else {
            return self.fallback(shape, draw_count, DecisionReason::NoHistory);
        };

        if average < self.low_overdraw_threshold {
            return Decision {
                use_bypass: true,
                reason: DecisionReason::LowOverdraw,
            };
        }

        let cost = Self::per_draw_cost(average, cost_per_sample, draw_count);
        Decision {
            use_bypass: cost < self.per_draw_cost_crossover,
            reason: DecisionReason::PerDrawCost,
        }
    }

    /// Wraps the static fallback into a [`Decision`] with `reason`.
    pub fn fallback(
        &self,
        shape: &RenderPassShape<'_>,
        draw_count: u32,
        reason: DecisionReason,
    ) -> Decision {
        Decision {
            use_bypass: self.static_fallback(shape, draw_count),
            reason,
        }
    }
}
