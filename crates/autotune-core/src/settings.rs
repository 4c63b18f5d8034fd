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

//! Settings for the render-pass autotuner.
//!
//! The numeric thresholds are empirically tuned and kept as-is. Hosts can load
//! the whole struct through serde, or start from [`AutotuneSettings::from_env`]
//! to honour the `AUTOTUNE_DEBUG` variable.

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};

/// Name of the environment variable read by [`AutotuneSettings::from_env`].
pub const DEBUG_ENV_VAR: &str = "AUTOTUNE_DEBUG";

/// A debug override of the rendering path choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedPath {
    /// Let the autotuner decide.
    #[default]
    Auto,
    /// Always render directly to memory.
    Bypass,
    /// Always render through the tile buffer.
    Binned,
}

/// Tunables of the autotuning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutotuneSettings {
    /// Master switch. When `false` the engine starts disabled and only ever
    /// returns the static fallback decision.
    pub enabled: bool,
    /// Number of (start, end) counter slots in the GPU-visible result ring.
    pub ring_capacity: u32,
    /// Number of submissions an untouched history entry survives.
    pub max_history_age: u32,
    /// Upper bound on tracked render pass shapes. New shapes seen while the
    /// cache is full are not recorded until aging frees room.
    pub max_history_entries: usize,
    /// Average sample delta below which the bypass path is always chosen.
    pub low_overdraw_threshold: u64,
    /// Estimated per-draw cost below which the bypass path is chosen.
    pub per_draw_cost_crossover: u64,
    /// The static fallback chooses bypass for at most this many draws.
    pub fallback_max_draws: u32,
    /// Debug override of the rendering path.
    pub forced_path: ForcedPath,
    /// Emit one info log line per decision.
    pub log_decisions: bool,
}

impl Default for AutotuneSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ring_capacity: 256,
            max_history_age: 128,
            max_history_entries: 4096,
            low_overdraw_threshold: 500,
            per_draw_cost_crossover: 6000,
            fallback_max_draws: 5,
            forced_path: ForcedPath::Auto,
            log_decisions: false,
        }
    }
}

impl AutotuneSettings {
    /// Builds the default settings and applies the `AUTOTUNE_DEBUG` variable.
    ///
    /// Invalid flags are reported and ignored, the rest of the variable still
    /// applies.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(flags) = std::env::var(DEBUG_ENV_VAR) {
            for e in settings.apply_debug_flags_lenient(&flags) {
                log::warn!("Ignoring part of {DEBUG_ENV_VAR}='{flags}': {e}");
            }
        }
        settings
    }

    /// Applies a comma separated list of debug flags.
    ///
    /// Recognised flags: `bypass`, `binned`, `off`, `log`. Flags are applied
    /// left to right; the first invalid one stops parsing and is returned.
    pub fn apply_debug_flags(&mut self, flags: &str) -> Result<(), SettingsError> {
        let mut forced_by = None;
        for flag in split_flags(flags) {
            self.apply_debug_flag(flag, &mut forced_by)?;
        }
        Ok(())
    }

    /// Like [`apply_debug_flags`](Self::apply_debug_flags), but skips invalid
    /// flags and keeps going. Returns the error of every skipped flag.
    pub fn apply_debug_flags_lenient(&mut self, flags: &str) -> Vec<SettingsError> {
        let mut forced_by = None;
        split_flags(flags)
            .filter_map(|flag| self.apply_debug_flag(flag, &mut forced_by).err())
            .collect()
    }

    // `forced_by` remembers the flag that set the forced path, so a later
    // flag forcing the other path is reported as a conflict.
    fn apply_debug_flag<'f>(
        &mut self,
        flag: &'f str,
        forced_by: &mut Option<&'f str>,
    ) -> Result<(), SettingsError> {
        let forced = match flag.to_ascii_lowercase().as_str() {
            "bypass" | "sysmem" => ForcedPath::Bypass,
            "binned" | "gmem" => ForcedPath::Binned,
            "off" => {
                self.enabled = false;
                return Ok(());
            }
            "log" => {
                self.log_decisions = true;
                return Ok(());
            }
            _ => return Err(SettingsError::UnknownDebugFlag(flag.to_string())),
        };

        if let Some(previous) = *forced_by {
            if self.forced_path != forced {
                return Err(SettingsError::ConflictingForcedPath(
                    previous.to_string(),
                    flag.to_string(),
                ));
            }
        }
        self.forced_path = forced;
        *forced_by = Some(flag);
        Ok(())
    }

    /// Checks the settings for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.ring_capacity == 0 {
            return Err(SettingsError::ZeroRingCapacity);
        }
        Ok(())
    }
}

fn split_flags(flags: &str) -> impl Iterator<Item = &str> {
    flags.split(',').map(str::trim).filter(|f| !f.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_constants() {
        let settings = AutotuneSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.ring_capacity, 256);
        assert_eq!(settings.max_history_age, 128);
        assert_eq!(settings.max_history_entries, 4096);
        assert_eq!(settings.low_overdraw_threshold, 500);
        assert_eq!(settings.per_draw_cost_crossover, 6000);
        assert_eq!(settings.fallback_max_draws, 5);
        assert_eq!(settings.forced_path, ForcedPath::Auto);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn debug_flags_apply_in_order() {
        let mut settings = AutotuneSettings::default();
        settings.apply_debug_flags(" Bypass , log").unwrap();
        assert_eq!(settings.forced_path, ForcedPath::Bypass);
        assert!(settings.log_decisions);
        assert!(settings.enabled);

        let mut settings = AutotuneSettings::default();
        settings.apply_debug_flags("off").unwrap();
        assert!(!settings.enabled);

        let mut settings = AutotuneSettings::default();
        assert!(settings.apply_debug_flags("").is_ok());
        assert_eq!(settings, AutotuneSettings::default());
    }

    #[test]
    fn debug_flags_reject_unknown_and_conflicts() {
        let mut settings = AutotuneSettings::default();
        assert_eq!(
            settings.apply_debug_flags("log,turbo"),
            Err(SettingsError::UnknownDebugFlag("turbo".to_string()))
        );
        // Flags before the bad one still applied.
        assert!(settings.log_decisions);

        let mut settings = AutotuneSettings::default();
        assert_eq!(
            settings.apply_debug_flags("bypass,gmem"),
            Err(SettingsError::ConflictingForcedPath(
                "bypass".to_string(),
                "gmem".to_string()
            ))
        );
    }

    #[test]
    fn lenient_flags_skip_only_the_bad_ones() {
        let mut settings = AutotuneSettings::default();
        let errors = settings.apply_debug_flags_lenient("turbo, bypass ,gmem,log");
        assert_eq!(
            errors,
            vec![
                SettingsError::UnknownDebugFlag("turbo".to_string()),
                SettingsError::ConflictingForcedPath("bypass".to_string(), "gmem".to_string()),
            ]
        );
        // The first forced path wins; flags after the bad ones still apply.
        assert_eq!(settings.forced_path, ForcedPath::Bypass);
        assert!(settings.log_decisions);
    }

    #[test]
    fn from_env_ignores_unknown_flags() {
        // The only test touching this variable.
        std::env::set_var(DEBUG_ENV_VAR, "turbo,bypass,log");
        let settings = AutotuneSettings::from_env();
        std::env::remove_var(DEBUG_ENV_VAR);

        assert_eq!(settings.forced_path, ForcedPath::Bypass);
        assert!(settings.log_decisions);
        assert!(settings.enabled);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let settings = AutotuneSettings {
            ring_capacity: 0,
            ..Default::default()
        };
        assert_eq!(settings.validate(), Err(SettingsError::ZeroRingCapacity));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let settings: AutotuneSettings =
            serde_json::from_str(r#"{ "ring_capacity": 64, "forced_path": "binned" }"#).unwrap();
        assert_eq!(settings.ring_capacity, 64);
        assert_eq!(settings.forced_path, ForcedPath::Binned);
        assert_eq!(settings.max_history_age, 128);
    }
}
