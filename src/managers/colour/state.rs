// Author: Quayside contributors
// License: MIT

use serde::Serialize;

/// User-configurable knobs for the gamma pipeline (spec.md §4.6
/// "Scheduling"). `low_temp`/`high_temp` bound the night/day Kelvin values;
/// `gamma` is an additional linear correction applied to every LUT.
#[derive(Debug, Clone)]
pub struct ColourConfig {
    pub enabled: bool,
    pub low_temp: u32,
    pub high_temp: u32,
    pub gamma: f64,
    pub use_ip_location: bool,
    /// Manual HH:MM-since-midnight sunrise/sunset override, highest
    /// priority after `enabled`.
    pub manual_sunrise_minutes: Option<u32>,
    pub manual_sunset_minutes: Option<u32>,
    /// Explicit coordinates, used if set and IP location is not requested.
    pub explicit_coords: Option<(f64, f64)>,
}

impl Default for ColourConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            low_temp: 3500,
            high_temp: 6500,
            gamma: 1.0,
            use_ip_location: true,
            manual_sunrise_minutes: None,
            manual_sunset_minutes: None,
            explicit_coords: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputStatus {
    pub name: String,
    pub ready: bool,
    pub failed: bool,
}

/// Published snapshot (spec.md §3).
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ColourState {
    pub enabled: bool,
    pub current_temp: u32,
    pub target_temp: u32,
    /// Unix timestamp of the next scheduled sunrise/sunset transition.
    pub next_transition: Option<i64>,
    /// Today's sunrise, as a unix timestamp; `None` when no sunrise/sunset
    /// schedule applies (disabled, or no location/manual times resolved).
    pub sunrise: Option<i64>,
    /// Today's sunset, as a unix timestamp (rolled +24h past midnight when
    /// earlier than sunrise; spec.md §4.6).
    pub sunset: Option<i64>,
    /// Whether `now` falls within `[sunrise, sunset)`; `None` when no
    /// schedule applies.
    pub is_day: Option<bool>,
    pub outputs: Vec<OutputStatus>,
    /// Whether per-output gamma controls currently exist (spec.md §4.6
    /// "mark controls as uninitialised" / S6's `controlsInitialized`).
    pub controls_initialized: bool,
}
