// Author: Quayside contributors
// License: MIT

use serde::Serialize;

/// Mirrored session properties (spec.md §3 SessionState, §4.3).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub active: bool,
    pub idle: bool,
    pub idle_since_hint: Option<u64>,
    pub locked: bool,
    pub preparing_for_sleep: bool,
    pub inhibitor_held: bool,
}
