// Author: Quayside contributors
// License: MIT

use std::collections::HashMap;

use serde::Serialize;

/// One tracked toplevel/window as reported by the foreign-toplevel protocol
/// (spec.md §4.7: "title, appId, active").
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub title: String,
    pub app_id: String,
    pub active: bool,
    pub tags: u32,
}

/// Per-output view (spec.md §4.7 `{tags, layout, title, appId, active}`).
/// `title`/`app_id`/`active` mirror the currently-activated toplevel on this
/// output, if any; `clients` carries every tracked toplevel assigned here.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputView {
    pub tags: u32,
    pub layout: String,
    pub title: String,
    pub app_id: String,
    pub active: bool,
    pub clients: Vec<ClientInfo>,
}

/// Published snapshot (spec.md §3, §4.7).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositorState {
    pub available: bool,
    pub outputs: HashMap<String, OutputView>,
    pub tag_count: u32,
    pub layouts: Vec<String>,
    pub active_output: Option<String>,
}
