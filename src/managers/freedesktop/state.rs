// Author: Quayside contributors
// License: MIT

use serde::Serialize;

/// A subset of `org.freedesktop.Accounts.User` properties (spec.md §6
/// `freedesktop.getAccount`/`setAccount`).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub user_name: String,
    pub real_name: String,
    pub icon_file: String,
    pub email: String,
    pub language: String,
}
