//! Sidebar labels
//!
//! Story names in a UI sidebar carry a status icon prefix. These helpers
//! derive the icon and keep the prefix in sync as statuses change.

use super::types::{RunStatus, Skip, TestStatus};

const ICONS: [&str; 5] = ["❌", "✔", "🟡", "🕗", "⏸"];

pub fn status_icon(status: Option<TestStatus>, skip: &Skip) -> &'static str {
    match status {
        Some(TestStatus::Failed) => "❌",
        Some(TestStatus::Success) => "✔",
        Some(TestStatus::Running) => "🟡",
        Some(TestStatus::Pending) => "🕗",
        _ if skip.is_skipped() => "⏸",
        _ => "",
    }
}

/// Remove a leading `"<icon> "` written by [`decorate_name`].
pub fn strip_icon(name: &str) -> &str {
    ICONS
        .iter()
        .find_map(|icon| name.strip_prefix(*icon).and_then(|rest| rest.strip_prefix(' ')))
        .unwrap_or(name)
}

/// Replace any icon prefix of `name` with the one for `status`/`skip`.
/// Without an icon the bare name is returned.
pub fn decorate_name(name: &str, status: Option<TestStatus>, skip: &Skip) -> String {
    match status_icon(status, skip) {
        "" => strip_icon(name).to_string(),
        icon => format!("{} {}", icon, strip_icon(name)),
    }
}

/// Label for a story, derived from the first test that renders it.
pub fn story_label(status: &RunStatus, story_id: &str, name: &str) -> String {
    match status.tests_for_story(story_id).next() {
        Some(test) => decorate_name(name, test.status, &test.skip),
        None => decorate_name(name, None, &Skip::default()),
    }
}
