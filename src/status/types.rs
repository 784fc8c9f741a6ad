use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Status of a single visual test.
///
/// Values this build does not know decode as [`TestStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Unknown,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Pending => "pending",
            TestStatus::Running => "running",
            TestStatus::Success => "success",
            TestStatus::Failed => "failed",
            TestStatus::Skipped => "skipped",
            TestStatus::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestStatus::Success | TestStatus::Failed | TestStatus::Skipped
        )
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TestStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "pending" => TestStatus::Pending,
            "running" => TestStatus::Running,
            "success" => TestStatus::Success,
            "failed" => TestStatus::Failed,
            "skipped" => TestStatus::Skipped,
            _ => TestStatus::Unknown,
        })
    }
}

/// `skip` is either a flag or the reason the test is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skip {
    Flag(bool),
    Reason(String),
}

impl Skip {
    pub fn is_skipped(&self) -> bool {
        match self {
            Skip::Flag(flag) => *flag,
            Skip::Reason(reason) => !reason.is_empty(),
        }
    }
}

impl Default for Skip {
    fn default() -> Self {
        Skip::Flag(false)
    }
}

impl From<bool> for Skip {
    fn from(flag: bool) -> Self {
        Skip::Flag(flag)
    }
}

/// Screenshot paths captured for one image of one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    pub actual: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Outcome of one attempt of a test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    #[serde(default, alias = "retries", skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, ImageSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
}

/// Canonical state of one test in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub skip: Skip,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<TestResult>,
    /// Image name -> index of the retry whose screenshot was approved
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub approved: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
}

impl Test {
    pub fn new(id: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            id: id.into(),
            path,
            skip: Skip::default(),
            status: None,
            results: Vec::new(),
            approved: BTreeMap::new(),
            story_id: None,
        }
    }

    /// Human readable location, e.g. `Button / Primary / hover`.
    pub fn title(&self) -> String {
        if self.path.is_empty() {
            self.id.clone()
        } else {
            self.path.join(" / ")
        }
    }

    pub fn last_result(&self) -> Option<&TestResult> {
        self.results.last()
    }
}

/// Partial update of one test. Absent fields leave the test untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<Skip>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TestStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<TestResult>>,
    /// A `None` retry means "no approval" and is ignored by the merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved: Option<BTreeMap<String, Option<u32>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub story_id: Option<String>,
}

impl TestUpdate {
    /// Whether merging this update can change an existing test.
    pub fn touches_fields(&self) -> bool {
        self.skip.is_some()
            || self.status.is_some()
            || self.results.is_some()
            || self.approved.is_some()
    }
}

/// Ordered `id -> update` entries of a status update. A `None` update is a
/// bare mention of the id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestUpdates(Vec<(String, Option<TestUpdate>)>);

impl TestUpdates {
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&TestUpdate>)> {
        self.0.iter().map(|(id, update)| (id.as_str(), update.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, id: impl Into<String>, update: Option<TestUpdate>) {
        self.0.push((id.into(), update));
    }
}

impl FromIterator<(String, Option<TestUpdate>)> for TestUpdates {
    fn from_iter<I: IntoIterator<Item = (String, Option<TestUpdate>)>>(iter: I) -> Self {
        TestUpdates(iter.into_iter().collect())
    }
}

impl Serialize for TestUpdates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, update) in &self.0 {
            map.serialize_entry(id, update)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TestUpdates {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer
            .deserialize_map(EntriesVisitor::new("a map of test updates"))
            .map(TestUpdates)
    }
}

/// Payload of the `test` scope: one batch of changes to the run status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestUpdates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_tests: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_running: Option<bool>,
}

impl StatusUpdate {
    pub fn with_test(mut self, id: impl Into<String>, update: TestUpdate) -> Self {
        self.tests
            .get_or_insert_with(TestUpdates::default)
            .push(id, Some(update));
        self
    }

    pub fn with_removed(mut self, path: Vec<String>) -> Self {
        self.removed_tests.get_or_insert_with(Vec::new).push(path);
        self
    }

    pub fn with_running(mut self, is_running: bool) -> Self {
        self.is_running = Some(is_running);
        self
    }
}

/// Tests of a run keyed by id, in first-seen order.
///
/// Tests are reference counted so that successive trees share every test an
/// update did not touch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusTree {
    entries: Vec<Arc<Test>>,
    index: HashMap<String, usize>,
}

impl StatusTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Test> {
        self.index.get(id).map(|&i| self.entries[i].as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Test> {
        self.entries.iter().map(|test| test.as_ref())
    }

    /// Whether both trees hold the very same allocation for `id`.
    pub fn shares_test(&self, other: &StatusTree, id: &str) -> bool {
        match (self.index.get(id), other.index.get(id)) {
            (Some(&a), Some(&b)) => Arc::ptr_eq(&self.entries[a], &other.entries[b]),
            _ => false,
        }
    }

    /// Insert or replace in place, keeping the original position.
    pub fn insert(&mut self, test: Test) {
        match self.index.get(&test.id) {
            Some(&i) => self.entries[i] = Arc::new(test),
            None => {
                self.index.insert(test.id.clone(), self.entries.len());
                self.entries.push(Arc::new(test));
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Test> {
        let position = self.index.remove(id)?;
        let removed = self.entries.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(Arc::try_unwrap(removed).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Keep only the tests matching `keep`; returns the ids dropped.
    pub fn retain(&mut self, mut keep: impl FnMut(&Test) -> bool) -> Vec<String> {
        let mut dropped = Vec::new();
        self.entries.retain(|test| {
            let kept = keep(test);
            if !kept {
                dropped.push(test.id.clone());
            }
            kept
        });
        if !dropped.is_empty() {
            self.reindex();
        }
        dropped
    }

    /// Mutable access, cloning the test first if another tree shares it.
    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Test> {
        let i = *self.index.get(id)?;
        Some(Arc::make_mut(&mut self.entries[i]))
    }

    fn reindex(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, test)| (test.id.clone(), i))
            .collect();
    }
}

impl FromIterator<Test> for StatusTree {
    fn from_iter<I: IntoIterator<Item = Test>>(iter: I) -> Self {
        let mut tree = StatusTree::new();
        for test in iter {
            tree.insert(test);
        }
        tree
    }
}

impl Serialize for StatusTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for test in &self.entries {
            map.serialize_entry(&test.id, test.as_ref())?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StatusTree {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries: Vec<(String, Test)> =
            deserializer.deserialize_map(EntriesVisitor::new("a map of tests"))?;
        Ok(entries
            .into_iter()
            .map(|(id, mut test)| {
                test.id = id;
                test
            })
            .collect())
    }
}

/// Collects a map into ordered `(key, value)` pairs.
struct EntriesVisitor<V> {
    expecting: &'static str,
    marker: PhantomData<V>,
}

impl<V> EntriesVisitor<V> {
    fn new(expecting: &'static str) -> Self {
        Self {
            expecting,
            marker: PhantomData,
        }
    }
}

impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
    type Value = Vec<(String, V)>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.expecting)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, V>()? {
            entries.push((key, value));
        }
        Ok(entries)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Vec::new())
    }
}

/// Everything a UI observes about a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub tests: StatusTree,
}

impl RunStatus {
    /// Tests rendered by the given story.
    pub fn tests_for_story<'a>(&'a self, story_id: &'a str) -> impl Iterator<Item = &'a Test> {
        self.tests
            .iter()
            .filter(move |test| test.story_id.as_deref() == Some(story_id))
    }

    pub fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary {
            total: self.tests.len(),
            ..Default::default()
        };
        for test in self.tests.iter() {
            match test.status {
                Some(TestStatus::Success) => summary.passed += 1,
                Some(TestStatus::Failed) => summary.failed += 1,
                Some(TestStatus::Running) => summary.running += 1,
                Some(TestStatus::Pending) => summary.pending += 1,
                Some(TestStatus::Skipped) => summary.skipped += 1,
                _ if test.skip.is_skipped() => summary.skipped += 1,
                _ => {}
            }
        }
        summary
    }
}

/// Test counts of a run by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    pub skipped: usize,
}

impl StatusSummary {
    /// Tests that reached a final outcome.
    pub fn finished(&self) -> usize {
        self.passed + self.failed + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_status_is_tolerated() {
        let status: TestStatus = serde_json::from_value(json!("approved")).unwrap();
        assert_eq!(status, TestStatus::Unknown);
        let status: TestStatus = serde_json::from_value(json!("failed")).unwrap();
        assert_eq!(status, TestStatus::Failed);
    }

    #[test]
    fn test_skip_accepts_flag_or_reason() {
        let flag: Skip = serde_json::from_value(json!(true)).unwrap();
        let reason: Skip = serde_json::from_value(json!("flaky on firefox")).unwrap();
        assert!(flag.is_skipped());
        assert_eq!(reason, Skip::Reason("flaky on firefox".to_string()));
        assert!(reason.is_skipped());
        assert!(!Skip::default().is_skipped());
    }

    #[test]
    fn test_update_keeps_wire_order_and_null_entries() {
        let update: StatusUpdate = serde_json::from_value(json!({
            "tests": {
                "zeta": { "status": "running" },
                "alpha": null,
                "mid": { "approved": { "img1": 2, "img2": null } }
            }
        }))
        .unwrap();

        let tests = update.tests.unwrap();
        let ids: Vec<&str> = tests.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);

        let entries: Vec<_> = tests.iter().collect();
        assert!(entries[1].1.is_none());
        let approved = entries[2].1.unwrap().approved.as_ref().unwrap();
        assert_eq!(approved.get("img1"), Some(&Some(2)));
        assert_eq!(approved.get("img2"), Some(&None));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TestStatus::Success.is_terminal());
        assert!(TestStatus::Failed.is_terminal());
        assert!(TestStatus::Skipped.is_terminal());
        assert!(!TestStatus::Running.is_terminal());
        assert!(!TestStatus::Pending.is_terminal());
        assert!(!TestStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_result_accepts_retries_alias() {
        let result: TestResult = serde_json::from_value(json!({ "retries": 1, "status": "failed" })).unwrap();
        assert_eq!(result.retry, Some(1));
        assert_eq!(result.status, Some(TestStatus::Failed));
    }

    #[test]
    fn test_tree_preserves_order_across_removal() {
        let mut tree: StatusTree = ["a", "b", "c"]
            .iter()
            .map(|id| Test::new(*id, vec![id.to_string()]))
            .collect();

        assert!(tree.remove("a").is_some());
        tree.insert(Test::new("d", vec![]));

        let ids: Vec<&str> = tree.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d"]);
        assert_eq!(tree.get("c").map(|t| t.path.clone()), Some(vec!["c".to_string()]));
        assert!(tree.remove("a").is_none());
    }

    #[test]
    fn test_run_status_serializes_tests_as_ordered_map() {
        let mut status = RunStatus::default();
        status.tests.insert(Test::new("second", vec![]));
        status.tests.insert(Test::new("first", vec![]));

        let text = serde_json::to_string(&status).unwrap();
        assert!(text.find("second").unwrap() < text.find("first").unwrap());

        let back: RunStatus = serde_json::from_str(&text).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_summary_counts_by_status() {
        let mut status = RunStatus::default();
        for (id, state) in [
            ("a", Some(TestStatus::Success)),
            ("b", Some(TestStatus::Failed)),
            ("c", Some(TestStatus::Running)),
            ("d", None),
        ] {
            let mut test = Test::new(id, vec![]);
            test.status = state;
            status.tests.insert(test);
        }
        let mut skipped = Test::new("e", vec![]);
        skipped.skip = Skip::Reason("ie11".to_string());
        status.tests.insert(skipped);

        let summary = status.summary();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.running, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.finished(), 3);
    }
}
