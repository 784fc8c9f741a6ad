//! Status merge engine
//!
//! Folds one [`StatusUpdate`] into a [`RunStatus`], producing the next
//! status without touching the previous one. The next tree shares every test
//! the update left alone; touched tests are cloned before they change.
//!
//! Policy for a single batch:
//! - `isRunning` is applied whenever present.
//! - Tests whose path is listed in `removedTests` are deleted, and an id
//!   removed in this batch is not re-created by a later entry of the same
//!   batch (removal wins).
//! - Unknown ids are created from the update's `path`, `skip` and `storyId`.
//!   `path` and `storyId` are fixed from then on.
//! - `skip` and `status` overwrite, `results` append, `approved` merges
//!   entries that carry a retry index and ignores the rest.

use super::types::{RunStatus, StatusUpdate, Test, TestUpdate};
use std::collections::HashSet;

/// Produce the status that results from applying `update` to `previous`.
pub fn merge(previous: &RunStatus, update: &StatusUpdate) -> RunStatus {
    let mut next = previous.clone();
    apply(&mut next, update);
    next
}

fn apply(status: &mut RunStatus, update: &StatusUpdate) {
    if let Some(is_running) = update.is_running {
        status.is_running = is_running;
    }

    let removed_paths: &[Vec<String>] = update.removed_tests.as_deref().unwrap_or(&[]);
    let mut removed_ids: HashSet<String> = if removed_paths.is_empty() {
        HashSet::new()
    } else {
        status
            .tests
            .retain(|test| !removed_paths.contains(&test.path))
            .into_iter()
            .collect()
    };

    let Some(tests) = &update.tests else {
        log_removals(&removed_ids);
        return;
    };

    for (id, test_update) in tests.iter() {
        if removed_ids.contains(id) {
            continue;
        }

        if !status.tests.contains(id) {
            status.tests.insert(synthesize(id, test_update));
        }

        let removed = status
            .tests
            .get(id)
            .map_or(false, |test| removed_paths.contains(&test.path));
        if removed {
            status.tests.remove(id);
            removed_ids.insert(id.to_string());
            continue;
        }

        let Some(test_update) = test_update else {
            continue;
        };
        if !test_update.touches_fields() {
            continue;
        }
        if let Some(test) = status.tests.get_mut(id) {
            apply_fields(test, test_update);
        }
    }

    log_removals(&removed_ids);
}

fn synthesize(id: &str, update: Option<&TestUpdate>) -> Test {
    let mut test = Test::new(
        id,
        update.and_then(|u| u.path.clone()).unwrap_or_default(),
    );
    if let Some(update) = update {
        if let Some(skip) = &update.skip {
            test.skip = skip.clone();
        }
        test.story_id = update.story_id.clone();
    }
    test
}

fn apply_fields(test: &mut Test, update: &TestUpdate) {
    if let Some(skip) = &update.skip {
        test.skip = skip.clone();
    }
    if let Some(status) = update.status {
        test.status = Some(status);
    }
    if let Some(results) = &update.results {
        test.results.extend(results.iter().cloned());
    }
    if let Some(approved) = &update.approved {
        for (image, retry) in approved {
            if let Some(retry) = retry {
                test.approved.insert(image.clone(), *retry);
            }
        }
    }
}

fn log_removals(ids: &HashSet<String>) {
    if !ids.is_empty() {
        log::debug!("removed {} test(s) from status tree", ids.len());
    }
}
