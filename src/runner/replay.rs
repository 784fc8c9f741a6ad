//! Offline replay of recorded envelopes
//!
//! A recording is a JSON Lines file: one wire message per line, exactly as a
//! worker would have written it to the controller.

use crate::bus::MessageBus;
use crate::error::{Result, VistestError};
use crate::status::{RunStatus, StatusStore};
use serde_json::Value;
use std::path::Path;

/// Parse a recording. Blank lines are skipped; invalid JSON is an error.
pub fn read_messages(path: &Path) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path).map_err(|source| VistestError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| VistestError::Json {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Deliver every recorded message to `bus`. Returns how many were
/// recognised; unknown scopes are skipped like on a live channel.
pub fn replay_into(bus: &MessageBus, path: &Path) -> Result<usize> {
    let messages = read_messages(path)?;
    let total = messages.len();
    let delivered = messages
        .into_iter()
        .filter(|message| bus.deliver(message.clone()))
        .count();
    if delivered < total {
        log::info!("skipped {} unrecognised message(s)", total - delivered);
    }
    Ok(delivered)
}

/// Fold a recording into the run status it describes.
pub fn replay_file(path: &Path) -> Result<RunStatus> {
    let bus = MessageBus::detached();
    let store = StatusStore::attach(&bus);
    replay_into(&bus, path)?;
    Ok(store.current().as_ref().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::TestStatus;
    use std::io::Write;

    fn recording(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_replay_folds_scenario() {
        let file = recording(&[
            r#"{"scope":"worker","type":"spawned","workerId":0}"#,
            r#"{"scope":"test","isRunning":true,"tests":{"t1":{"path":["A","B"],"status":"running"}}}"#,
            "",
            r#"{"scope":"test","tests":{"t1":{"status":"success","results":[{"retry":0}]}}}"#,
            r#"{"scope":"test","tests":{"t2":{"path":["A","C"],"status":"failed"}}}"#,
            r#"{"scope":"test","removedTests":[["A","C"]]}"#,
            r#"{"scope":"coverage","percent":12}"#,
        ]);

        let status = replay_file(file.path()).unwrap();
        assert!(status.is_running);
        assert_eq!(status.tests.len(), 1);
        let t1 = status.tests.get("t1").unwrap();
        assert_eq!(t1.status, Some(TestStatus::Success));
        assert_eq!(t1.results.len(), 1);
    }

    #[test]
    fn test_replay_keeps_wire_order() {
        let file = recording(&[
            r#"{"scope":"test","tests":{"zeta":{"path":["Z"]},"alpha":{"path":["A"]},"mid":null}}"#,
            r#"{"scope":"test","tests":{"beta":{"path":["B"]},"alpha":{"status":"success"}}}"#,
        ]);

        let status = replay_file(file.path()).unwrap();
        let ids: Vec<&str> = status.tests.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid", "beta"]);

        let json = serde_json::to_string(&status).unwrap();
        let zeta = json.find("\"zeta\"").unwrap();
        let alpha = json.find("\"alpha\"").unwrap();
        assert!(zeta < alpha);
    }

    #[test]
    fn test_replay_counts_recognised_messages() {
        let file = recording(&[r#"{"scope":"shutdown"}"#, r#"{"scope":"nope"}"#, "{}"]);
        let bus = MessageBus::detached();
        assert_eq!(replay_into(&bus, file.path()).unwrap(), 1);
    }

    #[test]
    fn test_invalid_json_reports_line() {
        let file = recording(&[r#"{"scope":"shutdown"}"#, "{not json"]);
        match replay_file(file.path()) {
            Err(VistestError::Json { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected JSON error, got {:?}", other.map(|s| s.tests.len())),
        }
    }
}
