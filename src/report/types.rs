use crate::status::{RunStatus, StatusSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final run status plus the metadata written alongside it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub generated_at: String,
    pub status: RunStatus,
    pub summary: StatusSummary,
}

impl RunReport {
    pub fn new(status: RunStatus) -> Self {
        let summary = status.summary();
        Self {
            run_id: Uuid::new_v4().to_string(),
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status,
            summary,
        }
    }

    /// Accepts either a saved report or a bare run status.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("runId").is_some() {
            serde_json::from_value(value)
        } else {
            serde_json::from_value(value).map(Self::new)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_accepts_bare_status() {
        let report = RunReport::from_json(
            r#"{"isRunning":false,"tests":{"t1":{"id":"t1","path":["A"],"status":"failed"}}}"#,
        )
        .unwrap();
        assert_eq!(report.summary.failed, 1);
        assert!(!report.run_id.is_empty());

        let saved = serde_json::to_string(&report).unwrap();
        let reloaded = RunReport::from_json(&saved).unwrap();
        assert_eq!(reloaded.run_id, report.run_id);
        assert_eq!(reloaded.status, report.status);
    }
}
