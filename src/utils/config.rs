use crate::error::{Result, VistestError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable carrying a worker's slot index.
pub const WORKER_ID_ENV: &str = "VISTEST_WORKER_ID";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Number of worker processes to spawn
    pub concurrency: usize,

    /// Where to write the final JSON report
    pub report_path: Option<PathBuf>,

    /// Where to write the JUnit report
    pub junit_path: Option<PathBuf>,

    /// Show a progress bar while tests run
    pub progress: bool,

    /// Delay between messages replayed by `emit` (ms)
    pub emit_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: 1,
            report_path: None,
            junit_path: None,
            progress: true,
            emit_delay_ms: 0,
        }
    }
}

impl Config {
    /// Load from a YAML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| VistestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| VistestError::Config {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency: 4\nreportPath: out/report.json").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.report_path, Some(PathBuf::from("out/report.json")));
        assert!(config.progress);
        assert_eq!(config.junit_path, None);
    }

    #[test]
    fn test_load_reports_bad_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "concurrency: [oops").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(VistestError::Config { .. })
        ));
    }
}
