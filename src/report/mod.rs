pub mod junit;
pub mod types;

pub use types::RunReport;

use crate::error::VistestError;
use anyhow::Result;
use std::path::Path;

/// Write `report` as pretty JSON to `output`, or to stdout when `None`.
pub fn write_json(report: &RunReport, output: Option<&Path>) -> crate::error::Result<()> {
    let json = serde_json::to_string_pretty(report)?;

    match output {
        Some(path) => {
            std::fs::write(path, json).map_err(|source| VistestError::Write {
                path: path.to_path_buf(),
                source,
            })?;
            println!("JSON report saved to: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Generate report from a saved run status
pub fn generate_report(status_path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let text = std::fs::read_to_string(status_path)?;
    let report = RunReport::from_json(&text)?;

    match format {
        "json" => Ok(write_json(&report, output)?),
        "junit" => match output {
            Some(path) => junit::write_report(&report, path),
            None => {
                println!("{}", junit::generate_junit_xml(&report)?);
                Ok(())
            }
        },
        _ => anyhow::bail!("Unknown format: {}", format),
    }
}
