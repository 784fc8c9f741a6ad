use super::types::RunReport;
use crate::status::{Test, TestStatus};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::Path;

/// Generate JUnit XML report string from a run report
pub fn generate_junit_xml(report: &RunReport) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let summary = &report.summary;
    let total_duration: u64 = report
        .status
        .tests
        .iter()
        .filter_map(|t| t.last_result().and_then(|r| r.duration))
        .sum();
    let time = seconds(total_duration);

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "vistest-run"));
    suites_start.push_attribute(("tests", summary.total.to_string().as_str()));
    suites_start.push_attribute(("failures", summary.failed.to_string().as_str()));
    suites_start.push_attribute(("skipped", summary.skipped.to_string().as_str()));
    suites_start.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(suites_start))?;

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", "default"));
    suite_start.push_attribute(("tests", summary.total.to_string().as_str()));
    suite_start.push_attribute(("failures", summary.failed.to_string().as_str()));
    suite_start.push_attribute(("skipped", summary.skipped.to_string().as_str()));
    suite_start.push_attribute(("id", report.run_id.as_str()));
    suite_start.push_attribute(("time", time.as_str()));
    suite_start.push_attribute(("timestamp", report.generated_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for test in report.status.tests.iter() {
        write_test_case(&mut writer, test)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_case<W: std::io::Write>(writer: &mut Writer<W>, test: &Test) -> Result<()> {
    let (name, classname) = match test.path.split_last() {
        Some((name, parents)) => (name.clone(), parents.join(".")),
        None => (test.id.clone(), String::new()),
    };
    let last = test.last_result();

    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", name.as_str()));
    case_start.push_attribute(("classname", classname.as_str()));
    case_start.push_attribute((
        "time",
        seconds(last.and_then(|r| r.duration).unwrap_or(0)).as_str(),
    ));
    writer.write_event(Event::Start(case_start))?;

    match test.status {
        Some(TestStatus::Failed) => {
            let error = last.and_then(|r| r.error.as_deref());
            let mut fail_start = BytesStart::new("failure");
            fail_start.push_attribute(("message", error.unwrap_or("Test failed")));
            fail_start.push_attribute(("type", "ImageMismatch"));
            writer.write_event(Event::Start(fail_start))?;
            if let Some(error) = error {
                writer.write_event(Event::Text(BytesText::new(error)))?;
            }
            writer.write_event(Event::End(BytesEnd::new("failure")))?;
        }
        Some(TestStatus::Skipped) => {
            writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
        }
        None if test.skip.is_skipped() => {
            let mut skipped = BytesStart::new("skipped");
            if let crate::status::Skip::Reason(reason) = &test.skip {
                skipped.push_attribute(("message", reason.as_str()));
            }
            writer.write_event(Event::Empty(skipped))?;
        }
        _ => {}
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

fn seconds(ms: u64) -> String {
    (ms as f64 / 1000.0).to_string()
}

/// Write report to file
pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let xml = generate_junit_xml(report)?;
    std::fs::write(path, xml)?;
    println!("JUnit report saved to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{RunStatus, Skip, TestResult};

    #[test]
    fn test_generate_junit_xml() {
        let mut status = RunStatus::default();

        let mut primary = Test::new("t1", vec!["Button".into(), "Primary".into()]);
        primary.status = Some(TestStatus::Success);
        primary.results.push(TestResult {
            duration: Some(1500),
            ..Default::default()
        });
        status.tests.insert(primary);

        let mut secondary = Test::new("t2", vec!["Forms".into(), "Input".into(), "Empty".into()]);
        secondary.status = Some(TestStatus::Failed);
        secondary.results.push(TestResult {
            error: Some("Expected image to match".into()),
            ..Default::default()
        });
        status.tests.insert(secondary);

        let mut ie = Test::new("t3", vec!["Card".into()]);
        ie.skip = Skip::Reason("no ie".into());
        status.tests.insert(ie);

        let xml = generate_junit_xml(&RunReport::new(status)).expect("Failed to generate XML");

        assert!(xml.contains(r#"<testsuites name="vistest-run""#));
        assert!(xml.contains(r#"tests="3""#));
        assert!(xml.contains(r#"failures="1""#));
        assert!(xml.contains(r#"skipped="1""#));
        assert!(xml.contains(r#"<testcase name="Primary" classname="Button" time="1.5">"#));
        assert!(xml.contains(r#"<testcase name="Empty" classname="Forms.Input""#));
        assert!(xml.contains(r#"message="Expected image to match""#));
        assert!(xml.contains(r#"<skipped message="no ie"/>"#));
    }
}
