use super::types::{BatchReport, CaseOutcome, CaseRecord};
use anyhow::Result;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "junit.xml";

/// Generate JUnit XML from a batch report. One `<testcase>` per case.
pub fn generate_junit_xml(report: &BatchReport) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let summary = &report.summary;
    let tests = summary.total.to_string();
    let failures = (summary.failed + summary.timed_out).to_string();
    let skipped = summary.skipped.to_string();
    let time = secs(summary.duration_ms);

    let mut suites_start = BytesStart::new("testsuites");
    suites_start.push_attribute(("name", "lumi-rail"));
    suites_start.push_attribute(("tests", tests.as_str()));
    suites_start.push_attribute(("failures", failures.as_str()));
    suites_start.push_attribute(("skipped", skipped.as_str()));
    suites_start.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(suites_start))?;

    let mut suite_start = BytesStart::new("testsuite");
    suite_start.push_attribute(("name", "testrail"));
    suite_start.push_attribute(("id", report.run_id.as_str()));
    suite_start.push_attribute(("tests", tests.as_str()));
    suite_start.push_attribute(("failures", failures.as_str()));
    suite_start.push_attribute(("skipped", skipped.as_str()));
    suite_start.push_attribute(("time", time.as_str()));
    suite_start.push_attribute(("timestamp", report.generated_at.as_str()));
    writer.write_event(Event::Start(suite_start))?;

    for case in &report.cases {
        write_test_case(&mut writer, case)?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner().into_inner())?;
    Ok(xml)
}

fn write_test_case<W: std::io::Write>(writer: &mut Writer<W>, case: &CaseRecord) -> Result<()> {
    let name = match &case.title {
        Some(title) => format!("TC{} {}", case.case_id, title),
        None => format!("TC{}", case.case_id),
    };
    let classname = case
        .flow_path
        .as_deref()
        .map(|p| p.trim_end_matches(".yaml").trim_end_matches(".yml").replace('/', "."))
        .unwrap_or_else(|| "unresolved".to_string());
    let time = secs(case.duration_ms);

    let mut case_start = BytesStart::new("testcase");
    case_start.push_attribute(("name", name.as_str()));
    case_start.push_attribute(("classname", classname.as_str()));
    case_start.push_attribute(("time", time.as_str()));
    writer.write_event(Event::Start(case_start))?;

    let message = case.message.as_deref().unwrap_or("");
    match case.outcome {
        CaseOutcome::Failure | CaseOutcome::TimedOut => {
            let first_line = message.lines().next().unwrap_or("Unknown error");
            let mut fail_start = BytesStart::new("failure");
            fail_start.push_attribute(("message", first_line));
            fail_start.push_attribute(("type", case.outcome.as_str()));
            writer.write_event(Event::Start(fail_start))?;
            writer.write_event(Event::Text(BytesText::new(message)))?;
            writer.write_event(Event::End(BytesEnd::new("failure")))?;
        }
        CaseOutcome::Skipped => {
            let mut skip = BytesStart::new("skipped");
            skip.push_attribute(("message", message));
            writer.write_event(Event::Empty(skip))?;
        }
        CaseOutcome::Success => {}
    }

    writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    Ok(())
}

fn secs(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

/// Write `junit.xml` into `output_dir`
pub fn write_report(report: &BatchReport, output_dir: &Path) -> Result<PathBuf> {
    let xml = generate_junit_xml(report)?;
    let path = output_dir.join(REPORT_FILE);
    std::fs::write(&path, xml)?;
    log::info!("Generated JUnit report: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::BatchSummary;

    fn record(case_id: &str, outcome: CaseOutcome, message: Option<&str>) -> CaseRecord {
        CaseRecord {
            case_id: case_id.to_string(),
            title: Some("Login".to_string()),
            flow_path: Some("flows/login/TC1_login.yaml".to_string()),
            outcome,
            duration_ms: 1500,
            message: message.map(String::from),
            result_id: None,
            attempts: vec![],
        }
    }

    #[test]
    fn test_generate_junit_xml() {
        let cases = vec![
            record("314800", CaseOutcome::Success, None),
            record(
                "314801",
                CaseOutcome::TimedOut,
                Some("Test timed out (exceeded 300s)"),
            ),
            CaseRecord::skipped("9", "no flow file found for TC9".to_string()),
        ];
        let report = BatchReport {
            run_id: "run-42".to_string(),
            summary: BatchSummary::from_cases("run-42", &cases, 3000),
            cases,
            generated_at: "2025-03-07 12:00:00".to_string(),
        };

        let xml = generate_junit_xml(&report).expect("Failed to generate XML");

        assert!(xml.contains(r#"<testsuites name="lumi-rail" tests="3" failures="1" skipped="1""#));
        assert!(xml.contains(r#"<testcase name="TC314800 Login" classname="flows.login.TC1_login" time="1.500">"#));
        assert!(xml.contains(r#"message="Test timed out (exceeded 300s)" type="timed_out""#));
        assert!(xml.contains(r#"<skipped message="no flow file found for TC9"/>"#));
    }
}
