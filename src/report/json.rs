use super::types::BatchReport;
use anyhow::{Context, Result};
use std::path::Path;

pub const REPORT_FILE: &str = "report.json";

/// Write the batch report as pretty JSON; prints to stdout without a path.
pub fn generate(report: &BatchReport, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;

    if let Some(path) = output {
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("JSON report saved to: {}", path.display());
    } else {
        println!("{}", json);
    }

    Ok(())
}

pub fn load(path: &Path) -> Result<BatchReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid report: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::{BatchSummary, CaseRecord};
    use tempfile::TempDir;

    #[test]
    fn test_write_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(REPORT_FILE);
        let cases = vec![CaseRecord::skipped("12", "no flow file found for TC12".to_string())];
        let report = BatchReport {
            run_id: "run-1".to_string(),
            summary: BatchSummary::from_cases("run-1", &cases, 10),
            cases,
            generated_at: "2025-03-07 10:00:00".to_string(),
        };

        generate(&report, Some(&path)).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"outcome\": \"skipped\""));

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.summary.skipped, 1);
        assert_eq!(loaded.cases[0].case_id, "12");
    }
}
