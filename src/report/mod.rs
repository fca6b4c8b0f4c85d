pub mod aggregate;
pub mod classify;
pub mod json;
pub mod junit;
pub mod types;

use anyhow::Result;
use std::path::Path;

/// Re-render a saved `report.json` in another format
pub fn generate_report(report_path: &Path, format: &str, output: Option<&Path>) -> Result<()> {
    let report = json::load(report_path)?;

    match format {
        "json" => json::generate(&report, output),
        "junit" => {
            let xml = junit::generate_junit_xml(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(path, xml)?;
                    log::info!("JUnit report saved to: {}", path.display());
                }
                None => println!("{}", xml),
            }
            Ok(())
        }
        _ => anyhow::bail!("Unknown format: {}", format),
    }
}

/// Write `report.json` and `junit.xml` into `output_dir`
pub fn write_batch_reports(report: &types::BatchReport, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    json::generate(report, Some(&output_dir.join(json::REPORT_FILE)))?;
    junit::write_report(report, output_dir)?;
    Ok(())
}
