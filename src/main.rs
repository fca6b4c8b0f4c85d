use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use lumi_rail::driver::android::AdbBridge;
use lumi_rail::driver::registry::DeviceRegistry;
use lumi_rail::runner::{ConsoleEventListener, EventEmitter, RunOptions};
use lumi_rail::utils::config::Config;
use lumi_rail::{driver, report, runner, utils};

#[derive(Parser)]
#[command(name = "lumi-rail")]
#[command(version = "0.1.0")]
#[command(about = "Run Maestro regression flows for TestRail cases on Android devices", long_about = None)]
struct Cli {
    /// Config file (defaults to ./lumi-rail.yaml when present)
    #[arg(short, long, global = true, env = "LUMI_RAIL_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of cases
    Run {
        /// Case ids (e.g. 314800 or TC314800). Empty runs the whole TestRail run.
        #[arg(value_delimiter = ',')]
        cases: Vec<String>,

        /// Device serial(s). Can be specified multiple times.
        #[arg(short, long)]
        device: Vec<String>,

        /// Do not run the app-start case first
        #[arg(long, default_value = "false")]
        skip_preflight: bool,

        /// Do not submit results to TestRail
        #[arg(long, default_value = "false")]
        no_upload: bool,

        /// Output directory for report.json and junit.xml
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List connected Android devices
    Devices,

    /// Show which flow file a case id resolves to
    Resolve {
        case_id: String,
    },

    /// Convert a saved report.json
    Report {
        /// Path to report.json
        report: PathBuf,

        /// Output format (json, junit)
        #[arg(short, long, default_value = "junit")]
        format: String,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn normalize_case_id(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("TC")
        .or_else(|| trimmed.strip_prefix("tc"))
        .unwrap_or(trimmed)
        .to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    utils::logging::init(cli.verbose);

    match cli.command {
        Commands::Run {
            cases,
            device,
            skip_preflight,
            no_upload,
            output,
        } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(dir) = output {
                config.output_dir = dir;
            }

            println!(
                "{} Running flows from: {}",
                "▶".green().bold(),
                config.flows_root.display()
            );
            if !device.is_empty() {
                println!("  Devices: {}", device.join(", ").cyan());
            }
            println!(
                "  Output: {}",
                config.output_dir.display().to_string().cyan()
            );
            if no_upload {
                println!("  Upload: {}", "Disabled".yellow());
            }

            let (emitter, receiver) = EventEmitter::new();
            let listener = tokio::spawn(ConsoleEventListener::listen(receiver));

            let options = RunOptions {
                cases: cases.iter().map(|c| normalize_case_id(c)).collect(),
                devices: device,
                skip_preflight,
                no_upload,
            };
            let result = runner::run_batch(&config, options, emitter).await;
            let _ = listener.await;

            let report = result?;
            if report.summary.has_failures() {
                std::process::exit(1);
            }
        }

        Commands::Devices => {
            let config = Config::load(cli.config.as_deref())?;
            println!("{} Listing Android devices...", "🔍".to_string().blue());
            let registry = DeviceRegistry::new(Arc::new(AdbBridge), config.app_package);
            driver::list_devices(&registry).await?;
        }

        Commands::Resolve { case_id } => {
            let config = Config::load(cli.config.as_deref())?;
            runner::resolve_case(&config, &normalize_case_id(&case_id))?;
        }

        Commands::Report {
            report: report_path,
            format,
            output,
        } => {
            println!(
                "{} Generating {} report from: {}",
                "📊".to_string().blue(),
                format.cyan(),
                report_path.display()
            );
            report::generate_report(&report_path, &format, output.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_case_id() {
        assert_eq!(normalize_case_id("TC314800"), "314800");
        assert_eq!(normalize_case_id(" 314801 "), "314801");
        assert_eq!(normalize_case_id("tc7"), "7");
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["lumi-rail", "run", "314800,314801", "-d", "emulator-5554", "--no-upload"]);
        match cli.command {
            Commands::Run { cases, device, no_upload, .. } => {
                assert_eq!(cases, vec!["314800", "314801"]);
                assert_eq!(device, vec!["emulator-5554"]);
                assert!(no_upload);
            }
            _ => panic!("expected run"),
        }
    }
}
