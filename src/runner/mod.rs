pub mod capture;
pub mod diagnostics;
pub mod events;
pub mod executor;
pub mod output;
pub mod state;
pub mod tool;

use crate::driver::android::AdbBridge;
use crate::driver::registry::DeviceRegistry;
use crate::driver::traits::DeviceBridge;
use crate::error::CaptureFault;
use crate::parser::FlowResolver;
use crate::report::aggregate::{CaseVerdict, ResultAggregator};
use crate::report::types::{BatchReport, BatchSummary, CaseOutcome, CaseRecord};
use crate::store::ExecutionStore;
use crate::upload::{TestRailClient, UploadPipeline};
use crate::utils::binary_resolver;
use crate::utils::config::Config;
use anyhow::Result;
use capture::MitmCapture;
use chrono::Local;
use diagnostics::{LogcatHook, ScreenshotHook};
use executor::ExecutionCoordinator;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tool::MaestroTool;

pub use events::*;
pub use state::*;

/// A case to run, optionally titled by the test-management system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseRequest {
    pub case_id: String,
    pub title: Option<String>,
}

impl CaseRequest {
    pub fn new(case_id: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            title: None,
        }
    }
}

/// Per-invocation switches from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Case ids; empty means "every case of the TestRail run"
    pub cases: Vec<String>,
    /// Device serials; empty means every usable device
    pub devices: Vec<String>,
    pub skip_preflight: bool,
    pub no_upload: bool,
}

/// Drives a batch: preflight, then each case through resolve, execute,
/// aggregate, store and upload.
pub struct BatchRunner {
    resolver: FlowResolver,
    coordinator: ExecutionCoordinator,
    store: Option<ExecutionStore>,
    uploader: Option<UploadPipeline>,
    emitter: EventEmitter,
    output_dir: PathBuf,
    stop: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(
        resolver: FlowResolver,
        coordinator: ExecutionCoordinator,
        emitter: EventEmitter,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            coordinator,
            store: None,
            uploader: None,
            emitter,
            output_dir: output_dir.into(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_store(mut self, store: ExecutionStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_uploader(mut self, uploader: UploadPipeline) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Flag checked between cases; set it to stop after the current case.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the app-start case on every device. Any failure aborts the batch.
    /// A missing preflight flow is only a warning.
    pub async fn preflight(&mut self, case_id: &str, devices: &[Device]) -> Result<()> {
        let flow = match self.resolver.resolve(case_id) {
            Ok(flow) => flow,
            Err(e) => {
                self.emitter.warn(format!("Preflight skipped: {}", e));
                return Ok(());
            }
        };

        self.emitter.log(format!("Preflight TC{} on {} device(s)", case_id, devices.len()));
        let attempts = self.coordinator.run_case(&flow, devices).await;
        if let Some(store) = &self.store {
            store.record_all(&attempts).await;
        }
        let failed: Vec<String> = attempts
            .iter()
            .filter(|a| a.status.is_failure())
            .map(|a| a.device.label())
            .collect();
        self.emitter.emit(TestEvent::CaseFinished {
            case_id: case_id.to_string(),
            outcome: if failed.is_empty() {
                CaseOutcome::Success
            } else {
                CaseOutcome::Failure
            },
            duration_ms: attempts.iter().map(|a| a.elapsed_ms).max().unwrap_or(0),
        });
        if !failed.is_empty() {
            anyhow::bail!(
                "Preflight TC{} failed on {}; aborting batch",
                case_id,
                failed.join(", ")
            );
        }
        Ok(())
    }

    pub async fn run(
        &mut self,
        run_id: &str,
        cases: &[CaseRequest],
        devices: &[Device],
        preflight: Option<&str>,
    ) -> Result<BatchReport> {
        let started = Instant::now();
        self.emitter.emit(TestEvent::BatchStarted {
            run_id: run_id.to_string(),
            case_count: cases.len(),
            devices: devices.iter().map(|d| d.label()).collect(),
        });

        if let Some(case_id) = preflight {
            self.preflight(case_id, devices).await?;
        }

        let mut records = Vec::with_capacity(cases.len());
        for request in cases {
            if self.stop.load(Ordering::SeqCst) {
                self.emitter
                    .warn(format!("Interrupted; {} case(s) not run", cases.len() - records.len()));
                break;
            }
            records.push(self.run_one(request, devices).await);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let summary = BatchSummary::from_cases(run_id, &records, duration_ms);
        let report = BatchReport {
            run_id: run_id.to_string(),
            cases: records,
            summary: summary.clone(),
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        };

        if let Err(e) = crate::report::write_batch_reports(&report, &self.output_dir) {
            log::warn!("Reports not written to {}: {:#}", self.output_dir.display(), e);
        }
        self.emitter.emit(TestEvent::BatchFinished { summary });
        Ok(report)
    }

    async fn run_one(&mut self, request: &CaseRequest, devices: &[Device]) -> CaseRecord {
        let case_id = request.case_id.as_str();
        let flow = match self.resolver.resolve(case_id) {
            Ok(flow) => flow,
            Err(e) => {
                log::warn!("{}", e);
                self.emitter.emit(TestEvent::CaseSkipped {
                    case_id: case_id.to_string(),
                    reason: e.to_string(),
                });
                let mut record = CaseRecord::skipped(case_id, e.to_string());
                record.title = request.title.clone();
                return record;
            }
        };

        let attempts = self.coordinator.run_case(&flow, devices).await;
        if let Some(store) = &self.store {
            store.record_all(&attempts).await;
        }

        let verdict = ResultAggregator::aggregate(case_id, attempts);
        let result_id = match &self.uploader {
            Some(uploader) => uploader.submit(&verdict).await.ok(),
            None => None,
        };

        self.emitter.emit(TestEvent::CaseFinished {
            case_id: case_id.to_string(),
            outcome: verdict.outcome,
            duration_ms: verdict.duration_ms(),
        });

        let title = request
            .title
            .clone()
            .or_else(|| flow.metadata.as_ref().and_then(|m| m.name.clone()));
        record_from(verdict, title, flow.path.display().to_string(), result_id)
    }
}

fn record_from(
    verdict: CaseVerdict,
    title: Option<String>,
    flow_path: String,
    result_id: Option<u64>,
) -> CaseRecord {
    let message = if verdict.outcome.is_failure() {
        verdict
            .attempts
            .iter()
            .filter(|a| a.status.is_failure())
            .find_map(|a| {
                a.error_excerpt
                    .as_ref()
                    .map(|e| format!("{}: {}", a.device.label(), e))
            })
    } else {
        None
    };
    CaseRecord {
        case_id: verdict.case_id.clone(),
        title,
        flow_path: Some(flow_path),
        outcome: verdict.outcome,
        duration_ms: verdict.duration_ms(),
        message,
        result_id,
        attempts: verdict.attempts,
    }
}

/// Assemble every component from `config` and run one batch.
pub async fn run_batch(
    config: &Config,
    options: RunOptions,
    emitter: EventEmitter,
) -> Result<BatchReport> {
    let bridge: Arc<dyn DeviceBridge> = Arc::new(AdbBridge);
    let registry = DeviceRegistry::new(bridge.clone(), config.app_package.clone());

    let mut devices = Vec::new();
    for device in registry.select(&options.devices).await? {
        if registry.check_environment(&device).await {
            devices.push(device);
        } else {
            emitter.warn(format!(
                "{} left out: {} is not installed",
                device.label(),
                config.app_package
            ));
        }
    }
    if devices.is_empty() {
        anyhow::bail!("No usable Android devices");
    }

    let testrail = match (&config.testrail, options.no_upload) {
        (Some(tr), false) => match TestRailClient::new(tr) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                emitter.warn(format!("Upload disabled: {}", e));
                None
            }
        },
        _ => None,
    };

    let cases: Vec<CaseRequest> = if !options.cases.is_empty() {
        options.cases.iter().map(CaseRequest::new).collect()
    } else if let Some(client) = &testrail {
        emitter.log(format!("Fetching cases of TestRail run {}", client.run_id()));
        client
            .get_tests()
            .await?
            .into_iter()
            .map(|t| CaseRequest {
                case_id: t.case_id.to_string(),
                title: t.title,
            })
            .collect()
    } else {
        anyhow::bail!("No case ids given and no TestRail run configured");
    };

    let maestro = binary_resolver::find_maestro(config.tool.binary.as_deref())?;
    let tool = Arc::new(MaestroTool::new(maestro, config.tool.extra_args.clone()));
    let mut coordinator = ExecutionCoordinator::new(
        tool,
        &config.artifacts_root,
        config.tool.timeout(),
        emitter.clone(),
    )
    .with_hook(Arc::new(LogcatHook::new(bridge.clone())))
    .with_hook(Arc::new(ScreenshotHook::new(bridge)));

    if config.capture.enabled {
        match binary_resolver::find_mitmdump(config.capture.binary.as_deref()) {
            Ok(binary) => {
                let capture = MitmCapture::new(
                    binary,
                    config.capture.port,
                    Duration::from_millis(config.capture.warmup_ms),
                    Duration::from_secs(config.capture.grace_secs),
                    config.capture.domain.clone(),
                );
                coordinator = coordinator.with_capture(Arc::new(capture));
            }
            Err(e) => emitter.warn(format!(
                "Capture disabled: {}",
                CaptureFault::Binary(format!("{:#}", e))
            )),
        }
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let resolver = FlowResolver::new(&config.flows_root);
    let mut runner = BatchRunner::new(resolver, coordinator, emitter.clone(), &config.output_dir);

    if config.store.enabled {
        match ExecutionStore::open(&config.store.path, &run_id).await {
            Ok(store) => runner = runner.with_store(store),
            Err(e) => log::warn!("Execution log store unavailable: {}", e),
        }
    }
    if let Some(client) = testrail {
        runner = runner.with_uploader(UploadPipeline::new(client));
    }

    let stop = runner.stop_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Ctrl-C handler not installed: {}", e);
    }

    let preflight = if options.skip_preflight {
        None
    } else {
        config.preflight_case.as_deref()
    };
    runner.run(&run_id, &cases, &devices, preflight).await
}

/// Resolve a case id and print the chosen flow
pub fn resolve_case(config: &Config, case_id: &str) -> Result<()> {
    use colored::Colorize;

    let resolver = FlowResolver::new(&config.flows_root);
    for candidate in resolver.candidates(case_id)? {
        println!("  candidate {}", candidate.display().to_string().dimmed());
    }
    let flow = resolver.resolve(case_id)?;
    println!("{} TC{} -> {}", "✓".green(), case_id, flow.path.display());
    if let Some(meta) = &flow.metadata {
        if let Some(name) = &meta.name {
            println!("  name: {}", name);
        }
        if !meta.tags.is_empty() {
            println!("  tags: {}", meta.tags.join(", "));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::executor::fakes::{Script, ScriptedTool};
    use super::state::fixtures;
    use super::*;
    use tempfile::TempDir;

    const FLOW: &str = "appId: net.cj.cjhv.gs.tving\nname: Home tab\n---\n- launchApp\n";

    struct Setup {
        dir: TempDir,
        devices: Vec<Device>,
    }

    fn setup(flows: &[&str]) -> Setup {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("flows");
        std::fs::create_dir_all(&root).unwrap();
        for name in flows {
            std::fs::write(root.join(name), FLOW).unwrap();
        }
        Setup {
            dir,
            devices: vec![fixtures::device("emulator-5554", "Pixel 7")],
        }
    }

    fn runner(setup: &Setup, scripts: Vec<Script>) -> BatchRunner {
        let tool = Arc::new(ScriptedTool::new(scripts, Default::default()));
        let coordinator = ExecutionCoordinator::new(
            tool,
            setup.dir.path().join("artifacts"),
            Duration::from_secs(300),
            EventEmitter::default(),
        );
        BatchRunner::new(
            FlowResolver::new(setup.dir.path().join("flows")),
            coordinator,
            EventEmitter::default(),
            setup.dir.path().join("output"),
        )
    }

    #[tokio::test]
    async fn test_batch_records_every_case() {
        let s = setup(&["TC00000_app_start.yaml", "TC314800_home.yaml", "TC314801_player.yaml"]);
        let mut runner = runner(
            &s,
            vec![
                Script::Output(vec!["[Passed] app start"], 0),
                Script::Output(vec!["[Passed] home"], 0),
                Script::Output(vec!["Assertion is false: \"Play\" is visible"], 1),
            ],
        )
        .with_store(ExecutionStore::in_memory("run-1").await.unwrap());

        let cases = vec![
            CaseRequest::new("314800"),
            CaseRequest::new("999"),
            CaseRequest::new("314801"),
        ];
        let report = runner
            .run("run-1", &cases, &s.devices, Some("00000"))
            .await
            .unwrap();

        let outcomes: Vec<_> = report.cases.iter().map(|c| c.outcome).collect();
        assert_eq!(
            outcomes,
            vec![CaseOutcome::Success, CaseOutcome::Skipped, CaseOutcome::Failure]
        );
        assert_eq!(report.cases[0].title.as_deref(), Some("Home tab"));
        assert!(report.cases[2]
            .message
            .as_deref()
            .unwrap()
            .contains("Assertion is false"));
        assert_eq!(report.summary.passed, 1);
        assert!(report.summary.has_failures());

        let output = s.dir.path().join("output");
        assert!(output.join("report.json").exists());
        assert!(output.join("junit.xml").exists());

        let store = runner.store.as_ref().unwrap();
        // Preflight attempts are stored too
        assert_eq!(store.executions("00000").await.unwrap().len(), 1);
        assert_eq!(store.executions("314801").await.unwrap()[0].status, "failure");
    }

    #[tokio::test]
    async fn test_failed_preflight_aborts() {
        let s = setup(&["TC00000_app_start.yaml", "TC1_a.yaml"]);
        let mut runner = runner(&s, vec![Script::Output(vec!["App crashed"], 1)]);

        let err = runner
            .run("run-2", &[CaseRequest::new("1")], &s.devices, Some("00000"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Preflight TC00000 failed"));
    }

    #[tokio::test]
    async fn test_missing_preflight_flow_is_not_fatal() {
        let s = setup(&["TC1_a.yaml"]);
        let mut runner = runner(&s, vec![]);
        let report = runner
            .run("run-3", &[CaseRequest::new("1")], &s.devices, Some("00000"))
            .await
            .unwrap();
        assert_eq!(report.cases[0].outcome, CaseOutcome::Success);
    }

    #[tokio::test]
    async fn test_stop_flag_ends_batch_between_cases() {
        let s = setup(&["TC1_a.yaml", "TC2_b.yaml"]);
        let mut runner = runner(&s, vec![]);
        runner.stop_flag().store(true, Ordering::SeqCst);

        let report = runner
            .run(
                "run-4",
                &[CaseRequest::new("1"), CaseRequest::new("2")],
                &s.devices,
                None,
            )
            .await
            .unwrap();
        assert!(report.cases.is_empty());
        assert_eq!(report.summary.total, 0);
    }
}
