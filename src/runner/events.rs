use super::state::AttemptStatus;
use crate::report::types::{BatchSummary, CaseOutcome};
use tokio::sync::broadcast;

/// Batch execution events for real-time updates
#[derive(Debug, Clone)]
pub enum TestEvent {
    // Batch events
    BatchStarted {
        run_id: String,
        case_count: usize,
        devices: Vec<String>,
    },
    BatchFinished {
        summary: BatchSummary,
    },

    // Case events
    CaseStarted {
        case_id: String,
        flow_path: String,
        shards: usize,
    },
    CaseSkipped {
        case_id: String,
        reason: String,
    },
    AttemptFinished {
        case_id: String,
        device: String,
        status: AttemptStatus,
        elapsed_ms: u64,
    },
    CaseFinished {
        case_id: String,
        outcome: CaseOutcome,
        duration_ms: u64,
    },

    // Free-form output
    Log {
        message: String,
    },
    Warning {
        message: String,
    },
}

/// Event emitter for broadcasting batch events. Cheap to clone; every
/// component that reports progress holds its own copy.
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<TestEvent>,
}

impl EventEmitter {
    pub fn new() -> (Self, broadcast::Receiver<TestEvent>) {
        let (sender, receiver) = broadcast::channel(256);
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: TestEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TestEvent> {
        self.sender.subscribe()
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(TestEvent::Log {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(TestEvent::Warning {
            message: message.into(),
        });
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }
}

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration as StdDuration;

/// Console event listener for printing real-time updates
pub struct ConsoleEventListener;

impl ConsoleEventListener {
    pub async fn listen(mut receiver: broadcast::Receiver<TestEvent>) {
        use colored::Colorize;
        use indicatif::ProgressDrawTarget;
        use std::io::IsTerminal;

        // Hidden target when piped so no escape codes end up in CI logs
        let multi = if std::io::stdout().is_terminal() {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let mut spinner: Option<ProgressBar> = None;

        loop {
            let event = match receiver.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::debug!("Console listener skipped {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            match event {
                TestEvent::BatchStarted {
                    run_id,
                    case_count,
                    devices,
                } => {
                    multi
                        .println(format!(
                            "\n{} Run {} started: {} case(s) on {}",
                            "▶".green().bold(),
                            run_id.cyan(),
                            case_count,
                            devices.join(", ")
                        ))
                        .ok();
                }

                TestEvent::CaseStarted {
                    case_id,
                    flow_path,
                    shards,
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let pb = multi.add(ProgressBar::new_spinner());
                    if let Ok(style) = ProgressStyle::default_spinner()
                        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                        .template("  {spinner} {msg} {elapsed:.dim}")
                    {
                        pb.set_style(style);
                    }
                    let target = if shards > 1 {
                        format!("{} shards", shards)
                    } else {
                        "1 device".to_string()
                    };
                    pb.set_message(format!(
                        "TC{} {} ({})",
                        case_id.white().bold(),
                        flow_path.dimmed(),
                        target
                    ));
                    pb.enable_steady_tick(StdDuration::from_millis(100));
                    spinner = Some(pb);
                }

                TestEvent::CaseSkipped { case_id, reason } => {
                    multi
                        .println(format!(
                            "  {} TC{} skipped ({})",
                            "○".yellow(),
                            case_id,
                            reason.dimmed()
                        ))
                        .ok();
                }

                TestEvent::AttemptFinished {
                    device,
                    status,
                    elapsed_ms,
                    ..
                } => {
                    let mark = match status {
                        AttemptStatus::Success => "✓".green(),
                        AttemptStatus::Failure => "✗".red(),
                        AttemptStatus::TimedOut => "⏱".yellow(),
                    };
                    multi
                        .println(format!(
                            "    {} {} {} ({:.1}s)",
                            mark,
                            device,
                            status.as_str(),
                            elapsed_ms as f64 / 1000.0
                        ))
                        .ok();
                }

                TestEvent::CaseFinished {
                    case_id,
                    outcome,
                    duration_ms,
                } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    let status_str = match outcome {
                        CaseOutcome::Success => "PASSED".green().bold(),
                        CaseOutcome::Failure => "FAILED".red().bold(),
                        CaseOutcome::TimedOut => "TIMED OUT".red().bold(),
                        CaseOutcome::Skipped => "SKIPPED".yellow().bold(),
                    };
                    multi
                        .println(format!(
                            "  {} TC{} [{}] {}ms",
                            "←".blue(),
                            case_id,
                            status_str,
                            duration_ms
                        ))
                        .ok();
                }

                TestEvent::Log { message } => {
                    multi.println(format!("      {}", message)).ok();
                }

                TestEvent::Warning { message } => {
                    multi
                        .println(format!("      {} {}", "⚠".yellow(), message.yellow()))
                        .ok();
                }

                TestEvent::BatchFinished { summary } => {
                    if let Some(pb) = spinner.take() {
                        pb.finish_and_clear();
                    }
                    // Direct stdout so the summary survives MultiProgress redraws
                    println!("\n{} Run {} finished", "■".blue().bold(), summary.run_id);
                    println!("  Total cases: {}", summary.total);
                    println!(
                        "  {} passed, {} failed, {} timed out, {} skipped",
                        summary.passed.to_string().green(),
                        summary.failed.to_string().red(),
                        summary.timed_out.to_string().red(),
                        summary.skipped.to_string().yellow()
                    );
                    println!("  Duration: {}ms", summary.duration_ms);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cloned_emitters_share_channel() {
        let (emitter, mut rx) = EventEmitter::new();
        let clone = emitter.clone();
        clone.warn("capture disabled");
        emitter.log("hello");

        assert!(matches!(
            rx.recv().await.unwrap(),
            TestEvent::Warning { message } if message == "capture disabled"
        ));
        assert!(matches!(rx.recv().await.unwrap(), TestEvent::Log { .. }));
    }

    #[test]
    fn test_emit_without_listener_is_harmless() {
        let emitter = EventEmitter::default();
        emitter.log("nobody listening");
    }
}
