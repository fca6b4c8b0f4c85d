use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// What the automation tool is asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationTarget {
    /// One named device
    Device(String),
    /// The tool fans the flow out over exactly these devices; shard k runs
    /// on the k-th serial
    Shards(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub flow: PathBuf,
    pub target: InvocationTarget,
}

impl Invocation {
    pub fn single(flow: &Path, serial: &str) -> Self {
        Self {
            flow: flow.to_path_buf(),
            target: InvocationTarget::Device(serial.to_string()),
        }
    }

    pub fn sharded(flow: &Path, serials: Vec<String>) -> Self {
        Self {
            flow: flow.to_path_buf(),
            target: InvocationTarget::Shards(serials),
        }
    }
}

/// Everything the tool printed, stdout and stderr merged in arrival order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub lines: Vec<String>,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl ToolOutput {
    pub fn combined(&self) -> String {
        self.lines.join("\n")
    }
}

/// External UI-automation program. Opaque apart from its text output.
///
/// Implementations must not outlive a cancelled `run` future: dropping it
/// has to stop the underlying process.
#[async_trait]
pub trait AutomationTool: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput>;
}

/// Maestro CLI
#[derive(Debug, Clone)]
pub struct MaestroTool {
    binary: PathBuf,
    extra_args: Vec<String>,
}

impl MaestroTool {
    pub fn new(binary: PathBuf, extra_args: Vec<String>) -> Self {
        Self { binary, extra_args }
    }

    /// `--device=<serial> test <flow>` or
    /// `--device=<s1>,<s2> test --shard-all N <flow>`
    pub fn command_args(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = Vec::new();
        match &invocation.target {
            InvocationTarget::Device(serial) => {
                args.push(format!("--device={}", serial));
                args.push("test".to_string());
            }
            InvocationTarget::Shards(serials) => {
                args.push(format!("--device={}", serials.join(",")));
                args.push("test".to_string());
                args.push("--shard-all".to_string());
                args.push(serials.len().to_string());
            }
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(invocation.flow.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl AutomationTool for MaestroTool {
    async fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput> {
        let args = self.command_args(invocation);
        log::debug!("{} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stdout = pump(child.stdout.take(), tx.clone());
        let stderr = pump(child.stderr.take(), tx);
        let collect = async {
            let mut lines = Vec::new();
            while let Some(line) = rx.recv().await {
                log::trace!("maestro: {}", line);
                lines.push(line);
            }
            lines
        };
        let (_, _, lines) = tokio::join!(stdout, stderr, collect);

        let status = child.wait().await?;
        Ok(ToolOutput {
            lines,
            exit_code: status.code(),
        })
    }
}

async fn pump<R: AsyncRead + Unpin>(reader: Option<R>, tx: mpsc::UnboundedSender<String>) {
    let Some(reader) = reader else { return };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::debug!("Tool output stream closed: {}", e);
                break;
            }
        }
    }
}
