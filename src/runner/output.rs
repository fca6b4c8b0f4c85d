//! Interpretation of automation-tool text output.
//!
//! Lines are classified as shard-tagged (`[shard N] ...`) or untagged and
//! demultiplexed into per-device buffers. Untagged lines only ever land in
//! the global buffer, which is kept for diagnostics and never attributed to
//! a device.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Literal markers that mean a flow passed
pub const PASS_MARKERS: [&str; 2] = ["[Passed]", "Flow Passed"];

const FAIL_MARKER: &str = "[Failed]";

/// Substrings that identify an error line in tool output
const ERROR_KEYWORDS: [&str; 5] = ["FAILED", "Error", "Exception", "Assertion", "[Failed]"];

const EXCERPT_LIMIT: usize = 500;
const TAIL_LINES: usize = 10;

fn shard_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\[shard (\d+)\]\s?(.*)$").expect("valid shard regex"))
}

/// Classification of a single output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Line prefixed with `[shard N]` (1-based index), prefix stripped
    Tagged { shard: usize, text: &'a str },
    Untagged(&'a str),
}

pub fn classify_line(line: &str) -> LineKind<'_> {
    if let Some(caps) = shard_tag().captures(line) {
        if let Ok(shard) = caps[1].parse::<usize>() {
            let text = caps.get(2).map_or("", |m| m.as_str());
            return LineKind::Tagged { shard, text };
        }
    }
    LineKind::Untagged(line)
}

/// Explicit pass/fail marker seen on a shard-tagged line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardMarker {
    Passed,
    Failed,
}

/// Per-device accumulator for interleaved sharded output
#[derive(Debug, Clone, Default)]
pub struct ShardDemux {
    shards: usize,
    buffers: BTreeMap<usize, Vec<String>>,
    markers: BTreeMap<usize, ShardMarker>,
    global: Vec<String>,
}

impl ShardDemux {
    pub fn new(shards: usize) -> Self {
        Self {
            shards,
            ..Default::default()
        }
    }

    pub fn push(&mut self, line: &str) {
        match classify_line(line) {
            LineKind::Tagged { shard, text } if (1..=self.shards).contains(&shard) => {
                if let Some(marker) = marker_in(text) {
                    // A failure on any line of the shard is final.
                    let entry = self.markers.entry(shard).or_insert(marker);
                    if marker == ShardMarker::Failed {
                        *entry = ShardMarker::Failed;
                    }
                }
                self.buffers
                    .entry(shard)
                    .or_default()
                    .push(text.to_string());
            }
            _ => self.global.push(line.to_string()),
        }
    }

    pub fn extend<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        for line in lines {
            self.push(line);
        }
    }

    /// Lines attributed to shard `shard` (1-based)
    pub fn device_output(&self, shard: usize) -> String {
        self.buffers
            .get(&shard)
            .map(|lines| lines.join("\n"))
            .unwrap_or_default()
    }

    pub fn global_output(&self) -> String {
        self.global.join("\n")
    }

    pub fn marker(&self, shard: usize) -> Option<ShardMarker> {
        self.markers.get(&shard).copied()
    }

    pub fn has_markers(&self) -> bool {
        !self.markers.is_empty()
    }
}

fn marker_in(text: &str) -> Option<ShardMarker> {
    if text.contains(FAIL_MARKER) {
        Some(ShardMarker::Failed)
    } else if text.contains(PASS_MARKERS[0]) {
        Some(ShardMarker::Passed)
    } else {
        None
    }
}

pub fn has_pass_marker(output: &str) -> bool {
    PASS_MARKERS.iter().any(|m| output.contains(m))
}

/// Outcome of the status policy for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Determination {
    /// Explicit shard marker or pass literal
    Passed,
    /// Exit code zero without any pass literal
    PassedByExitCode,
    Failed,
}

impl Determination {
    pub fn is_pass(&self) -> bool {
        !matches!(self, Determination::Failed)
    }
}

/// Apply the status policy.
///
/// A shard marker for the device is authoritative. Otherwise a pass literal
/// in `output` or a zero exit code is a pass; anything else fails.
pub fn determine_status(
    marker: Option<ShardMarker>,
    output: &str,
    exit_code: Option<i32>,
) -> Determination {
    match marker {
        Some(ShardMarker::Passed) => Determination::Passed,
        Some(ShardMarker::Failed) => Determination::Failed,
        None if has_pass_marker(output) => Determination::Passed,
        None if exit_code == Some(0) => Determination::PassedByExitCode,
        None => Determination::Failed,
    }
}

/// Pull the meaningful error lines out of tool output, falling back to the
/// last lines when nothing matches. Capped at 500 characters.
pub fn extract_error_excerpt(output: &str) -> String {
    let error_lines: Vec<&str> = output
        .lines()
        .map(str::trim)
        .filter(|l| ERROR_KEYWORDS.iter().any(|k| l.contains(k)))
        .collect();

    let excerpt = if error_lines.is_empty() {
        let lines: Vec<&str> = output.lines().collect();
        let start = lines.len().saturating_sub(TAIL_LINES);
        lines[start..].join("\n").trim().to_string()
    } else {
        error_lines.join("\n")
    };

    truncate_chars(&excerpt, EXCERPT_LIMIT)
}

pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
