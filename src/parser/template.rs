use chrono::{DateTime, Local};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const DATE_TOKEN: &str = "{{DATE}}";
const TIME_TOKEN: &str = "{{TIME}}";

fn recording_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"startRecording:\s*"([^"]+)""#).expect("valid startRecording regex")
    })
}

pub fn needs_rendering(content: &str) -> bool {
    content.contains(DATE_TOKEN) || content.contains(TIME_TOKEN)
}

/// Substitute `{{DATE}}` (`YYYYMMDD`) and `{{TIME}}` (`HHMMSS`).
pub fn render(content: &str, now: DateTime<Local>) -> String {
    content
        .replace(DATE_TOKEN, &now.format("%Y%m%d").to_string())
        .replace(TIME_TOKEN, &now.format("%H%M%S").to_string())
}

/// Flow file handed to the automation tool.
///
/// When the source contains template tokens, a rendered copy is written next
/// to it and removed when this value is dropped.
#[derive(Debug)]
pub struct PreparedFlow {
    path: PathBuf,
    rendered: bool,
}

impl PreparedFlow {
    pub fn prepare(source: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(source)?;
        if !needs_rendering(&content) {
            return Ok(Self {
                path: source.to_path_buf(),
                rendered: false,
            });
        }

        let content = render(&content, Local::now());

        // Recording targets must exist before the tool starts writing.
        if let Some(caps) = recording_path().captures(&content) {
            if let Some(dir) = Path::new(&caps[1]).parent() {
                if !dir.as_os_str().is_empty() {
                    std::fs::create_dir_all(dir)?;
                }
            }
        }

        let path = rendered_path(source);
        std::fs::write(&path, content)?;
        log::debug!("Rendered {} -> {}", source.display(), path.display());
        Ok(Self {
            path,
            rendered: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_rendered(&self) -> bool {
        self.rendered
    }
}

impl Drop for PreparedFlow {
    fn drop(&mut self) {
        if self.rendered {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("Failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Hidden sibling so the resolver never picks it up as a case flow.
fn rendered_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "flow".to_string());
    source.with_file_name(format!(".{}_rendered.yaml", stem))
}
