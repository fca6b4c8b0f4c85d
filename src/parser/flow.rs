use crate::error::ResolutionError;
use crate::runner::state::{FlowDefinition, FlowMetadata};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Directory holding reusable fragments; never a direct run target.
pub const SUB_FLOWS_DIR: &str = "sub_flows";

/// Maps case ids to flow files under a flows root.
#[derive(Debug, Clone)]
pub struct FlowResolver {
    root: PathBuf,
}

impl FlowResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `case_id` to the newest structurally valid flow.
    pub fn resolve(&self, case_id: &str) -> Result<FlowDefinition, ResolutionError> {
        let candidates = self.candidates(case_id)?;
        if candidates.is_empty() {
            return Err(ResolutionError::NotFound {
                case_id: case_id.to_string(),
            });
        }

        for path in &candidates {
            match validate_file(path) {
                Ok(metadata) => {
                    log::debug!("TC{} -> {}", case_id, path.display());
                    return Ok(FlowDefinition {
                        case_id: case_id.to_string(),
                        path: path.clone(),
                        metadata,
                    });
                }
                Err(reason) => {
                    log::warn!("Skipping invalid flow {}: {}", path.display(), reason);
                }
            }
        }

        Err(ResolutionError::Invalid {
            case_id: case_id.to_string(),
            candidates: candidates.len(),
        })
    }

    /// Every file named `TC<id>_*.yaml|yml` (raw or 6-digit padded id),
    /// outside `sub_flows`, newest modification first.
    pub fn candidates(&self, case_id: &str) -> Result<Vec<PathBuf>, ResolutionError> {
        if !self.root.is_dir() {
            return Err(ResolutionError::Scan {
                root: self.root.clone(),
                reason: "not a directory".to_string(),
            });
        }

        let prefixes: BTreeSet<String> = [
            format!("TC{}_", case_id),
            format!("TC{:0>6}_", case_id),
        ]
        .into_iter()
        .collect();

        let mut found: BTreeSet<PathBuf> = BTreeSet::new();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && e.file_name() == SUB_FLOWS_DIR))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    log::debug!("Unreadable entry under {}: {}", self.root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_yaml = path
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml");
            let name = entry.file_name().to_string_lossy();
            if is_yaml && prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                found.insert(path.to_path_buf());
            }
        }

        let mut candidates: Vec<(SystemTime, PathBuf)> = found
            .into_iter()
            .map(|p| {
                let modified = std::fs::metadata(&p)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, p)
            })
            .collect();
        // Stable on ties: the set above is already path-ordered.
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(candidates.into_iter().map(|(_, p)| p).collect())
    }
}

fn validate_file(path: &Path) -> Result<Option<FlowMetadata>, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    validate_flow(&content)
}

/// Structural check of a flow: one or more YAML documents, each a mapping
/// or a sequence. Empty documents are ignored. Returns header metadata when
/// the first document is a mapping.
pub fn validate_flow(content: &str) -> Result<Option<FlowMetadata>, String> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = serde_yaml::Value::deserialize(document).map_err(|e| e.to_string())?;
        match value {
            serde_yaml::Value::Null => continue,
            serde_yaml::Value::Mapping(_) | serde_yaml::Value::Sequence(_) => {
                documents.push(value)
            }
            other => {
                return Err(format!(
                    "document {} is a scalar ({:?})",
                    documents.len() + 1,
                    other
                ))
            }
        }
    }

    let first = documents
        .into_iter()
        .next()
        .ok_or_else(|| "no YAML document".to_string())?;

    Ok(match first {
        serde_yaml::Value::Mapping(_) => serde_yaml::from_value::<FlowMetadata>(first).ok(),
        _ => None,
    })
}
